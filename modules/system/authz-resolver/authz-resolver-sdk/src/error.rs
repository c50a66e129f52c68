//! Error types for the authorization pipeline.

use thiserror::Error;

/// Errors returned by a [`crate::PolicyStore`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyStoreError {
    /// The requested object does not exist.
    #[error("{kind} \"{name}\" not found in namespace \"{namespace}\"")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    /// An object with the same name already exists.
    #[error("{kind} \"{name}\" already exists in namespace \"{namespace}\"")]
    AlreadyExists {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    /// The object is malformed (e.g. missing name).
    #[error("invalid {kind}: {reason}")]
    Invalid { kind: &'static str, reason: String },

    /// The store itself failed.
    #[error("policy store error: {0}")]
    Internal(String),
}

impl PolicyStoreError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors raised while deriving authorization attributes from a request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AttributesError {
    /// The path does not follow the versioned resource grammar.
    #[error("request path does not match the resource path grammar")]
    NoStandardParts,

    /// No acting user was recorded for the request.
    #[error("no user found for request")]
    NoUser,

    /// The HTTP method has no verb equivalent.
    #[error("unsupported request method {0}")]
    UnsupportedMethod(String),

    /// The request names more than one namespace.
    #[error("request names more than one namespace")]
    AmbiguousNamespace,
}

/// Errors raised while evaluating a decision.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthorizationError {
    #[error("unable to read authorization rules: {0}")]
    Store(#[from] PolicyStoreError),
}
