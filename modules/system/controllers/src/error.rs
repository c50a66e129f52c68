use thiserror::Error;

/// Errors returned by a [`ResourceClient`](crate::ResourceClient).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("{resource} {namespace}/{name} not found")]
    NotFound {
        resource: String,
        namespace: String,
        name: String,
    },

    #[error("{resource} {namespace}/{name} already exists")]
    AlreadyExists {
        resource: String,
        namespace: String,
        name: String,
    },

    #[error("invalid {resource}: {reason}")]
    Invalid { resource: String, reason: String },

    #[error("resource API unavailable: {0}")]
    Unavailable(String),
}

impl ClientError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

/// Errors returned by a controller [`Handler`](crate::Handler).
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The resource API failed; the object is handed over again on the
    /// next resync.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The object can never be handled as it is; it is skipped until it
    /// changes.
    #[error("{0}")]
    Invalid(String),
}

impl HandlerError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Client(_))
    }
}

impl From<api_registry::RegistryError> for HandlerError {
    fn from(e: api_registry::RegistryError) -> Self {
        Self::Invalid(e.to_string())
    }
}
