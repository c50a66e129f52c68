//! Error types for the API registry.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The requested API/storage version is not served.
    #[error("unsupported storage version: {requested} (valid: {})", known.join(", "))]
    UnsupportedVersion {
        requested: String,
        known: Vec<String>,
    },

    /// No mapper knows the kind in the requested version.
    #[error("no REST mapping for kind \"{kind}\" in version \"{version}\"")]
    NoMapping { kind: String, version: String },

    /// No mapper serves the URL resource name.
    #[error("no kind is registered for resource \"{resource}\"")]
    NoResource { resource: String },

    /// The same (kind, version) pair was registered twice with different settings.
    #[error("conflicting REST mapping for kind \"{kind}\" in version \"{version}\"")]
    ConflictingMapping { kind: String, version: String },

    /// The kind is not known to the scheme for the version.
    #[error("kind \"{kind}\" is not registered in version \"{version}\"")]
    UnknownKind { kind: String, version: String },

    #[error("codec error: {0}")]
    Codec(String),
}

impl From<serde_json::Error> for RegistryError {
    fn from(e: serde_json::Error) -> Self {
        Self::Codec(e.to_string())
    }
}
