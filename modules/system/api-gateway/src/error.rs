use api_registry::RegistryError;
use thiserror::Error;

/// Conditions that stop the master from starting.
#[derive(Debug, Error)]
pub enum AssemblyError {
    /// Unsupported storage version or a resource without a REST mapping.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("invalid CORS allowed origin \"{pattern}\": {source}")]
    InvalidCorsOrigin {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("unable to load TLS material from {path}: {reason}")]
    Tls { path: String, reason: String },

    /// The protected API must declare exactly one current-user route.
    #[error("expected exactly one current user route under {prefix}, found {found}")]
    CurrentUserRoute { prefix: String, found: usize },

    #[error("route {method} {path} is registered twice")]
    DuplicateRoute { method: String, path: String },

    #[error("route path \"{0}\" must start with '/'")]
    InvalidRoutePath(String),

    #[error("unable to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("OPENSHIFT_DEFAULT_REGISTRY variable is invalid \"{template}\": {reason}")]
    InvalidRegistryTemplate { template: String, reason: String },

    #[error("no resource backend is configured for {kind}")]
    MissingBackend { kind: String },

    #[error("invalid address \"{addr}\": {reason}")]
    InvalidAddress { addr: String, reason: String },

    #[error("unable to read assets from {path}: {source}")]
    Assets {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
