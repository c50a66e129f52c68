//! Error types for request authentication.

use thiserror::Error;

/// Errors that can occur while authenticating a request.
#[derive(Debug, Error)]
pub enum AuthNError {
    /// The credentials are invalid, expired, or malformed.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}
