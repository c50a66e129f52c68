//! Public API trait for request authentication.

use async_trait::async_trait;

use crate::error::AuthNError;
use crate::models::{AuthenticationResult, Credentials};

/// Resolves request credentials to the acting user.
///
/// Implementations must be safe to call concurrently from every in-flight
/// request.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Authenticate the credentials of one request.
    ///
    /// Returns `Ok(None)` when the credentials are absent or not recognized.
    ///
    /// # Errors
    ///
    /// - `Unauthorized` if the credentials are recognized but rejected
    /// - `Internal` for unexpected errors
    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<Option<AuthenticationResult>, AuthNError>;
}
