//! Domain models for request authentication.

use meridian_security::UserInfo;
use secrecy::SecretString;

/// Credentials extracted from a request by the gateway.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// Bearer token from the `Authorization` header or the `access_token`
    /// query parameter.
    pub bearer_token: Option<SecretString>,
}

impl Credentials {
    #[must_use]
    pub fn bearer(token: &str) -> Self {
        Self {
            bearer_token: Some(SecretString::from(token.to_owned())),
        }
    }

    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }
}

/// Result of a successful authentication.
#[derive(Debug, Clone)]
pub struct AuthenticationResult {
    /// The acting user, including the groups it belongs to.
    pub user: UserInfo,
}
