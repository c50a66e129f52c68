//! [`Authenticator`] implementation backed by the domain service.

use async_trait::async_trait;
use authn_resolver_sdk::{AuthNError, AuthenticationResult, Authenticator, Credentials};
use secrecy::ExposeSecret;

use super::service::Service;

#[async_trait]
impl Authenticator for Service {
    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<Option<AuthenticationResult>, AuthNError> {
        let Some(token) = credentials.bearer_token.as_ref() else {
            return Ok(None);
        };
        let token = token.expose_secret();
        if token.is_empty() {
            return Err(AuthNError::Unauthorized("empty bearer token".to_owned()));
        }
        self.authenticate(token)
            .map(|user| Some(AuthenticationResult { user }))
            .ok_or_else(|| AuthNError::Unauthorized("invalid token".to_owned()))
    }
}
