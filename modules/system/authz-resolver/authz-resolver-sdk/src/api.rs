//! Public API traits for the authorization pipeline.

use async_trait::async_trait;

use crate::error::{AuthorizationError, PolicyStoreError};
use crate::models::{AuthorizationAttributes, Decision, Policy, PolicyBinding};

/// Decides whether a request described by [`AuthorizationAttributes`] may proceed.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Evaluate one request.
    ///
    /// A denial is `Ok(Decision { allowed: false, .. })`.
    ///
    /// # Errors
    /// Returns [`AuthorizationError`] when the rules could not be read.
    async fn authorize(
        &self,
        attributes: &AuthorizationAttributes,
    ) -> Result<Decision, AuthorizationError>;
}

/// Namespaced storage of policies and policy bindings.
///
/// "Missing" is always reported as [`PolicyStoreError::NotFound`].
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// # Errors
    /// [`PolicyStoreError::NotFound`] if absent.
    async fn get_policy(&self, namespace: &str, name: &str) -> Result<Policy, PolicyStoreError>;

    /// # Errors
    /// [`PolicyStoreError::AlreadyExists`] if a policy with the same name exists.
    async fn create_policy(&self, policy: Policy) -> Result<Policy, PolicyStoreError>;

    /// # Errors
    /// [`PolicyStoreError::NotFound`] if absent.
    async fn update_policy(&self, policy: Policy) -> Result<Policy, PolicyStoreError>;

    /// # Errors
    /// [`PolicyStoreError::NotFound`] if absent.
    async fn delete_policy(&self, namespace: &str, name: &str) -> Result<(), PolicyStoreError>;

    /// # Errors
    /// [`PolicyStoreError::Internal`] on store failure.
    async fn list_policies(&self, namespace: &str) -> Result<Vec<Policy>, PolicyStoreError>;

    /// # Errors
    /// [`PolicyStoreError::NotFound`] if absent.
    async fn get_policy_binding(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PolicyBinding, PolicyStoreError>;

    /// # Errors
    /// [`PolicyStoreError::AlreadyExists`] if a binding with the same name exists.
    async fn create_policy_binding(
        &self,
        binding: PolicyBinding,
    ) -> Result<PolicyBinding, PolicyStoreError>;

    /// # Errors
    /// [`PolicyStoreError::NotFound`] if absent.
    async fn update_policy_binding(
        &self,
        binding: PolicyBinding,
    ) -> Result<PolicyBinding, PolicyStoreError>;

    /// # Errors
    /// [`PolicyStoreError::NotFound`] if absent.
    async fn delete_policy_binding(&self, namespace: &str, name: &str)
    -> Result<(), PolicyStoreError>;

    /// # Errors
    /// [`PolicyStoreError::Internal`] on store failure.
    async fn list_policy_bindings(
        &self,
        namespace: &str,
    ) -> Result<Vec<PolicyBinding>, PolicyStoreError>;
}
