use std::sync::Arc;

use async_trait::async_trait;
use authz_resolver_sdk::{Policy, PolicyBinding, PolicyStore};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::backend::{BackendError, ResourceBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PolicyKind {
    Policy,
    PolicyBinding,
}

/// Serves `policies` or `policyBindings` from the store the authorizer reads,
/// so rule changes take effect on the next request.
pub struct PolicyBackend {
    store: Arc<dyn PolicyStore>,
    kind: PolicyKind,
}

impl PolicyBackend {
    #[must_use]
    pub fn policies(store: Arc<dyn PolicyStore>) -> Self {
        Self {
            store,
            kind: PolicyKind::Policy,
        }
    }

    #[must_use]
    pub fn policy_bindings(store: Arc<dyn PolicyStore>) -> Self {
        Self {
            store,
            kind: PolicyKind::PolicyBinding,
        }
    }
}

pub(super) fn to_value<T: Serialize>(obj: &T) -> Result<Value, BackendError> {
    serde_json::to_value(obj).map_err(|e| BackendError::Internal(e.to_string()))
}

pub(super) fn from_value<T: DeserializeOwned>(obj: Value) -> Result<T, BackendError> {
    serde_json::from_value(obj).map_err(|e| BackendError::Invalid(e.to_string()))
}

/// The object's name must be empty or equal to the addressed one.
pub(super) fn check_name(found: &mut String, name: &str) -> Result<(), BackendError> {
    if found.is_empty() {
        name.clone_into(found);
    } else if found != name {
        return Err(BackendError::Invalid(format!(
            "name \"{found}\" does not match the requested name \"{name}\""
        )));
    }
    Ok(())
}

#[async_trait]
impl ResourceBackend for PolicyBackend {
    fn resource(&self) -> &str {
        match self.kind {
            PolicyKind::Policy => "policies",
            PolicyKind::PolicyBinding => "policyBindings",
        }
    }

    async fn list(&self, namespace: &str) -> Result<Vec<Value>, BackendError> {
        match self.kind {
            PolicyKind::Policy => self
                .store
                .list_policies(namespace)
                .await?
                .iter()
                .map(to_value)
                .collect(),
            PolicyKind::PolicyBinding => self
                .store
                .list_policy_bindings(namespace)
                .await?
                .iter()
                .map(to_value)
                .collect(),
        }
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Value, BackendError> {
        match self.kind {
            PolicyKind::Policy => to_value(&self.store.get_policy(namespace, name).await?),
            PolicyKind::PolicyBinding => {
                to_value(&self.store.get_policy_binding(namespace, name).await?)
            }
        }
    }

    async fn create(&self, namespace: &str, obj: Value) -> Result<Value, BackendError> {
        match self.kind {
            PolicyKind::Policy => {
                let mut policy: Policy = from_value(obj)?;
                namespace.clone_into(&mut policy.metadata.namespace);
                to_value(&self.store.create_policy(policy).await?)
            }
            PolicyKind::PolicyBinding => {
                let mut binding: PolicyBinding = from_value(obj)?;
                namespace.clone_into(&mut binding.metadata.namespace);
                to_value(&self.store.create_policy_binding(binding).await?)
            }
        }
    }

    async fn update(&self, namespace: &str, name: &str, obj: Value) -> Result<Value, BackendError> {
        match self.kind {
            PolicyKind::Policy => {
                let mut policy: Policy = from_value(obj)?;
                check_name(&mut policy.metadata.name, name)?;
                namespace.clone_into(&mut policy.metadata.namespace);
                to_value(&self.store.update_policy(policy).await?)
            }
            PolicyKind::PolicyBinding => {
                let mut binding: PolicyBinding = from_value(obj)?;
                check_name(&mut binding.metadata.name, name)?;
                namespace.clone_into(&mut binding.metadata.namespace);
                to_value(&self.store.update_policy_binding(binding).await?)
            }
        }
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), BackendError> {
        match self.kind {
            PolicyKind::Policy => self.store.delete_policy(namespace, name).await?,
            PolicyKind::PolicyBinding => self.store.delete_policy_binding(namespace, name).await?,
        }
        Ok(())
    }
}
