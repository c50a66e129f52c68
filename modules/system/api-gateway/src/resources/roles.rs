//! Roles and role bindings, served as views into the policy objects that
//! hold them.
//!
//! A role lives in `Policy.roles` of its namespace's [`POLICY_NAME`] policy.
//! A role binding lives in `PolicyBinding.role_bindings` of the policy
//! binding in its namespace named after the role's namespace. Writes go
//! straight to the store the authorizer reads.

use std::sync::Arc;

use async_trait::async_trait;
use authz_resolver_sdk::{POLICY_NAME, Policy, PolicyBinding, PolicyStore, Role, RoleBinding};
use serde_json::Value;
use tokio::sync::Mutex;

use super::backend::{BackendError, ResourceBackend};
use super::policy::{check_name, from_value, to_value};

const ROLES: &str = "roles";
const ROLE_BINDINGS: &str = "roleBindings";

fn not_found(resource: &str, name: &str) -> BackendError {
    BackendError::NotFound {
        resource: resource.to_owned(),
        name: name.to_owned(),
    }
}

fn require_name(resource: &str, name: &str) -> Result<(), BackendError> {
    if name.is_empty() {
        return Err(BackendError::Invalid(format!("{resource} must have a name")));
    }
    Ok(())
}

/// `roles` over the roles of each namespace's default policy.
pub struct RoleBackend {
    store: Arc<dyn PolicyStore>,
    // read-modify-write of a policy
    writes: Mutex<()>,
}

impl RoleBackend {
    #[must_use]
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self {
            store,
            writes: Mutex::new(()),
        }
    }

    async fn policy(&self, namespace: &str) -> Result<Option<Policy>, BackendError> {
        match self.store.get_policy(namespace, POLICY_NAME).await {
            Ok(policy) => Ok(Some(policy)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ResourceBackend for RoleBackend {
    fn resource(&self) -> &str {
        ROLES
    }

    async fn list(&self, namespace: &str) -> Result<Vec<Value>, BackendError> {
        self.store
            .list_policies(namespace)
            .await?
            .iter()
            .filter(|policy| policy.name() == POLICY_NAME)
            .flat_map(|policy| policy.roles.values())
            .map(to_value)
            .collect()
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Value, BackendError> {
        let policy = self.policy(namespace).await?;
        let role = policy
            .as_ref()
            .and_then(|policy| policy.roles.get(name))
            .ok_or_else(|| not_found(ROLES, name))?;
        to_value(role)
    }

    async fn create(&self, namespace: &str, obj: Value) -> Result<Value, BackendError> {
        let mut role: Role = from_value(obj)?;
        require_name(ROLES, &role.metadata.name)?;
        namespace.clone_into(&mut role.metadata.namespace);

        let _writes = self.writes.lock().await;
        let created = match self.policy(namespace).await? {
            Some(policy) => {
                if policy.roles.contains_key(&role.metadata.name) {
                    return Err(BackendError::AlreadyExists {
                        resource: ROLES.to_owned(),
                        name: role.metadata.name,
                    });
                }
                self.store.update_policy(policy.with_role(role.clone())).await?;
                role
            }
            None => {
                let policy = Policy::new(namespace, POLICY_NAME).with_role(role.clone());
                self.store.create_policy(policy).await?;
                role
            }
        };
        tracing::debug!(namespace, role = %created.metadata.name, "Role created");
        to_value(&created)
    }

    async fn update(&self, namespace: &str, name: &str, obj: Value) -> Result<Value, BackendError> {
        let mut role: Role = from_value(obj)?;
        check_name(&mut role.metadata.name, name)?;
        namespace.clone_into(&mut role.metadata.namespace);

        let _writes = self.writes.lock().await;
        let mut policy = self
            .policy(namespace)
            .await?
            .filter(|policy| policy.roles.contains_key(name))
            .ok_or_else(|| not_found(ROLES, name))?;
        policy.roles.insert(name.to_owned(), role.clone());
        self.store.update_policy(policy).await?;
        to_value(&role)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), BackendError> {
        let _writes = self.writes.lock().await;
        let mut policy = self
            .policy(namespace)
            .await?
            .ok_or_else(|| not_found(ROLES, name))?;
        if policy.roles.remove(name).is_none() {
            return Err(not_found(ROLES, name));
        }
        self.store.update_policy(policy).await?;
        Ok(())
    }
}

/// `roleBindings` over the role bindings of each namespace's policy
/// bindings.
///
/// A binding whose `roleRef` names no namespace refers to a role of its own
/// namespace.
pub struct RoleBindingBackend {
    store: Arc<dyn PolicyStore>,
    writes: Mutex<()>,
}

impl RoleBindingBackend {
    #[must_use]
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self {
            store,
            writes: Mutex::new(()),
        }
    }

    /// The policy binding in `namespace` holding the role binding `name`.
    async fn holder(&self, namespace: &str, name: &str) -> Result<Option<PolicyBinding>, BackendError> {
        Ok(self
            .store
            .list_policy_bindings(namespace)
            .await?
            .into_iter()
            .find(|pb| pb.role_bindings.contains_key(name)))
    }

    /// Store `binding` in the policy binding for its role's namespace,
    /// creating that policy binding when missing.
    async fn insert(&self, namespace: &str, binding: RoleBinding) -> Result<(), BackendError> {
        let policy_namespace = binding.role_ref.namespace.clone();
        match self.store.get_policy_binding(namespace, &policy_namespace).await {
            Ok(holder) => {
                self.store
                    .update_policy_binding(holder.with_role_binding(binding))
                    .await?;
            }
            Err(e) if e.is_not_found() => {
                let holder = PolicyBinding::new(namespace, &policy_namespace).with_role_binding(binding);
                self.store.create_policy_binding(holder).await?;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    fn incoming(namespace: &str, obj: Value) -> Result<RoleBinding, BackendError> {
        let mut binding: RoleBinding = from_value(obj)?;
        namespace.clone_into(&mut binding.metadata.namespace);
        if binding.role_ref.name.is_empty() {
            return Err(BackendError::Invalid("roleRef must name a role".to_owned()));
        }
        if binding.role_ref.namespace.is_empty() {
            namespace.clone_into(&mut binding.role_ref.namespace);
        }
        Ok(binding)
    }
}

#[async_trait]
impl ResourceBackend for RoleBindingBackend {
    fn resource(&self) -> &str {
        ROLE_BINDINGS
    }

    async fn list(&self, namespace: &str) -> Result<Vec<Value>, BackendError> {
        self.store
            .list_policy_bindings(namespace)
            .await?
            .iter()
            .flat_map(|pb| pb.role_bindings.values())
            .map(to_value)
            .collect()
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Value, BackendError> {
        let holder = self.holder(namespace, name).await?;
        let binding = holder
            .as_ref()
            .and_then(|pb| pb.role_bindings.get(name))
            .ok_or_else(|| not_found(ROLE_BINDINGS, name))?;
        to_value(binding)
    }

    async fn create(&self, namespace: &str, obj: Value) -> Result<Value, BackendError> {
        let binding = Self::incoming(namespace, obj)?;
        require_name(ROLE_BINDINGS, &binding.metadata.name)?;

        let _writes = self.writes.lock().await;
        if self.holder(namespace, &binding.metadata.name).await?.is_some() {
            return Err(BackendError::AlreadyExists {
                resource: ROLE_BINDINGS.to_owned(),
                name: binding.metadata.name,
            });
        }
        self.insert(namespace, binding.clone()).await?;
        tracing::debug!(
            namespace,
            binding = %binding.metadata.name,
            role = %binding.role_ref.name,
            "Role binding created"
        );
        to_value(&binding)
    }

    async fn update(&self, namespace: &str, name: &str, obj: Value) -> Result<Value, BackendError> {
        let mut binding = Self::incoming(namespace, obj)?;
        check_name(&mut binding.metadata.name, name)?;

        let _writes = self.writes.lock().await;
        let mut holder = self
            .holder(namespace, name)
            .await?
            .ok_or_else(|| not_found(ROLE_BINDINGS, name))?;
        if holder.metadata.name == binding.role_ref.namespace {
            holder.role_bindings.insert(name.to_owned(), binding.clone());
            self.store.update_policy_binding(holder).await?;
        } else {
            // the role moved to another namespace's policy
            holder.role_bindings.remove(name);
            self.store.update_policy_binding(holder).await?;
            self.insert(namespace, binding.clone()).await?;
        }
        to_value(&binding)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), BackendError> {
        let _writes = self.writes.lock().await;
        let mut holder = self
            .holder(namespace, name)
            .await?
            .ok_or_else(|| not_found(ROLE_BINDINGS, name))?;
        holder.role_bindings.remove(name);
        self.store.update_policy_binding(holder).await?;
        Ok(())
    }
}
