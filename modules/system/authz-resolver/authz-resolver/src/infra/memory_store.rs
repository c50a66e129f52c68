//! In-memory [`PolicyStore`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use authz_resolver_sdk::{ObjectMeta, Policy, PolicyBinding, PolicyStore, PolicyStoreError};
use parking_lot::RwLock;

type Key = (String, String);

/// Policy store kept in process memory.
///
/// Stamps a monotonically increasing `resourceVersion` on every write and
/// counts create calls so callers can observe bootstrap behavior.
#[derive(Debug, Default)]
pub struct InMemoryPolicyStore {
    policies: RwLock<BTreeMap<Key, Policy>>,
    bindings: RwLock<BTreeMap<Key, PolicyBinding>>,
    revision: AtomicU64,
    policy_creates: AtomicUsize,
    binding_creates: AtomicUsize,
}

impl InMemoryPolicyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `create_policy` calls that stored an object.
    #[must_use]
    pub fn policy_creates(&self) -> usize {
        self.policy_creates.load(Ordering::Acquire)
    }

    /// Number of `create_policy_binding` calls that stored an object.
    #[must_use]
    pub fn binding_creates(&self) -> usize {
        self.binding_creates.load(Ordering::Acquire)
    }

    fn stamp(&self, meta: &mut ObjectMeta) {
        let rev = self.revision.fetch_add(1, Ordering::AcqRel) + 1;
        meta.resource_version = Some(rev.to_string());
    }

    fn key(kind: &'static str, meta: &ObjectMeta) -> Result<Key, PolicyStoreError> {
        if meta.name.is_empty() {
            return Err(PolicyStoreError::Invalid {
                kind,
                reason: "name is required".to_owned(),
            });
        }
        Ok((meta.namespace.clone(), meta.name.clone()))
    }

    fn not_found(kind: &'static str, namespace: &str, name: &str) -> PolicyStoreError {
        PolicyStoreError::NotFound {
            kind,
            namespace: namespace.to_owned(),
            name: name.to_owned(),
        }
    }

    fn exists(kind: &'static str, key: &Key) -> PolicyStoreError {
        PolicyStoreError::AlreadyExists {
            kind,
            namespace: key.0.clone(),
            name: key.1.clone(),
        }
    }
}

const POLICY: &str = "policy";
const POLICY_BINDING: &str = "policyBinding";

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn get_policy(&self, namespace: &str, name: &str) -> Result<Policy, PolicyStoreError> {
        self.policies
            .read()
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned()
            .ok_or_else(|| Self::not_found(POLICY, namespace, name))
    }

    async fn create_policy(&self, mut policy: Policy) -> Result<Policy, PolicyStoreError> {
        let key = Self::key(POLICY, &policy.metadata)?;
        let mut policies = self.policies.write();
        if policies.contains_key(&key) {
            return Err(Self::exists(POLICY, &key));
        }
        self.stamp(&mut policy.metadata);
        policies.insert(key, policy.clone());
        self.policy_creates.fetch_add(1, Ordering::AcqRel);
        Ok(policy)
    }

    async fn update_policy(&self, mut policy: Policy) -> Result<Policy, PolicyStoreError> {
        let key = Self::key(POLICY, &policy.metadata)?;
        let mut policies = self.policies.write();
        let Some(slot) = policies.get_mut(&key) else {
            return Err(Self::not_found(POLICY, &key.0, &key.1));
        };
        self.stamp(&mut policy.metadata);
        *slot = policy.clone();
        Ok(policy)
    }

    async fn delete_policy(&self, namespace: &str, name: &str) -> Result<(), PolicyStoreError> {
        self.policies
            .write()
            .remove(&(namespace.to_owned(), name.to_owned()))
            .map(drop)
            .ok_or_else(|| Self::not_found(POLICY, namespace, name))
    }

    async fn list_policies(&self, namespace: &str) -> Result<Vec<Policy>, PolicyStoreError> {
        Ok(self
            .policies
            .read()
            .values()
            .filter(|p| namespace.is_empty() || p.namespace() == namespace)
            .cloned()
            .collect())
    }

    async fn get_policy_binding(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PolicyBinding, PolicyStoreError> {
        self.bindings
            .read()
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned()
            .ok_or_else(|| Self::not_found(POLICY_BINDING, namespace, name))
    }

    async fn create_policy_binding(
        &self,
        mut binding: PolicyBinding,
    ) -> Result<PolicyBinding, PolicyStoreError> {
        let key = Self::key(POLICY_BINDING, &binding.metadata)?;
        let mut bindings = self.bindings.write();
        if bindings.contains_key(&key) {
            return Err(Self::exists(POLICY_BINDING, &key));
        }
        self.stamp(&mut binding.metadata);
        bindings.insert(key, binding.clone());
        self.binding_creates.fetch_add(1, Ordering::AcqRel);
        Ok(binding)
    }

    async fn update_policy_binding(
        &self,
        mut binding: PolicyBinding,
    ) -> Result<PolicyBinding, PolicyStoreError> {
        let key = Self::key(POLICY_BINDING, &binding.metadata)?;
        let mut bindings = self.bindings.write();
        let Some(slot) = bindings.get_mut(&key) else {
            return Err(Self::not_found(POLICY_BINDING, &key.0, &key.1));
        };
        self.stamp(&mut binding.metadata);
        *slot = binding.clone();
        Ok(binding)
    }

    async fn delete_policy_binding(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), PolicyStoreError> {
        self.bindings
            .write()
            .remove(&(namespace.to_owned(), name.to_owned()))
            .map(drop)
            .ok_or_else(|| Self::not_found(POLICY_BINDING, namespace, name))
    }

    async fn list_policy_bindings(
        &self,
        namespace: &str,
    ) -> Result<Vec<PolicyBinding>, PolicyStoreError> {
        Ok(self
            .bindings
            .read()
            .values()
            .filter(|b| namespace.is_empty() || b.namespace() == namespace)
            .cloned()
            .collect())
    }
}
