//! Resource client contract used by the controllers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use api_registry::{JsonMetadataAccessor, MetadataAccessor};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::ClientError;
use crate::object::ObjectKey;

/// Access to the objects of one resource kind.
///
/// An empty `namespace` in [`ResourceClient::list`] means every namespace.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Plural resource name, e.g. `builds`.
    fn resource(&self) -> &str;

    /// # Errors
    /// Returns [`ClientError::Unavailable`] when the resource API cannot be reached.
    async fn list(&self, namespace: &str) -> Result<Vec<Value>, ClientError>;

    /// # Errors
    /// Returns [`ClientError::NotFound`] when no object has that name.
    async fn get(&self, namespace: &str, name: &str) -> Result<Value, ClientError>;

    /// # Errors
    /// Returns [`ClientError::AlreadyExists`] when an object with that name exists.
    async fn create(&self, namespace: &str, obj: Value) -> Result<Value, ClientError>;

    /// # Errors
    /// Returns [`ClientError::NotFound`] when the object does not exist.
    async fn update(&self, namespace: &str, obj: Value) -> Result<Value, ClientError>;
}

/// [`ResourceClient`] over a process-local map, stamping a fresh
/// `resourceVersion` on every write.
#[derive(Debug)]
pub struct MemoryClient {
    resource: String,
    objects: RwLock<BTreeMap<ObjectKey, Value>>,
    revision: AtomicU64,
}

impl MemoryClient {
    #[must_use]
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            objects: RwLock::new(BTreeMap::new()),
            revision: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    fn prepare(&self, namespace: &str, mut obj: Value) -> Result<(ObjectKey, Value), ClientError> {
        let invalid = |e: api_registry::RegistryError| ClientError::Invalid {
            resource: self.resource.clone(),
            reason: e.to_string(),
        };
        let accessor = JsonMetadataAccessor;
        accessor.set_namespace(&mut obj, namespace).map_err(invalid)?;
        let key = ObjectKey::of(&obj).ok_or_else(|| ClientError::Invalid {
            resource: self.resource.clone(),
            reason: "name is required".to_owned(),
        })?;
        let rev = self.revision.fetch_add(1, Ordering::AcqRel) + 1;
        accessor
            .set_resource_version(&mut obj, &rev.to_string())
            .map_err(invalid)?;
        Ok((key, obj))
    }

    fn not_found(&self, key: &ObjectKey) -> ClientError {
        ClientError::NotFound {
            resource: self.resource.clone(),
            namespace: key.namespace.clone(),
            name: key.name.clone(),
        }
    }
}

#[async_trait]
impl ResourceClient for MemoryClient {
    fn resource(&self) -> &str {
        &self.resource
    }

    async fn list(&self, namespace: &str) -> Result<Vec<Value>, ClientError> {
        Ok(self
            .objects
            .read()
            .iter()
            .filter(|(k, _)| namespace.is_empty() || k.namespace == namespace)
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Value, ClientError> {
        let key = ObjectKey {
            namespace: namespace.to_owned(),
            name: name.to_owned(),
        };
        self.objects
            .read()
            .get(&key)
            .cloned()
            .ok_or_else(|| self.not_found(&key))
    }

    async fn create(&self, namespace: &str, obj: Value) -> Result<Value, ClientError> {
        let (key, obj) = self.prepare(namespace, obj)?;
        let mut objects = self.objects.write();
        if objects.contains_key(&key) {
            return Err(ClientError::AlreadyExists {
                resource: self.resource.clone(),
                namespace: key.namespace,
                name: key.name,
            });
        }
        objects.insert(key, obj.clone());
        Ok(obj)
    }

    async fn update(&self, namespace: &str, obj: Value) -> Result<Value, ClientError> {
        let (key, obj) = self.prepare(namespace, obj)?;
        let mut objects = self.objects.write();
        let Some(slot) = objects.get_mut(&key) else {
            return Err(self.not_found(&key));
        };
        *slot = obj.clone();
        Ok(obj)
    }
}
