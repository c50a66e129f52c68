use std::sync::Arc;

use api_registry::{JsonMetadataAccessor, MetadataAccessor};
use async_trait::async_trait;
use serde_json::{Value, json};

use super::backend::{BackendError, ResourceBackend};
use crate::service_resolver::{DeferredTemplate, ServiceLookup};

/// Image repositories with `status.dockerImageRepository` filled in.
///
/// A repository pointing at an external registry reports that location.
/// Any other repository is located in the default registry, resolved on
/// every read; while the registry service is unknown the status stays empty.
pub struct DefaultRegistryBackend {
    inner: Arc<dyn ResourceBackend>,
    registry: DeferredTemplate,
    services: Arc<dyn ServiceLookup>,
}

impl DefaultRegistryBackend {
    #[must_use]
    pub fn new(
        inner: Arc<dyn ResourceBackend>,
        registry: DeferredTemplate,
        services: Arc<dyn ServiceLookup>,
    ) -> Self {
        Self {
            inner,
            registry,
            services,
        }
    }

    async fn with_status(&self, mut repo: Value) -> Value {
        let external = repo
            .get("dockerImageRepository")
            .and_then(Value::as_str)
            .filter(|r| !r.is_empty())
            .map(str::to_owned);
        let location = match external {
            Some(location) => Some(location),
            None => self.registry.resolve(self.services.as_ref()).await.map(|registry| {
                let accessor = JsonMetadataAccessor;
                let namespace = accessor.namespace(&repo).unwrap_or_default();
                let name = accessor.name(&repo).unwrap_or_default();
                if namespace.is_empty() {
                    format!("{registry}/{name}")
                } else {
                    format!("{registry}/{namespace}/{name}")
                }
            }),
        };

        if let Some(location) = location
            && let Some(fields) = repo.as_object_mut()
        {
            let status = fields.entry("status").or_insert_with(|| json!({}));
            if let Some(status) = status.as_object_mut() {
                status.insert("dockerImageRepository".to_owned(), Value::String(location));
            }
        }
        repo
    }
}

#[async_trait]
impl ResourceBackend for DefaultRegistryBackend {
    fn resource(&self) -> &str {
        self.inner.resource()
    }

    async fn list(&self, namespace: &str) -> Result<Vec<Value>, BackendError> {
        let mut out = Vec::new();
        for repo in self.inner.list(namespace).await? {
            out.push(self.with_status(repo).await);
        }
        Ok(out)
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Value, BackendError> {
        let repo = self.inner.get(namespace, name).await?;
        Ok(self.with_status(repo).await)
    }

    async fn create(&self, namespace: &str, obj: Value) -> Result<Value, BackendError> {
        let repo = self.inner.create(namespace, obj).await?;
        Ok(self.with_status(repo).await)
    }

    async fn update(&self, namespace: &str, name: &str, obj: Value) -> Result<Value, BackendError> {
        let repo = self.inner.update(namespace, name, obj).await?;
        Ok(self.with_status(repo).await)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), BackendError> {
        self.inner.delete(namespace, name).await
    }
}
