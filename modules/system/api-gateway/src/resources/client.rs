use std::sync::Arc;

use api_registry::{JsonMetadataAccessor, MetadataAccessor};
use async_trait::async_trait;
use controllers::{ClientError, ResourceClient};
use serde_json::Value;

use super::backend::{BackendError, ResourceBackend};

/// Lets the controllers work on the objects the API serves.
pub struct BackendClient {
    backend: Arc<dyn ResourceBackend>,
}

impl BackendClient {
    #[must_use]
    pub fn new(backend: Arc<dyn ResourceBackend>) -> Self {
        Self { backend }
    }

    fn map_err(&self, namespace: &str, err: BackendError) -> ClientError {
        let resource = self.backend.resource().to_owned();
        match err {
            BackendError::NotFound { name, .. } => ClientError::NotFound {
                resource,
                namespace: namespace.to_owned(),
                name,
            },
            BackendError::AlreadyExists { name, .. } => ClientError::AlreadyExists {
                resource,
                namespace: namespace.to_owned(),
                name,
            },
            BackendError::Invalid(reason) => ClientError::Invalid { resource, reason },
            // Retried on the next resync
            BackendError::Conflict { .. } | BackendError::Internal(_) => {
                ClientError::Unavailable(err.to_string())
            }
        }
    }
}

#[async_trait]
impl ResourceClient for BackendClient {
    fn resource(&self) -> &str {
        self.backend.resource()
    }

    async fn list(&self, namespace: &str) -> Result<Vec<Value>, ClientError> {
        self.backend
            .list(namespace)
            .await
            .map_err(|e| self.map_err(namespace, e))
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Value, ClientError> {
        self.backend
            .get(namespace, name)
            .await
            .map_err(|e| self.map_err(namespace, e))
    }

    async fn create(&self, namespace: &str, obj: Value) -> Result<Value, ClientError> {
        self.backend
            .create(namespace, obj)
            .await
            .map_err(|e| self.map_err(namespace, e))
    }

    async fn update(&self, namespace: &str, obj: Value) -> Result<Value, ClientError> {
        let Some(name) = JsonMetadataAccessor.name(&obj).map(str::to_owned) else {
            return Err(ClientError::Invalid {
                resource: self.backend.resource().to_owned(),
                reason: "name is required".to_owned(),
            });
        };
        self.backend
            .update(namespace, &name, obj)
            .await
            .map_err(|e| self.map_err(namespace, e))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::resources::MemoryBackend;
    use api_registry::{StorageHelper, latest};
    use serde_json::json;

    fn client() -> BackendClient {
        let storage = StorageHelper::for_version(&latest::version_registry(), "").unwrap();
        BackendClient::new(Arc::new(MemoryBackend::new("Build", "builds", storage)))
    }

    #[tokio::test]
    async fn controller_writes_reach_the_backend() {
        let client = client();
        let created = client
            .create("dev", json!({"metadata": {"name": "b1"}, "status": "New"}))
            .await
            .unwrap();

        let mut changed = created;
        changed["status"] = json!("Pending");
        let updated = client.update("dev", changed).await.unwrap();
        assert_eq!(updated["status"], "Pending");
        assert_eq!(client.list("dev").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn errors_map_to_client_errors() {
        let client = client();
        assert!(client.get("dev", "nope").await.unwrap_err().is_not_found());

        let created = client
            .create("dev", json!({"metadata": {"name": "b1"}}))
            .await
            .unwrap();
        assert!(
            client
                .create("dev", created.clone())
                .await
                .unwrap_err()
                .is_already_exists()
        );

        client.update("dev", created.clone()).await.unwrap();
        assert!(matches!(
            client.update("dev", created).await.unwrap_err(),
            ClientError::Unavailable(_)
        ));
    }
}
