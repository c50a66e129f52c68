use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use api_registry::{RegistryError, StorageHelper};
use async_trait::async_trait;
use authz_resolver_sdk::PolicyStoreError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use parking_lot::RwLock;
use serde_json::{Value, json};
use thiserror::Error;

/// Storage of one resource kind.
///
/// An empty `namespace` addresses root-scoped objects; in
/// [`ResourceBackend::list`] it selects every namespace.
#[async_trait]
pub trait ResourceBackend: Send + Sync {
    /// Plural URL resource name, e.g. `buildConfigs`.
    fn resource(&self) -> &str;

    /// # Errors
    /// [`BackendError::Internal`] on storage failure.
    async fn list(&self, namespace: &str) -> Result<Vec<Value>, BackendError>;

    /// # Errors
    /// [`BackendError::NotFound`] if absent.
    async fn get(&self, namespace: &str, name: &str) -> Result<Value, BackendError>;

    /// # Errors
    /// [`BackendError::AlreadyExists`] if the name is taken,
    /// [`BackendError::Invalid`] for a malformed object.
    async fn create(&self, namespace: &str, obj: Value) -> Result<Value, BackendError>;

    /// # Errors
    /// [`BackendError::NotFound`] if absent, [`BackendError::Conflict`] when
    /// the object carries a stale `resourceVersion`.
    async fn update(&self, namespace: &str, name: &str, obj: Value) -> Result<Value, BackendError>;

    /// # Errors
    /// [`BackendError::NotFound`] if absent.
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), BackendError>;
}

/// Errors of a [`ResourceBackend`], rendered as a `Status` object.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("{resource} \"{name}\" not found")]
    NotFound { resource: String, name: String },

    #[error("{resource} \"{name}\" already exists")]
    AlreadyExists { resource: String, name: String },

    #[error("{resource} \"{name}\" was modified since resourceVersion {stale}")]
    Conflict {
        resource: String,
        name: String,
        stale: String,
    },

    #[error("{0}")]
    Invalid(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BackendError {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::AlreadyExists { .. } | Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::Invalid(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NotFound",
            Self::AlreadyExists { .. } => "AlreadyExists",
            Self::Conflict { .. } => "Conflict",
            Self::Invalid(_) => "BadRequest",
            Self::Internal(_) => "InternalError",
        }
    }
}

impl IntoResponse for BackendError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        if matches!(self, Self::Internal(_)) {
            tracing::error!(error = %self, "Resource backend failed");
        }
        let body = json!({
            "kind": "Status",
            "status": "Failure",
            "message": self.to_string(),
            "reason": self.reason(),
            "code": code.as_u16(),
        });
        (code, Json(body)).into_response()
    }
}

impl From<RegistryError> for BackendError {
    fn from(e: RegistryError) -> Self {
        Self::Invalid(e.to_string())
    }
}

impl From<PolicyStoreError> for BackendError {
    fn from(e: PolicyStoreError) -> Self {
        match e {
            PolicyStoreError::NotFound { kind, name, .. } => Self::NotFound {
                resource: kind.to_owned(),
                name,
            },
            PolicyStoreError::AlreadyExists { kind, name, .. } => Self::AlreadyExists {
                resource: kind.to_owned(),
                name,
            },
            PolicyStoreError::Invalid { .. } => Self::Invalid(e.to_string()),
            PolicyStoreError::Internal(_) => Self::Internal(e.to_string()),
        }
    }
}

/// [`ResourceBackend`] over a process-local map.
///
/// Every write stamps a fresh `resourceVersion` and round-trips the object
/// through the storage version's codec, as a write to and read from a
/// persistent store would.
#[derive(Debug)]
pub struct MemoryBackend {
    kind: String,
    resource: String,
    storage: StorageHelper,
    objects: RwLock<BTreeMap<(String, String), Value>>,
    revision: AtomicU64,
}

impl MemoryBackend {
    #[must_use]
    pub fn new(kind: impl Into<String>, resource: impl Into<String>, storage: StorageHelper) -> Self {
        Self {
            kind: kind.into(),
            resource: resource.into(),
            storage,
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

    fn not_found(&self, name: &str) -> BackendError {
        BackendError::NotFound {
            resource: self.resource.clone(),
            name: name.to_owned(),
        }
    }

    /// Stamp namespace, kind and a new resource version, then convert to the
    /// storage form.
    fn persist(&self, namespace: &str, mut obj: Value) -> Result<Value, BackendError> {
        let accessor = self.storage.accessor();
        let Some(fields) = obj.as_object_mut() else {
            return Err(BackendError::Invalid(format!(
                "{} must be a JSON object",
                self.kind
            )));
        };
        fields
            .entry("kind")
            .or_insert_with(|| Value::String(self.kind.clone()));
        if !namespace.is_empty() {
            accessor.set_namespace(&mut obj, namespace)?;
        }
        let rev = self.revision.fetch_add(1, Ordering::AcqRel) + 1;
        accessor.set_resource_version(&mut obj, &rev.to_string())?;
        Ok(self.storage.persist_form(&obj)?)
    }
}

#[async_trait]
impl ResourceBackend for MemoryBackend {
    fn resource(&self) -> &str {
        &self.resource
    }

    async fn list(&self, namespace: &str) -> Result<Vec<Value>, BackendError> {
        Ok(self
            .objects
            .read()
            .iter()
            .filter(|((ns, _), _)| namespace.is_empty() || ns == namespace)
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Value, BackendError> {
        self.objects
            .read()
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned()
            .ok_or_else(|| self.not_found(name))
    }

    async fn create(&self, namespace: &str, obj: Value) -> Result<Value, BackendError> {
        let name = self
            .storage
            .accessor()
            .name(&obj)
            .filter(|n| !n.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| BackendError::Invalid("metadata.name is required".to_owned()))?;
        let key = (namespace.to_owned(), name);

        let mut objects = self.objects.write();
        if objects.contains_key(&key) {
            return Err(BackendError::AlreadyExists {
                resource: self.resource.clone(),
                name: key.1,
            });
        }
        let stored = self.persist(namespace, obj)?;
        objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update(&self, namespace: &str, name: &str, obj: Value) -> Result<Value, BackendError> {
        let key = (namespace.to_owned(), name.to_owned());
        let mut objects = self.objects.write();
        let Some(current) = objects.get(&key) else {
            return Err(self.not_found(name));
        };

        let accessor = self.storage.accessor();
        if let Some(sent) = accessor.resource_version(&obj).filter(|v| !v.is_empty())
            && Some(sent) != accessor.resource_version(current)
        {
            return Err(BackendError::Conflict {
                resource: self.resource.clone(),
                name: name.to_owned(),
                stale: sent.to_owned(),
            });
        }

        let stored = self.persist(namespace, obj)?;
        objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), BackendError> {
        self.objects
            .write()
            .remove(&(namespace.to_owned(), name.to_owned()))
            .map(drop)
            .ok_or_else(|| self.not_found(name))
    }
}
