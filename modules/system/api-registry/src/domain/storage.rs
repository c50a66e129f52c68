//! Storage-facing view of one API version.

use std::sync::Arc;

use serde_json::Value;

use crate::domain::codec::Codec;
use crate::domain::meta::MetadataAccessor;
use crate::domain::version::VersionRegistry;
use crate::error::RegistryError;

/// Codec and metadata accessor used to persist objects in a storage version.
#[derive(Clone)]
pub struct StorageHelper {
    version: String,
    codec: Arc<dyn Codec>,
    accessor: Arc<dyn MetadataAccessor>,
}

impl std::fmt::Debug for StorageHelper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageHelper")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl StorageHelper {
    /// Build the helper for `version`; an empty version selects the latest.
    ///
    /// # Errors
    /// Returns [`RegistryError::UnsupportedVersion`] for an unknown version.
    pub fn for_version(registry: &VersionRegistry, version: &str) -> Result<Self, RegistryError> {
        let version = if version.is_empty() {
            registry.latest().unwrap_or_default()
        } else {
            version
        };
        let interfaces = registry.interfaces_for(version)?;
        Ok(Self {
            version: version.to_owned(),
            codec: interfaces.codec,
            accessor: interfaces.accessor,
        })
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.codec
    }

    #[must_use]
    pub fn accessor(&self) -> &Arc<dyn MetadataAccessor> {
        &self.accessor
    }

    /// Stamp the storage-assigned fields on an object about to be persisted.
    ///
    /// # Errors
    /// Fails if `obj` is not an object.
    pub fn stamp(&self, obj: &mut Value, resource_version: u64, self_link: &str) -> Result<(), RegistryError> {
        self.accessor
            .set_resource_version(obj, &resource_version.to_string())?;
        self.accessor.set_self_link(obj, self_link)
    }

    /// Round-trip `obj` through the storage codec, as a write then read would.
    ///
    /// # Errors
    /// Propagates codec failures.
    pub fn persist_form(&self, obj: &Value) -> Result<Value, RegistryError> {
        let bytes = self.codec.encode(obj)?;
        self.codec.decode(&bytes)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::latest;
    use serde_json::json;

    #[test]
    fn empty_version_selects_latest() {
        let registry = latest::version_registry();
        let helper = StorageHelper::for_version(&registry, "").unwrap();
        assert_eq!(helper.version(), latest::VERSION);
    }

    #[test]
    fn unsupported_storage_version_fails() {
        let registry = latest::version_registry();
        let err = StorageHelper::for_version(&registry, "v9").unwrap_err();
        assert_eq!(err.to_string(), "unsupported storage version: v9 (valid: v1beta1)");
    }

    #[test]
    fn stamp_and_persist() {
        let registry = latest::version_registry();
        let helper = StorageHelper::for_version(&registry, "v1beta1").unwrap();
        let mut obj = json!({"kind": "Route", "metadata": {"name": "r"}});

        helper.stamp(&mut obj, 4, "/osapi/v1beta1/routes/r").unwrap();
        let stored = helper.persist_form(&obj).unwrap();

        assert_eq!(stored["apiVersion"], "v1beta1");
        assert_eq!(helper.accessor().resource_version(&stored), Some("4"));
        assert_eq!(helper.accessor().self_link(&stored), Some("/osapi/v1beta1/routes/r"));
    }
}
