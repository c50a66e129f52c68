//! Access to object metadata (name, namespace, self link, resource version).

use serde_json::{Map, Value};

use crate::error::RegistryError;

/// Read/write the addressing and versioning fields of an object.
pub trait MetadataAccessor: Send + Sync {
    fn name<'a>(&self, obj: &'a Value) -> Option<&'a str>;
    fn namespace<'a>(&self, obj: &'a Value) -> Option<&'a str>;
    fn self_link<'a>(&self, obj: &'a Value) -> Option<&'a str>;
    fn resource_version<'a>(&self, obj: &'a Value) -> Option<&'a str>;

    /// # Errors
    /// Returns [`RegistryError::Codec`] if `obj` is not an object.
    fn set_namespace(&self, obj: &mut Value, namespace: &str) -> Result<(), RegistryError>;

    /// # Errors
    /// Returns [`RegistryError::Codec`] if `obj` is not an object.
    fn set_self_link(&self, obj: &mut Value, link: &str) -> Result<(), RegistryError>;

    /// # Errors
    /// Returns [`RegistryError::Codec`] if `obj` is not an object.
    fn set_resource_version(&self, obj: &mut Value, version: &str) -> Result<(), RegistryError>;
}

/// Accessor for objects carrying a `metadata` map.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMetadataAccessor;

impl JsonMetadataAccessor {
    fn field<'a>(obj: &'a Value, key: &str) -> Option<&'a str> {
        obj.get("metadata")?.get(key)?.as_str()
    }

    fn metadata_mut(obj: &mut Value) -> Result<&mut Map<String, Value>, RegistryError> {
        let fields = obj
            .as_object_mut()
            .ok_or_else(|| RegistryError::Codec("metadata requires an object".to_owned()))?;
        let meta = fields
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        meta.as_object_mut()
            .ok_or_else(|| RegistryError::Codec("metadata is not an object".to_owned()))
    }

    fn set(obj: &mut Value, key: &str, value: &str) -> Result<(), RegistryError> {
        Self::metadata_mut(obj)?.insert(key.to_owned(), Value::String(value.to_owned()));
        Ok(())
    }
}

impl MetadataAccessor for JsonMetadataAccessor {
    fn name<'a>(&self, obj: &'a Value) -> Option<&'a str> {
        Self::field(obj, "name")
    }

    fn namespace<'a>(&self, obj: &'a Value) -> Option<&'a str> {
        Self::field(obj, "namespace")
    }

    fn self_link<'a>(&self, obj: &'a Value) -> Option<&'a str> {
        Self::field(obj, "selfLink")
    }

    fn resource_version<'a>(&self, obj: &'a Value) -> Option<&'a str> {
        Self::field(obj, "resourceVersion")
    }

    fn set_namespace(&self, obj: &mut Value, namespace: &str) -> Result<(), RegistryError> {
        Self::set(obj, "namespace", namespace)
    }

    fn set_self_link(&self, obj: &mut Value, link: &str) -> Result<(), RegistryError> {
        Self::set(obj, "selfLink", link)
    }

    fn set_resource_version(&self, obj: &mut Value, version: &str) -> Result<(), RegistryError> {
        Self::set(obj, "resourceVersion", version)
    }
}
