//! Field access on untyped resource objects.

use std::fmt;

use api_registry::{JsonMetadataAccessor, MetadataAccessor};
use serde_json::{Map, Value};

use crate::error::HandlerError;

/// Namespace and name of an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    /// Key of `obj`, or `None` if it has no name.
    #[must_use]
    pub fn of(obj: &Value) -> Option<Self> {
        let accessor = JsonMetadataAccessor;
        let name = accessor.name(obj).filter(|n| !n.is_empty())?;
        Some(Self {
            namespace: accessor.namespace(obj).unwrap_or_default().to_owned(),
            name: name.to_owned(),
        })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

pub fn key_of(obj: &Value) -> Result<ObjectKey, HandlerError> {
    ObjectKey::of(obj).ok_or_else(|| HandlerError::Invalid("object has no name".to_owned()))
}

pub fn resource_version(obj: &Value) -> &str {
    JsonMetadataAccessor.resource_version(obj).unwrap_or_default()
}

pub fn at<'a>(obj: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(obj, |v, key| v.get(key))
}

pub fn at_mut<'a>(obj: &'a mut Value, path: &[&str]) -> Option<&'a mut Value> {
    path.iter().try_fold(obj, |v, key| v.get_mut(*key))
}

pub fn str_at<'a>(obj: &'a Value, path: &[&str]) -> Option<&'a str> {
    at(obj, path)?.as_str()
}

/// Set the value at `path`, creating intermediate objects.
pub fn set_at(obj: &mut Value, path: &[&str], value: Value) -> Result<(), HandlerError> {
    let Some((last, parents)) = path.split_last() else {
        *obj = value;
        return Ok(());
    };
    let mut cur = obj;
    for key in parents {
        let fields = as_object(cur, key)?;
        cur = fields
            .entry((*key).to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    as_object(cur, last)?.insert((*last).to_owned(), value);
    Ok(())
}

fn as_object<'a>(v: &'a mut Value, key: &str) -> Result<&'a mut Map<String, Value>, HandlerError> {
    v.as_object_mut()
        .ok_or_else(|| HandlerError::Invalid(format!("cannot set {key} on a non-object")))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_at_creates_parents() {
        let mut obj = json!({"metadata": {"name": "b1"}});
        set_at(&mut obj, &["status", "phase"], json!("New")).unwrap();
        assert_eq!(str_at(&obj, &["status", "phase"]), Some("New"));

        let mut scalar = json!({"status": 1});
        assert!(set_at(&mut scalar, &["status", "phase"], json!("x")).is_err());
    }

    #[test]
    fn key_requires_a_name() {
        assert_eq!(
            ObjectKey::of(&json!({"metadata": {"name": "b1", "namespace": "dev"}}))
                .unwrap()
                .to_string(),
            "dev/b1"
        );
        assert!(ObjectKey::of(&json!({"metadata": {"name": ""}})).is_none());
        assert!(key_of(&json!({})).is_err());
    }
}
