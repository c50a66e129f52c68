//! Known kinds per API version.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::error::RegistryError;

/// Converts objects between internal and versioned representations.
pub trait ObjectConverter: Send + Sync {
    /// Convert `obj` to the representation of `target`.
    ///
    /// # Errors
    /// Fails when the object's kind is not served in `target`.
    fn convert_to_version(&self, obj: Value, target: &str) -> Result<Value, RegistryError>;
}

/// Catalog of the kinds each API version serves.
#[derive(Debug, Clone, Default)]
pub struct Scheme {
    kinds: BTreeMap<String, BTreeSet<String>>,
}

impl Scheme {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `kinds` for `version`. Re-adding a kind is a no-op.
    pub fn add_known_kinds<I, S>(&mut self, version: &str, kinds: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.kinds
            .entry(version.to_owned())
            .or_default()
            .extend(kinds.into_iter().map(Into::into));
    }

    /// Kinds known in `version`, sorted.
    pub fn known_kinds(&self, version: &str) -> impl Iterator<Item = &str> {
        self.kinds
            .get(version)
            .into_iter()
            .flat_map(|kinds| kinds.iter().map(String::as_str))
    }

    #[must_use]
    pub fn recognizes(&self, version: &str, kind: &str) -> bool {
        self.kinds.get(version).is_some_and(|k| k.contains(kind))
    }

    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }
}

impl ObjectConverter for Scheme {
    fn convert_to_version(&self, mut obj: Value, target: &str) -> Result<Value, RegistryError> {
        let kind = obj
            .get("kind")
            .and_then(Value::as_str)
            .ok_or_else(|| RegistryError::Codec("object has no kind".to_owned()))?
            .to_owned();
        if !self.recognizes(target, &kind) {
            return Err(RegistryError::UnknownKind {
                kind,
                version: target.to_owned(),
            });
        }
        if let Some(fields) = obj.as_object_mut() {
            fields.insert("apiVersion".to_owned(), Value::String(target.to_owned()));
        }
        Ok(obj)
    }
}
