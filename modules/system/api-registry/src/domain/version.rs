//! Per-version bundles of codec, converter and metadata accessor.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::domain::codec::Codec;
use crate::domain::meta::MetadataAccessor;
use crate::domain::scheme::ObjectConverter;
use crate::error::RegistryError;

/// Everything needed to read, write and convert objects of one API version.
#[derive(Clone)]
pub struct VersionInterfaces {
    pub codec: Arc<dyn Codec>,
    pub converter: Arc<dyn ObjectConverter>,
    pub accessor: Arc<dyn MetadataAccessor>,
}

impl fmt::Debug for VersionInterfaces {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionInterfaces")
            .field("codec", &self.codec.version())
            .finish_non_exhaustive()
    }
}

/// Resolves version strings to their [`VersionInterfaces`].
///
/// Versions are kept in registration order, least to most feature rich.
#[derive(Debug, Default)]
pub struct VersionRegistry {
    order: Vec<String>,
    interfaces: HashMap<String, VersionInterfaces>,
}

impl VersionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a version. A version is immutable once registered; a second
    /// registration is ignored and reported as `false`.
    pub fn register(&mut self, version: &str, interfaces: VersionInterfaces) -> bool {
        if self.interfaces.contains_key(version) {
            tracing::warn!(version, "API version already registered; keeping the first registration");
            return false;
        }
        self.order.push(version.to_owned());
        self.interfaces.insert(version.to_owned(), interfaces);
        true
    }

    /// # Errors
    /// Returns [`RegistryError::UnsupportedVersion`] listing every known
    /// version when `version` is not registered.
    pub fn interfaces_for(&self, version: &str) -> Result<VersionInterfaces, RegistryError> {
        self.interfaces
            .get(version)
            .cloned()
            .ok_or_else(|| RegistryError::UnsupportedVersion {
                requested: version.to_owned(),
                known: self.order.clone(),
            })
    }

    #[must_use]
    pub fn versions(&self) -> &[String] {
        &self.order
    }

    /// The most recently registered version.
    #[must_use]
    pub fn latest(&self) -> Option<&str> {
        self.order.last().map(String::as_str)
    }

    #[must_use]
    pub fn oldest(&self) -> Option<&str> {
        self.order.first().map(String::as_str)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::domain::codec::JsonCodec;
    use crate::domain::meta::JsonMetadataAccessor;
    use crate::domain::scheme::Scheme;

    fn interfaces(version: &str) -> VersionInterfaces {
        VersionInterfaces {
            codec: Arc::new(JsonCodec::new(version)),
            converter: Arc::new(Scheme::new()),
            accessor: Arc::new(JsonMetadataAccessor),
        }
    }

    fn registry() -> VersionRegistry {
        let mut registry = VersionRegistry::new();
        registry.register("v1beta1", interfaces("v1beta1"));
        registry.register("v1beta3", interfaces("v1beta3"));
        registry
    }

    #[test]
    fn resolves_registered_version() {
        let registry = registry();
        let found = registry.interfaces_for("v1beta3").unwrap();
        assert_eq!(found.codec.version(), "v1beta3");
        assert_eq!(registry.latest(), Some("v1beta3"));
        assert_eq!(registry.oldest(), Some("v1beta1"));
    }

    #[test]
    fn unknown_version_lists_every_known_version() {
        let err = registry().interfaces_for("unknown").unwrap_err();
        assert_eq!(
            err.to_string(),
            "unsupported storage version: unknown (valid: v1beta1, v1beta3)"
        );
        assert!(matches!(err, RegistryError::UnsupportedVersion { known, .. } if known.len() == 2));
    }

    #[test]
    fn second_registration_is_ignored() {
        let mut registry = registry();
        assert!(!registry.register("v1beta1", interfaces("other")));
        assert_eq!(registry.versions(), ["v1beta1", "v1beta3"]);
        assert_eq!(
            registry.interfaces_for("v1beta1").unwrap().codec.version(),
            "v1beta1"
        );
    }
}
