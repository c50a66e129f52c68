//! REST mappings: how each (kind, version) is addressed over HTTP.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::RegistryError;

/// Addressing scope of a resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RestScope {
    /// Addressed globally, no namespace.
    Root,
    /// Namespaced; the namespace travels as the `namespace` query parameter.
    NamespaceLegacy,
    /// Namespaced; the namespace is a path segment (`ns/{namespace}`).
    Namespace,
}

impl RestScope {
    #[must_use]
    pub const fn is_namespaced(self) -> bool {
        !matches!(self, Self::Root)
    }
}

/// How one kind of one version is addressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestMapping {
    pub kind: String,
    pub version: String,
    /// URL resource segment, e.g. `imageRepositories`.
    pub resource: String,
    pub scope: RestScope,
    pub mixed_case_url: bool,
}

impl RestMapping {
    /// URL of a collection (`name == None`) or a single object.
    ///
    /// The namespace is placed according to the mapping's scope and ignored
    /// for root-scoped kinds.
    #[must_use]
    pub fn resource_url(&self, prefix: &str, namespace: Option<&str>, name: Option<&str>) -> String {
        let prefix = prefix.trim_end_matches('/');
        let namespace = namespace.filter(|ns| !ns.is_empty());
        let mut url = match (self.scope, namespace) {
            (RestScope::Namespace, Some(ns)) => {
                format!("{prefix}/{}/ns/{ns}/{}", self.version, self.resource)
            }
            _ => format!("{prefix}/{}/{}", self.version, self.resource),
        };
        if let Some(name) = name {
            url.push('/');
            url.push_str(name);
        }
        if let (RestScope::NamespaceLegacy, Some(ns)) = (self.scope, namespace) {
            url.push('?');
            url.push_str(
                &url::form_urlencoded::Serializer::new(String::new())
                    .append_pair("namespace", ns)
                    .finish(),
            );
        }
        url
    }
}

/// URL resource name for a kind.
///
/// Mixed-case versions keep the kind's inner casing (`ImageRepository` ->
/// `imageRepositories`); other versions lowercase it entirely.
#[must_use]
pub fn kind_to_resource(kind: &str, mixed_case: bool) -> String {
    let mut chars = kind.chars();
    let Some(first) = chars.next() else {
        return String::new();
    };
    let singular: String = if mixed_case {
        first.to_lowercase().chain(chars).collect()
    } else {
        kind.to_lowercase()
    };
    if singular.ends_with('s') {
        singular
    } else if let Some(stem) = singular.strip_suffix('y') {
        format!("{stem}ies")
    } else {
        format!("{singular}s")
    }
}

/// Resolves kinds to mappings and URL resources back to kinds.
pub trait RestMapper: Send + Sync + fmt::Debug {
    /// # Errors
    /// Returns [`RegistryError::NoMapping`] if the kind is not mapped in `version`.
    fn rest_mapping(&self, kind: &str, version: &str) -> Result<RestMapping, RegistryError>;

    /// # Errors
    /// Returns [`RegistryError::NoResource`] if nothing is served under `resource`.
    fn kind_for_resource(&self, version: &str, resource: &str) -> Result<String, RegistryError>;
}

/// Mapper populated once at startup from a scheme.
#[derive(Debug, Default)]
pub struct DefaultRestMapper {
    mappings: HashMap<(String, String), RestMapping>,
    /// (version, lowercased resource or singular) -> kind
    resources: HashMap<(String, String), String>,
}

impl DefaultRestMapper {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register how `kind` of `version` is addressed.
    ///
    /// Registering an identical mapping again is a no-op and returns
    /// `Ok(false)`.
    ///
    /// # Errors
    /// Returns [`RegistryError::ConflictingMapping`] when the pair is already
    /// mapped with a different scope or casing.
    pub fn add(
        &mut self,
        scope: RestScope,
        kind: &str,
        version: &str,
        mixed_case: bool,
    ) -> Result<bool, RegistryError> {
        let key = (kind.to_owned(), version.to_owned());
        let mapping = RestMapping {
            kind: kind.to_owned(),
            version: version.to_owned(),
            resource: kind_to_resource(kind, mixed_case),
            scope,
            mixed_case_url: mixed_case,
        };

        if let Some(existing) = self.mappings.get(&key) {
            if *existing == mapping {
                return Ok(false);
            }
            return Err(RegistryError::ConflictingMapping {
                kind: kind.to_owned(),
                version: version.to_owned(),
            });
        }

        let singular = kind.to_lowercase();
        self.resources.insert(
            (version.to_owned(), mapping.resource.to_lowercase()),
            kind.to_owned(),
        );
        self.resources
            .insert((version.to_owned(), singular), kind.to_owned());
        self.mappings.insert(key, mapping);
        Ok(true)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// All mappings of `version`, ordered by kind.
    #[must_use]
    pub fn mappings_for_version(&self, version: &str) -> Vec<RestMapping> {
        let mut found: Vec<RestMapping> = self
            .mappings
            .values()
            .filter(|m| m.version == version)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.kind.cmp(&b.kind));
        found
    }
}

impl RestMapper for DefaultRestMapper {
    fn rest_mapping(&self, kind: &str, version: &str) -> Result<RestMapping, RegistryError> {
        self.mappings
            .get(&(kind.to_owned(), version.to_owned()))
            .cloned()
            .ok_or_else(|| RegistryError::NoMapping {
                kind: kind.to_owned(),
                version: version.to_owned(),
            })
    }

    fn kind_for_resource(&self, version: &str, resource: &str) -> Result<String, RegistryError> {
        self.resources
            .get(&(version.to_owned(), resource.to_lowercase()))
            .cloned()
            .ok_or_else(|| RegistryError::NoResource {
                resource: resource.to_owned(),
            })
    }
}

/// Ordered list of independent mappers; the first one that knows the kind wins.
#[derive(Debug, Clone, Default)]
pub struct MultiRestMapper {
    mappers: Vec<Arc<dyn RestMapper>>,
}

impl MultiRestMapper {
    #[must_use]
    pub fn new(mappers: Vec<Arc<dyn RestMapper>>) -> Self {
        Self { mappers }
    }

    #[must_use]
    pub fn with(mut self, mapper: Arc<dyn RestMapper>) -> Self {
        self.mappers.push(mapper);
        self
    }
}

impl RestMapper for MultiRestMapper {
    fn rest_mapping(&self, kind: &str, version: &str) -> Result<RestMapping, RegistryError> {
        self.mappers
            .iter()
            .find_map(|m| m.rest_mapping(kind, version).ok())
            .ok_or_else(|| RegistryError::NoMapping {
                kind: kind.to_owned(),
                version: version.to_owned(),
            })
    }

    fn kind_for_resource(&self, version: &str, resource: &str) -> Result<String, RegistryError> {
        self.mappers
            .iter()
            .find_map(|m| m.kind_for_resource(version, resource).ok())
            .ok_or_else(|| RegistryError::NoResource {
                resource: resource.to_owned(),
            })
    }
}
