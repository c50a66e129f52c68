//! The API versions served by this master and their REST mappings.

use std::sync::Arc;

use crate::domain::codec::JsonCodec;
use crate::domain::mapper::{DefaultRestMapper, MultiRestMapper, RestMapper, RestScope};
use crate::domain::meta::JsonMetadataAccessor;
use crate::domain::scheme::Scheme;
use crate::domain::version::{VersionInterfaces, VersionRegistry};
use crate::error::RegistryError;

/// Current external default version.
pub const VERSION: &str = "v1beta1";

/// Oldest server version still supported.
pub const OLDEST_VERSION: &str = "v1beta1";

/// Served versions, least to most feature rich.
pub const VERSIONS: &[&str] = &["v1beta1"];

/// Versions whose URLs keep mixed-case resource names.
const MIXED_CASE_VERSIONS: &[&str] = &["v1beta1"];

/// Versions that pass the namespace as a query parameter.
const LEGACY_NAMESPACE_VERSIONS: &[&str] = &["v1beta1"];

/// Kinds owned by this API.
pub const ORIGIN_KINDS: &[&str] = &[
    "Build",
    "BuildConfig",
    "BuildLog",
    "Deployment",
    "DeploymentConfig",
    "Image",
    "ImageRepository",
    "ImageRepositoryMapping",
    "Template",
    "TemplateConfig",
    "Route",
    "Project",
    "User",
    "Identity",
    "UserIdentityMapping",
    "OAuthClient",
    "OAuthClientAuthorization",
    "OAuthAccessToken",
    "OAuthAuthorizeToken",
    "Role",
    "RoleBinding",
    "Policy",
    "PolicyBinding",
];

/// Kinds addressed at the root of the hierarchy; every other kind is namespaced.
pub const ROOT_SCOPED_KINDS: &[&str] = &[
    "Project",
    "User",
    "Identity",
    "UserIdentityMapping",
    "OAuthAccessToken",
    "OAuthAuthorizeToken",
    "OAuthClient",
    "OAuthClientAuthorization",
];

/// Host-platform versions and kinds, resolved after the origin mapper.
const KUBE_VERSIONS: &[(&str, RestScope, bool)] = &[
    ("v1beta1", RestScope::NamespaceLegacy, true),
    ("v1beta2", RestScope::NamespaceLegacy, true),
    ("v1beta3", RestScope::Namespace, false),
];
const KUBE_KINDS: &[&str] = &[
    "Pod",
    "ReplicationController",
    "Service",
    "Endpoints",
    "Event",
    "Binding",
    "Status",
    "Minion",
    "Namespace",
];
const KUBE_ROOT_SCOPED_KINDS: &[&str] = &["Minion", "Namespace"];

/// Whether this API (rather than the host platform) owns `kind`.
#[must_use]
pub fn origin_kind(kind: &str) -> bool {
    ORIGIN_KINDS.contains(&kind)
}

/// Scheme of every served version.
#[must_use]
pub fn scheme() -> Scheme {
    let mut scheme = Scheme::new();
    for version in VERSIONS {
        scheme.add_known_kinds(version, ORIGIN_KINDS.iter().copied());
    }
    scheme
}

/// Interfaces for one served version.
///
/// # Errors
/// Returns [`RegistryError::UnsupportedVersion`] for versions not in [`VERSIONS`].
pub fn interfaces_for(version: &str) -> Result<VersionInterfaces, RegistryError> {
    version_registry().interfaces_for(version)
}

/// Registry of every served version.
#[must_use]
pub fn version_registry() -> VersionRegistry {
    let scheme = Arc::new(scheme());
    let mut registry = VersionRegistry::new();
    for version in VERSIONS {
        registry.register(
            version,
            VersionInterfaces {
                codec: Arc::new(JsonCodec::new(*version)),
                converter: Arc::clone(&scheme) as _,
                accessor: Arc::new(JsonMetadataAccessor),
            },
        );
    }
    registry
}

/// Register every kind the scheme knows for `versions`.
///
/// # Errors
/// Propagates [`RegistryError::ConflictingMapping`].
pub fn origin_mapper(scheme: &Scheme, versions: &[&str]) -> Result<DefaultRestMapper, RegistryError> {
    let mut mapper = DefaultRestMapper::new();
    for version in versions {
        let mixed_case = MIXED_CASE_VERSIONS.contains(version);
        let namespace_scope = if LEGACY_NAMESPACE_VERSIONS.contains(version) {
            RestScope::NamespaceLegacy
        } else {
            RestScope::Namespace
        };
        for kind in scheme.known_kinds(version) {
            let scope = if ROOT_SCOPED_KINDS.contains(&kind) {
                RestScope::Root
            } else {
                namespace_scope
            };
            mapper.add(scope, kind, version, mixed_case)?;
        }
    }
    tracing::debug!(mappings = mapper.len(), "Origin REST mappings registered");
    Ok(mapper)
}

/// Mappings of the host platform's kinds.
///
/// # Errors
/// Propagates [`RegistryError::ConflictingMapping`].
pub fn kube_mapper() -> Result<DefaultRestMapper, RegistryError> {
    let mut mapper = DefaultRestMapper::new();
    for (version, namespace_scope, mixed_case) in KUBE_VERSIONS {
        for kind in KUBE_KINDS {
            let scope = if KUBE_ROOT_SCOPED_KINDS.contains(kind) {
                RestScope::Root
            } else {
                *namespace_scope
            };
            mapper.add(scope, kind, version, *mixed_case)?;
        }
    }
    Ok(mapper)
}

/// Origin mappings first, then the host platform's.
///
/// # Errors
/// Propagates mapping registration failures.
pub fn rest_mapper() -> Result<MultiRestMapper, RegistryError> {
    let origin: Arc<dyn RestMapper> = Arc::new(origin_mapper(&scheme(), VERSIONS)?);
    let kube: Arc<dyn RestMapper> = Arc::new(kube_mapper()?);
    Ok(MultiRestMapper::new(vec![origin, kube]))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn every_origin_kind_is_mapped_in_every_version() {
        let mapper = rest_mapper().unwrap();
        for version in VERSIONS {
            for kind in ORIGIN_KINDS {
                let mapping = mapper.rest_mapping(kind, version).unwrap();
                assert_eq!(
                    mapping.scope == RestScope::Root,
                    ROOT_SCOPED_KINDS.contains(kind),
                    "{kind}"
                );
            }
        }
    }

    #[test]
    fn host_kinds_fall_through_to_kube_mapper() {
        let mapper = rest_mapper().unwrap();
        let pod = mapper.rest_mapping("Pod", "v1beta3").unwrap();
        assert_eq!(pod.scope, RestScope::Namespace);
        assert_eq!(pod.resource, "pods");

        let rc = mapper.rest_mapping("ReplicationController", "v1beta1").unwrap();
        assert_eq!(rc.resource, "replicationControllers");
        assert!(rc.mixed_case_url);
    }

    #[test]
    fn origin_kinds() {
        assert!(origin_kind("DeploymentConfig"));
        assert!(!origin_kind("Pod"));
    }
}
