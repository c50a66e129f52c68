#![allow(clippy::unwrap_used, clippy::expect_used)]

use api_registry::{
    DefaultRestMapper, RegistryError, RestMapper, RestScope, StorageHelper, latest,
};

#[test]
fn root_allow_listed_kind_resolves_to_root() {
    let mapper = latest::rest_mapper().unwrap();

    let project = mapper.rest_mapping("Project", "v1beta1").unwrap();
    assert_eq!(project.scope, RestScope::Root);
    assert_eq!(project.resource, "projects");
}

#[test]
fn other_kinds_resolve_to_legacy_namespace_with_mixed_case() {
    let mapper = latest::rest_mapper().unwrap();

    let build = mapper.rest_mapping("Build", "v1beta1").unwrap();
    assert_eq!(build.scope, RestScope::NamespaceLegacy);
    assert!(build.mixed_case_url);

    let config = mapper.rest_mapping("DeploymentConfig", "v1beta1").unwrap();
    assert_eq!(config.resource, "deploymentConfigs");
    assert_eq!(
        config.resource_url("/osapi", Some("prod"), Some("frontend")),
        "/osapi/v1beta1/deploymentConfigs/frontend?namespace=prod"
    );
}

#[test]
fn re_registering_the_scheme_is_stable() {
    let scheme = latest::scheme();
    let mut mapper = latest::origin_mapper(&scheme, latest::VERSIONS).unwrap();
    let before = mapper.mappings_for_version("v1beta1");

    for kind in scheme.known_kinds("v1beta1") {
        let scope = mapper.rest_mapping(kind, "v1beta1").unwrap().scope;
        assert!(!mapper.add(scope, kind, "v1beta1", true).unwrap());
    }

    assert_eq!(mapper.mappings_for_version("v1beta1"), before);
    assert_eq!(mapper.len(), latest::ORIGIN_KINDS.len());
}

#[test]
fn unknown_version_message_lists_known_versions() {
    let err = latest::interfaces_for("unknown").unwrap_err();
    assert_eq!(
        err,
        RegistryError::UnsupportedVersion {
            requested: "unknown".to_owned(),
            known: vec!["v1beta1".to_owned()],
        }
    );
    assert!(err.to_string().ends_with("(valid: v1beta1)"));

    let registry = latest::version_registry();
    assert!(StorageHelper::for_version(&registry, "unknown").is_err());
}

#[test]
fn unmapped_kind_is_a_lookup_failure() {
    let mapper = latest::rest_mapper().unwrap();
    assert!(matches!(
        mapper.rest_mapping("Widget", "v1beta1"),
        Err(RegistryError::NoMapping { .. })
    ));

    let empty = DefaultRestMapper::new();
    assert!(empty.is_empty());
    assert!(empty.kind_for_resource("v1beta1", "builds").is_err());
}
