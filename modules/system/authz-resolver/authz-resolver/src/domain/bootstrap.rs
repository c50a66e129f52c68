//! Default policy of the master authorization namespace.

use authz_resolver_sdk::{
    POLICY_NAME, Policy, PolicyBinding, PolicyRule, PolicyStore, PolicyStoreError, Role,
    RoleBinding, RoleRef, WILDCARD,
};
use meridian_security::constants::{
    ADMIN_USER, AUTHENTICATED_GROUP, CLUSTER_ADMIN_GROUP, COMPONENT_GROUP, DEPLOYER_GROUP,
};

pub const CLUSTER_ADMIN_ROLE: &str = "cluster-admin";
pub const ADMIN_ROLE: &str = "admin";
pub const EDIT_ROLE: &str = "edit";
pub const VIEW_ROLE: &str = "view";
pub const BASIC_USER_ROLE: &str = "basic-user";
pub const COMPONENT_ROLE: &str = "system:component";
pub const DEPLOYER_ROLE: &str = "system:deployer";

const READ_VERBS: &[&str] = &["get", "list", "watch"];
const WRITE_VERBS: &[&str] = &["get", "list", "watch", "create", "update", "patch", "delete"];

/// Project content an editor may change; authorization objects are excluded.
const EDITABLE_RESOURCES: &[&str] = &[
    "builds",
    "buildConfigs",
    "buildLogs",
    "deployments",
    "deploymentConfigs",
    "generateDeploymentConfigs",
    "deploymentConfigRollbacks",
    "images",
    "imageRepositories",
    "imageRepositoryMappings",
    "imageRepositoryTags",
    "routes",
    "templateConfigs",
    "pods",
    "services",
    "replicationControllers",
];

/// The policy created in `namespace` when none exists.
#[must_use]
pub fn bootstrap_policy(namespace: &str) -> Policy {
    let role = |name: &str, rules: Vec<PolicyRule>| Role::new(namespace, name, rules);

    Policy::new(namespace, POLICY_NAME)
        .with_role(role(CLUSTER_ADMIN_ROLE, vec![PolicyRule::new(&[WILDCARD], &[WILDCARD])]))
        .with_role(role(ADMIN_ROLE, vec![PolicyRule::new(WRITE_VERBS, &[WILDCARD])]))
        .with_role(role(EDIT_ROLE, vec![
            PolicyRule::new(WRITE_VERBS, EDITABLE_RESOURCES),
            PolicyRule::new(READ_VERBS, &["projects"]),
        ]))
        .with_role(role(VIEW_ROLE, vec![PolicyRule::new(READ_VERBS, &[WILDCARD])]))
        .with_role(role(BASIC_USER_ROLE, vec![
            PolicyRule::new(&["get"], &["users"]),
            PolicyRule::new(&["list"], &["projects"]),
        ]))
        .with_role(role(COMPONENT_ROLE, vec![PolicyRule::new(&[WILDCARD], &[WILDCARD])]))
        .with_role(role(DEPLOYER_ROLE, vec![PolicyRule::new(
            &["get", "list", "watch", "create", "update", "patch"],
            &["deployments", "deploymentConfigs", "replicationControllers", "pods"],
        )]))
}

/// The policy binding created in `namespace` when none exists.
#[must_use]
pub fn bootstrap_policy_binding(namespace: &str) -> PolicyBinding {
    let binding = |name: &str, role: &str| {
        RoleBinding::new(namespace, name, RoleRef {
            namespace: namespace.to_owned(),
            name: role.to_owned(),
        })
    };

    PolicyBinding::new(namespace, namespace)
        .with_role_binding(
            binding("cluster-admins", CLUSTER_ADMIN_ROLE)
                .with_users(&[ADMIN_USER])
                .with_groups(&[CLUSTER_ADMIN_GROUP]),
        )
        .with_role_binding(binding("system:components", COMPONENT_ROLE).with_groups(&[COMPONENT_GROUP]))
        .with_role_binding(binding("system:deployers", DEPLOYER_ROLE).with_groups(&[DEPLOYER_GROUP]))
        .with_role_binding(binding("basic-users", BASIC_USER_ROLE).with_groups(&[AUTHENTICATED_GROUP]))
}

/// What happened to one bootstrap object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapStep {
    Created,
    AlreadyPresent,
    /// Reading or creating failed; startup continues and requests that
    /// need the missing rules are denied.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub policy: BootstrapStep,
    pub policy_binding: BootstrapStep,
}

/// Create the default policy and policy binding of `namespace` if absent.
///
/// The two objects are handled independently. Failures are logged and
/// reported, never returned.
#[tracing::instrument(skip(store))]
pub async fn ensure_bootstrap_policy(store: &dyn PolicyStore, namespace: &str) -> BootstrapReport {
    let policy = match store.get_policy(namespace, POLICY_NAME).await {
        Ok(_) => BootstrapStep::AlreadyPresent,
        Err(e) if e.is_not_found() => {
            create_step("policy", store.create_policy(bootstrap_policy(namespace)).await.map(drop))
        }
        Err(e) => {
            tracing::error!(name = POLICY_NAME, error = %e, "Error getting policy");
            BootstrapStep::Failed(e.to_string())
        }
    };

    let policy_binding = match store.get_policy_binding(namespace, namespace).await {
        Ok(_) => BootstrapStep::AlreadyPresent,
        Err(e) if e.is_not_found() => create_step(
            "policy binding",
            store
                .create_policy_binding(bootstrap_policy_binding(namespace))
                .await
                .map(drop),
        ),
        Err(e) => {
            tracing::error!(name = namespace, error = %e, "Error getting policy binding");
            BootstrapStep::Failed(e.to_string())
        }
    };

    BootstrapReport {
        policy,
        policy_binding,
    }
}

fn create_step(what: &str, created: Result<(), PolicyStoreError>) -> BootstrapStep {
    match created {
        Ok(()) => {
            tracing::info!("Created bootstrap {what}");
            BootstrapStep::Created
        }
        Err(PolicyStoreError::AlreadyExists { .. }) => BootstrapStep::AlreadyPresent,
        Err(e) => {
            tracing::error!(error = %e, "Error creating bootstrap {what}");
            BootstrapStep::Failed(e.to_string())
        }
    }
}
