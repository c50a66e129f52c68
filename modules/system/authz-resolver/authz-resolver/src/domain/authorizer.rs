//! Policy-based authorizer.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use authz_resolver_sdk::{
    AuthorizationAttributes, AuthorizationError, Authorizer, Decision, POLICY_NAME, Policy,
    PolicyStore, RoleRef,
};

/// Grants a request when a role binding visible to the acting user, in the
/// request namespace or in the master namespace, references a role that
/// allows the verb on the resource.
///
/// Rules are read from the store on every call.
pub struct PolicyAuthorizer {
    master_namespace: String,
    store: Arc<dyn PolicyStore>,
}

impl PolicyAuthorizer {
    #[must_use]
    pub fn new(master_namespace: impl Into<String>, store: Arc<dyn PolicyStore>) -> Self {
        Self {
            master_namespace: master_namespace.into(),
            store,
        }
    }

    #[must_use]
    pub fn master_namespace(&self) -> &str {
        &self.master_namespace
    }

    /// Namespaces whose bindings apply: the master namespace first, then the
    /// request namespace.
    fn binding_namespaces<'a>(&'a self, attributes: &'a AuthorizationAttributes) -> Vec<&'a str> {
        let mut namespaces = vec![self.master_namespace.as_str()];
        if !attributes.namespace.is_empty() && attributes.namespace != self.master_namespace {
            namespaces.push(attributes.namespace.as_str());
        }
        namespaces
    }

    async fn policy<'c>(
        &self,
        namespace: &str,
        cache: &'c mut HashMap<String, Option<Policy>>,
    ) -> Result<Option<&'c Policy>, AuthorizationError> {
        if !cache.contains_key(namespace) {
            let policy = match self.store.get_policy(namespace, POLICY_NAME).await {
                Ok(policy) => Some(policy),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e.into()),
            };
            cache.insert(namespace.to_owned(), policy);
        }
        Ok(cache.get(namespace).and_then(Option::as_ref))
    }

    async fn role_allows(
        &self,
        role_ref: &RoleRef,
        attributes: &AuthorizationAttributes,
        cache: &mut HashMap<String, Option<Policy>>,
    ) -> Result<bool, AuthorizationError> {
        let Some(policy) = self.policy(&role_ref.namespace, cache).await? else {
            return Ok(false);
        };
        Ok(policy
            .roles
            .get(&role_ref.name)
            .is_some_and(|role| role.allows(&attributes.verb, &attributes.resource)))
    }
}

#[async_trait]
impl Authorizer for PolicyAuthorizer {
    #[tracing::instrument(skip_all, fields(user = %attributes.user.name(), verb = %attributes.verb, resource = %attributes.resource))]
    async fn authorize(
        &self,
        attributes: &AuthorizationAttributes,
    ) -> Result<Decision, AuthorizationError> {
        let mut policies: HashMap<String, Option<Policy>> = HashMap::new();

        for namespace in self.binding_namespaces(attributes) {
            let bindings = self.store.list_policy_bindings(namespace).await?;
            for binding in bindings.iter().flat_map(|pb| pb.role_bindings.values()) {
                if !binding.applies_to(&attributes.user) {
                    continue;
                }
                if self.role_allows(&binding.role_ref, attributes, &mut policies).await? {
                    tracing::debug!(
                        namespace,
                        binding = %binding.metadata.name,
                        role = %binding.role_ref.name,
                        "Request allowed"
                    );
                    return Ok(Decision::allow(format!(
                        "allowed by role binding \"{}\" in {namespace}",
                        binding.metadata.name
                    )));
                }
            }
        }

        let namespace = if attributes.namespace.is_empty() {
            self.master_namespace.as_str()
        } else {
            attributes.namespace.as_str()
        };
        Ok(Decision::deny(format!(
            "{} cannot {} on {} in {namespace}",
            attributes.user.name(),
            attributes.verb,
            attributes.resource
        )))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::domain::bootstrap::{bootstrap_policy, bootstrap_policy_binding};
    use crate::infra::memory_store::InMemoryPolicyStore;
    use authz_resolver_sdk::{PolicyBinding, PolicyRule, Role, RoleBinding};
    use meridian_security::UserInfo;
    use meridian_security::constants::{ADMIN_USER, AUTHENTICATED_GROUP};

    fn attrs(user: UserInfo, verb: &str, resource: &str, namespace: &str) -> AuthorizationAttributes {
        AuthorizationAttributes {
            user,
            verb: verb.to_owned(),
            resource: resource.to_owned(),
            namespace: namespace.to_owned(),
            name: None,
            request_uri: format!("/osapi/v1beta1/{resource}"),
        }
    }

    async fn seeded_store() -> Arc<InMemoryPolicyStore> {
        let store = Arc::new(InMemoryPolicyStore::new());
        store.create_policy(bootstrap_policy("master")).await.unwrap();
        store
            .create_policy_binding(bootstrap_policy_binding("master"))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn cluster_admin_is_allowed_everywhere() {
        let authorizer = PolicyAuthorizer::new("master", seeded_store().await);
        let admin = UserInfo::builder().name(ADMIN_USER).build();

        let decision = authorizer
            .authorize(&attrs(admin, "delete", "projects", "dev"))
            .await
            .unwrap();
        assert!(decision.allowed, "{}", decision.reason);
    }

    #[tokio::test]
    async fn unbound_user_is_denied_with_reason() {
        let authorizer = PolicyAuthorizer::new("master", seeded_store().await);
        let eve = UserInfo::builder().name("eve").group(AUTHENTICATED_GROUP).build();

        let decision = authorizer
            .authorize(&attrs(eve, "create", "builds", "dev"))
            .await
            .unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "eve cannot create on builds in dev");
    }

    #[tokio::test]
    async fn namespace_binding_grants_only_in_its_namespace() {
        let store = seeded_store().await;
        store
            .create_policy_binding(PolicyBinding::new("dev", "master").with_role_binding(
                RoleBinding::new("dev", "editors", RoleRef {
                    namespace: "master".to_owned(),
                    name: "edit".to_owned(),
                })
                .with_users(&["alice"]),
            ))
            .await
            .unwrap();
        let authorizer = PolicyAuthorizer::new("master", store);
        let alice = || UserInfo::builder().name("alice").build();

        assert!(authorizer.authorize(&attrs(alice(), "create", "buildConfigs", "dev")).await.unwrap().allowed);
        assert!(!authorizer.authorize(&attrs(alice(), "create", "buildConfigs", "prod")).await.unwrap().allowed);
        assert!(!authorizer.authorize(&attrs(alice(), "create", "policies", "dev")).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn missing_policy_fails_closed() {
        let store = Arc::new(InMemoryPolicyStore::new());
        store
            .create_policy_binding(bootstrap_policy_binding("master"))
            .await
            .unwrap();
        let authorizer = PolicyAuthorizer::new("master", store);
        let admin = UserInfo::builder().name(ADMIN_USER).build();

        let decision = authorizer
            .authorize(&attrs(admin, "get", "builds", ""))
            .await
            .unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "system:admin cannot get on builds in master");
    }

    #[tokio::test]
    async fn namespace_local_roles_are_resolved() {
        let store = seeded_store().await;
        store
            .create_policy(Policy::new("dev", POLICY_NAME).with_role(Role::new(
                "dev",
                "route-reader",
                vec![PolicyRule::new(&["get"], &["routes"])],
            )))
            .await
            .unwrap();
        store
            .create_policy_binding(PolicyBinding::new("dev", "dev").with_role_binding(
                RoleBinding::new("dev", "readers", RoleRef {
                    namespace: "dev".to_owned(),
                    name: "route-reader".to_owned(),
                })
                .with_groups(&["qa"]),
            ))
            .await
            .unwrap();
        let authorizer = PolicyAuthorizer::new("master", store);
        let qa = UserInfo::builder().name("quinn").group("qa").build();

        assert!(authorizer.authorize(&attrs(qa.clone(), "get", "routes", "dev")).await.unwrap().allowed);
        assert!(!authorizer.authorize(&attrs(qa, "delete", "routes", "dev")).await.unwrap().allowed);
    }
}
