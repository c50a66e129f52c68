//! Authorization rule objects and per-request attributes.

use std::collections::{BTreeMap, BTreeSet};

use meridian_security::UserInfo;
use serde::{Deserialize, Serialize};

/// Name of the policy every namespace's rules live in.
pub const POLICY_NAME: &str = "default";

/// Matches every verb or every resource in a [`PolicyRule`].
pub const WILDCARD: &str = "*";

/// Addressing and versioning fields shared by every rule object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
}

impl ObjectMeta {
    #[must_use]
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_owned(),
            namespace: namespace.to_owned(),
            ..Self::default()
        }
    }
}

/// Grants `verbs` on `resources`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub verbs: BTreeSet<String>,
    pub resources: BTreeSet<String>,
}

impl PolicyRule {
    #[must_use]
    pub fn new(verbs: &[&str], resources: &[&str]) -> Self {
        Self {
            verbs: verbs.iter().map(|v| (*v).to_owned()).collect(),
            resources: resources.iter().map(|r| (*r).to_owned()).collect(),
        }
    }

    /// Whether the rule grants `verb` on `resource`. Resource names compare
    /// case-insensitively so mixed-case URLs match lowercase rules.
    #[must_use]
    pub fn allows(&self, verb: &str, resource: &str) -> bool {
        let verb_ok = self.verbs.iter().any(|v| v == WILDCARD || v == verb);
        let resource_ok = self
            .resources
            .iter()
            .any(|r| r == WILDCARD || r.eq_ignore_ascii_case(resource));
        verb_ok && resource_ok
    }
}

/// A named set of rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

impl Role {
    #[must_use]
    pub fn new(namespace: &str, name: &str, rules: Vec<PolicyRule>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            rules,
        }
    }

    #[must_use]
    pub fn allows(&self, verb: &str, resource: &str) -> bool {
        self.rules.iter().any(|r| r.allows(verb, resource))
    }
}

/// The roles defined in one namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub roles: BTreeMap<String, Role>,
}

impl Policy {
    #[must_use]
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            roles: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_role(mut self, role: Role) -> Self {
        self.roles.insert(role.metadata.name.clone(), role);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }
}

/// Points a [`RoleBinding`] at a role of the policy in `namespace`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRef {
    pub namespace: String,
    pub name: String,
}

/// Associates users and groups with a role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleBinding {
    pub metadata: ObjectMeta,
    pub role_ref: RoleRef,
    #[serde(default)]
    pub user_names: BTreeSet<String>,
    #[serde(default)]
    pub group_names: BTreeSet<String>,
}

impl RoleBinding {
    #[must_use]
    pub fn new(namespace: &str, name: &str, role_ref: RoleRef) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            role_ref,
            user_names: BTreeSet::new(),
            group_names: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_users(mut self, users: &[&str]) -> Self {
        self.user_names.extend(users.iter().map(|u| (*u).to_owned()));
        self
    }

    #[must_use]
    pub fn with_groups(mut self, groups: &[&str]) -> Self {
        self.group_names.extend(groups.iter().map(|g| (*g).to_owned()));
        self
    }

    /// Whether `user` is a subject of this binding, by name or by group.
    #[must_use]
    pub fn applies_to(&self, user: &UserInfo) -> bool {
        self.user_names.contains(user.name())
            || user.groups().iter().any(|g| self.group_names.contains(g))
    }
}

/// The role bindings in one namespace that reference the policy of
/// `metadata.name`'s namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyBinding {
    pub metadata: ObjectMeta,
    /// Namespace of the policy the bindings' roles come from.
    pub policy_ref: String,
    #[serde(default)]
    pub role_bindings: BTreeMap<String, RoleBinding>,
}

impl PolicyBinding {
    /// A binding in `namespace` to the policy of `policy_namespace`; named
    /// after the policy namespace.
    #[must_use]
    pub fn new(namespace: &str, policy_namespace: &str) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, policy_namespace),
            policy_ref: policy_namespace.to_owned(),
            role_bindings: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_role_binding(mut self, binding: RoleBinding) -> Self {
        self.role_bindings
            .insert(binding.metadata.name.clone(), binding);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }
}

/// What a request is trying to do, derived from its method and path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationAttributes {
    pub user: UserInfo,
    pub verb: String,
    pub resource: String,
    /// Empty for cluster-wide requests.
    pub namespace: String,
    pub name: Option<String>,
    pub request_uri: String,
}

impl AuthorizationAttributes {
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        matches!(self.verb.as_str(), "get" | "list" | "watch")
    }
}

/// Outcome of [`crate::Authorizer::authorize`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub allowed: bool,
    pub reason: String,
}

impl Decision {
    #[must_use]
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn rule_wildcards() {
        let all = PolicyRule::new(&[WILDCARD], &[WILDCARD]);
        assert!(all.allows("delete", "builds"));

        let read = PolicyRule::new(&["get", "list"], &["buildconfigs"]);
        assert!(read.allows("get", "buildConfigs"));
        assert!(!read.allows("create", "buildConfigs"));
        assert!(!read.allows("get", "builds"));
    }

    #[test]
    fn binding_matches_user_or_group() {
        let binding = RoleBinding::new("master", "admins", RoleRef::default())
            .with_users(&["alice"])
            .with_groups(&["ops"]);

        let alice = UserInfo::builder().name("alice").build();
        let bob_ops = UserInfo::builder().name("bob").group("ops").build();
        let carol = UserInfo::builder().name("carol").group("dev").build();

        assert!(binding.applies_to(&alice));
        assert!(binding.applies_to(&bob_ops));
        assert!(!binding.applies_to(&carol));
    }

    #[test]
    fn policy_serializes_camel_case() {
        let binding = PolicyBinding::new("dev", "master").with_role_binding(
            RoleBinding::new("dev", "viewers", RoleRef {
                namespace: "master".to_owned(),
                name: "view".to_owned(),
            })
            .with_groups(&["dev-team"]),
        );
        let json = serde_json::to_value(&binding).unwrap();

        assert_eq!(json["metadata"]["name"], "master");
        assert_eq!(json["policyRef"], "master");
        assert_eq!(json["roleBindings"]["viewers"]["roleRef"]["name"], "view");
        assert_eq!(json["roleBindings"]["viewers"]["groupNames"][0], "dev-team");

        let back: PolicyBinding = serde_json::from_value(json).unwrap();
        assert_eq!(back, binding);
    }
}
