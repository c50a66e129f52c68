use serde::{Deserialize, Serialize};

/// `UserInfo` is the acting identity of a request.
///
/// Produced by the authentication stage and consumed by the authorization
/// stage and by any route that needs to resolve "the current user".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    /// Unique user name (e.g. `alice`, `system:admin`).
    name: String,
    /// Stable user identifier assigned by the identity provider.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    uid: String,
    /// Groups the user belongs to.
    #[serde(default)]
    groups: Vec<String>,
}

impl UserInfo {
    /// Create a new `UserInfo` builder
    #[must_use]
    pub fn builder() -> UserInfoBuilder {
        UserInfoBuilder::default()
    }

    /// Get the user name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the user identifier
    #[must_use]
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Get the groups the user belongs to
    #[must_use]
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    /// Whether the user is a member of `group`.
    #[must_use]
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}

#[derive(Default)]
pub struct UserInfoBuilder {
    name: Option<String>,
    uid: Option<String>,
    groups: Vec<String>,
}

impl UserInfoBuilder {
    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_owned());
        self
    }

    #[must_use]
    pub fn uid(mut self, uid: &str) -> Self {
        self.uid = Some(uid.to_owned());
        self
    }

    #[must_use]
    pub fn groups(mut self, groups: Vec<String>) -> Self {
        self.groups = groups;
        self
    }

    #[must_use]
    pub fn group(mut self, group: &str) -> Self {
        if !self.groups.iter().any(|g| g == group) {
            self.groups.push(group.to_owned());
        }
        self
    }

    #[must_use]
    pub fn build(self) -> UserInfo {
        UserInfo {
            name: self.name.unwrap_or_default(),
            uid: self.uid.unwrap_or_default(),
            groups: self.groups,
        }
    }
}
