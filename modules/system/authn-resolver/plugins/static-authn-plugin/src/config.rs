//! Configuration for the static `AuthN` plugin.

use meridian_security::constants::{ADMIN_USER, CLUSTER_ADMIN_GROUP};
use serde::Deserialize;

/// Plugin configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StaticAuthNPluginConfig {
    /// Authentication mode.
    pub mode: AuthNMode,

    /// Default identity returned in `accept_all` mode.
    pub default_identity: IdentityConfig,

    /// Static token-to-identity mappings for `static_tokens` mode.
    pub tokens: Vec<TokenMapping>,
}

/// Authentication mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthNMode {
    /// Accept any non-empty token and return the default identity.
    #[default]
    AcceptAll,
    /// Map specific tokens to specific identities.
    StaticTokens,
}

/// Identity configuration for a user.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdentityConfig {
    /// User name, matched by role bindings.
    pub name: String,

    /// Stable identifier; the name is used when empty.
    pub uid: String,

    /// Groups, matched by role bindings.
    pub groups: Vec<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            name: ADMIN_USER.to_owned(),
            uid: String::new(),
            groups: vec![CLUSTER_ADMIN_GROUP.to_owned()],
        }
    }
}

/// Maps a static token to a specific identity.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenMapping {
    /// The bearer token value to match.
    pub token: String,
    /// The identity to return when this token is presented.
    pub identity: IdentityConfig,
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn deserializes_token_mappings() {
        let cfg: StaticAuthNPluginConfig = serde_json::from_value(serde_json::json!({
            "mode": "static_tokens",
            "tokens": [
                { "token": "t1", "identity": { "name": "alice", "groups": ["dev"] } }
            ]
        }))
        .unwrap();

        assert_eq!(cfg.mode, AuthNMode::StaticTokens);
        assert_eq!(cfg.default_identity.name, ADMIN_USER);
        assert_eq!(cfg.tokens[0].identity.name, "alice");
        assert!(cfg.tokens[0].identity.uid.is_empty());
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = serde_json::from_value::<StaticAuthNPluginConfig>(serde_json::json!({
            "vendor": "x"
        }));
        assert!(err.is_err());
    }
}
