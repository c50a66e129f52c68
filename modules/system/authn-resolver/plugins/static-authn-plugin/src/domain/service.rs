//! Service implementation for the static `AuthN` plugin.

use std::collections::HashMap;

use meridian_security::UserInfo;
use meridian_security::constants::AUTHENTICATED_GROUP;

use crate::config::{AuthNMode, IdentityConfig, StaticAuthNPluginConfig};

/// Static `AuthN` service.
///
/// Provides token-to-identity mapping based on configuration mode:
/// - `accept_all`: Any non-empty token maps to the default identity
/// - `static_tokens`: Specific tokens map to specific identities
#[derive(Debug, Clone)]
pub struct Service {
    mode: AuthNMode,
    default_identity: UserInfo,
    token_map: HashMap<String, UserInfo>,
}

impl Service {
    /// Create a service from plugin configuration.
    #[must_use]
    pub fn from_config(cfg: &StaticAuthNPluginConfig) -> Self {
        let token_map: HashMap<String, UserInfo> = cfg
            .tokens
            .iter()
            .map(|m| (m.token.clone(), to_user(&m.identity)))
            .collect();

        tracing::debug!(mode = ?cfg.mode, tokens = token_map.len(), "Static authenticator configured");

        Self {
            mode: cfg.mode,
            default_identity: to_user(&cfg.default_identity),
            token_map,
        }
    }

    /// Authenticate a bearer token and return the user.
    ///
    /// Returns `None` if the token is not recognized (in `static_tokens` mode)
    /// or empty.
    #[must_use]
    pub fn authenticate(&self, bearer_token: &str) -> Option<UserInfo> {
        if bearer_token.is_empty() {
            return None;
        }

        let user = match self.mode {
            AuthNMode::AcceptAll => &self.default_identity,
            AuthNMode::StaticTokens => self.token_map.get(bearer_token)?,
        };

        Some(user.clone())
    }
}

fn to_user(identity: &IdentityConfig) -> UserInfo {
    let uid = if identity.uid.is_empty() {
        identity.name.as_str()
    } else {
        identity.uid.as_str()
    };

    UserInfo::builder()
        .name(&identity.name)
        .uid(uid)
        .groups(identity.groups.clone())
        .group(AUTHENTICATED_GROUP)
        .build()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::TokenMapping;
    use meridian_security::constants::{ADMIN_USER, CLUSTER_ADMIN_GROUP};

    fn default_config() -> StaticAuthNPluginConfig {
        StaticAuthNPluginConfig::default()
    }

    #[test]
    fn accept_all_mode_returns_default_identity() {
        let service = Service::from_config(&default_config());

        let user = service.authenticate("any-token-value").unwrap();
        assert_eq!(user.name(), ADMIN_USER);
        assert_eq!(user.uid(), ADMIN_USER);
        assert!(user.in_group(CLUSTER_ADMIN_GROUP));
        assert!(user.in_group(AUTHENTICATED_GROUP));
    }

    #[test]
    fn accept_all_mode_rejects_empty_token() {
        let service = Service::from_config(&default_config());

        assert!(service.authenticate("").is_none());
    }

    #[test]
    fn static_tokens_mode_returns_mapped_identity() {
        let cfg = StaticAuthNPluginConfig {
            mode: AuthNMode::StaticTokens,
            tokens: vec![TokenMapping {
                token: "token-user-a".to_owned(),
                identity: IdentityConfig {
                    name: "alice".to_owned(),
                    uid: "u-1".to_owned(),
                    groups: vec!["dev".to_owned(), AUTHENTICATED_GROUP.to_owned()],
                },
            }],
            ..default_config()
        };

        let service = Service::from_config(&cfg);

        let user = service.authenticate("token-user-a").unwrap();
        assert_eq!(user.name(), "alice");
        assert_eq!(user.uid(), "u-1");
        assert_eq!(
            user.groups(),
            &["dev".to_owned(), AUTHENTICATED_GROUP.to_owned()]
        );
    }

    #[test]
    fn static_tokens_mode_rejects_unknown_token() {
        let cfg = StaticAuthNPluginConfig {
            mode: AuthNMode::StaticTokens,
            tokens: vec![TokenMapping {
                token: "known-token".to_owned(),
                identity: IdentityConfig::default(),
            }],
            ..default_config()
        };

        let service = Service::from_config(&cfg);

        assert!(service.authenticate("unknown-token").is_none());
        assert!(service.authenticate("").is_none());
    }
}
