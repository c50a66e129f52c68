#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Static `AuthN` Plugin
//!
//! This plugin provides static token-to-identity mapping for development and testing.
//!
//! ## Modes
//!
//! - **`accept_all`** (default): Accepts any non-empty token, returns configured default identity.
//!
//! - **`static_tokens`**: Maps specific tokens to specific identities. Useful for E2E tests
//!   with distinct users.
//!
//! ## Configuration
//!
//! ```yaml
//! authentication:
//!   mode: static_tokens
//!   default_identity:
//!     name: "system:admin"
//!     groups: ["system:cluster-admins"]
//!   tokens:
//!     - token: "deployer-token"
//!       identity:
//!         name: "system:openshift-deployer"
//!         groups: ["system:deployers"]
//! ```

pub mod config;
pub mod domain;

pub use config::{AuthNMode, IdentityConfig, StaticAuthNPluginConfig, TokenMapping};
pub use domain::service::Service;
