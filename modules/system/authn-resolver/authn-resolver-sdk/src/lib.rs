//! `AuthN` Resolver SDK
//!
//! This crate provides the contract between the API gateway and
//! authentication plugins:
//!
//! - [`Authenticator`] - Trait implemented by plugins
//! - [`Credentials`] - What the gateway extracted from the request
//! - [`AuthenticationResult`] - Authentication result model
//! - [`AuthNError`] - Error types
//!
//! ## Usage
//!
//! ```ignore
//! use authn_resolver_sdk::{Authenticator, Credentials};
//!
//! let credentials = Credentials::bearer("xyz...");
//! match authenticator.authenticate(&credentials).await? {
//!     Some(result) => tracing::debug!(user = result.user.name(), "authenticated"),
//!     None => { /* not recognized: reject with 401 */ }
//! }
//! ```

pub mod api;
pub mod error;
pub mod models;

// Re-export main types at crate root
pub use api::Authenticator;
pub use error::AuthNError;
pub use models::{AuthenticationResult, Credentials};
