#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! `AuthZ` Resolver SDK
//!
//! Public contracts of the authorization pipeline:
//!
//! - [`Authorizer`] - decides whether [`AuthorizationAttributes`] are allowed
//! - [`PolicyStore`] - namespaced storage of [`Policy`] and [`PolicyBinding`]
//! - [`Policy`], [`Role`], [`PolicyRule`], [`PolicyBinding`], [`RoleBinding`] - rule objects
//! - [`AttributesError`], [`AuthorizationError`], [`PolicyStoreError`] - error types

pub mod api;
pub mod error;
pub mod models;

pub use api::{Authorizer, PolicyStore};
pub use error::{AttributesError, AuthorizationError, PolicyStoreError};
pub use models::{
    AuthorizationAttributes, Decision, ObjectMeta, POLICY_NAME, Policy, PolicyBinding, PolicyRule,
    Role, RoleBinding, RoleRef, WILDCARD,
};
