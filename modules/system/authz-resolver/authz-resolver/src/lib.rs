//! `AuthZ` Resolver
//!
//! Derives authorization attributes from requests, evaluates them against
//! namespaced policies and seeds the default policy at startup.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod domain;
pub mod infra;

pub use domain::attributes::{AttributeBuilder, RequestInfo};
pub use domain::authorizer::PolicyAuthorizer;
pub use domain::bootstrap::{
    BootstrapReport, BootstrapStep, bootstrap_policy, bootstrap_policy_binding,
    ensure_bootstrap_policy,
};
pub use infra::memory_store::InMemoryPolicyStore;
