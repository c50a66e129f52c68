#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Security primitives shared by the Meridian master.
//!
//! - [`UserInfo`] - the acting identity produced by authentication
//! - [`RequestContextMap`] - request-scoped mapping from in-flight request to acting user
pub mod constants;
pub mod context;
pub mod user;

pub use context::{RequestContextGuard, RequestContextMap, RequestKey};
pub use user::{UserInfo, UserInfoBuilder};
