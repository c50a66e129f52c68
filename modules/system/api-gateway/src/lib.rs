#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! API Gateway
//!
//! Assembles the Meridian master: the protected and open route containers,
//! the authentication and authorization chain, the API documentation, the
//! listeners, the web console and the controllers.

pub mod assets;
pub mod auth;
pub mod config;
pub mod container;
pub mod cors;
pub mod error;
pub mod master;
pub mod openapi;
pub mod resources;
pub mod server;
pub mod service_resolver;
pub mod webhooks;

pub use config::{MasterConfig, ReadinessConfig, TlsConfig};
pub use container::{ApiInstaller, FilterContext, RouteContainer, RouteFilter, RouteSpec};
pub use error::AssemblyError;
pub use master::{ListenerHandle, Master, MasterDeps};
