//! REST resources of the protected API.
//!
//! - [`ResourceBackend`] - per-kind storage the generic handlers sit over
//! - [`MemoryBackend`] - process-local backend persisting through a [`StorageHelper`](api_registry::StorageHelper)
//! - [`PolicyBackend`] - policies and policy bindings over the authorizer's `PolicyStore`
//! - [`RoleBackend`], [`RoleBindingBackend`] - the roles and role bindings inside them
//! - [`DefaultRegistryBackend`] - image repositories with their resolved registry location
//! - [`BackendClient`] - the controllers' `ResourceClient` over a backend
//! - [`ResourceInstaller`], [`VersionsInstaller`] - route installation

mod backend;
mod client;
mod images;
mod policy;
mod rest;
mod roles;

pub use backend::{BackendError, MemoryBackend, ResourceBackend};
pub use client::BackendClient;
pub use images::DefaultRegistryBackend;
pub use policy::PolicyBackend;
pub use rest::{DEFAULT_NAMESPACE, ResourceInstaller, VersionsInstaller};
pub use roles::{RoleBackend, RoleBindingBackend};
