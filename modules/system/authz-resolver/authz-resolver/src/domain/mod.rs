//! Domain layer for the `AuthZ` resolver.

pub mod attributes;
pub mod authorizer;
pub mod bootstrap;
