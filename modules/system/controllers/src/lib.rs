#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Build and deployment controllers.
//!
//! - [`ResourceClient`] - what a controller needs from the resource API
//! - [`QueueController`] - resync loop handing changed objects to a [`Handler`]
//! - [`build`] and [`deploy`] - the domain handlers
//! - [`ControllerLauncher`] - starts controllers under a `TaskSupervisor`

pub mod build;
pub mod client;
pub mod deploy;
pub mod env;
pub mod error;
pub mod image;
pub mod launcher;
mod object;
pub mod queue;
pub mod strategy;

pub use client::{MemoryClient, ResourceClient};
pub use env::{DeployerClientConfig, EnvVar, deployment_environment, env_vars_from_config};
pub use error::{ClientError, HandlerError};
pub use image::ImageTemplate;
pub use launcher::{ClientSet, ControllerLauncher, ControllerSettings};
pub use object::ObjectKey;
pub use queue::{Handler, QueueController, SyncStats};
pub use strategy::{
    BuildStrategies, BuildStrategy, CustomBuildStrategy, DockerBuildStrategy, StiBuildStrategy,
};
