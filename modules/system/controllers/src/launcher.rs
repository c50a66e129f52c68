//! Starting controllers under supervision.

use std::sync::Arc;
use std::time::Duration;

use api_registry::Codec;
use meridian_runtime::{RestartPolicy, SupervisedTask, TaskHandle, TaskSupervisor};
use serde::Deserialize;

use crate::build::{BuildHandler, BuildImageChangeHandler};
use crate::client::ResourceClient;
use crate::deploy::{
    DeploymentConfigChangeHandler, DeploymentConfigHandler, DeploymentHandler,
    DeploymentImageChangeHandler,
};
use crate::env::EnvVar;
use crate::queue::{Handler, QueueController};
use crate::strategy::BuildStrategies;

pub const BUILD_CONTROLLER: &str = "build-controller";
pub const BUILD_IMAGE_CHANGE_CONTROLLER: &str = "build-image-change-trigger-controller";
pub const DEPLOYMENT_CONTROLLER: &str = "deployment-controller";
pub const DEPLOYMENT_CONFIG_CONTROLLER: &str = "deployment-config-controller";
pub const DEPLOYMENT_CONFIG_CHANGE_CONTROLLER: &str = "deployment-config-change-controller";
pub const DEPLOYMENT_IMAGE_CHANGE_CONTROLLER: &str = "deployment-image-change-trigger-controller";

/// Timing shared by every controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerSettings {
    /// Seconds between two passes over the watched resource.
    pub resync_interval_secs: u64,
    /// Milliseconds to wait before restarting a controller whose loop ended.
    pub restart_delay_ms: u64,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            resync_interval_secs: 5,
            restart_delay_ms: 1000,
        }
    }
}

impl ControllerSettings {
    #[must_use]
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    #[must_use]
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

/// Clients for the resources the controllers read and write.
#[derive(Clone)]
pub struct ClientSet {
    pub builds: Arc<dyn ResourceClient>,
    pub build_configs: Arc<dyn ResourceClient>,
    pub image_repositories: Arc<dyn ResourceClient>,
    pub deployments: Arc<dyn ResourceClient>,
    pub deployment_configs: Arc<dyn ResourceClient>,
    pub pods: Arc<dyn ResourceClient>,
}

/// Builds each controller from its collaborators and registers it with the
/// supervisor, which restarts it whenever its loop ends.
pub struct ControllerLauncher {
    supervisor: Arc<TaskSupervisor>,
    clients: ClientSet,
    settings: ControllerSettings,
}

impl ControllerLauncher {
    #[must_use]
    pub fn new(supervisor: Arc<TaskSupervisor>, clients: ClientSet, settings: ControllerSettings) -> Self {
        Self {
            supervisor,
            clients,
            settings,
        }
    }

    fn launch(
        &self,
        name: &'static str,
        watched: &Arc<dyn ResourceClient>,
        handler: Arc<dyn Handler>,
    ) -> TaskHandle {
        let controller = Arc::new(QueueController::new(
            name,
            Arc::clone(watched),
            handler,
            self.settings.resync_interval(),
        ));
        let task = SupervisedTask::new(name, move || Arc::clone(&controller).run())
            .with_restart_policy(RestartPolicy::with_min_delay(self.settings.restart_delay()));
        let handle = self.supervisor.spawn(task);
        tracing::info!(controller = name, "Controller launched");
        handle
    }

    /// Creates pods for new builds.
    pub fn run_build_controller(&self, strategies: BuildStrategies) -> TaskHandle {
        let handler = BuildHandler::new(
            Arc::clone(&self.clients.builds),
            Arc::clone(&self.clients.pods),
            strategies,
        );
        self.launch(BUILD_CONTROLLER, &self.clients.builds, Arc::new(handler))
    }

    /// Creates builds when images followed by build configs change.
    pub fn run_build_image_change_trigger_controller(&self) -> TaskHandle {
        let handler = BuildImageChangeHandler::new(
            Arc::clone(&self.clients.build_configs),
            Arc::clone(&self.clients.builds),
        );
        self.launch(
            BUILD_IMAGE_CHANGE_CONTROLLER,
            &self.clients.image_repositories,
            Arc::new(handler),
        )
    }

    /// Creates deployer pods for new deployments.
    pub fn run_deployment_controller(
        &self,
        environment: Vec<EnvVar>,
        deployer_image: String,
        use_local_images: bool,
    ) -> TaskHandle {
        let handler = DeploymentHandler::new(
            Arc::clone(&self.clients.deployments),
            Arc::clone(&self.clients.pods),
            environment,
            deployer_image,
            use_local_images,
        );
        self.launch(DEPLOYMENT_CONTROLLER, &self.clients.deployments, Arc::new(handler))
    }

    /// Creates the deployment of each config's latest version.
    pub fn run_deployment_config_controller(&self, codec: Arc<dyn Codec>) -> TaskHandle {
        let handler = DeploymentConfigHandler::new(Arc::clone(&self.clients.deployments), codec);
        self.launch(
            DEPLOYMENT_CONFIG_CONTROLLER,
            &self.clients.deployment_configs,
            Arc::new(handler),
        )
    }

    /// Bumps config versions when their template changes.
    pub fn run_deployment_config_change_controller(&self, codec: Arc<dyn Codec>) -> TaskHandle {
        let handler = DeploymentConfigChangeHandler::new(
            Arc::clone(&self.clients.deployment_configs),
            Arc::clone(&self.clients.deployments),
            codec,
        );
        self.launch(
            DEPLOYMENT_CONFIG_CHANGE_CONTROLLER,
            &self.clients.deployment_configs,
            Arc::new(handler),
        )
    }

    /// Bumps config versions when images they follow change.
    pub fn run_deployment_image_change_trigger_controller(&self) -> TaskHandle {
        let handler =
            DeploymentImageChangeHandler::new(Arc::clone(&self.clients.deployment_configs));
        self.launch(
            DEPLOYMENT_IMAGE_CHANGE_CONTROLLER,
            &self.clients.image_repositories,
            Arc::new(handler),
        )
    }
}
