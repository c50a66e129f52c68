//! Deployment controllers.

use std::sync::Arc;

use api_registry::Codec;
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::build::{DEFAULT_TAG, tagged_image};
use crate::client::ResourceClient;
use crate::env::EnvVar;
use crate::error::HandlerError;
use crate::object::{at, at_mut, key_of, set_at, str_at};
use crate::queue::Handler;

pub const DEPLOYMENT_NEW: &str = "New";
pub const DEPLOYMENT_PENDING: &str = "Pending";

pub const CONFIG_CHANGE_TRIGGER: &str = "ConfigChange";
pub const IMAGE_CHANGE_TRIGGER: &str = "ImageChange";

pub const CONFIG_ANNOTATION: &str = "deploymentConfig";
pub const VERSION_ANNOTATION: &str = "deploymentVersion";
pub const ENCODED_CONFIG_ANNOTATION: &str = "encodedDeploymentConfig";

const CONTAINERS: &[&str] = &[
    "template",
    "controllerTemplate",
    "podTemplate",
    "desiredState",
    "manifest",
    "containers",
];

/// Name of the deployment a config produces for `version`.
#[must_use]
pub fn deployment_name(config_name: &str, version: u64) -> String {
    format!("{config_name}-{version}")
}

/// Name of the pod running the deployer for `deployment_name`.
#[must_use]
pub fn deployer_pod_name(deployment_name: &str) -> String {
    format!("deploy-{deployment_name}")
}

fn latest_version(config: &Value) -> u64 {
    at(config, &["latestVersion"]).and_then(Value::as_u64).unwrap_or(0)
}

fn has_trigger(config: &Value, kind: &str) -> bool {
    at(config, &["triggers"])
        .and_then(Value::as_array)
        .is_some_and(|ts| ts.iter().any(|t| str_at(t, &["type"]) == Some(kind)))
}

/// Store `config` with its latest version bumped.
async fn bump_version(
    configs: &dyn ResourceClient,
    mut config: Value,
    cause: &str,
) -> Result<(), HandlerError> {
    let key = key_of(&config)?;
    let next = latest_version(&config) + 1;
    set_at(&mut config, &["latestVersion"], json!(next))?;
    set_at(&mut config, &["details", "causes"], json!([{ "type": cause }]))?;
    configs.update(&key.namespace, config).await?;
    tracing::info!(config = %key, version = next, cause, "Deployment config version bumped");
    Ok(())
}

/// Starts the deployer pod of every new deployment.
pub struct DeploymentHandler {
    deployments: Arc<dyn ResourceClient>,
    pods: Arc<dyn ResourceClient>,
    environment: Vec<EnvVar>,
    recreate_image: String,
    use_local_images: bool,
}

impl DeploymentHandler {
    #[must_use]
    pub fn new(
        deployments: Arc<dyn ResourceClient>,
        pods: Arc<dyn ResourceClient>,
        environment: Vec<EnvVar>,
        recreate_image: String,
        use_local_images: bool,
    ) -> Self {
        Self {
            deployments,
            pods,
            environment,
            recreate_image,
            use_local_images,
        }
    }

    fn deployer_pod(&self, deployment: &Value) -> Result<Value, HandlerError> {
        let key = key_of(deployment)?;
        let image = match str_at(deployment, &["strategy", "type"]) {
            Some("Custom") => str_at(deployment, &["strategy", "customParams", "image"])
                .filter(|i| !i.is_empty())
                .ok_or_else(|| HandlerError::Invalid("custom strategy has no image".to_owned()))?,
            _ => self.recreate_image.as_str(),
        };

        let pull_policy = if self.use_local_images {
            "PullIfNotPresent"
        } else {
            "PullAlways"
        };
        let mut env = self.environment.clone();
        env.push(EnvVar::new("OPENSHIFT_DEPLOYMENT_NAME", key.name.as_str()));
        env.push(EnvVar::new("OPENSHIFT_DEPLOYMENT_NAMESPACE", key.namespace.as_str()));

        Ok(json!({
            "kind": "Pod",
            "metadata": {
                "name": deployer_pod_name(&key.name),
                "namespace": key.namespace,
                "labels": { "deployment": key.name },
            },
            "desiredState": {
                "manifest": {
                    "version": "v1beta1",
                    "restartPolicy": { "never": {} },
                    "containers": [{
                        "name": "deployment",
                        "image": image,
                        "imagePullPolicy": pull_policy,
                        "env": env,
                    }],
                },
            },
        }))
    }
}

#[async_trait]
impl Handler for DeploymentHandler {
    async fn handle(&self, deployment: &Value) -> Result<(), HandlerError> {
        if str_at(deployment, &["status"]).unwrap_or(DEPLOYMENT_NEW) != DEPLOYMENT_NEW {
            return Ok(());
        }
        let key = key_of(deployment)?;
        let pod = self.deployer_pod(deployment)?;

        match self.pods.create(&key.namespace, pod).await {
            Ok(_) => tracing::info!(deployment = %key, "Created deployer pod"),
            Err(e) if e.is_already_exists() => {}
            Err(e) => return Err(e.into()),
        }

        let mut updated = deployment.clone();
        set_at(&mut updated, &["status"], json!(DEPLOYMENT_PENDING))?;
        self.deployments.update(&key.namespace, updated).await?;
        Ok(())
    }
}

/// Creates the deployment for the latest version of every config.
pub struct DeploymentConfigHandler {
    deployments: Arc<dyn ResourceClient>,
    codec: Arc<dyn Codec>,
}

impl DeploymentConfigHandler {
    #[must_use]
    pub fn new(deployments: Arc<dyn ResourceClient>, codec: Arc<dyn Codec>) -> Self {
        Self { deployments, codec }
    }
}

#[async_trait]
impl Handler for DeploymentConfigHandler {
    async fn handle(&self, config: &Value) -> Result<(), HandlerError> {
        let version = latest_version(config);
        if version == 0 {
            return Ok(());
        }
        let key = key_of(config)?;
        let name = deployment_name(&key.name, version);

        match self.deployments.get(&key.namespace, &name).await {
            Ok(_) => return Ok(()),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let encoded = String::from_utf8(self.codec.encode(config)?)
            .map_err(|e| HandlerError::Invalid(format!("encoded config is not UTF-8: {e}")))?;
        let template = at(config, &["template"]);
        let deployment = json!({
            "kind": "Deployment",
            "metadata": {
                "name": name,
                "namespace": key.namespace,
                "labels": { CONFIG_ANNOTATION: key.name },
                "annotations": {
                    CONFIG_ANNOTATION: key.name,
                    VERSION_ANNOTATION: version.to_string(),
                    ENCODED_CONFIG_ANNOTATION: encoded,
                },
            },
            "strategy": template.and_then(|t| t.get("strategy")),
            "controllerTemplate": template.and_then(|t| t.get("controllerTemplate")),
            "status": DEPLOYMENT_NEW,
        });

        match self.deployments.create(&key.namespace, deployment).await {
            Ok(_) => {
                tracing::info!(config = %key, deployment = %name, "Created deployment");
                Ok(())
            }
            Err(e) if e.is_already_exists() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Bumps the version of configs with a config change trigger whose
/// template differs from the one their latest deployment was made from.
pub struct DeploymentConfigChangeHandler {
    deployment_configs: Arc<dyn ResourceClient>,
    deployments: Arc<dyn ResourceClient>,
    codec: Arc<dyn Codec>,
}

impl DeploymentConfigChangeHandler {
    #[must_use]
    pub fn new(
        deployment_configs: Arc<dyn ResourceClient>,
        deployments: Arc<dyn ResourceClient>,
        codec: Arc<dyn Codec>,
    ) -> Self {
        Self {
            deployment_configs,
            deployments,
            codec,
        }
    }
}

#[async_trait]
impl Handler for DeploymentConfigChangeHandler {
    async fn handle(&self, config: &Value) -> Result<(), HandlerError> {
        if !has_trigger(config, CONFIG_CHANGE_TRIGGER) {
            return Ok(());
        }
        let version = latest_version(config);
        if version == 0 {
            return bump_version(self.deployment_configs.as_ref(), config.clone(), CONFIG_CHANGE_TRIGGER)
                .await;
        }

        let key = key_of(config)?;
        let deployment = match self
            .deployments
            .get(&key.namespace, &deployment_name(&key.name, version))
            .await
        {
            Ok(d) => d,
            // Not created yet.
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let Some(encoded) = str_at(&deployment, &["metadata", "annotations", ENCODED_CONFIG_ANNOTATION])
        else {
            return Err(HandlerError::Invalid(format!(
                "deployment of {key} has no {ENCODED_CONFIG_ANNOTATION} annotation"
            )));
        };
        let deployed = self.codec.decode(encoded.as_bytes())?;
        if deployed.get("template") == config.get("template") {
            return Ok(());
        }
        bump_version(self.deployment_configs.as_ref(), config.clone(), CONFIG_CHANGE_TRIGGER).await
    }
}

/// Rolls configs with an automatic image change trigger onto the image a
/// followed tag now points to.
pub struct DeploymentImageChangeHandler {
    deployment_configs: Arc<dyn ResourceClient>,
}

impl DeploymentImageChangeHandler {
    #[must_use]
    pub fn new(deployment_configs: Arc<dyn ResourceClient>) -> Self {
        Self { deployment_configs }
    }
}

const PARAMS: &str = "imageChangeParams";

/// Point the followed containers of `config` at new images. Returns whether
/// anything changed.
fn apply_image_change(
    config: &mut Value,
    repo: &Value,
    repo_name: &str,
) -> Result<bool, HandlerError> {
    let mut images = Vec::new();
    if let Some(triggers) = config.get_mut("triggers").and_then(Value::as_array_mut) {
        for trigger in triggers {
            if str_at(trigger, &["type"]) != Some(IMAGE_CHANGE_TRIGGER)
                || !at(trigger, &[PARAMS, "automatic"]).and_then(Value::as_bool).unwrap_or(false)
                || str_at(trigger, &[PARAMS, "from", "name"]) != Some(repo_name)
            {
                continue;
            }
            let tag = str_at(trigger, &[PARAMS, "tag"]).unwrap_or(DEFAULT_TAG);
            let Some((image, _)) = tagged_image(repo, tag) else {
                continue;
            };
            if str_at(trigger, &[PARAMS, "lastTriggeredImage"]) == Some(image.as_str()) {
                continue;
            }
            let names: Vec<String> = at(trigger, &[PARAMS, "containerNames"])
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect();
            set_at(trigger, &[PARAMS, "lastTriggeredImage"], json!(image))?;
            images.push((names, image));
        }
    }

    if images.is_empty() {
        return Ok(false);
    }
    let Some(containers) = at_mut(config, CONTAINERS).and_then(Value::as_array_mut) else {
        return Ok(true);
    };
    for container in containers {
        let Some(name) = str_at(container, &["name"]).map(str::to_owned) else {
            continue;
        };
        if let Some((_, image)) = images.iter().find(|(names, _)| names.contains(&name)) {
            set_at(container, &["image"], json!(image))?;
        }
    }
    Ok(true)
}

#[async_trait]
impl Handler for DeploymentImageChangeHandler {
    async fn handle(&self, repo: &Value) -> Result<(), HandlerError> {
        let repo_key = key_of(repo)?;
        let configs = self.deployment_configs.list(&repo_key.namespace).await?;

        for config in configs {
            let mut updated = config.clone();
            if apply_image_change(&mut updated, repo, &repo_key.name)? {
                bump_version(self.deployment_configs.as_ref(), updated, IMAGE_CHANGE_TRIGGER).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::client::MemoryClient;
    use api_registry::JsonCodec;

    fn codec() -> Arc<dyn Codec> {
        Arc::new(JsonCodec::new("v1beta1"))
    }

    fn config(version: u64, image: &str, triggers: &Value) -> Value {
        json!({
            "kind": "DeploymentConfig",
            "metadata": {"name": "frontend"},
            "triggers": triggers,
            "template": {
                "strategy": {"type": "Recreate"},
                "controllerTemplate": {
                    "replicas": 1,
                    "podTemplate": {"desiredState": {"manifest": {"containers": [
                        {"name": "web", "image": image},
                        {"name": "sidecar", "image": "proxy:1"},
                    ]}}},
                },
            },
            "latestVersion": version,
        })
    }

    #[tokio::test]
    async fn deployment_gets_a_deployer_pod() {
        let deployments = Arc::new(MemoryClient::new("deployments"));
        let pods = Arc::new(MemoryClient::new("pods"));
        let handler = DeploymentHandler::new(
            deployments.clone(),
            pods.clone(),
            vec![EnvVar::new("OPENSHIFT_MASTER", "https://master:8443")],
            "origin-deployer".to_owned(),
            true,
        );

        let deployment = deployments
            .create("dev", json!({"kind": "Deployment", "metadata": {"name": "frontend-1"}, "status": "New"}))
            .await
            .unwrap();
        handler.handle(&deployment).await.unwrap();

        let pod = pods.get("dev", "deploy-frontend-1").await.unwrap();
        let container = &pod["desiredState"]["manifest"]["containers"][0];
        assert_eq!(container["image"], "origin-deployer");
        let env: Vec<&str> = container["env"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            env,
            ["OPENSHIFT_MASTER", "OPENSHIFT_DEPLOYMENT_NAME", "OPENSHIFT_DEPLOYMENT_NAMESPACE"]
        );
        assert_eq!(
            deployments.get("dev", "frontend-1").await.unwrap()["status"],
            DEPLOYMENT_PENDING
        );
    }

    #[tokio::test]
    async fn config_change_drives_deployments() {
        let configs = Arc::new(MemoryClient::new("deploymentConfigs"));
        let deployments = Arc::new(MemoryClient::new("deployments"));
        let change = DeploymentConfigChangeHandler::new(configs.clone(), deployments.clone(), codec());
        let create = DeploymentConfigHandler::new(deployments.clone(), codec());
        let triggers = json!([{"type": "ConfigChange"}]);

        configs.create("dev", config(0, "web:1", &triggers)).await.unwrap();

        // Initial version, then its deployment.
        change.handle(&configs.get("dev", "frontend").await.unwrap()).await.unwrap();
        let current = configs.get("dev", "frontend").await.unwrap();
        assert_eq!(current["latestVersion"], 1);
        create.handle(&current).await.unwrap();
        let first = deployments.get("dev", "frontend-1").await.unwrap();
        assert_eq!(first["metadata"]["annotations"][VERSION_ANNOTATION], "1");

        // Unchanged template: no new version.
        change.handle(&current).await.unwrap();
        assert_eq!(configs.get("dev", "frontend").await.unwrap()["latestVersion"], 1);

        // Edited template: version 2.
        let edited = configs.update("dev", config(1, "web:2", &triggers)).await.unwrap();
        change.handle(&edited).await.unwrap();
        let current = configs.get("dev", "frontend").await.unwrap();
        assert_eq!(current["latestVersion"], 2);
        assert_eq!(current["details"]["causes"][0]["type"], CONFIG_CHANGE_TRIGGER);

        create.handle(&current).await.unwrap();
        create.handle(&current).await.unwrap();
        assert_eq!(deployments.len(), 2);
    }

    #[tokio::test]
    async fn configs_without_trigger_are_left_alone() {
        let configs = Arc::new(MemoryClient::new("deploymentConfigs"));
        let deployments = Arc::new(MemoryClient::new("deployments"));
        let change = DeploymentConfigChangeHandler::new(configs.clone(), deployments.clone(), codec());
        let create = DeploymentConfigHandler::new(deployments.clone(), codec());

        let cfg = configs.create("dev", config(0, "web:1", &json!([]))).await.unwrap();
        change.handle(&cfg).await.unwrap();
        create.handle(&cfg).await.unwrap();

        assert_eq!(configs.get("dev", "frontend").await.unwrap()["latestVersion"], 0);
        assert!(deployments.is_empty());
    }

    #[tokio::test]
    async fn image_change_rolls_followed_containers() {
        let configs = Arc::new(MemoryClient::new("deploymentConfigs"));
        let handler = DeploymentImageChangeHandler::new(configs.clone());
        let triggers = json!([{
            "type": "ImageChange",
            "imageChangeParams": {
                "automatic": true,
                "containerNames": ["web"],
                "from": {"name": "web-repo"},
                "tag": "prod",
            },
        }]);
        configs.create("dev", config(3, "web:1", &triggers)).await.unwrap();

        let repo = json!({
            "kind": "ImageRepository",
            "metadata": {"name": "web-repo", "namespace": "dev"},
            "dockerImageRepository": "registry/dev/web",
            "tags": {"prod": "sha-9"},
        });
        handler.handle(&repo).await.unwrap();
        handler.handle(&repo).await.unwrap();

        let current = configs.get("dev", "frontend").await.unwrap();
        assert_eq!(current["latestVersion"], 4);
        let containers = &current["template"]["controllerTemplate"]["podTemplate"]["desiredState"]["manifest"]["containers"];
        assert_eq!(containers[0]["image"], "registry/dev/web:sha-9");
        assert_eq!(containers[1]["image"], "proxy:1");
        assert_eq!(
            current["triggers"][0]["imageChangeParams"]["lastTriggeredImage"],
            "registry/dev/web:sha-9"
        );
    }
}
