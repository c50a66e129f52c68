//! Build controller and build image change trigger.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::client::ResourceClient;
use crate::error::{ClientError, HandlerError};
use crate::object::{at, key_of, set_at, str_at};
use crate::queue::Handler;
use crate::strategy::{BuildStrategies, STI_STRATEGY, build_pod_name};

pub const BUILD_NEW: &str = "New";
pub const BUILD_PENDING: &str = "Pending";
pub const BUILD_ERROR: &str = "Error";

pub const IMAGE_CHANGE_BUILD_TRIGGER: &str = "imageChange";

/// Tag followed by triggers that do not name one.
pub const DEFAULT_TAG: &str = "latest";

/// Starts a pod for every new build.
pub struct BuildHandler {
    builds: Arc<dyn ResourceClient>,
    pods: Arc<dyn ResourceClient>,
    strategies: BuildStrategies,
}

impl BuildHandler {
    #[must_use]
    pub fn new(
        builds: Arc<dyn ResourceClient>,
        pods: Arc<dyn ResourceClient>,
        strategies: BuildStrategies,
    ) -> Self {
        Self {
            builds,
            pods,
            strategies,
        }
    }

    async fn set_status(
        &self,
        build: &Value,
        status: &str,
        extra: &[(&str, Value)],
    ) -> Result<(), HandlerError> {
        let key = key_of(build)?;
        let mut updated = build.clone();
        set_at(&mut updated, &["status"], json!(status))?;
        for (field, value) in extra {
            set_at(&mut updated, &[*field], value.clone())?;
        }
        self.builds.update(&key.namespace, updated).await?;
        Ok(())
    }
}

#[async_trait]
impl Handler for BuildHandler {
    async fn handle(&self, build: &Value) -> Result<(), HandlerError> {
        if str_at(build, &["status"]).unwrap_or(BUILD_NEW) != BUILD_NEW {
            return Ok(());
        }
        let key = key_of(build)?;

        let pod = match self
            .strategies
            .for_build(build)
            .and_then(|s| s.create_build_pod(build))
        {
            Ok(pod) => pod,
            Err(HandlerError::Invalid(reason)) => {
                tracing::warn!(build = %key, %reason, "Build cannot be started");
                return self.set_status(build, BUILD_ERROR, &[("message", json!(reason))]).await;
            }
            Err(e) => return Err(e),
        };

        match self.pods.create(&key.namespace, pod).await {
            Ok(_) => tracing::info!(build = %key, "Created build pod"),
            Err(e) if e.is_already_exists() => {
                tracing::debug!(build = %key, "Build pod already exists");
            }
            Err(e) => return Err(e.into()),
        }

        self.set_status(build, BUILD_PENDING, &[("podName", json!(build_pod_name(&key.name)))])
            .await
    }
}

/// Creates a build for every build config whose image change trigger
/// follows a tag that now points to a new image.
pub struct BuildImageChangeHandler {
    build_configs: Arc<dyn ResourceClient>,
    builds: Arc<dyn ResourceClient>,
}

impl BuildImageChangeHandler {
    #[must_use]
    pub fn new(build_configs: Arc<dyn ResourceClient>, builds: Arc<dyn ResourceClient>) -> Self {
        Self {
            build_configs,
            builds,
        }
    }

    async fn trigger(
        &self,
        config: &Value,
        image: &str,
        image_id: &str,
        trigger_index: usize,
    ) -> Result<(), HandlerError> {
        let key = key_of(config)?;
        let version = at(config, &["lastVersion"]).and_then(Value::as_u64).unwrap_or(0) + 1;

        let mut parameters = at(config, &["parameters"]).cloned().unwrap_or_else(|| json!({}));
        let is_sti = str_at(&parameters, &["strategy", "type"]) == Some(STI_STRATEGY);
        let image_field: &[&str] = if is_sti {
            &["strategy", "stiStrategy", "image"]
        } else {
            &["strategy", "dockerStrategy", "baseImage"]
        };
        set_at(&mut parameters, image_field, json!(image))?;

        let build = json!({
            "kind": "Build",
            "metadata": {
                "name": format!("{}-{version}", key.name),
                "namespace": key.namespace,
                "labels": { "buildconfig": key.name },
            },
            "parameters": parameters,
            "status": BUILD_NEW,
        });
        match self.builds.create(&key.namespace, build).await {
            Ok(_) => tracing::info!(config = %key, image, "Image change triggered a build"),
            Err(ClientError::AlreadyExists { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        let mut updated = config.clone();
        set_at(&mut updated, &["lastVersion"], json!(version))?;
        let mut triggers = at(config, &["triggers"]).cloned().unwrap_or_else(|| json!([]));
        let Some(trigger) = triggers.get_mut(trigger_index) else {
            return Err(HandlerError::Invalid("image change trigger vanished".to_owned()));
        };
        set_at(trigger, &["imageChange", "lastTriggeredImageID"], json!(image_id))?;
        set_at(&mut updated, &["triggers"], triggers)?;
        self.build_configs.update(&key.namespace, updated).await?;
        Ok(())
    }
}

#[async_trait]
impl Handler for BuildImageChangeHandler {
    async fn handle(&self, repo: &Value) -> Result<(), HandlerError> {
        let repo_key = key_of(repo)?;
        let configs = self.build_configs.list(&repo_key.namespace).await?;

        for config in &configs {
            let triggers = at(config, &["triggers"]).and_then(Value::as_array);
            for (index, trigger) in triggers.into_iter().flatten().enumerate() {
                if str_at(trigger, &["type"]) != Some(IMAGE_CHANGE_BUILD_TRIGGER)
                    || str_at(trigger, &["imageChange", "from", "name"])
                        != Some(repo_key.name.as_str())
                {
                    continue;
                }
                let tag = str_at(trigger, &["imageChange", "tag"]).unwrap_or(DEFAULT_TAG);
                let Some((image, image_id)) = tagged_image(repo, tag) else {
                    continue;
                };
                if str_at(trigger, &["imageChange", "lastTriggeredImageID"]) == Some(image_id) {
                    continue;
                }
                self.trigger(config, &image, image_id, index).await?;
            }
        }
        Ok(())
    }
}

/// Pull spec and image id `tag` points to in an image repository.
pub(crate) fn tagged_image<'a>(repo: &'a Value, tag: &str) -> Option<(String, &'a str)> {
    let image_id = str_at(repo, &["tags", tag]).filter(|id| !id.is_empty())?;
    let repository = str_at(repo, &["status", "dockerImageRepository"])
        .or_else(|| str_at(repo, &["dockerImageRepository"]))
        .filter(|r| !r.is_empty())?;
    Some((format!("{repository}:{image_id}"), image_id))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::client::MemoryClient;
    use crate::strategy::{CustomBuildStrategy, DockerBuildStrategy, StiBuildStrategy};
    use api_registry::{Codec, JsonCodec};

    fn strategies() -> BuildStrategies {
        let codec: Arc<dyn Codec> = Arc::new(JsonCodec::new("v1beta1"));
        BuildStrategies {
            docker: Box::new(DockerBuildStrategy {
                image: "docker-builder".to_owned(),
                use_local_images: false,
                codec: Arc::clone(&codec),
            }),
            sti: Box::new(StiBuildStrategy {
                image: "sti-builder".to_owned(),
                use_local_images: false,
                codec: Arc::clone(&codec),
            }),
            custom: Box::new(CustomBuildStrategy {
                use_local_images: false,
                codec,
            }),
        }
    }

    #[tokio::test]
    async fn new_build_gets_a_pod_and_goes_pending() {
        let builds = Arc::new(MemoryClient::new("builds"));
        let pods = Arc::new(MemoryClient::new("pods"));
        let handler = BuildHandler::new(builds.clone(), pods.clone(), strategies());

        let build = builds
            .create("dev", json!({
                "kind": "Build",
                "metadata": {"name": "b1"},
                "parameters": {"strategy": {"type": "STI"}},
                "status": "New",
            }))
            .await
            .unwrap();
        handler.handle(&build).await.unwrap();

        let pod = pods.get("dev", "build-b1").await.unwrap();
        assert_eq!(pod["desiredState"]["manifest"]["containers"][0]["image"], "sti-builder");
        let build = builds.get("dev", "b1").await.unwrap();
        assert_eq!(build["status"], BUILD_PENDING);
        assert_eq!(build["podName"], "build-b1");

        handler.handle(&build).await.unwrap();
        assert_eq!(pods.len(), 1);
    }

    #[tokio::test]
    async fn unknown_strategy_marks_build_as_error() {
        let builds = Arc::new(MemoryClient::new("builds"));
        let pods = Arc::new(MemoryClient::new("pods"));
        let handler = BuildHandler::new(builds.clone(), pods.clone(), strategies());

        let build = builds
            .create("dev", json!({"kind": "Build", "metadata": {"name": "b1"}, "status": "New"}))
            .await
            .unwrap();
        handler.handle(&build).await.unwrap();

        assert!(pods.is_empty());
        assert_eq!(builds.get("dev", "b1").await.unwrap()["status"], BUILD_ERROR);
    }

    #[tokio::test]
    async fn image_change_creates_one_build_per_new_image() {
        let configs = Arc::new(MemoryClient::new("buildConfigs"));
        let builds = Arc::new(MemoryClient::new("builds"));
        let handler = BuildImageChangeHandler::new(configs.clone(), builds.clone());

        configs
            .create("dev", json!({
                "kind": "BuildConfig",
                "metadata": {"name": "ruby"},
                "parameters": {"strategy": {"type": "STI", "stiStrategy": {"image": "old"}}},
                "triggers": [
                    {"type": "github"},
                    {"type": "imageChange", "imageChange": {"from": {"name": "ruby-20"}}},
                ],
            }))
            .await
            .unwrap();
        let repo = json!({
            "kind": "ImageRepository",
            "metadata": {"name": "ruby-20", "namespace": "dev"},
            "status": {"dockerImageRepository": "registry:5000/dev/ruby-20"},
            "tags": {"latest": "abc123"},
        });

        handler.handle(&repo).await.unwrap();
        handler.handle(&repo).await.unwrap();

        let all = builds.list("dev").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0]["metadata"]["name"], "ruby-1");
        assert_eq!(
            all[0]["parameters"]["strategy"]["stiStrategy"]["image"],
            "registry:5000/dev/ruby-20:abc123"
        );
        let config = configs.get("dev", "ruby").await.unwrap();
        assert_eq!(config["lastVersion"], 1);
        assert_eq!(config["triggers"][1]["imageChange"]["lastTriggeredImageID"], "abc123");
    }

    #[test]
    fn tagged_image_needs_repository_and_tag() {
        let repo = json!({"dockerImageRepository": "r/x", "tags": {"v1": "id1"}});
        assert_eq!(tagged_image(&repo, "v1"), Some(("r/x:id1".to_owned(), "id1")));
        assert_eq!(tagged_image(&repo, "latest"), None);
        assert_eq!(tagged_image(&json!({"tags": {"v1": "id1"}}), "v1"), None);
    }
}
