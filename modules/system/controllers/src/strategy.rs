//! Build strategies: how a build becomes a pod.

use std::sync::Arc;

use api_registry::Codec;
use serde_json::{Value, json};

use crate::error::HandlerError;
use crate::object::{key_of, str_at};

pub const DOCKER_STRATEGY: &str = "Docker";
pub const STI_STRATEGY: &str = "STI";
pub const CUSTOM_STRATEGY: &str = "Custom";

/// Turns a build into the pod that executes it.
pub trait BuildStrategy: Send + Sync {
    /// # Errors
    /// Returns [`HandlerError::Invalid`] when the build cannot be run by
    /// this strategy.
    fn create_build_pod(&self, build: &Value) -> Result<Value, HandlerError>;
}

/// Name of the pod executing `build_name`.
#[must_use]
pub fn build_pod_name(build_name: &str) -> String {
    format!("build-{build_name}")
}

fn pull_policy(use_local_images: bool) -> &'static str {
    if use_local_images {
        "PullIfNotPresent"
    } else {
        "PullAlways"
    }
}

/// Pod running `image` with the encoded build in its `BUILD` variable.
fn builder_pod(
    build: &Value,
    container: &str,
    image: &str,
    use_local_images: bool,
    codec: &dyn Codec,
    privileged: bool,
) -> Result<Value, HandlerError> {
    let key = key_of(build)?;
    let encoded = codec.encode(build)?;
    let encoded = String::from_utf8(encoded)
        .map_err(|e| HandlerError::Invalid(format!("encoded build is not UTF-8: {e}")))?;

    Ok(json!({
        "kind": "Pod",
        "metadata": {
            "name": build_pod_name(&key.name),
            "namespace": key.namespace,
            "labels": { "build": key.name },
        },
        "desiredState": {
            "manifest": {
                "version": "v1beta1",
                "restartPolicy": { "never": {} },
                "containers": [{
                    "name": container,
                    "image": image,
                    "imagePullPolicy": pull_policy(use_local_images),
                    "privileged": privileged,
                    "env": [{ "name": "BUILD", "value": encoded }],
                }],
            },
        },
    }))
}

/// Builds from a Dockerfile with the docker builder image.
pub struct DockerBuildStrategy {
    pub image: String,
    pub use_local_images: bool,
    pub codec: Arc<dyn Codec>,
}

impl BuildStrategy for DockerBuildStrategy {
    fn create_build_pod(&self, build: &Value) -> Result<Value, HandlerError> {
        builder_pod(build, "docker-build", &self.image, self.use_local_images, self.codec.as_ref(), true)
    }
}

/// Source-to-image builds with the STI builder image.
pub struct StiBuildStrategy {
    pub image: String,
    pub use_local_images: bool,
    pub codec: Arc<dyn Codec>,
}

impl BuildStrategy for StiBuildStrategy {
    fn create_build_pod(&self, build: &Value) -> Result<Value, HandlerError> {
        builder_pod(build, "sti-build", &self.image, self.use_local_images, self.codec.as_ref(), true)
    }
}

/// Builds with an image named by the build itself.
pub struct CustomBuildStrategy {
    pub use_local_images: bool,
    pub codec: Arc<dyn Codec>,
}

impl BuildStrategy for CustomBuildStrategy {
    fn create_build_pod(&self, build: &Value) -> Result<Value, HandlerError> {
        let image = str_at(build, &["parameters", "strategy", "customStrategy", "image"])
            .filter(|i| !i.is_empty())
            .ok_or_else(|| HandlerError::Invalid("custom build has no image".to_owned()))?;
        builder_pod(build, "custom-build", image, self.use_local_images, self.codec.as_ref(), false)
    }
}

/// The strategies a build controller picks from.
pub struct BuildStrategies {
    pub docker: Box<dyn BuildStrategy>,
    pub sti: Box<dyn BuildStrategy>,
    pub custom: Box<dyn BuildStrategy>,
}

impl BuildStrategies {
    /// Strategy named by `parameters.strategy.type`.
    ///
    /// # Errors
    /// Returns [`HandlerError::Invalid`] for a missing or unknown type.
    pub fn for_build(&self, build: &Value) -> Result<&dyn BuildStrategy, HandlerError> {
        match str_at(build, &["parameters", "strategy", "type"]) {
            Some(DOCKER_STRATEGY) => Ok(self.docker.as_ref()),
            Some(STI_STRATEGY) => Ok(self.sti.as_ref()),
            Some(CUSTOM_STRATEGY) => Ok(self.custom.as_ref()),
            Some(other) => Err(HandlerError::Invalid(format!("unknown build strategy \"{other}\""))),
            None => Err(HandlerError::Invalid("build has no strategy type".to_owned())),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use api_registry::JsonCodec;

    fn strategies(use_local_images: bool) -> BuildStrategies {
        let codec: Arc<dyn Codec> = Arc::new(JsonCodec::new("v1beta1"));
        BuildStrategies {
            docker: Box::new(DockerBuildStrategy {
                image: "origin-docker-builder".to_owned(),
                use_local_images,
                codec: Arc::clone(&codec),
            }),
            sti: Box::new(StiBuildStrategy {
                image: "origin-sti-builder".to_owned(),
                use_local_images,
                codec: Arc::clone(&codec),
            }),
            custom: Box::new(CustomBuildStrategy {
                use_local_images,
                codec,
            }),
        }
    }

    fn build(strategy: Value) -> Value {
        json!({
            "kind": "Build",
            "metadata": { "name": "ruby-1", "namespace": "dev" },
            "parameters": { "strategy": strategy },
            "status": "New",
        })
    }

    #[test]
    fn docker_pod_carries_encoded_build() {
        let build = build(json!({"type": "Docker"}));
        let pod = strategies(true).for_build(&build).unwrap().create_build_pod(&build).unwrap();

        assert_eq!(pod["metadata"]["name"], "build-ruby-1");
        let container = &pod["desiredState"]["manifest"]["containers"][0];
        assert_eq!(container["image"], "origin-docker-builder");
        assert_eq!(container["imagePullPolicy"], "PullIfNotPresent");

        let encoded = container["env"][0]["value"].as_str().unwrap();
        let decoded: Value = serde_json::from_str(encoded).unwrap();
        assert_eq!(decoded["apiVersion"], "v1beta1");
        assert_eq!(decoded["metadata"]["name"], "ruby-1");
    }

    #[test]
    fn custom_strategy_uses_build_image() {
        let custom = build(json!({"type": "Custom", "customStrategy": {"image": "acme/builder"}}));
        let pod = strategies(false).for_build(&custom).unwrap().create_build_pod(&custom).unwrap();
        let container = &pod["desiredState"]["manifest"]["containers"][0];
        assert_eq!(container["image"], "acme/builder");
        assert_eq!(container["imagePullPolicy"], "PullAlways");

        let no_image = build(json!({"type": "Custom"}));
        assert!(strategies(false).custom.create_build_pod(&no_image).is_err());
    }

    #[test]
    fn unknown_strategy_is_invalid() {
        let s = strategies(false);
        assert!(matches!(
            s.for_build(&build(json!({"type": "Magic"}))),
            Err(HandlerError::Invalid(_))
        ));
        assert!(s.for_build(&json!({"kind": "Build"})).is_err());
    }
}
