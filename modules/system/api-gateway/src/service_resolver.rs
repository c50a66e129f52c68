//! Deferred resolution of service addresses in configuration values.
//!
//! A template such as `${DOCKER_REGISTRY_SERVICE_HOST}:${DOCKER_REGISTRY_SERVICE_PORT}`
//! is validated once and resolved against the live service list on every
//! use, so a service created or moved after startup is picked up.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::error::AssemblyError;
use crate::resources::ResourceBackend;

/// Environment variable naming the default image registry.
pub const DEFAULT_REGISTRY_ENV: &str = "OPENSHIFT_DEFAULT_REGISTRY";

/// Used when [`DEFAULT_REGISTRY_ENV`] is unset.
pub const DEFAULT_REGISTRY_TEMPLATE: &str =
    "${DOCKER_REGISTRY_SERVICE_HOST}:${DOCKER_REGISTRY_SERVICE_PORT}";

/// Namespace services are looked up in.
pub const SERVICE_NAMESPACE: &str = "default";

#[allow(clippy::unwrap_used)]
static SERVICE_VARIABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Z0-9_]+)_SERVICE_(HOST|PORT)\}").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub host: String,
    pub port: u16,
}

/// Current address of a named service.
#[async_trait]
pub trait ServiceLookup: Send + Sync {
    /// `None` when the service does not exist or has no address yet.
    async fn lookup(&self, service: &str) -> Option<ServiceEndpoint>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Host(String),
    Port(String),
}

/// A validated template with service placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredTemplate {
    template: String,
    segments: Vec<Segment>,
}

/// `DOCKER_REGISTRY` -> `docker-registry`.
fn service_name(variable: &str) -> String {
    variable.to_ascii_lowercase().replace('_', "-")
}

impl DeferredTemplate {
    /// # Errors
    /// [`AssemblyError::InvalidRegistryTemplate`] when the template holds a
    /// `${...}` that is not a `${NAME_SERVICE_HOST}` or `${NAME_SERVICE_PORT}`
    /// placeholder.
    pub fn parse(template: &str) -> Result<Self, AssemblyError> {
        let mut segments = Vec::new();
        let mut last = 0;
        for caps in SERVICE_VARIABLE.captures_iter(template) {
            let (Some(whole), Some(name), Some(part)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };
            if whole.start() > last {
                segments.push(Segment::Literal(template[last..whole.start()].to_owned()));
            }
            let service = service_name(name.as_str());
            segments.push(if part.as_str() == "HOST" {
                Segment::Host(service)
            } else {
                Segment::Port(service)
            });
            last = whole.end();
        }
        if last < template.len() {
            segments.push(Segment::Literal(template[last..].to_owned()));
        }

        let stray = segments.iter().find_map(|s| match s {
            Segment::Literal(text) if text.contains("${") => Some(text.as_str()),
            _ => None,
        });
        if let Some(text) = stray {
            return Err(AssemblyError::InvalidRegistryTemplate {
                template: template.to_owned(),
                reason: format!("unsupported placeholder in \"{text}\""),
            });
        }

        Ok(Self {
            template: template.to_owned(),
            segments,
        })
    }

    /// Template of the default registry, from [`DEFAULT_REGISTRY_ENV`].
    ///
    /// # Errors
    /// See [`DeferredTemplate::parse`].
    pub fn default_registry() -> Result<Self, AssemblyError> {
        let template = std::env::var(DEFAULT_REGISTRY_ENV)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_REGISTRY_TEMPLATE.to_owned());
        Self::parse(&template)
    }

    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Expand the template. Each service is looked up once per call;
    /// `None` when any of them cannot be resolved.
    pub async fn resolve(&self, lookup: &dyn ServiceLookup) -> Option<String> {
        let mut seen: HashMap<&str, ServiceEndpoint> = HashMap::new();
        let mut out = String::new();
        for segment in &self.segments {
            let (service, host) = match segment {
                Segment::Literal(text) => {
                    out.push_str(text);
                    continue;
                }
                Segment::Host(service) => (service.as_str(), true),
                Segment::Port(service) => (service.as_str(), false),
            };
            let endpoint = if let Some(endpoint) = seen.get(service) {
                endpoint.clone()
            } else {
                let Some(endpoint) = lookup.lookup(service).await else {
                    tracing::debug!(service, "Service is not available");
                    return None;
                };
                seen.insert(service, endpoint.clone());
                endpoint
            };
            if host {
                out.push_str(&endpoint.host);
            } else {
                out.push_str(&endpoint.port.to_string());
            }
        }
        Some(out)
    }
}

/// [`ServiceLookup`] over the services resource.
///
/// Reads `portalIP` and `port` at the top level of the object or under
/// `spec`.
pub struct BackendServiceLookup {
    services: Arc<dyn ResourceBackend>,
}

impl BackendServiceLookup {
    #[must_use]
    pub fn new(services: Arc<dyn ResourceBackend>) -> Self {
        Self { services }
    }
}

fn endpoint_of(service: &Value) -> Option<ServiceEndpoint> {
    let field = |key: &str| {
        service
            .get(key)
            .or_else(|| service.get("spec").and_then(|spec| spec.get(key)))
    };
    let host = field("portalIP")
        .and_then(Value::as_str)
        .filter(|h| !h.is_empty())?;
    let port = field("port")
        .and_then(Value::as_u64)
        .and_then(|p| u16::try_from(p).ok())?;
    Some(ServiceEndpoint {
        host: host.to_owned(),
        port,
    })
}

#[async_trait]
impl ServiceLookup for BackendServiceLookup {
    async fn lookup(&self, service: &str) -> Option<ServiceEndpoint> {
        let obj = self.services.get(SERVICE_NAMESPACE, service).await.ok()?;
        endpoint_of(&obj)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FakeLookup {
        endpoints: Mutex<HashMap<String, ServiceEndpoint>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeLookup {
        fn set(&self, service: &str, host: &str, port: u16) {
            self.endpoints.lock().insert(
                service.to_owned(),
                ServiceEndpoint {
                    host: host.to_owned(),
                    port,
                },
            );
        }
    }

    #[async_trait]
    impl ServiceLookup for FakeLookup {
        async fn lookup(&self, service: &str) -> Option<ServiceEndpoint> {
            self.calls.lock().push(service.to_owned());
            self.endpoints.lock().get(service).cloned()
        }
    }

    #[tokio::test]
    async fn resolves_on_every_use() {
        let template = DeferredTemplate::parse(DEFAULT_REGISTRY_TEMPLATE).unwrap();
        let lookup = FakeLookup::default();
        assert_eq!(template.resolve(&lookup).await, None);

        lookup.set("docker-registry", "172.30.17.3", 5001);
        assert_eq!(
            template.resolve(&lookup).await.as_deref(),
            Some("172.30.17.3:5001")
        );

        lookup.set("docker-registry", "172.30.17.9", 5000);
        assert_eq!(
            template.resolve(&lookup).await.as_deref(),
            Some("172.30.17.9:5000")
        );
        // one lookup per resolution once the service exists
        assert_eq!(lookup.calls.lock().len(), 3);
    }

    #[tokio::test]
    async fn literal_templates_need_no_lookup() {
        let template = DeferredTemplate::parse("registry.local:5000").unwrap();
        let lookup = FakeLookup::default();
        assert_eq!(
            template.resolve(&lookup).await.as_deref(),
            Some("registry.local:5000")
        );
        assert!(lookup.calls.lock().is_empty());
    }

    #[test]
    fn unsupported_placeholders_are_rejected() {
        for bad in ["${REGISTRY_HOST}:5000", "${DOCKER_REGISTRY_SERVICE_HOST", "${}"] {
            assert!(
                matches!(
                    DeferredTemplate::parse(bad),
                    Err(AssemblyError::InvalidRegistryTemplate { .. })
                ),
                "{bad}"
            );
        }
    }

    #[test]
    fn endpoint_from_spec_or_top_level() {
        let legacy = serde_json::json!({"portalIP": "10.0.0.1", "port": 5000});
        let nested = serde_json::json!({"spec": {"portalIP": "10.0.0.2", "port": 80}});
        assert_eq!(endpoint_of(&legacy).map(|e| e.port), Some(5000));
        assert_eq!(endpoint_of(&nested).map(|e| e.host).as_deref(), Some("10.0.0.2"));
        assert_eq!(endpoint_of(&serde_json::json!({"port": 1})), None);
    }
}
