use std::path::PathBuf;
use std::time::Duration;

use controllers::{ControllerSettings, DeployerClientConfig, ImageTemplate};
use meridian_runtime::DialBudget;
use serde::Deserialize;
use static_authn_plugin::StaticAuthNPluginConfig;

fn default_master_bind_addr() -> String {
    "127.0.0.1:8080".to_owned()
}

fn default_asset_bind_addr() -> String {
    "127.0.0.1:8091".to_owned()
}

fn default_master_addr() -> String {
    "http://127.0.0.1:8080".to_owned()
}

fn default_api_prefix() -> String {
    "/osapi".to_owned()
}

fn default_swagger_api_prefix() -> String {
    "/swaggerapi/".to_owned()
}

fn default_master_authorization_namespace() -> String {
    "master".to_owned()
}

fn default_enable_docs() -> bool {
    true
}

/// Master configuration.
///
/// Every field has a default, so an empty document is a valid local setup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MasterConfig {
    /// `host:port` the API listener binds.
    pub master_bind_addr: String,
    /// `host:port` the UI asset listener binds.
    pub asset_bind_addr: String,

    /// URL of the master API inside the cluster.
    pub master_addr: String,
    /// URL external clients use for the master API; `master_addr` when unset.
    pub master_public_addr: Option<String>,
    /// URL external clients use for the Kubernetes API; the public master URL when unset.
    pub kubernetes_public_addr: Option<String>,
    /// URL the UI is served at; derived from `asset_bind_addr` when unset.
    pub asset_public_addr: Option<String>,

    pub api_prefix: String,
    pub swagger_api_prefix: String,

    /// Regular expressions matched against the `Origin` header. Empty disables CORS.
    pub cors_allowed_origins: Vec<String>,

    /// Namespace holding the cluster-wide policy and policy binding.
    pub master_authorization_namespace: String,

    /// API version objects are stored in; empty selects the latest.
    pub storage_version: String,

    pub tls: Option<TlsConfig>,
    /// TLS for the asset listener; the API listener's settings are reused when unset.
    pub asset_tls: Option<TlsConfig>,
    /// Directory with the UI assets; a placeholder page is served when unset.
    pub asset_dir: Option<PathBuf>,

    /// Pull images only when missing on the node.
    pub use_local_images: bool,
    pub image_template: ImageTemplate,

    pub readiness: ReadinessConfig,
    pub enable_docs: bool,

    pub controllers: ControllerSettings,
    /// Client configuration handed to deployer pods.
    pub deployer: DeployerClientConfig,

    pub authn: StaticAuthNPluginConfig,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            master_bind_addr: default_master_bind_addr(),
            asset_bind_addr: default_asset_bind_addr(),
            master_addr: default_master_addr(),
            master_public_addr: None,
            kubernetes_public_addr: None,
            asset_public_addr: None,
            api_prefix: default_api_prefix(),
            swagger_api_prefix: default_swagger_api_prefix(),
            cors_allowed_origins: Vec::new(),
            master_authorization_namespace: default_master_authorization_namespace(),
            storage_version: String::new(),
            tls: None,
            asset_tls: None,
            asset_dir: None,
            use_local_images: false,
            image_template: ImageTemplate::default(),
            readiness: ReadinessConfig::default(),
            enable_docs: default_enable_docs(),
            controllers: ControllerSettings::default(),
            deployer: DeployerClientConfig::default(),
            authn: StaticAuthNPluginConfig::default(),
        }
    }
}

impl MasterConfig {
    #[must_use]
    pub fn master_public_addr(&self) -> &str {
        self.master_public_addr.as_deref().unwrap_or(&self.master_addr)
    }

    #[must_use]
    pub fn kubernetes_public_addr(&self) -> &str {
        self.kubernetes_public_addr
            .as_deref()
            .unwrap_or_else(|| self.master_public_addr())
    }

    #[must_use]
    pub fn asset_public_addr(&self) -> String {
        self.asset_public_addr.clone().unwrap_or_else(|| {
            let scheme = if self.asset_tls().is_some() { "https" } else { "http" };
            format!("{scheme}://{}", self.asset_bind_addr)
        })
    }

    #[must_use]
    pub fn asset_tls(&self) -> Option<&TlsConfig> {
        self.asset_tls.as_ref().or(self.tls.as_ref())
    }
}

/// Serving certificate for a listener.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    /// CA bundle client certificates are verified against. Clients are asked
    /// for a certificate but may connect without one.
    #[serde(default)]
    pub client_ca_file: Option<PathBuf>,
}

/// Budget of the post-bind readiness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReadinessConfig {
    pub attempts: u32,
    pub timeout_ms: u64,
    pub interval_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        let budget = DialBudget::default();
        Self {
            attempts: budget.attempts,
            timeout_ms: 100,
            interval_ms: 100,
        }
    }
}

impl ReadinessConfig {
    #[must_use]
    pub fn budget(&self) -> DialBudget {
        DialBudget {
            attempts: self.attempts,
            timeout: Duration::from_millis(self.timeout_ms),
            interval: Duration::from_millis(self.interval_ms),
        }
    }
}
