//! Environment handed to deployer pods.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// One container environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    #[must_use]
    pub fn new(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_owned(),
            value: value.into(),
        }
    }
}

/// Client configuration deployer pods use to call back into the master.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeployerClientConfig {
    pub host: String,
    pub bearer_token: Option<SecretString>,
    /// PEM bundle trusted for the master's serving certificate.
    pub ca_data: Option<String>,
    pub insecure: bool,
}

/// Variables that let a pod rebuild `config`.
#[must_use]
pub fn env_vars_from_config(config: &DeployerClientConfig) -> Vec<EnvVar> {
    let mut vars = Vec::new();
    if let Some(token) = &config.bearer_token {
        vars.push(EnvVar::new("BEARER_TOKEN", token.expose_secret()));
    }
    vars.push(EnvVar::new("OPENSHIFT_INSECURE", config.insecure.to_string()));
    if let Some(ca) = &config.ca_data {
        vars.push(EnvVar::new("OPENSHIFT_CA_DATA", ca.as_str()));
    }
    vars
}

/// Environment of the deployment controller: the master address under both
/// names, then the deployer client configuration.
#[must_use]
pub fn deployment_environment(master_addr: &str, config: &DeployerClientConfig) -> Vec<EnvVar> {
    let mut vars = vec![
        EnvVar::new("KUBERNETES_MASTER", master_addr),
        EnvVar::new("OPENSHIFT_MASTER", master_addr),
    ];
    vars.extend(env_vars_from_config(config));
    vars
}
