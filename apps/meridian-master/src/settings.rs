use std::path::Path;

use anyhow::Context;
use api_gateway::MasterConfig;
use figment::Figment;
use figment::providers::{Env, Format, Yaml};

/// Prefix of environment variables that set configuration keys. Nested keys
/// are separated by `__`, e.g. `MERIDIAN_READINESS__ATTEMPTS`.
pub const ENV_PREFIX: &str = "MERIDIAN_";

fn figment(path: Option<&Path>) -> Figment {
    let mut figment = Figment::new();
    if let Some(path) = path {
        figment = figment.merge(Yaml::file_exact(path));
    }
    // CONFIG and LOG_JSON belong to the command line
    figment.merge(Env::prefixed(ENV_PREFIX).split("__").ignore(&["config", "log_json"]))
}

/// Load the master configuration: defaults, then the YAML file, then the
/// environment.
///
/// # Errors
/// An unreadable file, malformed YAML, an unknown key or a value of the
/// wrong type.
pub fn load(path: Option<&Path>) -> anyhow::Result<MasterConfig> {
    figment(path).extract().with_context(|| match path {
        Some(path) => format!("invalid configuration in {}", path.display()),
        None => "invalid configuration in the environment".to_owned(),
    })
}
