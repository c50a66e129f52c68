//! Names of the images the controllers launch.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Deserialize;

pub const DEFAULT_IMAGE_FORMAT: &str = "openshift/origin-${component}:${version}";

#[allow(clippy::unwrap_used)]
static VARIABLE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\{([a-z]+)\}").unwrap());

/// Image name template with `${component}` and `${version}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageTemplate {
    pub format: String,
    /// Use the `latest` tag instead of the release version.
    pub latest: bool,
}

impl Default for ImageTemplate {
    fn default() -> Self {
        Self {
            format: DEFAULT_IMAGE_FORMAT.to_owned(),
            latest: false,
        }
    }
}

impl ImageTemplate {
    /// Image for `component`, e.g. `deployer` or `docker-builder`.
    ///
    /// Unknown placeholders are left in place.
    #[must_use]
    pub fn expand(&self, component: &str) -> String {
        let version: Cow<'_, str> = if self.latest {
            Cow::Borrowed("latest")
        } else {
            Cow::Owned(format!("v{}", env!("CARGO_PKG_VERSION")))
        };
        VARIABLE
            .replace_all(&self.format, |caps: &Captures<'_>| match &caps[1] {
                "component" => component.to_owned(),
                "version" => version.clone().into_owned(),
                _ => caps[0].to_owned(),
            })
            .into_owned()
    }
}
