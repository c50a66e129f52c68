//! Build config webhooks.
//!
//! `POST {prefix}/{version}/buildConfigHooks/{name}/{secret}/{plugin}[/...]`
//! is served on the open surface; the secret in the URL authenticates the
//! caller against the build config's triggers. The plugin segment selects a
//! [`WebhookPlugin`] that decides whether the request starts a build.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use api_registry::{JsonMetadataAccessor, MetadataAccessor};
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use serde::Deserialize;
use serde_json::{Value, json};
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::container::{ApiInstaller, RouteContainer, RouteSpec};
use crate::error::AssemblyError;
use crate::resources::{BackendError, DEFAULT_NAMESPACE, ResourceBackend};

pub const GENERIC_PLUGIN: &str = "generic";
pub const GITHUB_PLUGIN: &str = "github";

const GITHUB_EVENT_HEADER: &str = "x-github-event";
const DEFAULT_BRANCH: &str = "master";

/// What a plugin sees of the incoming request.
#[derive(Debug, Clone, Copy)]
pub struct WebhookRequest<'a> {
    pub method: &'a Method,
    pub headers: &'a HeaderMap,
    pub body: &'a [u8],
    /// Path after the plugin segment, if any.
    pub subpath: Option<&'a str>,
}

/// Decision of a [`WebhookPlugin`].
#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome {
    /// Start a build, optionally pinned to a source revision.
    Build { revision: Option<Value> },
    /// Accept the request without building.
    Skip(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WebhookError {
    #[error("{0}")]
    NotFound(String),

    #[error("the webhook secret does not match")]
    SecretMismatch,

    #[error("{0}")]
    BadRequest(String),

    #[error("unsupported HTTP method {0}")]
    MethodNotAllowed(String),

    #[error("{0}")]
    Internal(String),
}

impl WebhookError {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::SecretMismatch | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

impl From<BackendError> for WebhookError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::NotFound { .. } => Self::NotFound(e.to_string()),
            BackendError::Invalid(reason) => Self::BadRequest(reason),
            BackendError::AlreadyExists { .. }
            | BackendError::Conflict { .. }
            | BackendError::Internal(_) => Self::Internal(e.to_string()),
        }
    }
}

/// Interprets one webhook dialect.
pub trait WebhookPlugin: Send + Sync {
    /// # Errors
    /// [`WebhookError::SecretMismatch`] when no trigger of the build config
    /// carries `secret`; any other error rejects the request.
    fn extract(&self, config: &Value, secret: &str, req: &WebhookRequest<'_>) -> Result<HookOutcome, WebhookError>;
}

/// Whether `config` has a trigger of `trigger_type` with `secret`. Secrets
/// compare in constant time.
fn trigger_matches(config: &Value, trigger_type: &str, secret: &str) -> bool {
    config
        .get("triggers")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|t| t.get("type").and_then(Value::as_str) == Some(trigger_type))
        .filter_map(|t| t.get(trigger_type)?.get("secret")?.as_str())
        .any(|expected| secret_eq(expected, secret))
}

fn secret_eq(expected: &str, given: &str) -> bool {
    bool::from(expected.as_bytes().ct_eq(given.as_bytes()))
}

fn require_post(req: &WebhookRequest<'_>) -> Result<(), WebhookError> {
    if req.method == Method::POST {
        Ok(())
    } else {
        Err(WebhookError::MethodNotAllowed(req.method.to_string()))
    }
}

/// Any authenticated `POST` starts a build of the config's current source.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericWebhook;

impl WebhookPlugin for GenericWebhook {
    fn extract(&self, config: &Value, secret: &str, req: &WebhookRequest<'_>) -> Result<HookOutcome, WebhookError> {
        require_post(req)?;
        if !trigger_matches(config, GENERIC_PLUGIN, secret) {
            return Err(WebhookError::SecretMismatch);
        }
        Ok(HookOutcome::Build { revision: None })
    }
}

#[derive(Debug, Deserialize)]
struct PushEvent {
    #[serde(rename = "ref")]
    git_ref: String,
    #[serde(default)]
    after: String,
    #[serde(default)]
    head_commit: Option<GitCommit>,
}

#[derive(Debug, Deserialize)]
struct GitCommit {
    #[serde(default)]
    id: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    author: GitUser,
    #[serde(default)]
    committer: GitUser,
}

#[derive(Debug, Default, Deserialize)]
struct GitUser {
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
}

/// GitHub push events on the config's source branch start a build of the
/// pushed commit; pings and other branches are accepted and ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitHubWebhook;

impl WebhookPlugin for GitHubWebhook {
    fn extract(&self, config: &Value, secret: &str, req: &WebhookRequest<'_>) -> Result<HookOutcome, WebhookError> {
        require_post(req)?;
        if !trigger_matches(config, GITHUB_PLUGIN, secret) {
            return Err(WebhookError::SecretMismatch);
        }

        let content_type = req
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !content_type.starts_with("application/json") {
            return Err(WebhookError::BadRequest(format!(
                "unsupported Content-Type {content_type}"
            )));
        }

        match req.headers.get(GITHUB_EVENT_HEADER).and_then(|v| v.to_str().ok()) {
            Some("push") => {}
            Some("ping") => return Ok(HookOutcome::Skip("ping event".to_owned())),
            Some(other) => {
                return Err(WebhookError::BadRequest(format!("unknown X-GitHub-Event {other}")));
            }
            None => return Err(WebhookError::BadRequest("missing X-GitHub-Event".to_owned())),
        }

        let event: PushEvent = serde_json::from_slice(req.body)
            .map_err(|e| WebhookError::BadRequest(format!("invalid push event: {e}")))?;

        let branch = config
            .pointer("/parameters/source/git/ref")
            .and_then(Value::as_str)
            .filter(|b| !b.is_empty())
            .unwrap_or(DEFAULT_BRANCH);
        if event.git_ref != format!("refs/heads/{branch}") {
            return Ok(HookOutcome::Skip(format!(
                "push to {} does not match branch {branch}",
                event.git_ref
            )));
        }

        let commit = event.head_commit.unwrap_or(GitCommit {
            id: event.after,
            message: String::new(),
            author: GitUser::default(),
            committer: GitUser::default(),
        });
        Ok(HookOutcome::Build {
            revision: Some(json!({
                "type": "Git",
                "git": {
                    "commit": commit.id,
                    "message": commit.message,
                    "author": {"name": commit.author.name, "email": commit.author.email},
                    "committer": {"name": commit.committer.name, "email": commit.committer.email},
                }
            })),
        })
    }
}

/// Reads build configs and starts builds for them.
#[async_trait]
pub trait BuildRequester: Send + Sync {
    /// # Errors
    /// [`WebhookError::NotFound`] for an unknown build config.
    async fn build_config(&self, namespace: &str, name: &str) -> Result<Value, WebhookError>;

    /// Create the next build of `config` and return it.
    ///
    /// # Errors
    /// Propagates storage failures.
    async fn request_build(
        &self,
        namespace: &str,
        config: &Value,
        revision: Option<Value>,
    ) -> Result<Value, WebhookError>;
}

/// [`BuildRequester`] writing to the build and build config backends.
pub struct BackendBuildRequester {
    builds: Arc<dyn ResourceBackend>,
    build_configs: Arc<dyn ResourceBackend>,
}

impl BackendBuildRequester {
    #[must_use]
    pub fn new(builds: Arc<dyn ResourceBackend>, build_configs: Arc<dyn ResourceBackend>) -> Self {
        Self {
            builds,
            build_configs,
        }
    }
}

#[async_trait]
impl BuildRequester for BackendBuildRequester {
    async fn build_config(&self, namespace: &str, name: &str) -> Result<Value, WebhookError> {
        Ok(self.build_configs.get(namespace, name).await?)
    }

    async fn request_build(
        &self,
        namespace: &str,
        config: &Value,
        revision: Option<Value>,
    ) -> Result<Value, WebhookError> {
        let name = JsonMetadataAccessor
            .name(config)
            .ok_or_else(|| WebhookError::Internal("build config has no name".to_owned()))?
            .to_owned();
        let version = config.get("lastVersion").and_then(Value::as_u64).unwrap_or(0) + 1;

        let mut parameters = config.get("parameters").cloned().unwrap_or_else(|| json!({}));
        if let (Some(revision), Some(fields)) = (revision, parameters.as_object_mut()) {
            fields.insert("revision".to_owned(), revision);
        }
        let build = json!({
            "kind": "Build",
            "metadata": {
                "name": format!("{name}-{version}"),
                "labels": { "buildconfig": name },
            },
            "parameters": parameters,
            "status": "New",
        });
        let created = self.builds.create(namespace, build).await?;

        let mut updated = config.clone();
        if let Some(fields) = updated.as_object_mut() {
            fields.insert("lastVersion".to_owned(), json!(version));
        }
        self.build_configs.update(namespace, &name, updated).await?;
        tracing::info!(namespace, config = %name, version, "Build requested by webhook");
        Ok(created)
    }
}

#[derive(Clone)]
struct WebhookState {
    requester: Arc<dyn BuildRequester>,
    plugins: Arc<BTreeMap<String, Arc<dyn WebhookPlugin>>>,
}

/// Installs the webhook routes on the open surface.
pub struct WebhookInstaller {
    prefix: String,
    version: String,
    requester: Arc<dyn BuildRequester>,
    plugins: BTreeMap<String, Arc<dyn WebhookPlugin>>,
}

impl WebhookInstaller {
    #[must_use]
    pub fn new(prefix: impl Into<String>, version: impl Into<String>, requester: Arc<dyn BuildRequester>) -> Self {
        Self {
            prefix: prefix.into(),
            version: version.into(),
            requester,
            plugins: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_plugin(mut self, name: impl Into<String>, plugin: Arc<dyn WebhookPlugin>) -> Self {
        self.plugins.insert(name.into(), plugin);
        self
    }

    /// The `generic` and `github` plugins.
    #[must_use]
    pub fn with_default_plugins(self) -> Self {
        self.with_plugin(GENERIC_PLUGIN, Arc::new(GenericWebhook))
            .with_plugin(GITHUB_PLUGIN, Arc::new(GitHubWebhook))
    }
}

impl ApiInstaller for WebhookInstaller {
    fn install(&self, container: &mut RouteContainer) -> Result<Vec<String>, AssemblyError> {
        let base = format!(
            "{}/{}/buildConfigHooks",
            self.prefix.trim_end_matches('/'),
            self.version
        );
        let state = WebhookState {
            requester: Arc::clone(&self.requester),
            plugins: Arc::new(self.plugins.clone()),
        };
        let route = format!("{base}/{{name}}/{{secret}}/{{plugin}}");
        container.add(
            RouteSpec::new(Method::POST, route.clone(), post(dispatch).with_state(state.clone()))
                .summary("Trigger a build of a build config")
                .tag("webhooks"),
        )?;
        container.add(
            RouteSpec::new(Method::POST, format!("{route}/{{*subpath}}"), post(dispatch).with_state(state))
                .summary("Trigger a build of a build config")
                .tag("webhooks"),
        )?;
        Ok(vec![format!("Started build config webhooks at %s{base}/")])
    }
}

async fn dispatch(
    State(state): State<WebhookState>,
    Path(params): Path<HashMap<String, String>>,
    Query(query): Query<HashMap<String, String>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, WebhookError> {
    let param = |key: &str| params.get(key).map_or("", String::as_str);
    let (name, secret, plugin_name) = (param("name"), param("secret"), param("plugin"));
    let namespace = query
        .get("namespace")
        .filter(|ns| !ns.is_empty())
        .map_or(DEFAULT_NAMESPACE, String::as_str);

    let Some(plugin) = state.plugins.get(plugin_name) else {
        return Err(WebhookError::NotFound(format!(
            "unknown webhook plugin \"{plugin_name}\""
        )));
    };
    let config = state.requester.build_config(namespace, name).await?;

    let req = WebhookRequest {
        method: &method,
        headers: &headers,
        body: &body,
        subpath: params.get("subpath").map(String::as_str),
    };
    match plugin.extract(&config, secret, &req)? {
        HookOutcome::Build { revision } => {
            state
                .requester
                .request_build(namespace, &config, revision)
                .await?;
        }
        HookOutcome::Skip(reason) => {
            tracing::debug!(namespace, config = name, plugin = plugin_name, reason, "Webhook ignored");
        }
    }
    Ok(StatusCode::OK)
}
