//! Web console assets.
//!
//! The console is a single-page application: every extension-less path that
//! is not a file renders `index.html`, and the console reads the API
//! locations from a generated `config.js`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tower_http::compression::CompressionLayer;

use crate::config::MasterConfig;
use crate::error::AssemblyError;

const INDEX: &str = "index.html";
const CONFIG_JS: &str = "/config.js";
const KUBERNETES_PREFIX: &str = "/api";
const CONSOLE_CLIENT_ID: &str = "meridian-web-console";

const NO_CACHE: &str = "no-cache";
const ASSET_CACHE_CONTROL: &str = "public, max-age=3600";

const PLACEHOLDER_INDEX: &str = "<!doctype html>\n<html>\n<head><title>Meridian</title>\
<script src=\"/config.js\"></script></head>\n<body><p>The Meridian web console is not installed.</p></body>\n</html>\n";

#[derive(Debug, Clone)]
struct Asset {
    body: Bytes,
    content_type: &'static str,
    etag: String,
}

fn content_type(path: &str) -> &'static str {
    let ext = path.rsplit_once('.').map_or("", |(_, ext)| ext);
    match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "js" => "application/javascript",
        "css" => "text/css",
        "json" | "map" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// In-memory copy of the console files, keyed by slash-separated path.
#[derive(Debug, Clone, Default)]
pub struct AssetBundle {
    files: HashMap<String, Asset>,
}

impl AssetBundle {
    /// A bundle holding only a placeholder `index.html`.
    #[must_use]
    pub fn builtin() -> Self {
        let mut bundle = Self::default();
        bundle.insert(INDEX, PLACEHOLDER_INDEX);
        bundle
    }

    /// Read every file under `dir`.
    ///
    /// # Errors
    /// [`AssemblyError::Assets`] when the directory cannot be read.
    pub fn from_dir(dir: &Path) -> Result<Self, AssemblyError> {
        let mut bundle = Self::default();
        collect(dir, dir, &mut bundle).map_err(|source| AssemblyError::Assets {
            path: dir.display().to_string(),
            source,
        })?;
        tracing::info!(dir = %dir.display(), files = bundle.len(), "Console assets loaded");
        Ok(bundle)
    }

    pub fn insert(&mut self, path: &str, body: impl Into<Bytes>) {
        let body = body.into();
        let digest = Sha256::digest(&body);
        let asset = Asset {
            content_type: content_type(path),
            etag: format!("\"{}\"", hex::encode(&digest[..8])),
            body,
        };
        self.files.insert(path.trim_start_matches('/').to_owned(), asset);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn get(&self, path: &str) -> Option<&Asset> {
        self.files.get(path)
    }
}

fn collect(root: &Path, dir: &Path, bundle: &mut AssetBundle) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect(root, &path, bundle)?;
            continue;
        }
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        bundle.insert(&key, std::fs::read(&path)?);
    }
    Ok(())
}

/// API locations handed to the console through `config.js`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebConsoleConfig {
    /// `host:port` of the master API.
    pub master_addr: String,
    pub master_prefix: String,
    /// `host:port` of the Kubernetes API.
    pub kubernetes_addr: String,
    pub kubernetes_prefix: String,
    pub oauth_authorize_uri: String,
    pub oauth_redirect_base: String,
    pub oauth_client_id: String,
    pub logout_uri: String,
}

fn host_port(addr: &str) -> Result<String, AssemblyError> {
    let invalid = |reason: String| AssemblyError::InvalidAddress {
        addr: addr.to_owned(),
        reason,
    };
    let url = url::Url::parse(addr).map_err(|e| invalid(e.to_string()))?;
    let host = url
        .host_str()
        .ok_or_else(|| invalid("missing host".to_owned()))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| invalid("missing port".to_owned()))?;
    Ok(format!("{host}:{port}"))
}

impl WebConsoleConfig {
    /// # Errors
    /// [`AssemblyError::InvalidAddress`] when a public address is not a URL.
    pub fn from_master(config: &MasterConfig) -> Result<Self, AssemblyError> {
        let master_public = config.master_public_addr().trim_end_matches('/');
        Ok(Self {
            master_addr: host_port(master_public)?,
            master_prefix: config.api_prefix.clone(),
            kubernetes_addr: host_port(config.kubernetes_public_addr())?,
            kubernetes_prefix: KUBERNETES_PREFIX.to_owned(),
            oauth_authorize_uri: format!("{master_public}/oauth/authorize"),
            oauth_redirect_base: config.asset_public_addr(),
            oauth_client_id: CONSOLE_CLIENT_ID.to_owned(),
            logout_uri: String::new(),
        })
    }

    /// Body of `config.js`.
    #[must_use]
    pub fn to_javascript(&self) -> String {
        let value = json!({
            "api": {
                "meridian": { "hostPort": self.master_addr, "prefix": self.master_prefix },
                "k8s": { "hostPort": self.kubernetes_addr, "prefix": self.kubernetes_prefix },
            },
            "auth": {
                "oauth_authorize_uri": self.oauth_authorize_uri,
                "oauth_redirect_base": self.oauth_redirect_base,
                "oauth_client_id": self.oauth_client_id,
                "logout_uri": self.logout_uri,
            },
        });
        format!("window.MERIDIAN_CONFIG = {value};\n")
    }
}

#[derive(Clone)]
struct AssetState {
    bundle: Arc<AssetBundle>,
    config_js: Arc<str>,
}

/// Router of the asset listener, gzip-compressed.
#[must_use]
pub fn asset_router(bundle: AssetBundle, console: &WebConsoleConfig) -> Router {
    let state = AssetState {
        bundle: Arc::new(bundle),
        config_js: Arc::from(console.to_javascript()),
    };
    Router::new()
        .route(CONFIG_JS, get(serve_config))
        .fallback(serve_asset)
        .with_state(state)
        .layer(CompressionLayer::new())
}

async fn serve_config(State(state): State<AssetState>) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/javascript"),
            (header::CACHE_CONTROL, NO_CACHE),
        ],
        state.config_js.to_string(),
    )
        .into_response()
}

/// A path the console routes itself rather than a missing file.
fn is_console_route(path: &str) -> bool {
    path.rsplit('/').next().is_none_or(|last| !last.contains('.'))
}

async fn serve_asset(
    State(state): State<AssetState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let requested = uri.path().trim_start_matches('/');
    let requested = if requested.is_empty() { INDEX } else { requested };
    let (path, asset) = match state.bundle.get(requested) {
        Some(asset) => (requested, asset),
        None if is_console_route(requested) => match state.bundle.get(INDEX) {
            Some(asset) => (INDEX, asset),
            None => return StatusCode::NOT_FOUND.into_response(),
        },
        None => return StatusCode::NOT_FOUND.into_response(),
    };

    let cache_control = if path == INDEX { NO_CACHE } else { ASSET_CACHE_CONTROL };
    let fresh = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|tags| tags.split(',').any(|t| t.trim() == asset.etag));

    let mut builder = Response::builder()
        .header(header::CACHE_CONTROL, cache_control)
        .header(header::ETAG, asset.etag.as_str());
    let body = if fresh {
        builder = builder.status(StatusCode::NOT_MODIFIED);
        Body::empty()
    } else {
        builder = builder
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, HeaderValue::from_static(asset.content_type));
        Body::from(asset.body.clone())
    };
    builder
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
