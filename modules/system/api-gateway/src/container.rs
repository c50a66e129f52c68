//! Route containers built from declarative route specs.
//!
//! Every route declares its method, path, documentation and the filters it
//! runs behind when it is added. A container turns its specs into an
//! [`axum::Router`] once, after every installer has run.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::MethodRouter;
use http::Method;
use meridian_security::RequestContextMap;

use crate::auth;
use crate::error::AssemblyError;

/// Per-route filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteFilter {
    /// Resolves the acting user into the request before the handler runs.
    CurrentUser,
}

/// One route: method, path, documentation and filters.
pub struct RouteSpec {
    method: Method,
    path: String,
    summary: Option<String>,
    tags: Vec<String>,
    filters: Vec<RouteFilter>,
    handler: MethodRouter,
}

impl std::fmt::Debug for RouteSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteSpec")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("filters", &self.filters)
            .finish_non_exhaustive()
    }
}

impl RouteSpec {
    /// `handler` must only answer `method`.
    pub fn new(method: Method, path: impl Into<String>, handler: MethodRouter) -> Self {
        Self {
            method,
            path: path.into(),
            summary: None,
            tags: Vec::new(),
            filters: Vec::new(),
            handler,
        }
    }

    #[must_use]
    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn filter(mut self, filter: RouteFilter) -> Self {
        if !self.filters.contains(&filter) {
            self.filters.push(filter);
        }
        self
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn summary_text(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    #[must_use]
    pub fn has_filter(&self, filter: RouteFilter) -> bool {
        self.filters.contains(&filter)
    }
}

/// Installs a group of routes into a container.
pub trait ApiInstaller: Send + Sync {
    /// Returns human-readable status lines for the startup log; `%s` is
    /// replaced by the master address.
    ///
    /// # Errors
    /// Any error is fatal at startup.
    fn install(&self, container: &mut RouteContainer) -> Result<Vec<String>, AssemblyError>;
}

/// Shared state the route filters read.
#[derive(Debug, Clone)]
pub struct FilterContext {
    pub contexts: Arc<RequestContextMap>,
}

/// An ordered set of routes.
#[derive(Debug)]
pub struct RouteContainer {
    name: &'static str,
    routes: Vec<RouteSpec>,
}

impl RouteContainer {
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            routes: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// # Errors
    /// - [`AssemblyError::InvalidRoutePath`] for a relative path
    /// - [`AssemblyError::DuplicateRoute`] if the method and path are taken
    pub fn add(&mut self, spec: RouteSpec) -> Result<(), AssemblyError> {
        if !spec.path.starts_with('/') {
            return Err(AssemblyError::InvalidRoutePath(spec.path));
        }
        if self
            .routes
            .iter()
            .any(|r| r.method == spec.method && r.path == spec.path)
        {
            return Err(AssemblyError::DuplicateRoute {
                method: spec.method.to_string(),
                path: spec.path,
            });
        }
        tracing::debug!(container = self.name, method = %spec.method, path = %spec.path, "Route registered");
        self.routes.push(spec);
        Ok(())
    }

    #[must_use]
    pub fn routes(&self) -> &[RouteSpec] {
        &self.routes
    }

    /// Check that exactly one `GET` route under `prefix` carries the
    /// current-user filter.
    ///
    /// # Errors
    /// Returns [`AssemblyError::CurrentUserRoute`] with the number found otherwise.
    pub fn ensure_current_user_route(&self, prefix: &str) -> Result<(), AssemblyError> {
        let prefix = prefix.trim_end_matches('/');
        let under_prefix = |path: &str| {
            path.strip_prefix(prefix)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        };
        let found = self
            .routes
            .iter()
            .filter(|r| {
                r.method == Method::GET
                    && under_prefix(&r.path)
                    && r.has_filter(RouteFilter::CurrentUser)
            })
            .count();
        if found == 1 {
            Ok(())
        } else {
            Err(AssemblyError::CurrentUserRoute {
                prefix: prefix.to_owned(),
                found,
            })
        }
    }

    /// Build the router. Routes sharing a path are merged; each route's
    /// filters only wrap its own method.
    #[must_use]
    pub fn into_router(self, filters: &FilterContext) -> Router {
        let mut by_path: BTreeMap<String, MethodRouter> = BTreeMap::new();
        for spec in self.routes {
            let mut handler = spec.handler;
            for filter in &spec.filters {
                handler = match filter {
                    RouteFilter::CurrentUser => handler.layer(from_fn_with_state(
                        Arc::clone(&filters.contexts),
                        auth::current_user_filter,
                    )),
                };
            }
            let merged = match by_path.remove(&spec.path) {
                Some(existing) => existing.merge(handler),
                None => handler,
            };
            by_path.insert(spec.path, merged);
        }

        by_path
            .into_iter()
            .fold(Router::new(), |router, (path, handler)| router.route(&path, handler))
    }
}
