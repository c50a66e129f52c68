//! Generic CRUD routes over [`ResourceBackend`]s.

use std::collections::HashMap;
use std::sync::Arc;

use api_registry::{JsonMetadataAccessor, MetadataAccessor, RestMapper, RestMapping, RestScope};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{Method, StatusCode};
use axum::routing::{delete, get, post, put};
use axum::{Extension, Json};
use meridian_security::UserInfo;
use meridian_security::constants::CURRENT_USER_NAME;
use serde_json::{Map, Value, json};

use super::backend::{BackendError, ResourceBackend};
use crate::auth::{ActingUser, AuthorizedNamespace};
use crate::container::{ApiInstaller, RouteContainer, RouteFilter, RouteSpec};
use crate::error::AssemblyError;

/// Namespace of legacy-scoped requests that do not name one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Kind whose `GET` item route resolves the current user.
const USER_KIND: &str = "User";

type PathParams = Option<Path<HashMap<String, String>>>;
type QueryParams = Query<HashMap<String, String>>;
type Authorized = Option<Extension<AuthorizedNamespace>>;

/// `GET {prefix}`: the API versions served under the prefix.
pub struct VersionsInstaller {
    prefix: String,
    versions: Vec<String>,
}

impl VersionsInstaller {
    #[must_use]
    pub fn new(prefix: impl Into<String>, versions: Vec<String>) -> Self {
        Self {
            prefix: prefix.into(),
            versions,
        }
    }
}

impl ApiInstaller for VersionsInstaller {
    fn install(&self, container: &mut RouteContainer) -> Result<Vec<String>, AssemblyError> {
        let body = json!({ "versions": self.versions });
        let path = self.prefix.trim_end_matches('/');
        container.add(
            RouteSpec::new(
                Method::GET,
                path,
                get(move || {
                    let body = body.clone();
                    async move { Json(body) }
                }),
            )
            .summary("List API versions")
            .tag("versions"),
        )?;
        Ok(Vec::new())
    }
}

/// Installs list, create, get, update and delete routes for every kind
/// with a backend, addressed by the kind's REST mapping in one version.
pub struct ResourceInstaller {
    prefix: String,
    version: String,
    mapper: Arc<dyn RestMapper>,
    backends: Vec<(String, Arc<dyn ResourceBackend>)>,
}

impl ResourceInstaller {
    #[must_use]
    pub fn new(prefix: impl Into<String>, version: impl Into<String>, mapper: Arc<dyn RestMapper>) -> Self {
        Self {
            prefix: prefix.into(),
            version: version.into(),
            mapper,
            backends: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_backend(mut self, kind: impl Into<String>, backend: Arc<dyn ResourceBackend>) -> Self {
        self.backends.push((kind.into(), backend));
        self
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.backends.iter().map(|(kind, _)| kind.as_str())
    }
}

impl ApiInstaller for ResourceInstaller {
    fn install(&self, container: &mut RouteContainer) -> Result<Vec<String>, AssemblyError> {
        let prefix = self.prefix.trim_end_matches('/');
        for (kind, backend) in &self.backends {
            let mapping = self.mapper.rest_mapping(kind, &self.version)?;
            install_kind(container, prefix, mapping, Arc::clone(backend))?;
        }
        tracing::debug!(version = %self.version, kinds = self.backends.len(), "Resources installed");
        Ok(vec![format!("Started Meridian API at %s{prefix}/{}", self.version)])
    }
}

fn install_kind(
    container: &mut RouteContainer,
    prefix: &str,
    mapping: RestMapping,
    backend: Arc<dyn ResourceBackend>,
) -> Result<(), AssemblyError> {
    let collection = match mapping.scope {
        RestScope::Namespace => {
            format!("{prefix}/{}/ns/{{namespace}}/{}", mapping.version, mapping.resource)
        }
        RestScope::Root | RestScope::NamespaceLegacy => {
            format!("{prefix}/{}/{}", mapping.version, mapping.resource)
        }
    };
    let item = format!("{collection}/{{name}}");
    let kind = mapping.kind.clone();
    let state = ResourceState {
        prefix: Arc::from(prefix),
        mapping: Arc::new(mapping),
        backend,
    };

    let spec = |method: Method, path: &str, handler, summary: String| {
        RouteSpec::new(method, path.to_owned(), handler)
            .summary(summary)
            .tag(kind.clone())
    };

    container.add(spec(
        Method::GET,
        &collection,
        get(list_objects).with_state(state.clone()),
        format!("List objects of kind {kind}"),
    ))?;
    container.add(spec(
        Method::POST,
        &collection,
        post(create_object).with_state(state.clone()),
        format!("Create an object of kind {kind}"),
    ))?;

    let get_item = if kind == USER_KIND {
        spec(
            Method::GET,
            &item,
            get(get_user).with_state(state.clone()),
            format!("Read an object of kind {kind}; \"{CURRENT_USER_NAME}\" names the current user"),
        )
        .filter(RouteFilter::CurrentUser)
    } else {
        spec(
            Method::GET,
            &item,
            get(get_object).with_state(state.clone()),
            format!("Read an object of kind {kind}"),
        )
    };
    container.add(get_item)?;
    container.add(spec(
        Method::PUT,
        &item,
        put(update_object).with_state(state.clone()),
        format!("Replace an object of kind {kind}"),
    ))?;
    container.add(spec(
        Method::DELETE,
        &item,
        delete(delete_object).with_state(state),
        format!("Delete an object of kind {kind}"),
    ))?;
    Ok(())
}

#[derive(Clone)]
struct ResourceState {
    prefix: Arc<str>,
    mapping: Arc<RestMapping>,
    backend: Arc<dyn ResourceBackend>,
}

impl ResourceState {
    /// Namespace addressed by the request. The namespace the request was
    /// authorized in wins; without one, a legacy-scoped list without a
    /// namespace spans all of them and other verbs fall back to
    /// [`DEFAULT_NAMESPACE`].
    fn namespace(
        &self,
        authorized: Authorized,
        params: &HashMap<String, String>,
        query: &HashMap<String, String>,
        listing: bool,
    ) -> String {
        if self.mapping.scope == RestScope::Root {
            return String::new();
        }
        if let Some(Extension(AuthorizedNamespace(namespace))) = authorized {
            return namespace;
        }
        match self.mapping.scope {
            RestScope::Root => String::new(),
            RestScope::Namespace => params.get("namespace").cloned().unwrap_or_default(),
            RestScope::NamespaceLegacy => match query.get("namespace").filter(|ns| !ns.is_empty()) {
                Some(ns) => ns.clone(),
                None if listing => String::new(),
                None => DEFAULT_NAMESPACE.to_owned(),
            },
        }
    }

    /// Stamp kind, version and self link on an object leaving the API.
    fn decorate(&self, mut obj: Value) -> Result<Value, BackendError> {
        let accessor = JsonMetadataAccessor;
        let link = self.mapping.resource_url(
            &self.prefix,
            accessor.namespace(&obj),
            accessor.name(&obj),
        );
        accessor
            .set_self_link(&mut obj, &link)
            .map_err(|e| BackendError::Internal(e.to_string()))?;
        if let Some(fields) = obj.as_object_mut() {
            fields.insert("kind".to_owned(), Value::String(self.mapping.kind.clone()));
            fields.insert(
                "apiVersion".to_owned(),
                Value::String(self.mapping.version.clone()),
            );
        }
        Ok(obj)
    }

    /// Parse and check a request body against the addressed kind, namespace
    /// and, for updates, name.
    fn incoming(&self, body: &[u8], namespace: &str, name: Option<&str>) -> Result<Value, BackendError> {
        let mut obj: Value = serde_json::from_slice(body)
            .map_err(|e| BackendError::Invalid(format!("invalid request body: {e}")))?;
        let Some(fields) = obj.as_object_mut() else {
            return Err(BackendError::Invalid("request body must be a JSON object".to_owned()));
        };

        let kind = &self.mapping.kind;
        match fields.get("kind").and_then(Value::as_str) {
            None | Some("") => {
                fields.insert("kind".to_owned(), Value::String(kind.clone()));
            }
            Some(found) if found == kind => {}
            Some(found) => {
                return Err(BackendError::Invalid(format!(
                    "kind \"{found}\" cannot be stored as {}",
                    self.mapping.resource
                )));
            }
        }

        let metadata = fields
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        let Some(metadata) = metadata.as_object_mut() else {
            return Err(BackendError::Invalid("metadata must be a JSON object".to_owned()));
        };
        if let Some(found) = metadata.get("namespace").and_then(Value::as_str)
            && !found.is_empty()
            && !namespace.is_empty()
            && found != namespace
        {
            return Err(BackendError::Invalid(format!(
                "namespace \"{found}\" does not match the request namespace \"{namespace}\""
            )));
        }
        if let Some(name) = name {
            match metadata.get("name").and_then(Value::as_str) {
                None | Some("") => {
                    metadata.insert("name".to_owned(), Value::String(name.to_owned()));
                }
                Some(found) if found == name => {}
                Some(found) => {
                    return Err(BackendError::Invalid(format!(
                        "name \"{found}\" does not match the requested name \"{name}\""
                    )));
                }
            }
        }
        Ok(obj)
    }
}

fn param_map(params: PathParams) -> HashMap<String, String> {
    params.map(|Path(p)| p).unwrap_or_default()
}

fn item_name(params: &HashMap<String, String>) -> Result<&str, BackendError> {
    params
        .get("name")
        .map(String::as_str)
        .ok_or_else(|| BackendError::Invalid("missing object name".to_owned()))
}

async fn list_objects(
    State(state): State<ResourceState>,
    authorized: Authorized,
    params: PathParams,
    Query(query): QueryParams,
) -> Result<Json<Value>, BackendError> {
    let namespace = state.namespace(authorized, &param_map(params), &query, true);
    let items = state
        .backend
        .list(&namespace)
        .await?
        .into_iter()
        .map(|obj| state.decorate(obj))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(json!({
        "kind": format!("{}List", state.mapping.kind),
        "apiVersion": state.mapping.version,
        "metadata": {
            "selfLink": state.mapping.resource_url(&state.prefix, Some(&namespace), None),
        },
        "items": items,
    })))
}

async fn create_object(
    State(state): State<ResourceState>,
    authorized: Authorized,
    params: PathParams,
    Query(query): QueryParams,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), BackendError> {
    let namespace = state.namespace(authorized, &param_map(params), &query, false);
    let obj = state.incoming(&body, &namespace, None)?;
    let created = state.backend.create(&namespace, obj).await?;
    tracing::debug!(resource = state.backend.resource(), namespace, "Object created");
    Ok((StatusCode::CREATED, Json(state.decorate(created)?)))
}

async fn get_object(
    State(state): State<ResourceState>,
    authorized: Authorized,
    params: PathParams,
    Query(query): QueryParams,
) -> Result<Json<Value>, BackendError> {
    let params = param_map(params);
    let namespace = state.namespace(authorized, &params, &query, false);
    let obj = state.backend.get(&namespace, item_name(&params)?).await?;
    Ok(Json(state.decorate(obj)?))
}

/// Item read of the users resource. `~` names the acting user; a user
/// without a stored object is described from its identity.
async fn get_user(
    State(state): State<ResourceState>,
    params: PathParams,
    acting: Option<Extension<ActingUser>>,
) -> Result<Json<Value>, BackendError> {
    let params = param_map(params);
    let name = item_name(&params)?;
    if name != CURRENT_USER_NAME {
        let obj = state.backend.get("", name).await?;
        return Ok(Json(state.decorate(obj)?));
    }

    let Some(Extension(ActingUser(user))) = acting else {
        return Err(BackendError::NotFound {
            resource: state.backend.resource().to_owned(),
            name: name.to_owned(),
        });
    };
    let obj = match state.backend.get("", user.name()).await {
        Ok(obj) => obj,
        Err(BackendError::NotFound { .. }) => user_object(&user),
        Err(e) => return Err(e),
    };
    Ok(Json(state.decorate(obj)?))
}

fn user_object(user: &UserInfo) -> Value {
    json!({
        "metadata": {
            "name": user.name(),
            "uid": user.uid(),
        },
        "fullName": user.name(),
        "groups": user.groups(),
    })
}

async fn update_object(
    State(state): State<ResourceState>,
    authorized: Authorized,
    params: PathParams,
    Query(query): QueryParams,
    body: Bytes,
) -> Result<Json<Value>, BackendError> {
    let params = param_map(params);
    let namespace = state.namespace(authorized, &params, &query, false);
    let name = item_name(&params)?;
    let obj = state.incoming(&body, &namespace, Some(name))?;
    let updated = state.backend.update(&namespace, name, obj).await?;
    Ok(Json(state.decorate(updated)?))
}

async fn delete_object(
    State(state): State<ResourceState>,
    authorized: Authorized,
    params: PathParams,
    Query(query): QueryParams,
) -> Result<Json<Value>, BackendError> {
    let params = param_map(params);
    let namespace = state.namespace(authorized, &params, &query, false);
    state.backend.delete(&namespace, item_name(&params)?).await?;
    Ok(Json(json!({
        "kind": "Status",
        "apiVersion": state.mapping.version,
        "status": "Success",
        "code": StatusCode::OK.as_u16(),
    })))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::container::FilterContext;
    use crate::resources::MemoryBackend;
    use api_registry::{StorageHelper, latest};
    use axum::Router;
    use axum::body::Body;
    use http::Request;
    use http_body_util::BodyExt;
    use meridian_security::RequestContextMap;
    use tower::ServiceExt;

    fn memory(kind: &str, resource: &str) -> Arc<dyn ResourceBackend> {
        let storage = StorageHelper::for_version(&latest::version_registry(), "").unwrap();
        Arc::new(MemoryBackend::new(kind, resource, storage))
    }

    fn router() -> Router {
        let mapper: Arc<dyn RestMapper> = Arc::new(latest::rest_mapper().unwrap());
        let installer = ResourceInstaller::new("/osapi", latest::VERSION, mapper)
            .with_backend("Build", memory("Build", "builds"))
            .with_backend("Project", memory("Project", "projects"));
        let mut container = RouteContainer::new("test");
        let status = installer.install(&mut container).unwrap();
        assert_eq!(status, vec!["Started Meridian API at %s/osapi/v1beta1".to_owned()]);
        container.into_router(&FilterContext {
            contexts: RequestContextMap::new(),
        })
    }

    async fn call(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let body = body.map_or_else(Body::empty, |b| Body::from(b.to_string()));
        let response = router
            .clone()
            .oneshot(Request::builder().method(method).uri(uri).body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn legacy_namespaced_crud() {
        let router = router();
        let (status, created) = call(
            &router,
            Method::POST,
            "/osapi/v1beta1/builds?namespace=dev",
            Some(json!({"metadata": {"name": "b1"}})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["kind"], "Build");
        assert_eq!(created["metadata"]["selfLink"], "/osapi/v1beta1/builds/b1?namespace=dev");

        let (status, list) = call(&router, Method::GET, "/osapi/v1beta1/builds", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["kind"], "BuildList");
        assert_eq!(list["items"].as_array().map(Vec::len), Some(1));

        let (status, _) = call(&router, Method::GET, "/osapi/v1beta1/builds/b1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let mut changed = created.clone();
        changed["status"] = json!("Complete");
        let (status, updated) = call(
            &router,
            Method::PUT,
            "/osapi/v1beta1/builds/b1?namespace=dev",
            Some(changed),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["status"], "Complete");

        let (status, stale) = call(
            &router,
            Method::PUT,
            "/osapi/v1beta1/builds/b1?namespace=dev",
            Some(created),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(stale["reason"], "Conflict");

        let (status, _) =
            call(&router, Method::DELETE, "/osapi/v1beta1/builds/b1?namespace=dev", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn root_scoped_kinds_ignore_namespace() {
        let router = router();
        let (status, created) = call(
            &router,
            Method::POST,
            "/osapi/v1beta1/projects?namespace=dev",
            Some(json!({"metadata": {"name": "p1"}})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["metadata"]["selfLink"], "/osapi/v1beta1/projects/p1");
        assert!(created["metadata"].get("namespace").is_none());
    }

    #[tokio::test]
    async fn mismatched_bodies_are_rejected() {
        let router = router();
        let (status, body) = call(
            &router,
            Method::POST,
            "/osapi/v1beta1/builds",
            Some(json!({"kind": "Pod", "metadata": {"name": "b1"}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "Status");

        let (status, _) = call(
            &router,
            Method::POST,
            "/osapi/v1beta1/builds?namespace=dev",
            Some(json!({"metadata": {"name": "b1", "namespace": "prod"}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn authorized_namespace_wins_over_the_query() {
        let router = router().layer(Extension(AuthorizedNamespace("mine".to_owned())));
        let (status, created) = call(
            &router,
            Method::POST,
            "/osapi/v1beta1/builds?namespace=mine&namespace=victim",
            Some(json!({"metadata": {"name": "b1"}})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["metadata"]["namespace"], "mine");

        let (status, _) = call(&router, Method::GET, "/osapi/v1beta1/builds/b1?namespace=victim", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[test]
    fn versions_route_is_documented() {
        let mut container = RouteContainer::new("test");
        VersionsInstaller::new("/osapi/", vec!["v1beta1".to_owned()])
            .install(&mut container)
            .unwrap();
        assert_eq!(container.routes()[0].path(), "/osapi");
        assert_eq!(container.routes()[0].summary_text(), Some("List API versions"));
    }
}
