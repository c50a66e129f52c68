#![allow(clippy::unwrap_used, clippy::expect_used)]

//! End-to-end tests of the assembled master handler.

use api_gateway::container::{ApiInstaller, RouteContainer, RouteFilter, RouteSpec};
use api_gateway::{AssemblyError, Master, MasterConfig, MasterDeps};
use axum::Router;
use axum::body::Body;
use axum::routing::get;
use http::{Method, Request, Response, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

const ADMIN_TOKEN: &str = "admin-token";
const ALICE_TOKEN: &str = "alice-token";

fn config(extra: Value) -> MasterConfig {
    let mut doc = json!({
        "authn": {
            "mode": "static_tokens",
            "tokens": [
                { "token": ADMIN_TOKEN, "identity": { "name": "system:admin", "groups": ["system:cluster-admins"] } },
                { "token": ALICE_TOKEN, "identity": { "name": "alice", "groups": [] } }
            ]
        }
    });
    if let (Some(doc), Some(extra)) = (doc.as_object_mut(), extra.as_object()) {
        doc.extend(extra.clone());
    }
    serde_json::from_value(doc).unwrap()
}

fn master_with(config: MasterConfig, customize: impl FnOnce(&mut MasterDeps)) -> Result<Master, AssemblyError> {
    let mut deps = MasterDeps::in_memory(&config)?;
    customize(&mut deps);
    Master::new(config, deps)
}

async fn handler() -> (Master, Router) {
    let master = master_with(config(json!({})), |_| {}).unwrap();
    master.bootstrap_policy().await;
    let (router, _) = master.build_handler().unwrap();
    (master, router)
}

async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Response<Body> {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let body = match body {
        Some(body) => {
            req = req.header(header::CONTENT_TYPE, "application/json");
            Body::from(body.to_string())
        }
        None => Body::empty(),
    };
    router.clone().oneshot(req.body(body).unwrap()).await.unwrap()
}

async fn text(res: Response<Body>) -> String {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn json_body(res: Response<Body>) -> Value {
    serde_json::from_str(&text(res).await).unwrap()
}

/// Bind `user` to `role` of the `role_namespace` policy, within `namespace`.
async fn bind(router: &Router, namespace: &str, role_namespace: &str, role: &str, user: &str) -> Value {
    let res = send(
        router,
        Method::POST,
        &format!("/osapi/v1beta1/roleBindings?namespace={namespace}"),
        Some(ADMIN_TOKEN),
        Some(json!({
            "metadata": { "name": format!("{user}-{role}") },
            "roleRef": { "namespace": role_namespace, "name": role },
            "userNames": [user]
        })),
    )
    .await;
    assert_eq!(res.status(), StatusCode::CREATED);
    json_body(res).await
}

async fn create_build_config(router: &Router, uri: &str, name: &str) -> Response<Body> {
    send(
        router,
        Method::POST,
        uri,
        Some(ALICE_TOKEN),
        Some(json!({ "metadata": { "name": name }, "parameters": {} })),
    )
    .await
}

#[tokio::test]
async fn unrecognized_paths_are_not_forbidden() {
    let (_master, router) = handler().await;

    let res = send(&router, Method::GET, "/osapi", Some(ALICE_TOKEN), None).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(json_body(res).await["versions"], json!(["v1beta1"]));

    let res = send(&router, Method::GET, "/metrics/cluster", Some(ALICE_TOKEN), None).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn denied_requests_name_the_uri_and_reason() {
    let (_master, router) = handler().await;

    let res = send(
        &router,
        Method::GET,
        "/osapi/v1beta1/builds?namespace=dev",
        Some(ALICE_TOKEN),
        None,
    )
    .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body = text(res).await;
    assert!(
        body.starts_with("Forbidden: \"/osapi/v1beta1/builds?namespace=dev\" "),
        "{body}"
    );
    assert!(body.len() > "Forbidden: \"/osapi/v1beta1/builds?namespace=dev\" ".len());
}

#[tokio::test]
async fn requests_without_credentials_are_unauthorized() {
    let (_master, router) = handler().await;
    let res = send(&router, Method::GET, "/osapi/v1beta1/builds", None, None).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = send(&router, Method::GET, "/osapi/v1beta1/builds", Some("stolen"), None).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_manages_build_configs() {
    let (_master, router) = handler().await;
    let collection = "/osapi/v1beta1/buildConfigs?namespace=dev";

    let res = send(
        &router,
        Method::POST,
        collection,
        Some(ADMIN_TOKEN),
        Some(json!({ "metadata": { "name": "app" }, "parameters": {} })),
    )
    .await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let created = json_body(res).await;
    assert_eq!(created["kind"], "BuildConfig");
    assert_eq!(created["metadata"]["namespace"], "dev");

    let res = send(&router, Method::GET, collection, Some(ADMIN_TOKEN), None).await;
    assert_eq!(res.status(), StatusCode::OK);

    let item = "/osapi/v1beta1/buildConfigs/app?namespace=dev";
    let res = send(&router, Method::GET, item, Some(ADMIN_TOKEN), None).await;
    assert_eq!(json_body(res).await["metadata"]["name"], "app");

    let res = send(&router, Method::DELETE, item, Some(ADMIN_TOKEN), None).await;
    assert_eq!(res.status(), StatusCode::OK);
    let res = send(&router, Method::GET, item, Some(ADMIN_TOKEN), None).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn current_user_is_the_acting_identity() {
    let (master, router) = handler().await;

    let res = send(&router, Method::GET, "/osapi/v1beta1/users/~", Some(ALICE_TOKEN), None).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(json_body(res).await["metadata"]["name"], "alice");

    // request contexts do not outlive their requests
    assert!(master.contexts().is_empty());
}

#[tokio::test]
async fn policies_are_served_from_the_policy_store() {
    let (_master, router) = handler().await;
    let res = send(
        &router,
        Method::GET,
        "/osapi/v1beta1/policies/default?namespace=master",
        Some(ADMIN_TOKEN),
        None,
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(json_body(res).await["roles"]["basic-user"].is_object());
}

#[tokio::test]
async fn webhooks_start_builds_without_authentication() {
    let (master, router) = handler().await;
    send(
        &router,
        Method::POST,
        "/osapi/v1beta1/buildConfigs?namespace=dev",
        Some(ADMIN_TOKEN),
        Some(json!({
            "metadata": { "name": "app" },
            "triggers": [{ "type": "generic", "generic": { "secret": "s3cr3t" } }],
            "parameters": { "strategy": { "type": "Docker" } }
        })),
    )
    .await;

    let hook = "/osapi/v1beta1/buildConfigHooks/app/s3cr3t/generic?namespace=dev";
    let res = send(&router, Method::POST, hook, None, None).await;
    assert_eq!(res.status(), StatusCode::OK);

    let builds = master.backend("Build").unwrap().list("dev").await.unwrap();
    assert_eq!(builds.len(), 1);
    assert_eq!(builds[0]["metadata"]["name"], "app-1");
    assert_eq!(builds[0]["status"], "New");

    let wrong_secret = "/osapi/v1beta1/buildConfigHooks/app/nope/generic?namespace=dev";
    let res = send(&router, Method::POST, wrong_secret, None, None).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let unknown_plugin = "/osapi/v1beta1/buildConfigHooks/app/s3cr3t/gitlab?namespace=dev";
    let res = send(&router, Method::POST, unknown_plugin, None, None).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn documentation_covers_both_surfaces() {
    let (_master, router) = handler().await;
    let res = send(&router, Method::GET, "/swaggerapi/openapi.json", None, None).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[header::CACHE_CONTROL], "no-store");

    let doc = json_body(res).await;
    assert!(doc["paths"]["/osapi/v1beta1/builds"]["get"].is_object());
    assert!(doc["paths"]["/osapi/v1beta1/buildConfigHooks/{name}/{secret}/{plugin}"]["post"].is_object());
    assert!(doc["paths"]["/healthz"]["get"].is_object());
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let (_master, router) = handler().await;
    let res = send(&router, Method::GET, "/healthz", None, None).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn cors_preflight_skips_authentication() {
    let master = master_with(
        config(json!({ "cors_allowed_origins": ["//localhost(:|$)"] })),
        |_| {},
    )
    .unwrap();
    let (router, _) = master.build_handler().unwrap();

    let req = Request::builder()
        .method(Method::OPTIONS)
        .uri("/osapi/v1beta1/builds")
        .header(header::ORIGIN, "http://localhost:9000")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
        .body(Body::empty())
        .unwrap();
    let res = router.oneshot(req).await.unwrap();
    assert!(res.status().is_success());
    assert_eq!(
        res.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "http://localhost:9000"
    );
}

#[test]
fn invalid_cors_pattern_is_fatal() {
    let master = master_with(config(json!({ "cors_allowed_origins": ["(unclosed"] })), |_| {}).unwrap();
    assert!(matches!(
        master.build_handler().unwrap_err(),
        AssemblyError::InvalidCorsOrigin { .. }
    ));
}

#[test]
fn unsupported_storage_version_is_fatal() {
    let deps = MasterDeps::in_memory(&config(json!({}))).unwrap();
    let err = Master::new(config(json!({ "storage_version": "v9" })), deps)
        .err()
        .unwrap();
    assert!(err.to_string().contains("v1beta1"), "{err}");
}

struct WhoAmI;

impl ApiInstaller for WhoAmI {
    fn install(&self, container: &mut RouteContainer) -> Result<Vec<String>, AssemblyError> {
        container.add(
            RouteSpec::new(Method::GET, "/osapi/v1beta1/whoami/{name}", get(|| async { "me" }))
                .filter(RouteFilter::CurrentUser),
        )?;
        Ok(Vec::new())
    }
}

#[test]
fn second_current_user_route_is_fatal() {
    let master = master_with(config(json!({})), |deps| {
        deps.protected_installers.push(Box::new(WhoAmI));
    })
    .unwrap();
    assert!(matches!(
        master.build_handler().unwrap_err(),
        AssemblyError::CurrentUserRoute { found: 2, .. }
    ));
}

#[test]
fn missing_user_backend_leaves_no_current_user_route() {
    let master = master_with(config(json!({})), |deps| {
        deps.backends.remove("User");
    })
    .unwrap();
    assert!(matches!(
        master.build_handler().unwrap_err(),
        AssemblyError::CurrentUserRoute { found: 0, .. }
    ));
}

#[tokio::test]
async fn controllers_are_supervised() {
    let master = master_with(config(json!({})), |_| {}).unwrap();
    let handles = master.run_controllers().unwrap();
    assert_eq!(handles.len(), 6);
    assert_eq!(master.supervisor().handles().len(), 6);
    master.supervisor().shutdown();
}

#[tokio::test]
async fn controllers_need_their_backends() {
    let master = master_with(config(json!({})), |deps| {
        deps.backends.remove("Pod");
    })
    .unwrap();
    assert!(matches!(
        master.run_controllers().unwrap_err(),
        AssemblyError::MissingBackend { kind } if kind == "Pod"
    ));
}

#[tokio::test]
async fn repeated_namespace_cannot_escape_the_granted_one() {
    let (master, router) = handler().await;
    bind(&router, "mine", "master", "edit", "alice").await;

    let res = create_build_config(&router, "/osapi/v1beta1/buildConfigs?namespace=victim", "evil").await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    for uri in [
        "/osapi/v1beta1/buildConfigs?namespace=mine&namespace=victim",
        "/osapi/v1beta1/buildConfigs?namespace=victim&namespace=mine",
        "/osapi/v1beta1/buildConfigs?namespace=&namespace=victim",
    ] {
        let res = create_build_config(&router, uri, "evil").await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN, "{uri}");
        let body = text(res).await;
        assert!(body.ends_with("request names more than one namespace"), "{body}");
    }
    let victim = master.backend("BuildConfig").unwrap().list("victim").await.unwrap();
    assert!(victim.is_empty());

    let res = create_build_config(&router, "/osapi/v1beta1/buildConfigs?namespace=mine", "app").await;
    assert_eq!(res.status(), StatusCode::CREATED);
    assert_eq!(json_body(res).await["metadata"]["namespace"], "mine");
}

#[tokio::test]
async fn unqualified_creates_are_authorized_in_the_default_namespace() {
    let (master, router) = handler().await;
    bind(&router, "mine", "master", "edit", "alice").await;

    for uri in ["/osapi/v1beta1/buildConfigs", "/osapi/v1beta1/buildConfigs?namespace="] {
        let res = create_build_config(&router, uri, "app").await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN, "{uri}");
        let body = text(res).await;
        assert!(body.ends_with("alice cannot create on buildConfigs in default"), "{body}");
    }

    bind(&router, "default", "master", "edit", "alice").await;
    let res = create_build_config(&router, "/osapi/v1beta1/buildConfigs", "app").await;
    assert_eq!(res.status(), StatusCode::CREATED);
    assert_eq!(json_body(res).await["metadata"]["namespace"], "default");

    let res = create_build_config(&router, "/osapi/v1beta1/buildConfigs?namespace=", "web").await;
    assert_eq!(res.status(), StatusCode::CREATED);
    assert_eq!(json_body(res).await["metadata"]["namespace"], "default");

    let stored = master.backend("BuildConfig").unwrap().list("default").await.unwrap();
    assert_eq!(stored.len(), 2);
    assert!(master.backend("BuildConfig").unwrap().list("mine").await.unwrap().is_empty());

    let res = send(&router, Method::GET, "/osapi/v1beta1/buildConfigs/app", Some(ALICE_TOKEN), None).await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn role_bindings_change_later_decisions() {
    let (_master, router) = handler().await;
    let uri = "/osapi/v1beta1/buildConfigs?namespace=mine";

    let res = create_build_config(&router, uri, "before").await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let binding = bind(&router, "mine", "master", "edit", "alice").await;
    assert_eq!(binding["kind"], "RoleBinding");
    assert_eq!(binding["metadata"]["namespace"], "mine");

    let res = create_build_config(&router, uri, "after").await;
    assert_eq!(res.status(), StatusCode::CREATED);

    // the binding is stored in the policy binding the authorizer reads
    let res = send(
        &router,
        Method::GET,
        "/osapi/v1beta1/policyBindings/master?namespace=mine",
        Some(ADMIN_TOKEN),
        None,
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(json_body(res).await["roleBindings"]["alice-edit"].is_object());

    let res = send(
        &router,
        Method::DELETE,
        "/osapi/v1beta1/roleBindings/alice-edit?namespace=mine",
        Some(ADMIN_TOKEN),
        None,
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    let res = create_build_config(&router, uri, "revoked").await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn namespace_roles_grant_only_their_rules() {
    let (_master, router) = handler().await;
    let res = send(
        &router,
        Method::POST,
        "/osapi/v1beta1/roles?namespace=mine",
        Some(ADMIN_TOKEN),
        Some(json!({
            "metadata": { "name": "builder" },
            "rules": [{ "verbs": ["create"], "resources": ["builds"] }]
        })),
    )
    .await;
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = send(
        &router,
        Method::GET,
        "/osapi/v1beta1/policies/default?namespace=mine",
        Some(ADMIN_TOKEN),
        None,
    )
    .await;
    assert!(json_body(res).await["roles"]["builder"].is_object());

    bind(&router, "mine", "mine", "builder", "alice").await;

    let res = send(
        &router,
        Method::POST,
        "/osapi/v1beta1/builds?namespace=mine",
        Some(ALICE_TOKEN),
        Some(json!({ "metadata": { "name": "b1" } })),
    )
    .await;
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = create_build_config(&router, "/osapi/v1beta1/buildConfigs?namespace=mine", "app").await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}
