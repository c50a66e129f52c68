//! Assembly of the master: routing surfaces, middleware, listeners and
//! controllers.
//!
//! All traffic enters through the open container. Requests no open route
//! matches fall through to the protected container, which authenticates and
//! then authorizes them.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use api_registry::{MultiRestMapper, RestMapper, StorageHelper, kind_to_resource, latest};
use authn_resolver_sdk::Authenticator;
use authz_resolver::{
    AttributeBuilder, BootstrapReport, InMemoryPolicyStore, PolicyAuthorizer,
    ensure_bootstrap_policy,
};
use authz_resolver_sdk::PolicyStore;
use axum::Router;
use axum::body::Body;
use axum::http::{HeaderName, Method, Request, Response, StatusCode};
use axum::middleware::from_fn_with_state;
use axum::routing::get;
use controllers::{
    BuildStrategies, ClientSet, ControllerLauncher, CustomBuildStrategy, DockerBuildStrategy,
    ResourceClient, StiBuildStrategy, deployment_environment,
};
use meridian_runtime::{TaskHandle, TaskSupervisor, wait_for_successful_dial};
use meridian_security::RequestContextMap;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::field::Empty;

use crate::assets::{AssetBundle, WebConsoleConfig, asset_router};
use crate::auth::{self, AuthnState, AuthzState};
use crate::config::MasterConfig;
use crate::container::{ApiInstaller, FilterContext, RouteContainer, RouteSpec};
use crate::cors::{compile_origins, cors_layer};
use crate::error::AssemblyError;
use crate::openapi::{DocsInstaller, build_openapi};
use crate::resources::{
    BackendClient, DEFAULT_NAMESPACE, DefaultRegistryBackend, MemoryBackend, PolicyBackend,
    ResourceBackend, ResourceInstaller, RoleBackend, RoleBindingBackend, VersionsInstaller,
};
use crate::server::{HttpServer, REQUEST_TIMEOUT, load_tls};
use crate::service_resolver::{BackendServiceLookup, DeferredTemplate};
use crate::webhooks::{BackendBuildRequester, WebhookInstaller};

/// Prefix of the Kubernetes API; its paths follow the resource grammar too.
pub const KUBERNETES_API_PREFIX: &str = "/api";

/// Host-platform kinds the master keeps backends for without serving them.
pub const HOST_KINDS: &[&str] = &["Pod", "Service"];

const POLICY_KIND: &str = "Policy";
const POLICY_BINDING_KIND: &str = "PolicyBinding";
const ROLE_KIND: &str = "Role";
const ROLE_BINDING_KIND: &str = "RoleBinding";

/// Kinds stored in the policy store rather than in a resource backend.
const POLICY_STORE_KINDS: &[&str] = &[POLICY_KIND, POLICY_BINDING_KIND, ROLE_KIND, ROLE_BINDING_KIND];
const IMAGE_REPOSITORY_KIND: &str = "ImageRepository";
const SERVICE_KIND: &str = "Service";
const BUILD_KIND: &str = "Build";
const BUILD_CONFIG_KIND: &str = "BuildConfig";

const REQUEST_ID_HEADER: &str = "x-request-id";

/// External collaborators of the master.
pub struct MasterDeps {
    pub authenticator: Arc<dyn Authenticator>,
    pub policy_store: Arc<dyn PolicyStore>,
    /// Resource backends keyed by kind.
    pub backends: BTreeMap<String, Arc<dyn ResourceBackend>>,
    pub protected_installers: Vec<Box<dyn ApiInstaller>>,
    pub unprotected_installers: Vec<Box<dyn ApiInstaller>>,
}

impl MasterDeps {
    /// In-memory backends for every kind, the static authenticator of
    /// `config` and an in-memory policy store.
    ///
    /// # Errors
    /// [`AssemblyError::Registry`] for an unsupported storage version.
    pub fn in_memory(config: &MasterConfig) -> Result<Self, AssemblyError> {
        let storage = StorageHelper::for_version(&latest::version_registry(), &config.storage_version)?;
        let backends = latest::ORIGIN_KINDS
            .iter()
            .chain(HOST_KINDS)
            .copied()
            .filter(|kind| !POLICY_STORE_KINDS.contains(kind))
            .map(|kind| {
                let backend: Arc<dyn ResourceBackend> = Arc::new(MemoryBackend::new(
                    kind,
                    kind_to_resource(kind, true),
                    storage.clone(),
                ));
                (kind.to_owned(), backend)
            })
            .collect();
        Ok(Self {
            authenticator: Arc::new(static_authn_plugin::Service::from_config(&config.authn)),
            policy_store: Arc::new(InMemoryPolicyStore::new()),
            backends,
            protected_installers: Vec::new(),
            unprotected_installers: Vec::new(),
        })
    }
}

/// A started listener.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    pub addr: SocketAddr,
    pub task: TaskHandle,
}

pub struct Master {
    config: MasterConfig,
    storage: StorageHelper,
    mapper: Arc<MultiRestMapper>,
    contexts: Arc<RequestContextMap>,
    authenticator: Arc<dyn Authenticator>,
    policy_store: Arc<dyn PolicyStore>,
    backends: BTreeMap<String, Arc<dyn ResourceBackend>>,
    protected_installers: Vec<Box<dyn ApiInstaller>>,
    unprotected_installers: Vec<Box<dyn ApiInstaller>>,
    supervisor: Arc<TaskSupervisor>,
}

impl Master {
    /// Validate the configuration and wire the collaborators.
    ///
    /// # Errors
    /// - [`AssemblyError::Registry`] for an unsupported storage version
    /// - [`AssemblyError::InvalidRegistryTemplate`] for a malformed default registry
    pub fn new(config: MasterConfig, deps: MasterDeps) -> Result<Self, AssemblyError> {
        let storage = StorageHelper::for_version(&latest::version_registry(), &config.storage_version)?;
        let mapper = Arc::new(latest::rest_mapper()?);
        let registry = DeferredTemplate::default_registry()?;
        tracing::info!(storage_version = storage.version(), registry = registry.template(), "Master configured");

        let mut backends = deps.backends;
        if let (Some(repos), Some(services)) = (
            backends.get(IMAGE_REPOSITORY_KIND).cloned(),
            backends.get(SERVICE_KIND).cloned(),
        ) {
            let repos: Arc<dyn ResourceBackend> = Arc::new(DefaultRegistryBackend::new(
                repos,
                registry,
                Arc::new(BackendServiceLookup::new(services)),
            ));
            backends.insert(IMAGE_REPOSITORY_KIND.to_owned(), repos);
        }
        backends.insert(
            POLICY_KIND.to_owned(),
            Arc::new(PolicyBackend::policies(Arc::clone(&deps.policy_store))),
        );
        backends.insert(
            POLICY_BINDING_KIND.to_owned(),
            Arc::new(PolicyBackend::policy_bindings(Arc::clone(&deps.policy_store))),
        );
        backends.insert(
            ROLE_KIND.to_owned(),
            Arc::new(RoleBackend::new(Arc::clone(&deps.policy_store))),
        );
        backends.insert(
            ROLE_BINDING_KIND.to_owned(),
            Arc::new(RoleBindingBackend::new(Arc::clone(&deps.policy_store))),
        );

        Ok(Self {
            config,
            storage,
            mapper,
            contexts: RequestContextMap::new(),
            authenticator: deps.authenticator,
            policy_store: deps.policy_store,
            backends,
            protected_installers: deps.protected_installers,
            unprotected_installers: deps.unprotected_installers,
            supervisor: Arc::new(TaskSupervisor::new()),
        })
    }

    #[must_use]
    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    #[must_use]
    pub fn contexts(&self) -> &Arc<RequestContextMap> {
        &self.contexts
    }

    #[must_use]
    pub fn supervisor(&self) -> &Arc<TaskSupervisor> {
        &self.supervisor
    }

    #[must_use]
    pub fn backend(&self, kind: &str) -> Option<&Arc<dyn ResourceBackend>> {
        self.backends.get(kind)
    }

    fn versioned_prefix(&self) -> String {
        format!("{}/{}", self.config.api_prefix.trim_end_matches('/'), self.storage.version())
    }

    /// Create the default policy and binding of the master authorization
    /// namespace if they are missing. Failures are logged, not returned.
    pub async fn bootstrap_policy(&self) -> BootstrapReport {
        ensure_bootstrap_policy(
            self.policy_store.as_ref(),
            &self.config.master_authorization_namespace,
        )
        .await
    }

    fn protected_installers(&self) -> Vec<Box<dyn ApiInstaller>> {
        let mut resources = ResourceInstaller::new(
            self.config.api_prefix.clone(),
            self.storage.version(),
            Arc::clone(&self.mapper) as Arc<dyn RestMapper>,
        );
        for (kind, backend) in &self.backends {
            if latest::origin_kind(kind) {
                resources = resources.with_backend(kind.clone(), Arc::clone(backend));
            }
        }
        let versions = latest::VERSIONS.iter().map(|v| (*v).to_owned()).collect();
        vec![
            Box::new(VersionsInstaller::new(self.config.api_prefix.clone(), versions)),
            Box::new(resources),
        ]
    }

    fn unprotected_installers(&self) -> Vec<Box<dyn ApiInstaller>> {
        let mut installers: Vec<Box<dyn ApiInstaller>> = Vec::new();
        if let (Some(builds), Some(configs)) =
            (self.backends.get(BUILD_KIND), self.backends.get(BUILD_CONFIG_KIND))
        {
            let requester = BackendBuildRequester::new(Arc::clone(builds), Arc::clone(configs));
            installers.push(Box::new(
                WebhookInstaller::new(
                    self.config.api_prefix.clone(),
                    self.storage.version(),
                    Arc::new(requester),
                )
                .with_default_plugins(),
            ));
        }
        installers
    }

    /// Compose the request handler of the API listener.
    ///
    /// Returns the handler and the status lines of every installer.
    ///
    /// # Errors
    /// Any installer failure, a current-user route count other than one, or
    /// an invalid CORS pattern.
    pub fn build_handler(&self) -> Result<(Router, Vec<String>), AssemblyError> {
        let mut status = Vec::new();

        let mut protected = RouteContainer::new("protected");
        for installer in self.protected_installers().iter().chain(&self.protected_installers) {
            status.extend(installer.install(&mut protected)?);
        }
        protected.ensure_current_user_route(&self.versioned_prefix())?;

        let mut open = RouteContainer::new("open");
        open.add(
            RouteSpec::new(Method::GET, "/healthz", get(|| async { "ok" }))
                .summary("Liveness check")
                .tag("health"),
        )?;
        for installer in self.unprotected_installers().iter().chain(&self.unprotected_installers) {
            status.extend(installer.install(&mut open)?);
        }

        if self.config.enable_docs {
            let doc = build_openapi("Meridian", self.storage.version(), &[&protected, &open]);
            status.extend(
                DocsInstaller::new(self.config.swagger_api_prefix.clone(), doc).install(&mut open)?,
            );
        }

        let cors = if self.config.cors_allowed_origins.is_empty() {
            None
        } else {
            Some(cors_layer(compile_origins(&self.config.cors_allowed_origins)?))
        };

        let filters = FilterContext {
            contexts: Arc::clone(&self.contexts),
        };
        let authz = AuthzState {
            attributes: AttributeBuilder::new(
                vec![self.config.api_prefix.clone(), KUBERNETES_API_PREFIX.to_owned()],
                Arc::clone(&self.contexts),
            )
            .with_namespace_defaults(
                DEFAULT_NAMESPACE,
                latest::ROOT_SCOPED_KINDS
                    .iter()
                    .map(|kind| kind_to_resource(kind, true)),
            ),
            authorizer: Arc::new(PolicyAuthorizer::new(
                self.config.master_authorization_namespace.clone(),
                Arc::clone(&self.policy_store),
            )),
        };
        let authn = AuthnState {
            authenticator: Arc::clone(&self.authenticator),
            contexts: Arc::clone(&self.contexts),
        };

        // authn runs first: it is the outer layer
        let protected = protected
            .into_router(&filters)
            .layer(from_fn_with_state(authz, auth::authz_middleware))
            .layer(from_fn_with_state(authn, auth::authn_middleware));
        let router = open.into_router(&filters).fallback_service(protected);

        Ok((apply_middleware(router, cors), status))
    }

    async fn probe(&self, name: &str, addr: SocketAddr) {
        if let Err(e) = wait_for_successful_dial(&addr.to_string(), self.config.readiness.budget()).await
        {
            tracing::warn!(listener = name, %addr, error = %e, "Listener did not become reachable");
        }
    }

    /// Bootstrap the policy, then bind and start the API listener. Returns
    /// once the listener accepts connections or the probe gives up.
    ///
    /// # Errors
    /// Fatal assembly errors: see [`Master::build_handler`], TLS loading and
    /// binding.
    pub async fn run(&self) -> Result<ListenerHandle, AssemblyError> {
        self.bootstrap_policy().await;

        let (handler, status) = self.build_handler()?;
        let tls = self.config.tls.as_ref().map(load_tls).transpose()?;
        let server = HttpServer::bind("api", &self.config.master_bind_addr, handler, tls).await?;
        let addr = server.local_addr();
        let task = server.spawn(Duration::ZERO);

        let public = self.config.master_public_addr();
        for line in status {
            tracing::info!("{}", line.replace("%s", public));
        }
        self.probe("api", addr).await;
        Ok(ListenerHandle { addr, task })
    }

    /// Bind and start the web console listener.
    ///
    /// # Errors
    /// Unreadable assets, an invalid public address, TLS loading and binding.
    pub async fn run_asset_server(&self) -> Result<ListenerHandle, AssemblyError> {
        let bundle = match &self.config.asset_dir {
            Some(dir) => AssetBundle::from_dir(dir)?,
            None => AssetBundle::builtin(),
        };
        let console = WebConsoleConfig::from_master(&self.config)?;
        let handler = apply_middleware(asset_router(bundle, &console), None);
        let tls = self.config.asset_tls().map(load_tls).transpose()?;

        let server = HttpServer::bind("assets", &self.config.asset_bind_addr, handler, tls).await?;
        let addr = server.local_addr();
        let task = server.spawn(Duration::ZERO);
        tracing::info!("Started Web Console at {}", self.config.asset_public_addr());
        self.probe("assets", addr).await;
        Ok(ListenerHandle { addr, task })
    }

    fn client(&self, kind: &str) -> Result<Arc<dyn ResourceClient>, AssemblyError> {
        let backend = self
            .backends
            .get(kind)
            .ok_or_else(|| AssemblyError::MissingBackend {
                kind: kind.to_owned(),
            })?;
        Ok(Arc::new(BackendClient::new(Arc::clone(backend))))
    }

    /// Launch the six controllers under the master's supervisor.
    ///
    /// # Errors
    /// [`AssemblyError::MissingBackend`] when a resource they watch or write
    /// has no backend.
    pub fn run_controllers(&self) -> Result<Vec<TaskHandle>, AssemblyError> {
        let clients = ClientSet {
            builds: self.client(BUILD_KIND)?,
            build_configs: self.client(BUILD_CONFIG_KIND)?,
            image_repositories: self.client(IMAGE_REPOSITORY_KIND)?,
            deployments: self.client("Deployment")?,
            deployment_configs: self.client("DeploymentConfig")?,
            pods: self.client("Pod")?,
        };
        let launcher = ControllerLauncher::new(
            Arc::clone(&self.supervisor),
            clients,
            self.config.controllers,
        );

        let codec = Arc::clone(self.storage.codec());
        let images = &self.config.image_template;
        let use_local_images = self.config.use_local_images;
        let strategies = BuildStrategies {
            docker: Box::new(DockerBuildStrategy {
                image: images.expand("docker-builder"),
                use_local_images,
                codec: Arc::clone(&codec),
            }),
            sti: Box::new(StiBuildStrategy {
                image: images.expand("sti-builder"),
                use_local_images,
                codec: Arc::clone(&codec),
            }),
            custom: Box::new(CustomBuildStrategy {
                use_local_images,
                codec: Arc::clone(&codec),
            }),
        };
        let environment = deployment_environment(&self.config.master_addr, &self.config.deployer);

        Ok(vec![
            launcher.run_build_controller(strategies),
            launcher.run_build_image_change_trigger_controller(),
            launcher.run_deployment_controller(environment, images.expand("deployer"), use_local_images),
            launcher.run_deployment_config_controller(Arc::clone(&codec)),
            launcher.run_deployment_config_change_controller(Arc::clone(&codec)),
            launcher.run_deployment_image_change_trigger_controller(),
        ])
    }
}

/// Request id, tracing, timeout and optional CORS around `router`.
///
/// Outermost first: `SetRequestId -> PropagateRequestId -> Trace -> Timeout -> CORS -> router`.
/// The last layer added runs first.
fn apply_middleware(mut router: Router, cors: Option<CorsLayer>) -> Router {
    if let Some(cors) = cors {
        router = router.layer(cors);
    }

    router = router.layer(TimeoutLayer::with_status_code(
        StatusCode::GATEWAY_TIMEOUT,
        REQUEST_TIMEOUT,
    ));

    router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(|req: &Request<Body>| {
                let request_id = req
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("n/a");
                tracing::info_span!(
                    "http_request",
                    method = %req.method(),
                    uri = %req.uri().path(),
                    request_id = %request_id,
                    status = Empty,
                    latency_ms = Empty,
                )
            })
            .on_response(|res: &Response<Body>, latency: Duration, span: &tracing::Span| {
                span.record("status", res.status().as_u16());
                span.record("latency_ms", latency.as_millis());
            }),
    );

    let header = HeaderName::from_static(REQUEST_ID_HEADER);
    router = router.layer(PropagateRequestIdLayer::new(header.clone()));
    router.layer(SetRequestIdLayer::new(header, MakeRequestUuid))
}
