//! API documentation aggregated over the routes of every container.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use utoipa::openapi::path::{
    HttpMethod, OperationBuilder, ParameterBuilder, ParameterIn, PathItemBuilder, PathsBuilder,
};
use utoipa::openapi::response::{ResponseBuilder, ResponsesBuilder};
use utoipa::openapi::schema::{ObjectBuilder, Schema, SchemaType, Type};
use utoipa::openapi::{InfoBuilder, OpenApi, OpenApiBuilder, Required};

use crate::container::{ApiInstaller, RouteContainer, RouteSpec};
use crate::error::AssemblyError;

/// `{*rest}` -> `{rest}`; `{name}` is already `OpenAPI` syntax.
fn to_openapi_path(path: &str) -> String {
    path.replace("{*", "{")
}

fn path_params(path: &str) -> Vec<String> {
    path.split('/')
        .filter_map(|segment| segment.strip_prefix('{')?.strip_suffix('}'))
        .map(|name| name.trim_start_matches('*').to_owned())
        .collect()
}

fn http_method(method: &Method) -> HttpMethod {
    match *method {
        Method::POST => HttpMethod::Post,
        Method::PUT => HttpMethod::Put,
        Method::DELETE => HttpMethod::Delete,
        Method::PATCH => HttpMethod::Patch,
        Method::HEAD => HttpMethod::Head,
        Method::OPTIONS => HttpMethod::Options,
        _ => HttpMethod::Get,
    }
}

fn operation(spec: &RouteSpec) -> utoipa::openapi::path::Operation {
    let mut op = OperationBuilder::new()
        .operation_id(Some(format!("{}:{}", spec.method(), spec.path())))
        .summary(spec.summary_text().map(str::to_owned));
    for tag in spec.tags() {
        op = op.tag(tag.clone());
    }
    for name in path_params(spec.path()) {
        let schema = Schema::Object(
            ObjectBuilder::new()
                .schema_type(SchemaType::Type(Type::String))
                .build(),
        );
        op = op.parameter(
            ParameterBuilder::new()
                .name(name)
                .parameter_in(ParameterIn::Path)
                .required(Required::True)
                .schema(Some(schema))
                .build(),
        );
    }
    op.responses(
        ResponsesBuilder::new()
            .response("default", ResponseBuilder::new().description("Result").build())
            .build(),
    )
    .build()
}

/// Build one document over the routes of `containers`.
#[must_use]
pub fn build_openapi(title: &str, version: &str, containers: &[&RouteContainer]) -> OpenApi {
    let mut paths = PathsBuilder::new();
    let mut count = 0usize;
    for spec in containers.iter().flat_map(|c| c.routes()) {
        let item = PathItemBuilder::new()
            .operation(http_method(spec.method()), operation(spec))
            .build();
        paths = paths.path(to_openapi_path(spec.path()), item);
        count += 1;
    }
    tracing::info!(operations = count, "API documentation built");

    OpenApiBuilder::new()
        .info(InfoBuilder::new().title(title).version(version).build())
        .paths(paths.build())
        .build()
}

/// Serves a prebuilt document at `{prefix}openapi.json`.
pub struct DocsInstaller {
    prefix: String,
    doc: Arc<OpenApi>,
}

impl DocsInstaller {
    #[must_use]
    pub fn new(prefix: impl Into<String>, doc: OpenApi) -> Self {
        Self {
            prefix: prefix.into(),
            doc: Arc::new(doc),
        }
    }

    #[must_use]
    pub fn path(&self) -> String {
        format!("{}/openapi.json", self.prefix.trim_end_matches('/'))
    }
}

impl ApiInstaller for DocsInstaller {
    fn install(&self, container: &mut RouteContainer) -> Result<Vec<String>, AssemblyError> {
        let path = self.path();
        container.add(
            RouteSpec::new(
                Method::GET,
                path.clone(),
                get(serve_document).with_state(Arc::clone(&self.doc)),
            )
            .summary("API documentation")
            .tag("docs"),
        )?;
        Ok(vec![format!("Started API documentation at %s{path}")])
    }
}

async fn serve_document(State(doc): State<Arc<OpenApi>>) -> Response {
    match serde_json::to_string_pretty(doc.as_ref()) {
        Ok(json) => (
            [
                (header::CONTENT_TYPE, "application/json"),
                (header::CACHE_CONTROL, "no-store"),
            ],
            json,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize API documentation");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
