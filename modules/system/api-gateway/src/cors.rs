//! Cross-origin resource sharing for the composed handler.

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue, Method, header, request::Parts};
use regex::Regex;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::error::AssemblyError;

const ALLOWED_METHODS: [Method; 5] = [
    Method::POST,
    Method::GET,
    Method::OPTIONS,
    Method::PUT,
    Method::DELETE,
];

fn allowed_headers() -> [HeaderName; 5] {
    [
        header::CONTENT_TYPE,
        header::CONTENT_LENGTH,
        header::ACCEPT_ENCODING,
        HeaderName::from_static("x-csrf-token"),
        header::AUTHORIZATION,
    ]
}

/// Compile the allowed-origin patterns.
///
/// # Errors
/// [`AssemblyError::InvalidCorsOrigin`] for the first pattern that is not a
/// valid regular expression.
pub fn compile_origins(patterns: &[String]) -> Result<Vec<Regex>, AssemblyError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|source| AssemblyError::InvalidCorsOrigin {
                pattern: pattern.clone(),
                source,
            })
        })
        .collect()
}

/// Mirrors the `Origin` of requests matching any of `origins` and answers
/// their preflights; other origins get no CORS headers.
#[must_use]
pub fn cors_layer(origins: Vec<Regex>) -> CorsLayer {
    let origins = Arc::new(origins);
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _parts: &Parts| {
                origin
                    .to_str()
                    .is_ok_and(|o| origins.iter().any(|re| re.is_match(o)))
            },
        ))
        .allow_methods(ALLOWED_METHODS)
        .allow_headers(allowed_headers())
        .allow_credentials(true)
}
