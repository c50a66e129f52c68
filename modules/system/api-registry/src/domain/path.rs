//! Parsing of versioned resource URLs.
//!
//! Grammar, relative to the API prefix:
//!
//! ```text
//! {version}[/watch]/{resource}[/{name}[/{subpath...}]]             namespace from ?namespace=
//! {version}[/watch]/ns/{namespace}/{resource}[/{name}[/{subpath...}]]
//! ```
//!
//! `?watch=true` is equivalent to the `watch` segment. A query that names
//! the namespace twice, or names a different one than the `ns` segment,
//! marks the path [`ResourcePath::namespace_conflict`].

/// Structured view of a resource request path.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResourcePath {
    pub version: String,
    pub resource: String,
    pub namespace: Option<String>,
    pub name: Option<String>,
    /// Remaining segments after the name, joined with `/`.
    pub subpath: Option<String>,
    pub watch: bool,
    /// The request names more than one namespace.
    pub namespace_conflict: bool,
}

/// Parse `path` (and its raw query) as a resource path under `prefix`.
///
/// Returns `None` when the path is not under `prefix` or does not name a
/// resource (e.g. `{prefix}` or `{prefix}/{version}` alone).
#[must_use]
pub fn parse_resource_path(prefix: &str, path: &str, query: Option<&str>) -> Option<ResourcePath> {
    let prefix = prefix.trim_end_matches('/');
    let rest = path.strip_prefix(prefix)?;
    if !rest.is_empty() && !rest.starts_with('/') {
        return None;
    }

    let mut segments = rest.split('/').filter(|s| !s.is_empty()).peekable();
    let version = segments.next()?.to_owned();

    let mut parsed = ResourcePath {
        version,
        ..ResourcePath::default()
    };

    if segments.peek() == Some(&"watch") {
        segments.next();
        parsed.watch = true;
    }

    let mut resource = segments.next()?;
    if resource == "ns" {
        // `ns` is only a namespace marker when followed by a namespace and a resource
        let mut lookahead = segments.clone();
        if let (Some(ns), Some(res)) = (lookahead.next(), lookahead.next()) {
            parsed.namespace = Some(ns.to_owned());
            resource = res;
            segments = lookahead;
        }
    }
    parsed.resource = resource.to_owned();
    parsed.name = segments.next().map(str::to_owned);

    let rest: Vec<&str> = segments.collect();
    if !rest.is_empty() {
        parsed.subpath = Some(rest.join("/"));
    }

    let from_segment = parsed.namespace.is_some();
    let mut seen_in_query = false;
    for (key, value) in url::form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
        match key.as_ref() {
            "namespace" => {
                if seen_in_query {
                    parsed.namespace_conflict = true;
                }
                seen_in_query = true;
                if from_segment {
                    parsed.namespace_conflict |=
                        !value.is_empty() && parsed.namespace.as_deref() != Some(&*value);
                } else if !value.is_empty() {
                    parsed.namespace = Some(value.into_owned());
                }
            }
            "watch" if value == "true" || value == "1" => parsed.watch = true,
            _ => {}
        }
    }

    Some(parsed)
}
