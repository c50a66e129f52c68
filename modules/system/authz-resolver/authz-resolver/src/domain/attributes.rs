//! Derivation of [`AuthorizationAttributes`] from an HTTP request.

use std::collections::BTreeSet;
use std::sync::Arc;

use api_registry::parse_resource_path;
use authz_resolver_sdk::{AttributesError, AuthorizationAttributes};
use meridian_security::{RequestContextMap, RequestKey};

/// The parts of a request the attribute builder looks at.
#[derive(Debug, Clone, Copy)]
pub struct RequestInfo<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub query: Option<&'a str>,
    /// Original request target, reported back in denials.
    pub request_uri: &'a str,
    /// Key under which the authentication stage recorded the acting user.
    pub request_key: Option<RequestKey>,
}

/// Builds attributes from the resource path grammar and the acting user.
///
/// The namespace in the attributes is the one the request is served in:
/// empty for root-scoped resources and for unqualified lists and watches,
/// the default namespace for other requests that name none.
#[derive(Debug, Clone)]
pub struct AttributeBuilder {
    prefixes: Vec<String>,
    contexts: Arc<RequestContextMap>,
    default_namespace: String,
    /// Lowercased resource names addressed outside any namespace.
    root_resources: BTreeSet<String>,
}

impl AttributeBuilder {
    #[must_use]
    pub fn new(prefixes: Vec<String>, contexts: Arc<RequestContextMap>) -> Self {
        Self {
            prefixes,
            contexts,
            default_namespace: String::new(),
            root_resources: BTreeSet::new(),
        }
    }

    /// Resolve unqualified requests to `default_namespace` and requests for
    /// `root_resources` to no namespace at all.
    #[must_use]
    pub fn with_namespace_defaults<I, S>(mut self, default_namespace: impl Into<String>, root_resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.default_namespace = default_namespace.into();
        self.root_resources = root_resources
            .into_iter()
            .map(|r| r.as_ref().to_ascii_lowercase())
            .collect();
        self
    }

    fn namespace(&self, resource: &str, requested: Option<String>, verb: &str) -> String {
        if self.root_resources.contains(&resource.to_ascii_lowercase()) {
            return String::new();
        }
        match requested {
            Some(namespace) => namespace,
            None if verb == "list" || verb == "watch" => String::new(),
            None => self.default_namespace.clone(),
        }
    }

    /// # Errors
    /// - [`AttributesError::NoStandardParts`] if the path is not a resource path
    ///   under any known prefix
    /// - [`AttributesError::AmbiguousNamespace`] if the request names more than
    ///   one namespace
    /// - [`AttributesError::NoUser`] if no user was recorded for the request
    /// - [`AttributesError::UnsupportedMethod`] for methods without a verb
    pub fn build(&self, req: &RequestInfo<'_>) -> Result<AuthorizationAttributes, AttributesError> {
        let parsed = self
            .prefixes
            .iter()
            .find_map(|prefix| parse_resource_path(prefix, req.path, req.query))
            .ok_or(AttributesError::NoStandardParts)?;
        if parsed.namespace_conflict {
            return Err(AttributesError::AmbiguousNamespace);
        }

        let user = req
            .request_key
            .and_then(|key| self.contexts.get(key))
            .ok_or(AttributesError::NoUser)?;

        let verb = match (req.method, parsed.name.is_some()) {
            (_, _) if parsed.watch => "watch",
            ("GET" | "HEAD", true) => "get",
            ("GET" | "HEAD", false) => "list",
            ("POST", _) => "create",
            ("PUT", _) => "update",
            ("PATCH", _) => "patch",
            ("DELETE", _) => "delete",
            (other, _) => return Err(AttributesError::UnsupportedMethod(other.to_owned())),
        };

        Ok(AuthorizationAttributes {
            user,
            verb: verb.to_owned(),
            namespace: self.namespace(&parsed.resource, parsed.namespace, verb),
            resource: parsed.resource,
            name: parsed.name,
            request_uri: req.request_uri.to_owned(),
        })
    }
}
