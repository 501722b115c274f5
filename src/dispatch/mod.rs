//! Declarative endpoint registration and method-multiplexed dispatch.
//!
//! Endpoints are declared as `(method, path, handler)` triples into an
//! [`EndpointRegistry`] and consumed once by [`EndpointRegistry::build`] into an
//! immutable [`DispatchTable`] holding one [`Route`] per distinct path.

/// axum surface serving a [`DispatchTable`].
pub mod server;

use std::{collections::BTreeMap, fmt, sync::Arc};

use hashbrown::HashMap;
use indexmap::IndexMap;

use crate::{observable::StateError, types::Method, value::Value};

/// Endpoint implementation. Returns an unwrapped snapshot, never a node.
pub type Handler = Arc<dyn Fn(Request) -> Result<Value, HandlerError> + Send + Sync>;

/// Configuration error detected while building the dispatch table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// Two handlers were declared for the same method and path.
    #[error("duplicate route {method} {path}")]
    DuplicateRoute {
        /// Declared method.
        method: Method,
        /// Normalized path.
        path: String,
    },
    /// The path pattern cannot be routed.
    #[error("invalid route path `{path}`: {reason}")]
    InvalidPath {
        /// Path as declared.
        path: String,
        /// Why it was rejected.
        reason: &'static str,
    },
}

/// Failure returned by a handler or by dispatch itself.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The request is malformed.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// No route, or no resource, matches.
    #[error("not found: {0}")]
    NotFound(String),
    /// The path exists but does not accept this method.
    #[error("method {method} not allowed on {path}")]
    MethodNotAllowed {
        /// Requested method.
        method: Method,
        /// Matched route path.
        path: String,
    },
    /// A state read or write failed.
    #[error(transparent)]
    State(#[from] StateError),
    /// Any other handler failure.
    #[error("{0}")]
    Internal(String),
}

/// One incoming call, already parsed by the transport.
#[derive(Debug, Clone)]
pub struct Request {
    /// Requested method.
    pub method: Method,
    /// Captured path parameters.
    pub params: BTreeMap<String, String>,
    /// Decoded body, if any.
    pub body: Option<Value>,
}

impl Request {
    /// Request without parameters or body.
    pub fn new(method: Method) -> Self {
        Self {
            method,
            params: BTreeMap::new(),
            body: None,
        }
    }

    /// Adds a path parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Sets the body.
    pub fn with_body(mut self, body: impl Into<Value>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Path parameter `name`; missing is a bad request.
    pub fn param(&self, name: &str) -> Result<&str, HandlerError> {
        self.params
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| HandlerError::BadRequest(format!("missing path parameter `{name}`")))
    }

    /// Request body; missing is a bad request.
    pub fn body(&self) -> Result<&Value, HandlerError> {
        self.body
            .as_ref()
            .ok_or_else(|| HandlerError::BadRequest("missing request body".to_string()))
    }

    /// Takes ownership of the body; missing is a bad request.
    pub fn into_body(self) -> Result<Value, HandlerError> {
        self.body
            .ok_or_else(|| HandlerError::BadRequest("missing request body".to_string()))
    }
}

struct Endpoint {
    method: Method,
    path: String,
    handler: Handler,
}

/// Ordered collection of declared endpoints.
#[derive(Default)]
pub struct EndpointRegistry {
    endpoints: Vec<Endpoint>,
}

impl EndpointRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `handler` for `method` on `path`.
    ///
    /// `path` starts with `/`; captures are written `{name}` or `<name>`.
    pub fn route<F>(&mut self, method: Method, path: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Request) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.endpoints.push(Endpoint {
            method,
            path: path.into(),
            handler: Arc::new(handler),
        });
        self
    }

    /// Declares a GET endpoint.
    pub fn get<F>(&mut self, path: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Request) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.route(Method::Get, path, handler)
    }

    /// Declares a POST endpoint.
    pub fn post<F>(&mut self, path: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Request) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.route(Method::Post, path, handler)
    }

    /// Declares a PUT endpoint.
    pub fn put<F>(&mut self, path: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Request) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.route(Method::Put, path, handler)
    }

    /// Declares a PATCH endpoint.
    pub fn patch<F>(&mut self, path: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Request) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.route(Method::Patch, path, handler)
    }

    /// Declares a DELETE endpoint.
    pub fn delete<F>(&mut self, path: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Request) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.route(Method::Delete, path, handler)
    }

    /// Number of declared endpoints.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// True when nothing has been declared.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Groups the endpoints by path, in first-declaration order.
    pub fn build(self) -> Result<DispatchTable, DispatchError> {
        let mut routes: Vec<Route> = Vec::new();
        let mut by_path: HashMap<String, usize> = HashMap::new();
        for endpoint in self.endpoints {
            let path = normalize_path(&endpoint.path)?;
            let slot = match by_path.get(&path) {
                Some(&slot) => slot,
                None => {
                    by_path.insert(path.clone(), routes.len());
                    routes.push(Route {
                        segments: pattern_segments(&path),
                        path: path.clone(),
                        handlers: IndexMap::new(),
                    });
                    routes.len() - 1
                }
            };
            let route = &mut routes[slot];
            if route.handlers.contains_key(&endpoint.method) {
                return Err(DispatchError::DuplicateRoute {
                    method: endpoint.method,
                    path,
                });
            }
            route.handlers.insert(endpoint.method, endpoint.handler);
        }
        tracing::debug!(routes = routes.len(), "dispatch table built");
        Ok(DispatchTable { routes, by_path })
    }
}

impl fmt::Debug for EndpointRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.endpoints.iter().map(|e| (e.method, &e.path)))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Capture(String),
}

/// One externally visible path accepting the union of its declared methods.
pub struct Route {
    path: String,
    segments: Vec<Segment>,
    handlers: IndexMap<Method, Handler>,
}

impl Route {
    /// Normalized path pattern, captures written `{name}`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Accepted methods in declaration order.
    pub fn methods(&self) -> Vec<Method> {
        self.handlers.keys().copied().collect()
    }

    /// True when `method` has a handler here.
    pub fn accepts(&self, method: Method) -> bool {
        self.handlers.contains_key(&method)
    }

    /// Delegates to the handler declared for the request's method.
    pub fn handle(&self, request: Request) -> Result<Value, HandlerError> {
        let handler = self
            .handlers
            .get(&request.method)
            .ok_or_else(|| HandlerError::MethodNotAllowed {
                method: request.method,
                path: self.path.clone(),
            })?;
        handler(request)
    }

    fn literal_mask(&self) -> Vec<bool> {
        self.segments
            .iter()
            .map(|segment| matches!(segment, Segment::Literal(_)))
            .collect()
    }

    fn capture(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let parts: Vec<&str> = path.trim_start_matches('/').split('/').collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut params = BTreeMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Capture(_) if part.is_empty() => return None,
                Segment::Capture(name) => {
                    params.insert(name.clone(), part.to_string());
                }
            }
        }
        Some(params)
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("path", &self.path)
            .field("methods", &self.methods())
            .finish()
    }
}

/// Immutable path → method → handler table.
#[derive(Debug)]
pub struct DispatchTable {
    routes: Vec<Route>,
    by_path: HashMap<String, usize>,
}

impl DispatchTable {
    /// Routes in first-declaration order.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Route declared for the pattern `path` (either capture syntax).
    pub fn route(&self, path: &str) -> Option<&Route> {
        let path = normalize_path(path).ok()?;
        self.by_path.get(&path).map(|&slot| &self.routes[slot])
    }

    /// Matches a concrete request path, fills in its captures and dispatches.
    ///
    /// When several routes match, a literal segment beats a capture at the
    /// first position where they differ, so `/user/me` wins over
    /// `/user/{name}` whatever the declaration order.
    pub fn handle(&self, path: &str, mut request: Request) -> Result<Value, HandlerError> {
        let mut best: Option<(&Route, BTreeMap<String, String>)> = None;
        for route in &self.routes {
            let Some(params) = route.capture(path) else {
                continue;
            };
            if best.as_ref().is_none_or(|(current, _)| route.literal_mask() > current.literal_mask()) {
                best = Some((route, params));
            }
        }
        let (route, params) = best.ok_or_else(|| HandlerError::NotFound(path.to_string()))?;
        request.params.extend(params);
        route.handle(request)
    }
}

/// Rewrites `<name>` / `<converter:name>` captures to `{name}`.
fn normalize_path(path: &str) -> Result<String, DispatchError> {
    let invalid = |reason| DispatchError::InvalidPath {
        path: path.to_string(),
        reason,
    };
    if !path.starts_with('/') {
        return Err(invalid("must start with `/`"));
    }
    let mut out = String::with_capacity(path.len());
    for (i, part) in path[1..].split('/').enumerate() {
        out.push('/');
        let name = if let Some(inner) = part.strip_prefix('<').and_then(|p| p.strip_suffix('>')) {
            Some(inner.rsplit(':').next().unwrap_or(inner))
        } else {
            part.strip_prefix('{').and_then(|p| p.strip_suffix('}'))
        };
        match name {
            Some("") => return Err(invalid("empty capture name")),
            Some(name) => {
                out.push('{');
                out.push_str(name);
                out.push('}');
            }
            None if part.is_empty() && i > 0 => return Err(invalid("empty segment")),
            None if part.contains(['{', '}', '<', '>']) => {
                return Err(invalid("capture must span a whole segment"));
            }
            None => out.push_str(part),
        }
    }
    Ok(out)
}

fn pattern_segments(path: &str) -> Vec<Segment> {
    path.trim_start_matches('/')
        .split('/')
        .map(|part| match part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
            Some(name) => Segment::Capture(name.to_string()),
            None => Segment::Literal(part.to_string()),
        })
        .collect()
}
