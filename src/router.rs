//! HTTP routing with matchit.
//!
//! Routes are created with a token (`router.get("list", "/", handler)`) and
//! registered in named groups. The group prefixes both the token and the
//! path: route `list` in group `users` becomes `users.list` at `/users/`.
//! Tokens are what middleware mappings refer to.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use hyper::Method;
use hyper::http::Extensions;
use serde::de::DeserializeOwned;

use crate::config::SharedConfig;
use crate::db::Pool;
use crate::middleware::{Layer, Middleware, MiddlewareManager, MiddlewareMapper};
use crate::response::HttpResponse;
use crate::{Error, Result};

/// Boxed future for async handlers.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Handler context passed to route handlers.
pub struct Context {
    /// The HTTP method.
    pub method: Method,
    /// The request URI.
    pub uri: hyper::Uri,
    /// The request headers.
    pub headers: hyper::http::HeaderMap,
    /// Path parameters, `:id` in the route path.
    pub params: HashMap<String, String>,
    /// The request body, pre-read as bytes.
    pub body: Bytes,
    /// Database pool. Optional for apps that don't need a database.
    pub db: Option<Pool>,
    /// Application configuration.
    pub config: SharedConfig,
    /// Request-scoped values set by middlewares.
    pub extensions: Extensions,
}

impl Context {
    /// Parse the request body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let parsed = if self.body.is_empty() {
            serde_json::from_value(serde_json::Value::Null)
        } else {
            serde_json::from_slice(&self.body)
        };
        parsed.map_err(|e| {
            Error::UnMarshal(format!("It was not possible to decode json. Origin - {e}"))
        })
    }

    /// Get a header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Get a cookie value by name.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        crate::session::cookie_value(&self.headers, name)
    }

    /// Get a query string value by name.
    ///
    /// The first occurrence wins. Keys and values are percent-decoded and
    /// `+` reads as a space.
    pub fn query(&self, name: &str) -> Option<String> {
        form_urlencoded::parse(self.uri.query()?.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// Get a route parameter by name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(|s| s.as_str())
    }

    /// Get a route parameter parsed into `T`.
    pub fn param_as<T: FromStr>(&self, name: &str) -> Option<T> {
        self.param(name).and_then(|v| v.parse().ok())
    }

    /// Get a required route parameter, returning IllegalArgument if missing.
    pub fn require_param(&self, name: &str) -> Result<&str> {
        self.param(name)
            .ok_or_else(|| Error::illegal_argument(format!("Missing parameter: {name}")))
    }

    /// Store a request-scoped value, replacing any previous value of the
    /// same type.
    pub fn insert<T: Clone + Send + Sync + 'static>(&mut self, value: T) {
        self.extensions.insert(value);
    }

    /// Get a request-scoped value.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions.get::<T>()
    }

    /// Get a request-scoped value, returning IllegalState if missing.
    pub fn require<T: Send + Sync + 'static>(&self) -> Result<&T> {
        self.get::<T>().ok_or_else(|| {
            Error::illegal_state(format!(
                "Key {} is not in the context.",
                std::any::type_name::<T>()
            ))
        })
    }

    /// Get the database pool if available.
    pub fn db(&self) -> Option<&Pool> {
        self.db.as_ref()
    }

    /// Require database, returning IllegalState if not configured.
    pub fn require_db(&self) -> Result<&Pool> {
        self.db
            .as_ref()
            .ok_or_else(|| Error::illegal_state("Database not configured"))
    }
}

/// Handler function type.
/// Takes a Context and returns a future resolving to a Response.
pub type Handler = Arc<dyn Fn(Context) -> BoxFuture<'static, Result<HttpResponse>> + Send + Sync>;

/// Box an async function into a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HttpResponse>> + Send + 'static,
{
    Arc::new(move |ctx| -> BoxFuture<'static, Result<HttpResponse>> { Box::pin(f(ctx)) })
}

/// A route waiting to be registered in a group.
#[derive(Clone)]
pub struct Route {
    pub token: String,
    pub method: Method,
    pub path: String,
    pub handler: Handler,
}

impl Route {
    pub fn new<F, Fut>(token: &str, method: Method, path: &str, f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse>> + Send + 'static,
    {
        Self {
            token: token.to_string(),
            method,
            path: path.to_string(),
            handler: handler(f),
        }
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("token", &self.token)
            .field("method", &self.method)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// HTTP router for registering routes and building their middleware chains.
#[derive(Default)]
pub struct Router {
    groups: BTreeMap<String, Vec<Route>>,
    middlewares: Vec<Middleware>,
    middleware_map: MiddlewareMapper,
    error_handler: Option<Layer>,
    debug: bool,
    suppress_errors: bool,
}

macro_rules! route_builders {
    ($($name:ident => $method:ident),* $(,)?) => {
        $(
            #[doc = concat!("Create a route for HTTP ", stringify!($method), ".")]
            pub fn $name<F, Fut>(&self, token: &str, path: &str, f: F) -> Route
            where
                F: Fn(Context) -> Fut + Send + Sync + 'static,
                Fut: Future<Output = Result<HttpResponse>> + Send + 'static,
            {
                Route::new(token, Method::$method, path, f)
            }
        )*
    };
}

impl Router {
    /// Create a new router.
    pub fn new() -> Self {
        Self::default()
    }

    route_builders! {
        get => GET,
        post => POST,
        put => PUT,
        delete => DELETE,
        patch => PATCH,
        options => OPTIONS,
        head => HEAD,
    }

    /// Register routes under `group`.
    ///
    /// The group name must match `^[\w-]+$` and tokens must be unique
    /// within the group.
    pub fn add_routes<I>(&mut self, group: &str, routes: I) -> Result<()>
    where
        I: IntoIterator<Item = Route>,
    {
        if !is_valid_group(group) {
            return Err(Error::illegal_argument(format!(
                "knife: group {group} does not match to the ^[\\w-]+$ regex."
            )));
        }

        let existing = self.groups.entry(group.to_string()).or_default();
        let mut added: Vec<Route> = Vec::new();

        for mut route in routes {
            let token = format!("{group}.{}", route.token);
            if existing.iter().chain(added.iter()).any(|r| r.token == token) {
                return Err(Error::illegal_argument(format!(
                    "knife: many registrations for route '{}' on group '{group}'.",
                    route.token
                )));
            }

            let sep = if route.path.starts_with('/') { "" } else { "/" };
            route.path = format!("/{group}{sep}{}", route.path);
            route.token = token;
            added.push(route);
        }

        existing.extend(added);
        Ok(())
    }

    /// Registered routes, by group.
    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.groups.values().flatten()
    }

    /// Set the global middlewares.
    pub fn set_middlewares(&mut self, manager: MiddlewareManager) {
        self.middlewares = manager.into_middlewares();
    }

    /// Set the per-route middleware selection.
    pub fn set_middleware_map(&mut self, mapper: MiddlewareMapper) {
        self.middleware_map = mapper;
    }

    /// Wrap every route handler before errors are rendered.
    pub fn set_error_handler(&mut self, layer: Layer) {
        self.error_handler = Some(layer);
    }

    /// Debug mode renders error details and stacks into responses.
    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    /// Never render error details, even in debug mode.
    pub fn set_suppress_errors(&mut self, suppress: bool) {
        self.suppress_errors = suppress;
    }

    fn expose_errors(&self) -> bool {
        self.debug && !self.suppress_errors
    }

    /// Build every route's chain and freeze the routing table.
    pub fn start(self) -> Result<Arc<RouterHandle>> {
        let mut table = RouterHandle::default();
        let expose = self.expose_errors();

        for route in self.groups.into_values().flatten() {
            let mut inner = route.handler;
            if let Some(error_handler) = &self.error_handler {
                inner = error_handler(inner);
            }
            let rendered = render(inner, expose);

            let chain = crate::middleware::select(&self.middlewares, &self.middleware_map, &route.token);
            let handler = crate::middleware::compose(&chain, rendered);

            tracing::debug!(
                "Route {} {} {} ({} middlewares)",
                route.token,
                route.method,
                route.path,
                chain.len()
            );
            table.insert(route.method, &route.path, handler)?;
        }

        Ok(Arc::new(table))
    }
}

fn is_valid_group(group: &str) -> bool {
    !group.is_empty()
        && group
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

/// Turn handler errors into responses so middlewares see a response.
fn render(inner: Handler, expose_errors: bool) -> Handler {
    Arc::new(move |ctx| -> BoxFuture<'static, Result<HttpResponse>> {
        let inner = Arc::clone(&inner);
        Box::pin(async move {
            match inner(ctx).await {
                Ok(response) => Ok(response),
                Err(e) if expose_errors => Ok(e.into_debug_response()),
                Err(e) => Ok(e.into_response()),
            }
        })
    })
}

/// Convert `:name` and `*name` segments into matchit's `{name}` syntax.
fn to_matchit_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if let Some(name) = segment.strip_prefix(':') {
                format!("{{{name}}}")
            } else if let Some(name) = segment.strip_prefix('*') {
                format!("{{*{name}}}")
            } else {
                segment.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// A registered path with method-specific handlers.
struct RouteEntry {
    handlers: HashMap<Method, Handler>,
}

/// Thread-safe routing table for use in request handling.
#[derive(Default)]
pub struct RouterHandle {
    routes: matchit::Router<usize>,
    paths: HashMap<String, usize>,
    entries: Vec<RouteEntry>,
}

/// Result of matching a request to a route.
pub enum RouteMatch<'a> {
    /// Route matched with handler.
    Matched {
        handler: &'a Handler,
        params: HashMap<String, String>,
    },
    /// Path matched but method not allowed.
    MethodNotAllowed,
    /// Path not found.
    NotFound,
}

impl RouterHandle {
    fn insert(&mut self, method: Method, path: &str, handler: Handler) -> Result<()> {
        let path = to_matchit_path(path);

        let idx = match self.paths.get(&path) {
            Some(idx) => *idx,
            None => {
                let idx = self.entries.len();
                self.routes
                    .insert(path.clone(), idx)
                    .map_err(|e| Error::illegal_argument(format!("knife: route {path}: {e}")))?;
                self.entries.push(RouteEntry {
                    handlers: HashMap::new(),
                });
                self.paths.insert(path.clone(), idx);
                idx
            }
        };

        if self.entries[idx].handlers.insert(method.clone(), handler).is_some() {
            return Err(Error::illegal_argument(format!(
                "knife: {method} {path} registered twice"
            )));
        }
        Ok(())
    }

    /// Match a request to a route.
    pub fn match_route(&self, method: &Method, path: &str) -> RouteMatch<'_> {
        match self.routes.at(path) {
            Ok(matched) => {
                let entry = &self.entries[*matched.value];

                let params: HashMap<String, String> = matched
                    .params
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect();

                match entry.handlers.get(method) {
                    Some(handler) => RouteMatch::Matched { handler, params },
                    None => RouteMatch::MethodNotAllowed,
                }
            }
            Err(_) => RouteMatch::NotFound,
        }
    }

    /// Methods registered for `path`, for preflight answers.
    pub fn allowed_methods(&self, path: &str) -> Vec<Method> {
        match self.routes.at(path) {
            Ok(matched) => {
                let mut methods: Vec<Method> = self.entries[*matched.value]
                    .handlers
                    .keys()
                    .cloned()
                    .collect();
                methods.sort_by(|a, b| a.as_str().cmp(b.as_str()));
                methods
            }
            Err(_) => Vec::new(),
        }
    }
}
