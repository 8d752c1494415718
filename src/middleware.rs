//! Middleware chains.
//!
//! A [`Layer`] wraps a [`Handler`] into another handler. Middlewares are
//! registered once in a [`MiddlewareManager`] and every route gets its own
//! chain: the middlewares listed for its token in the [`MiddlewareMapper`],
//! or every non-silent middleware when the route is not mapped.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;

use crate::jwt::{self, JwtService};
use crate::response::{self, HttpResponse};
use crate::router::{BoxFuture, Context, Handler};
use crate::session::AuthTokenStore;
use crate::{Error, Result};

/// Wraps a handler into another handler.
pub type Layer = Arc<dyn Fn(Handler) -> Handler + Send + Sync>;

/// A named layer.
#[derive(Clone)]
pub struct Middleware {
    pub token: String,
    pub layer: Layer,
    /// Silent middlewares only run on routes that map them explicitly.
    pub silent: bool,
}

impl std::fmt::Debug for Middleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Middleware")
            .field("token", &self.token)
            .field("silent", &self.silent)
            .finish_non_exhaustive()
    }
}

/// Ordered list of middlewares. The first added is the outermost.
#[derive(Default, Debug)]
pub struct MiddlewareManager {
    middlewares: Vec<Middleware>,
}

impl MiddlewareManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, token: &str, layer: Layer) {
        self.push(token, layer, false);
    }

    pub fn add_silent(&mut self, token: &str, layer: Layer) {
        self.push(token, layer, true);
    }

    fn push(&mut self, token: &str, layer: Layer, silent: bool) {
        self.middlewares.push(Middleware {
            token: token.to_string(),
            layer,
            silent,
        });
    }

    pub(crate) fn into_middlewares(self) -> Vec<Middleware> {
        self.middlewares
    }
}

/// Route token to middleware tokens.
#[derive(Default, Debug, Clone)]
pub struct MiddlewareMapper {
    routes: HashMap<String, Vec<String>>,
}

impl MiddlewareMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run exactly `middlewares`, in this order, for `route_token`
    /// (`group.token`).
    pub fn map<I, S>(&mut self, route_token: &str, middlewares: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.routes.insert(
            route_token.to_string(),
            middlewares.into_iter().map(Into::into).collect(),
        );
    }

    fn get(&self, route_token: &str) -> Option<&[String]> {
        self.routes.get(route_token).map(Vec::as_slice)
    }
}

/// Pick the chain for a route token.
pub(crate) fn select(
    middlewares: &[Middleware],
    mapper: &MiddlewareMapper,
    route_token: &str,
) -> Vec<Middleware> {
    match mapper.get(route_token) {
        Some(tokens) => tokens
            .iter()
            .filter_map(|token| {
                let found = middlewares.iter().find(|m| &m.token == token);
                if found.is_none() {
                    tracing::warn!("Middleware {token} mapped for {route_token} is not registered");
                }
                found.cloned()
            })
            .collect(),
        None => middlewares.iter().filter(|m| !m.silent).cloned().collect(),
    }
}

/// Wrap `handler` so that `chain[0]` runs first.
pub(crate) fn compose(chain: &[Middleware], handler: Handler) -> Handler {
    chain
        .iter()
        .rev()
        .fold(handler, |next, middleware| (middleware.layer)(next))
}

/// Build a layer from an async function receiving the context and the next
/// handler.
///
/// ```ignore
/// let timing = middleware::from_fn(|ctx, next| async move {
///     let started = std::time::Instant::now();
///     let response = next(ctx).await;
///     tracing::info!("took {:?}", started.elapsed());
///     response
/// });
/// ```
pub fn from_fn<F, Fut>(f: F) -> Layer
where
    F: Fn(Context, Handler) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HttpResponse>> + Send + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |next: Handler| -> Handler {
        let f = Arc::clone(&f);
        Arc::new(move |ctx| -> BoxFuture<'static, Result<HttpResponse>> {
            Box::pin((*f)(ctx, Arc::clone(&next)))
        })
    })
}

/// Answer 500 when the rest of the chain panics.
pub fn recover(expose: bool) -> Layer {
    from_fn(move |ctx, next| async move {
        let path = ctx.uri.path().to_string();
        match AssertUnwindSafe(async move { next(ctx).await })
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                tracing::error!("Panic while handling {path}: {msg}");
                if expose {
                    Ok(response::internal_error(&msg))
                } else {
                    Ok(response::internal_error("Internal server error"))
                }
            }
        }
    })
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

const BAD_CONTENT_TYPE: &str =
    "Bad Content-Type or charset, expected 'application/json' and 'UTF-8'.";

/// Reject request bodies that are not UTF-8 JSON.
pub fn json_content_type() -> Layer {
    from_fn(|ctx, next| async move {
        if !ctx.body.is_empty() && !is_json_utf8(ctx.header("content-type").unwrap_or("")) {
            return Err(Error::UnsupportedMediaType(BAD_CONTENT_TYPE.to_string()));
        }
        next(ctx).await
    })
}

fn is_json_utf8(content_type: &str) -> bool {
    let mut parts = content_type.split(';');
    let media_type = parts.next().unwrap_or("").trim();

    let mut charset = "UTF-8";
    for param in parts {
        if let Some((key, value)) = param.split_once('=')
            && key.trim().eq_ignore_ascii_case("charset")
        {
            charset = value.trim().trim_matches('"');
        }
    }

    media_type.eq_ignore_ascii_case("application/json") && charset.eq_ignore_ascii_case("utf-8")
}

/// Put the session cookie token, when present and valid, into the context.
pub fn session_token(store: AuthTokenStore) -> Layer {
    let store = Arc::new(store);
    from_fn(move |mut ctx, next| {
        let store = Arc::clone(&store);
        async move {
            if let Some(token) = store.get(&ctx.headers) {
                crate::token::to_context(&mut ctx, token);
            }
            next(ctx).await
        }
    })
}

/// Require a valid JWT, from the `Authorization` header or the session
/// token, and put its claims into the context.
pub fn jwt_auth(service: Arc<JwtService>) -> Layer {
    from_fn(move |mut ctx, next| {
        let service = Arc::clone(&service);
        async move {
            let raw = match jwt::bearer_token(&ctx.headers) {
                Some(raw) => raw.to_string(),
                None => match crate::token::from_context(&ctx) {
                    Some(token) => token.value.clone(),
                    None => return Err(Error::not_authorized("Missing token.")),
                },
            };
            let claims = service.verify(&raw)?;
            jwt::claims_to_context(&mut ctx, claims);
            next(ctx).await
        }
    })
}
