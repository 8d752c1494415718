//! HTTP/1 and HTTP/2 server on hyper.
//!
//! Every response gets `nosniff` and `DENY` framing headers. With `cors`
//! enabled, the request origin is echoed back and preflights are answered
//! from the routing table.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Limited};
use hyper::body::Incoming;
use hyper::header::{self, HeaderValue};
use hyper::http::HeaderMap;
use hyper::service::service_fn;
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SharedConfig;
use crate::db::Pool;
use crate::response::{self, HttpResponse};
use crate::router::{Context, RouteMatch, RouterHandle};

/// Largest accepted request body, 1 MiB.
const MAX_BODY_SIZE: usize = 1 << 20;

/// Open connections beyond this are answered with 503.
const MAX_CONNECTIONS: usize = 128;

/// Connections that have not sent full headers by then are closed.
const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(2);

const CORS_ALLOW_HEADERS: &str = "Accept, Authorization, Content-Type, Origin, X-Requested-With";

/// Shared server state.
pub struct State {
    pub config: SharedConfig,
    pub db: Option<Pool>,
    pub router: Arc<RouterHandle>,
}

/// A running server.
#[derive(Debug)]
pub struct Server {
    addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<crate::Result<()>>,
}

impl Server {
    /// Bound address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections. Open connections finish on their own.
    pub async fn shutdown(self) -> crate::Result<()> {
        let Server { shutdown_tx, task, .. } = self;
        let _ = shutdown_tx.send(());
        join(task).await
    }

    /// Wait until the accept loop stops.
    pub async fn wait(self) -> crate::Result<()> {
        join(self.task).await
    }
}

async fn join(task: JoinHandle<crate::Result<()>>) -> crate::Result<()> {
    match task.await {
        Ok(result) => result,
        Err(e) => Err(crate::Error::Internal(format!("Server task failed: {e}"))),
    }
}

/// Add security headers, and CORS headers when enabled.
fn add_standard_headers(response: &mut HttpResponse, cors: bool, origin: Option<&str>) {
    let headers = response.headers_mut();
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));

    if !cors {
        return;
    }
    if let Some(origin) = origin.and_then(|o| HeaderValue::from_str(o).ok()) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
        headers.append(header::VARY, HeaderValue::from_static("Origin"));
    }
}

/// Answer a CORS preflight for a known path.
fn preflight(router: &RouterHandle, path: &str) -> Option<HttpResponse> {
    let methods = router.allowed_methods(path);
    if methods.is_empty() {
        return None;
    }
    let allow = methods
        .iter()
        .map(Method::as_str)
        .chain(std::iter::once("OPTIONS"))
        .collect::<Vec<_>>()
        .join(", ");

    let mut response = response::no_content();
    let headers = response.headers_mut();
    if let Ok(allow) = HeaderValue::from_str(&allow) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, allow);
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(CORS_ALLOW_HEADERS),
    );
    headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("600"));
    Some(response)
}

/// Collect the body, answering 413 past [`MAX_BODY_SIZE`].
async fn read_body(headers: &HeaderMap, body: Incoming) -> Result<Bytes, HttpResponse> {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    let too_large = || response::error(StatusCode::PAYLOAD_TOO_LARGE, "Payload too large");

    // Declared lengths are refused before reading anything
    if declared.is_some_and(|len| len > MAX_BODY_SIZE) {
        return Err(too_large());
    }
    match Limited::new(body, MAX_BODY_SIZE).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(_) => Err(too_large()),
    }
}

async fn dispatch(req: Request<Incoming>, state: Arc<State>) -> HttpResponse {
    let (parts, body) = req.into_parts();

    let body = match read_body(&parts.headers, body).await {
        Ok(body) => body,
        Err(response) => return response,
    };

    if state.config.cors
        && parts.method == Method::OPTIONS
        && parts.headers.contains_key(header::ACCESS_CONTROL_REQUEST_METHOD)
        && let Some(response) = preflight(&state.router, parts.uri.path())
    {
        return response;
    }

    match state.router.match_route(&parts.method, parts.uri.path()) {
        RouteMatch::Matched { handler, params } => {
            let ctx = Context {
                method: parts.method,
                uri: parts.uri,
                headers: parts.headers,
                params,
                body,
                db: state.db.clone(),
                config: Arc::clone(&state.config),
                extensions: parts.extensions,
            };

            // Route errors are rendered in the chain; these come from middlewares
            match handler(ctx).await {
                Ok(response) => response,
                Err(e) if state.config.expose_errors() => e.into_debug_response(),
                Err(e) => e.into_response(),
            }
        }
        RouteMatch::MethodNotAllowed => {
            response::error(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
        }
        RouteMatch::NotFound => response::not_found("Not found"),
    }
}

async fn handle_request(
    req: Request<Incoming>,
    state: Arc<State>,
) -> Result<HttpResponse, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let cors = state.config.cors;

    let mut response = dispatch(req, state).await;

    debug!("{method} {path} {}", response.status().as_u16());
    add_standard_headers(&mut response, cors, origin.as_deref());
    Ok(response)
}

fn connection_builder() -> auto::Builder<TokioExecutor> {
    let mut builder = auto::Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(HEADER_READ_TIMEOUT);
    builder
}

/// Serve one connection, holding its slot until it closes.
async fn serve(stream: TcpStream, remote: SocketAddr, state: Arc<State>, slot: OwnedSemaphorePermit) {
    let service = service_fn(move |req| handle_request(req, Arc::clone(&state)));
    if let Err(e) = connection_builder()
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        debug!("Connection from {remote} ended: {e}");
    }
    drop(slot);
}

/// Answer every request on the connection with 503.
async fn refuse(stream: TcpStream) {
    let service = service_fn(|_req: Request<Incoming>| async {
        Ok::<_, Infallible>(response::error(
            StatusCode::SERVICE_UNAVAILABLE,
            "Service unavailable",
        ))
    });
    let _ = connection_builder()
        .serve_connection(TokioIo::new(stream), service)
        .await;
}

async fn accept_loop(
    listener: TcpListener,
    state: Arc<State>,
    mut shutdown: oneshot::Receiver<()>,
) -> crate::Result<()> {
    let addr = listener.local_addr()?;
    let slots = Arc::new(Semaphore::new(MAX_CONNECTIONS));

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, remote) = accepted?;
                match Arc::clone(&slots).try_acquire_owned() {
                    Ok(slot) => {
                        tokio::spawn(serve(stream, remote, Arc::clone(&state), slot));
                    }
                    Err(_) => {
                        warn!("Too many connections, refusing {remote}");
                        tokio::spawn(refuse(stream));
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Stopping server on {addr}");
                return Ok(());
            }
        }
    }
}

/// Bind and start accepting connections in the background.
///
/// Port 0 binds a random port; [`Server::addr`] reports the real one.
pub async fn start(
    config: SharedConfig,
    db: Option<Pool>,
    router: Arc<RouterHandle>,
) -> crate::Result<Server> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    let addr = listener.local_addr()?;
    info!("Listening on http://{addr}");

    let state = Arc::new(State { config, db, router });
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(accept_loop(listener, state, shutdown_rx));

    Ok(Server {
        addr,
        shutdown_tx,
        task,
    })
}

/// Serve until the accept loop stops.
pub async fn run(
    config: SharedConfig,
    db: Option<Pool>,
    router: Arc<RouterHandle>,
) -> crate::Result<()> {
    start(config, db, router).await?.wait().await
}
