use std::net::SocketAddr;

use koala::server::{self, Server};
use koala::{Config, Router};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

mod config;
mod db;
mod error_disclosure;
mod server_http;
mod session;

pub const JWT_SECRET: &str = "test-secret-that-is-at-least-32b!";
pub const SESSION_SECRET: &str = "session-secret-at-least-32-bytes!";

/// Config listening on a random local port.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    config.jwt.secret = JWT_SECRET.to_string();
    config.session.secret = SESSION_SECRET.to_string();
    config
}

/// Build `router` with the config's error settings and start serving it.
pub async fn serve(config: Config, mut router: Router) -> Server {
    router.set_debug(config.debug);
    router.set_suppress_errors(config.server.suppress_errors);
    let handle = router.start().expect("failed to build routes");
    server::start(std::sync::Arc::new(config), None, handle)
        .await
        .expect("failed to start test server")
}

/// Send a raw HTTP/1.1 request with `Connection: close` and read the full response.
pub async fn raw_request(addr: SocketAddr, payload: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.expect("failed to connect");
    stream.write_all(payload).await.expect("failed to write");

    let mut buf = Vec::new();
    let _ = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        stream.read_to_end(&mut buf),
    )
    .await;
    String::from_utf8_lossy(&buf).into_owned()
}

/// `GET path` with extra header lines.
pub async fn get(addr: SocketAddr, path: &str, headers: &[&str]) -> String {
    let mut req = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n");
    for header in headers {
        req.push_str(header);
        req.push_str("\r\n");
    }
    req.push_str("Connection: close\r\n\r\n");
    raw_request(addr, req.as_bytes()).await
}

/// Response body, after the blank line.
pub fn body(response: &str) -> &str {
    response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body)
        .unwrap_or("")
}
