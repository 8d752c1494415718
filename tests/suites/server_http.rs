//! HTTP server behaviour: status mapping, limits, headers and CORS.

use koala::middleware::{self, MiddlewareManager};
use koala::{Config, Router, response};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{body, get, raw_request, serve, test_config};

/// `/api/ping` (GET), `/api/echo` (POST) and `/api/panic` (GET) behind the
/// recover and JSON content-type middlewares.
fn api_router() -> Router {
    let mut router = Router::new();
    let routes = vec![
        router.get("ping", "/ping", |_ctx| async move {
            response::ok(&serde_json::json!({ "pong": true }))
        }),
        router.post("echo", "/echo", |ctx| async move {
            let input: serde_json::Value = ctx.json()?;
            response::ok(&serde_json::json!({ "echoed": input }))
        }),
        router.get("panic", "/panic", |_ctx| async move {
            panic!("test panic");
        }),
        router.get("board", "/boards/:id", |ctx| async move {
            let id: i64 = ctx
                .param_as("id")
                .ok_or_else(|| koala::Error::illegal_argument("id must be a number"))?;
            response::ok(&serde_json::json!({ "id": id }))
        }),
    ];
    router.add_routes("api", routes).unwrap();

    let mut manager = MiddlewareManager::new();
    manager.add("recover", middleware::recover(false));
    manager.add("json", middleware::json_content_type());
    router.set_middlewares(manager);
    router
}

async fn start() -> koala::server::Server {
    serve(test_config(), api_router()).await
}

async fn start_with(config: Config) -> koala::server::Server {
    serve(config, api_router()).await
}

#[tokio::test]
async fn serves_grouped_route() {
    let server = start().await;
    let response = get(server.addr(), "/api/ping", &[]).await;
    server.shutdown().await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert_eq!(body(&response), r#"{"pong":true}"#);
}

#[tokio::test]
async fn path_params_reach_handler() {
    let server = start().await;
    let ok = get(server.addr(), "/api/boards/42", &[]).await;
    let bad = get(server.addr(), "/api/boards/abc", &[]).await;
    server.shutdown().await.unwrap();

    assert_eq!(body(&ok), r#"{"id":42}"#);
    assert!(bad.starts_with("HTTP/1.1 400"), "{bad}");
    assert!(body(&bad).contains("id must be a number"), "{bad}");
}

#[tokio::test]
async fn unknown_path_is_json_404() {
    let server = start().await;
    let response = get(server.addr(), "/nope", &[]).await;
    server.shutdown().await.unwrap();

    assert!(response.starts_with("HTTP/1.1 404"), "{response}");
    assert_eq!(body(&response), r#"{"errors":["Not found"]}"#);
}

#[tokio::test]
async fn wrong_method_is_405() {
    let server = start().await;
    let response = raw_request(
        server.addr(),
        b"DELETE /api/ping HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    server.shutdown().await.unwrap();

    assert!(response.starts_with("HTTP/1.1 405"), "{response}");
    assert_eq!(body(&response), r#"{"errors":["Method not allowed"]}"#);
}

#[tokio::test]
async fn echoes_json_body() {
    let server = start().await;
    let response = raw_request(
        server.addr(),
        b"POST /api/echo HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json; charset=utf-8\r\nContent-Length: 14\r\nConnection: close\r\n\r\n{\"hello\":true}",
    )
    .await;
    server.shutdown().await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert_eq!(body(&response), r#"{"echoed":{"hello":true}}"#);
}

#[tokio::test]
async fn malformed_json_is_400() {
    let server = start().await;
    let response = raw_request(
        server.addr(),
        b"POST /api/echo HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: 7\r\nConnection: close\r\n\r\n{\"hello",
    )
    .await;
    server.shutdown().await.unwrap();

    assert!(response.starts_with("HTTP/1.1 400"), "{response}");
    assert!(
        body(&response).contains("It was not possible to decode json."),
        "{response}"
    );
}

#[tokio::test]
async fn rejects_wrong_content_type() {
    let server = start().await;
    let response = raw_request(
        server.addr(),
        b"POST /api/echo HTTP/1.1\r\nHost: localhost\r\nContent-Type: text/plain\r\nContent-Length: 14\r\nConnection: close\r\n\r\n{\"hello\":true}",
    )
    .await;
    server.shutdown().await.unwrap();

    assert!(response.starts_with("HTTP/1.1 415"), "{response}");
    assert!(body(&response).contains("expected 'application/json'"), "{response}");
}

#[tokio::test]
async fn rejects_oversized_body() {
    let server = start().await;
    let response = raw_request(
        server.addr(),
        b"POST /api/echo HTTP/1.1\r\nHost: localhost\r\nContent-Length: 10485760\r\nConnection: close\r\n\r\n",
    )
    .await;
    server.shutdown().await.unwrap();

    assert!(response.starts_with("HTTP/1.1 413"), "{response}");
}

#[tokio::test]
async fn panic_becomes_500() {
    let server = start().await;
    let response = get(server.addr(), "/api/panic", &[]).await;
    server.shutdown().await.unwrap();

    assert!(response.starts_with("HTTP/1.1 500"), "{response}");
    assert!(!body(&response).contains("test panic"), "{response}");
}

#[tokio::test]
async fn returns_security_headers() {
    let server = start().await;
    let response = get(server.addr(), "/api/ping", &[]).await;
    server.shutdown().await.unwrap();

    let lower = response.to_ascii_lowercase();
    assert!(lower.contains("x-content-type-options: nosniff"), "{response}");
    assert!(lower.contains("x-frame-options: deny"), "{response}");
}

#[tokio::test]
async fn omits_cors_headers_by_default() {
    let server = start().await;
    let response = get(server.addr(), "/api/ping", &["Origin: http://evil.com"]).await;
    server.shutdown().await.unwrap();

    assert!(
        !response
            .to_ascii_lowercase()
            .contains("access-control-allow-origin"),
        "{response}"
    );
}

#[tokio::test]
async fn echoes_origin_when_cors_enabled() {
    let mut config = test_config();
    config.cors = true;
    let server = start_with(config).await;
    let response = get(server.addr(), "/api/ping", &["Origin: http://app.com"]).await;
    server.shutdown().await.unwrap();

    let lower = response.to_ascii_lowercase();
    assert!(
        lower.contains("access-control-allow-origin: http://app.com"),
        "{response}"
    );
    assert!(
        lower.contains("access-control-allow-credentials: true"),
        "{response}"
    );
}

#[tokio::test]
async fn answers_preflight() {
    let mut config = test_config();
    config.cors = true;
    let server = start_with(config).await;
    let response = raw_request(
        server.addr(),
        b"OPTIONS /api/echo HTTP/1.1\r\nHost: localhost\r\nOrigin: http://app.com\r\nAccess-Control-Request-Method: POST\r\nConnection: close\r\n\r\n",
    )
    .await;
    server.shutdown().await.unwrap();

    assert!(response.starts_with("HTTP/1.1 204"), "{response}");
    let lower = response.to_ascii_lowercase();
    assert!(
        lower.contains("access-control-allow-methods: post, options"),
        "{response}"
    );
    assert!(lower.contains("access-control-allow-origin"), "{response}");
}

#[tokio::test]
async fn closes_slow_connections() {
    let server = start().await;

    // Partial headers, no terminator
    let mut stream = TcpStream::connect(server.addr()).await.unwrap();
    stream
        .write_all(b"GET /api/ping HTTP/1.1\r\nHost: localhost\r\n")
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_secs(3)).await;

    let mut buf = vec![0u8; 4096];
    let result =
        tokio::time::timeout(std::time::Duration::from_secs(2), stream.read(&mut buf)).await;
    server.shutdown().await.unwrap();

    match result {
        Ok(Ok(0)) | Ok(Err(_)) => {}
        Ok(Ok(n)) => {
            let resp = String::from_utf8_lossy(&buf[..n]);
            assert!(resp.contains("408"), "Expected close or 408, got:\n{resp}");
        }
        Err(_) => panic!("Server did not close the slow connection"),
    }
}

#[tokio::test]
async fn rejects_excess_connections() {
    let server = start().await;
    let addr = server.addr();

    let mut streams = Vec::new();
    let mut refused = 0usize;
    for _ in 0..200 {
        match TcpStream::connect(addr).await {
            Ok(s) => streams.push(s),
            Err(_) => refused += 1,
        }
    }

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let mut unavailable = 0usize;
    for mut stream in streams {
        let req = b"GET /api/ping HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n";
        if stream.write_all(req).await.is_ok() {
            let mut buf = vec![0u8; 4096];
            if let Ok(Ok(n)) =
                tokio::time::timeout(std::time::Duration::from_secs(5), stream.read(&mut buf)).await
                && String::from_utf8_lossy(&buf[..n]).contains("503")
            {
                unavailable += 1;
            }
        }
    }
    server.shutdown().await.unwrap();

    assert!(
        refused + unavailable > 0,
        "Expected at least one refused connection or 503"
    );
}
