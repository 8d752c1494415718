//! Error information disclosure.
//!
//! Server errors carry implementation details (SQL fragments, file paths).
//! They reach clients only in debug mode, and never when errors are
//! suppressed.

use http_body_util::BodyExt;
use koala::{Config, Error, Router, validate};

use super::{body, get, serve, test_config};

fn response_body(resp: koala::response::HttpResponse) -> String {
    let bytes = tokio_test::block_on(resp.into_body().collect())
        .unwrap()
        .to_bytes();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn failing_router() -> Router {
    let mut router = Router::new();
    let routes = vec![
        router.get("query", "/query", |_ctx| async move {
            Err::<koala::response::HttpResponse, _>(Error::database(
                "Failed to query SELECT * FROM users WHERE id = 'x'",
            ))
        }),
        router.post("signup", "/signup", |_ctx| async move {
            validate::check([
                validate::not_zero_string(""),
                validate::is_email("nope"),
            ])?;
            Ok(koala::response::no_content())
        }),
    ];
    router.add_routes("fail", routes).unwrap();
    router
}

async fn query_with(config: Config) -> String {
    let server = serve(config, failing_router()).await;
    let response = get(server.addr(), "/fail/query", &[]).await;
    server.shutdown().await.unwrap();
    response
}

#[test]
fn database_error_hides_sql() {
    let err = Error::database("Failed to query SELECT * FROM users WHERE id = 'x'");
    let body = response_body(err.into_response());
    assert!(!body.contains("SELECT"), "SQL fragment leaked: {body}");
    assert_eq!(body, r#"{"errors":["Internal server error"]}"#);
}

#[test]
fn io_error_hides_paths() {
    let err = Error::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        "No such file: /etc/secret/config.yml",
    ));
    let body = response_body(err.into_response());
    assert!(!body.contains("/etc/secret"), "Path leaked: {body}");
}

#[test]
fn client_errors_keep_their_message() {
    let body = response_body(Error::not_found("Board not found.").into_response());
    assert_eq!(body, r#"{"errors":["Board not found."]}"#);
}

#[tokio::test]
async fn server_errors_are_generic_by_default() {
    let response = query_with(test_config()).await;
    assert!(response.starts_with("HTTP/1.1 500"), "{response}");
    assert_eq!(body(&response), r#"{"errors":["Internal server error"]}"#);
}

#[tokio::test]
async fn debug_mode_exposes_details() {
    let mut config = test_config();
    config.debug = true;
    let response = query_with(config).await;
    assert!(response.starts_with("HTTP/1.1 500"), "{response}");
    assert!(body(&response).contains("SELECT * FROM users"), "{response}");
}

#[tokio::test]
async fn suppress_errors_wins_over_debug() {
    let mut config = test_config();
    config.debug = true;
    config.server.suppress_errors = true;
    let response = query_with(config).await;
    assert!(!response.contains("SELECT"), "{response}");
    assert_eq!(body(&response), r#"{"errors":["Internal server error"]}"#);
}

#[tokio::test]
async fn validation_errors_list_every_failure() {
    let server = serve(test_config(), failing_router()).await;
    let response = super::raw_request(
        server.addr(),
        b"POST /fail/signup HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
    )
    .await;
    server.shutdown().await.unwrap();

    assert!(response.starts_with("HTTP/1.1 400"), "{response}");
    assert_eq!(
        body(&response),
        r#"{"errors":["Non zero string required.","nope does not validate as email."]}"#
    );
}
