//! Cookie sessions carried across requests.

use koala::session::{CookieOptions, CookieStore, Session};
use koala::{Router, response};

use super::{body, get, serve, test_config};

fn visits_router() -> Router {
    let store = CookieStore::from_config(&test_config().session).unwrap();
    let session = Session::new("visits", store, CookieOptions::default());

    let mut router = Router::new();
    let count_session = session.clone();
    let routes = vec![
        router.get("count", "/", move |ctx| {
            let session = count_session.clone();
            async move {
                let mut values = session.get(&ctx.headers)?;
                let count = values.get("count").and_then(|v| v.as_i64()).unwrap_or(0) + 1;
                values.insert("count".into(), count.into());

                let mut resp = response::ok(&serde_json::json!({ "count": count }))?;
                session.save(&mut resp, &values)?;
                Ok(resp)
            }
        }),
        router.get("reset", "/reset", move |_ctx| {
            let session = session.clone();
            async move {
                let mut resp = response::no_content();
                session.clear(&mut resp)?;
                Ok(resp)
            }
        }),
    ];
    router.add_routes("visits", routes).unwrap();
    router
}

fn cookie_of(response: &str) -> String {
    response
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("set-cookie")
                .then(|| value.trim().split(';').next().unwrap_or("").to_string())
        })
        .expect("no Set-Cookie header")
}

#[tokio::test]
async fn values_survive_between_requests() {
    let server = serve(test_config(), visits_router()).await;
    let first = get(server.addr(), "/visits/", &[]).await;
    let header = format!("Cookie: {}", cookie_of(&first));
    let second = get(server.addr(), "/visits/", &[&header]).await;
    server.shutdown().await.unwrap();

    assert_eq!(body(&first), r#"{"count":1}"#);
    assert_eq!(body(&second), r#"{"count":2}"#);
}

#[tokio::test]
async fn forged_session_is_401() {
    let server = serve(test_config(), visits_router()).await;
    let response = get(server.addr(), "/visits/", &["Cookie: visits=1.eyJjb3VudCI6OTl9.bad"]).await;
    server.shutdown().await.unwrap();

    assert!(response.starts_with("HTTP/1.1 401"), "{response}");
    assert_eq!(body(&response), r#"{"errors":["Invalid session cookie."]}"#);
}

#[tokio::test]
async fn reset_expires_cookie() {
    let server = serve(test_config(), visits_router()).await;
    let response = get(server.addr(), "/visits/reset", &[]).await;
    server.shutdown().await.unwrap();

    assert!(response.starts_with("HTTP/1.1 204"), "{response}");
    assert_eq!(cookie_of(&response), "visits=");
    assert!(response.contains("Max-Age=0"), "{response}");
}
