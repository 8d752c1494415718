//! Response builders.
//!
//! Errors always use the `{"errors": [...]}` body of [`ErrorMessage`].

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{CONTENT_TYPE, HeaderValue, LOCATION};
use hyper::{Response, StatusCode};
use serde::{Deserialize, Serialize};

pub type Body = Full<Bytes>;

/// Response produced by handlers and middlewares.
pub type HttpResponse = Response<Body>;

/// Structured error body: `{"errors": ["..."]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    #[serde(rename = "errors")]
    pub messages: Vec<String>,
}

impl ErrorMessage {
    pub fn new<I, S>(messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            messages: messages.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<Vec<String>> for ErrorMessage {
    fn from(messages: Vec<String>) -> Self {
        Self { messages }
    }
}

const JSON: &str = "application/json";

fn with_body(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> HttpResponse {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, content_type)
        .body(Full::new(body.into()))
        .unwrap()
}

/// Serialize `body` as the JSON response.
pub fn json<T: Serialize>(status: StatusCode, body: &T) -> crate::Result<HttpResponse> {
    Ok(with_body(status, JSON, serde_json::to_vec(body)?))
}

/// 200 with a JSON body.
pub fn ok<T: Serialize>(body: &T) -> crate::Result<HttpResponse> {
    json(StatusCode::OK, body)
}

/// 201 with a JSON body.
pub fn created<T: Serialize>(body: &T) -> crate::Result<HttpResponse> {
    json(StatusCode::CREATED, body)
}

pub fn no_content() -> HttpResponse {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .body(Full::default())
        .unwrap()
}

/// `{"errors": [message]}` with `status`.
pub fn error(status: StatusCode, message: &str) -> HttpResponse {
    let body = ErrorMessage::new([message]);
    let bytes = serde_json::to_vec(&body).unwrap_or_else(|_| br#"{"errors":[]}"#.to_vec());
    with_body(status, JSON, bytes)
}

pub fn not_found(message: &str) -> HttpResponse {
    error(StatusCode::NOT_FOUND, message)
}

pub fn bad_request(message: &str) -> HttpResponse {
    error(StatusCode::BAD_REQUEST, message)
}

pub fn unauthorized() -> HttpResponse {
    error(StatusCode::UNAUTHORIZED, "Unauthorized")
}

pub fn internal_error(message: &str) -> HttpResponse {
    error(StatusCode::INTERNAL_SERVER_ERROR, message)
}

pub fn text(status: StatusCode, body: impl Into<String>) -> HttpResponse {
    let body: String = body.into();
    with_body(status, "text/plain; charset=utf-8", body)
}

pub fn html(status: StatusCode, body: impl Into<String>) -> HttpResponse {
    let body: String = body.into();
    with_body(status, "text/html; charset=utf-8", body)
}

/// 307 to `location`, which must be a valid header value.
pub fn redirect(location: &str) -> crate::Result<HttpResponse> {
    let location = HeaderValue::from_str(location).map_err(|_| {
        crate::Error::illegal_argument(format!("Invalid redirect location: {location}"))
    })?;
    Ok(Response::builder()
        .status(StatusCode::TEMPORARY_REDIRECT)
        .header(LOCATION, location)
        .body(Full::default())
        .unwrap())
}
