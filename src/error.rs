//! Error types with HTTP status code mapping.
//!
//! Domain errors carry a [`Fault`]: the message plus the stack trace captured
//! where the error was created (only when `RUST_BACKTRACE` enables capture).

use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};

use crate::response::ErrorMessage;
use crate::validate::ArgumentError;

/// Message and optional stack trace of a domain error.
#[derive(Debug, Clone)]
pub struct Fault {
    msg: String,
    stack: Option<String>,
}

impl Fault {
    pub fn new(msg: impl Into<String>) -> Self {
        let trace = Backtrace::capture();
        let stack = match trace.status() {
            BacktraceStatus::Captured => Some(trace.to_string()),
            _ => None,
        };
        Self {
            msg: msg.into(),
            stack,
        }
    }

    pub fn message(&self) -> &str {
        &self.msg
    }

    /// The stack trace without the message, if one was captured.
    pub fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.msg)
    }
}

/// Error type for koala operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Domain errors
    #[error("{0}")]
    NotFound(Fault),

    #[error("{0}")]
    IllegalState(Fault),

    #[error("{0}")]
    IllegalArgument(Fault),

    #[error("{0}")]
    NotAuthorized(Fault),

    #[error("{0}")]
    UsernameNotFound(Fault),

    #[error("{0}")]
    UsernameExists(Fault),

    #[error("{0}")]
    Relationship(Fault),

    #[error("{0}")]
    Database(Fault),

    #[error("Validation failed: {}", join_messages(.0))]
    Validation(Vec<ArgumentError>),

    // Request errors
    #[error("{0}")]
    UnMarshal(String),

    #[error("{0}")]
    UnsupportedMediaType(String),

    // Config errors
    #[error("Configuration error: {0}")]
    Config(String),

    // System errors
    #[error("Invalid address: {0}")]
    AddrParse(#[from] std::net::AddrParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn join_messages(errors: &[ArgumentError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

impl From<libsql::Error> for Error {
    fn from(e: libsql::Error) -> Self {
        Error::database(format!("Database Error - {e}"))
    }
}

impl From<ArgumentError> for Error {
    fn from(e: ArgumentError) -> Self {
        Error::IllegalArgument(e.into_fault())
    }
}

impl Error {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(Fault::new(msg))
    }

    pub fn illegal_state(msg: impl Into<String>) -> Self {
        Error::IllegalState(Fault::new(msg))
    }

    pub fn illegal_argument(msg: impl Into<String>) -> Self {
        Error::IllegalArgument(Fault::new(msg))
    }

    pub fn not_authorized(msg: impl Into<String>) -> Self {
        Error::NotAuthorized(Fault::new(msg))
    }

    pub fn username_not_found(msg: impl Into<String>) -> Self {
        Error::UsernameNotFound(Fault::new(msg))
    }

    pub fn username_exists(msg: impl Into<String>) -> Self {
        Error::UsernameExists(Fault::new(msg))
    }

    pub fn relationship(msg: impl Into<String>) -> Self {
        Error::Relationship(Fault::new(msg))
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Error::Database(Fault::new(msg))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_illegal_state(&self) -> bool {
        matches!(self, Error::IllegalState(_))
    }

    pub fn is_illegal_argument(&self) -> bool {
        matches!(self, Error::IllegalArgument(_))
    }

    pub fn is_not_authorized(&self) -> bool {
        matches!(self, Error::NotAuthorized(_))
    }

    pub fn is_username_not_found(&self) -> bool {
        matches!(self, Error::UsernameNotFound(_))
    }

    pub fn is_username_exists(&self) -> bool {
        matches!(self, Error::UsernameExists(_))
    }

    pub fn is_relationship(&self) -> bool {
        matches!(self, Error::Relationship(_))
    }

    pub fn is_database(&self) -> bool {
        matches!(self, Error::Database(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    pub fn is_unmarshal(&self) -> bool {
        matches!(self, Error::UnMarshal(_))
    }

    /// The fault behind a domain error, if this is one.
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            Error::NotFound(f)
            | Error::IllegalState(f)
            | Error::IllegalArgument(f)
            | Error::NotAuthorized(f)
            | Error::UsernameNotFound(f)
            | Error::UsernameExists(f)
            | Error::Relationship(f)
            | Error::Database(f) => Some(f),
            _ => None,
        }
    }

    /// Stack trace captured when the error was created.
    pub fn stack(&self) -> Option<&str> {
        self.fault().and_then(Fault::stack)
    }

    /// Map error to HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            // Auth errors -> 401
            Error::NotAuthorized(_) | Error::UsernameNotFound(_) => StatusCode::UNAUTHORIZED,

            // Data errors -> 4xx
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::IllegalArgument(_)
            | Error::Validation(_)
            | Error::UnMarshal(_)
            | Error::AddrParse(_) => StatusCode::BAD_REQUEST,
            Error::UsernameExists(_) | Error::Relationship(_) => StatusCode::CONFLICT,
            Error::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,

            // System errors -> 500
            Error::IllegalState(_)
            | Error::Database(_)
            | Error::Config(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::Yaml(_)
            | Error::Toml(_)
            | Error::Jwt(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn messages(&self) -> Vec<String> {
        match self {
            Error::Validation(errors) => errors.iter().map(|e| e.to_string()).collect(),
            _ => vec![self.to_string()],
        }
    }

    /// Convert error into HTTP response.
    ///
    /// Server errors are logged and answered with a generic message.
    pub fn into_response(self) -> Response<Full<Bytes>> {
        let status = self.status_code();
        let message = if status.is_server_error() {
            tracing::error!("Internal error: {self}");
            ErrorMessage::new(["Internal server error"])
        } else {
            ErrorMessage::from(self.messages())
        };
        render(status, &message)
    }

    /// Convert error into HTTP response, exposing server error details and
    /// the captured stack.
    pub fn into_debug_response(self) -> Response<Full<Bytes>> {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Internal error: {self}");
        }
        let mut messages = self.messages();
        if let Some(stack) = self.stack() {
            messages.push(stack.to_string());
        }
        render(status, &ErrorMessage::from(messages))
    }
}

fn render(status: StatusCode, message: &ErrorMessage) -> Response<Full<Bytes>> {
    let body = serde_json::to_string(message).unwrap_or_else(|_| r#"{"errors":[]}"#.into());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

/// Result type alias using koala's Error.
pub type Result<T> = std::result::Result<T, Error>;
