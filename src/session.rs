//! Signed cookie sessions.
//!
//! Session values are a JSON map stored client-side. The cookie value is
//! `timestamp.payload.signature`, where the signature is an HMAC-SHA256 over
//! the cookie name, the timestamp and the payload, so a value cannot be moved
//! to another cookie or replayed after it expires.

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use hyper::header::{COOKIE, HeaderValue, SET_COOKIE};
use hyper::http::HeaderMap;
use sha2::Sha256;

use crate::config::Session as SessionConfig;
use crate::response::HttpResponse;
use crate::token::Token;
use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

const MIN_SECRET_LENGTH: usize = 32;

/// Name of the cookie holding the auth token.
pub const AUTH_COOKIE: &str = "sid";

const TOKEN_KEY: &str = "token";

/// Values carried by a session.
pub type Values = serde_json::Map<String, serde_json::Value>;

/// Signs and verifies cookie values.
#[derive(Clone)]
pub struct CookieStore {
    secret: Arc<[u8]>,
    max_age: i64,
}

impl std::fmt::Debug for CookieStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieStore")
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

impl CookieStore {
    /// Create a store with a secret of at least 32 bytes. Values older than
    /// 30 days are rejected.
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self> {
        let secret = secret.as_ref();
        if secret.len() < MIN_SECRET_LENGTH {
            return Err(Error::Config(format!(
                "Session secret must be at least {MIN_SECRET_LENGTH} bytes"
            )));
        }
        Ok(Self {
            secret: Arc::from(secret),
            max_age: 86400 * 30,
        })
    }

    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        Ok(Self::new(&config.secret)?.with_max_age(config.max_age))
    }

    /// Seconds a signed value stays valid. Zero or less disables the check.
    pub fn with_max_age(mut self, seconds: i64) -> Self {
        self.max_age = seconds;
        self
    }

    /// Sign `values` for the cookie `name`.
    pub fn encode(&self, name: &str, values: &Values) -> Result<String> {
        let timestamp = jiff::Timestamp::now().as_second();
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(values)?);
        let signature = URL_SAFE_NO_PAD.encode(self.sign(name, timestamp, &payload)?);
        Ok(format!("{timestamp}.{payload}.{signature}"))
    }

    /// Verify and decode a value signed for the cookie `name`.
    pub fn decode(&self, name: &str, value: &str) -> Result<Values> {
        let invalid = || Error::not_authorized("Invalid session cookie.");

        let mut parts = value.splitn(3, '.');
        let (Some(timestamp), Some(payload), Some(signature)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        let timestamp: i64 = timestamp.parse().map_err(|_| invalid())?;
        let signature = URL_SAFE_NO_PAD.decode(signature).map_err(|_| invalid())?;

        let mut mac = self.mac()?;
        mac.update(signing_input(name, timestamp, payload).as_bytes());
        mac.verify_slice(&signature).map_err(|_| invalid())?;

        if self.max_age > 0 && jiff::Timestamp::now().as_second() - timestamp > self.max_age {
            return Err(Error::not_authorized("Session cookie expired."));
        }

        let payload = URL_SAFE_NO_PAD.decode(payload).map_err(|_| invalid())?;
        serde_json::from_slice(&payload).map_err(|_| invalid())
    }

    fn sign(&self, name: &str, timestamp: i64, payload: &str) -> Result<Vec<u8>> {
        let mut mac = self.mac()?;
        mac.update(signing_input(name, timestamp, payload).as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| Error::Internal(format!("Session key: {e}")))
    }
}

fn signing_input(name: &str, timestamp: i64, payload: &str) -> String {
    format!("{name}|{timestamp}|{payload}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

/// Attributes rendered into `Set-Cookie`.
#[derive(Debug, Clone)]
pub struct CookieOptions {
    pub path: String,
    pub domain: Option<String>,
    /// Seconds. Zero or less deletes the cookie.
    pub max_age: i64,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            domain: None,
            max_age: 86400 * 7,
            secure: false,
            http_only: true,
            same_site: Some(SameSite::Lax),
        }
    }
}

impl CookieOptions {
    /// Render a `Set-Cookie` header value.
    pub fn format_set_cookie(&self, name: &str, value: &str) -> String {
        let mut cookie = format!("{name}={value}; Path={}", self.path);
        if let Some(domain) = &self.domain {
            cookie.push_str(&format!("; Domain={domain}"));
        }
        cookie.push_str(&format!("; Max-Age={}", self.max_age.max(0)));
        if self.http_only {
            cookie.push_str("; HttpOnly");
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        match self.same_site {
            Some(SameSite::Strict) => cookie.push_str("; SameSite=Strict"),
            Some(SameSite::Lax) => cookie.push_str("; SameSite=Lax"),
            Some(SameSite::None) => cookie.push_str("; SameSite=None"),
            None => {}
        }
        cookie
    }
}

/// A named cookie session.
#[derive(Debug, Clone)]
pub struct Session {
    name: String,
    store: CookieStore,
    options: CookieOptions,
}

impl Session {
    pub fn new(name: impl Into<String>, store: CookieStore, options: CookieOptions) -> Self {
        Self {
            name: name.into(),
            store,
            options,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Values of the request's session cookie; empty without one.
    pub fn get(&self, headers: &HeaderMap) -> Result<Values> {
        match cookie_value(headers, &self.name) {
            Some(value) => self.store.decode(&self.name, value),
            None => Ok(Values::new()),
        }
    }

    /// Replace the session values.
    pub fn save(&self, response: &mut HttpResponse, values: &Values) -> Result<()> {
        let value = self.store.encode(&self.name, values)?;
        let header = self.options.format_set_cookie(&self.name, &value);
        append_set_cookie(response, &header)
    }

    /// Expire the session cookie.
    pub fn clear(&self, response: &mut HttpResponse) -> Result<()> {
        let options = CookieOptions {
            max_age: 0,
            ..self.options.clone()
        };
        append_set_cookie(response, &options.format_set_cookie(&self.name, ""))
    }
}

fn append_set_cookie(response: &mut HttpResponse, cookie: &str) -> Result<()> {
    let value = HeaderValue::from_str(cookie)
        .map_err(|_| Error::illegal_argument("Invalid Set-Cookie value"))?;
    response.headers_mut().append(SET_COOKIE, value);
    Ok(())
}

/// Keeps the auth token in the `sid` session cookie.
#[derive(Debug, Clone)]
pub struct AuthTokenStore {
    session: Session,
}

impl AuthTokenStore {
    /// `sid` cookie on `/`, HttpOnly, kept for 7 days.
    pub fn new(store: CookieStore) -> Self {
        let options = CookieOptions {
            path: "/".to_string(),
            max_age: 86400 * 7,
            http_only: true,
            ..CookieOptions::default()
        };
        Self {
            session: Session::new(AUTH_COOKIE, store, options),
        }
    }

    pub fn save(&self, response: &mut HttpResponse, token: &Token) -> Result<()> {
        let mut values = Values::new();
        values.insert(TOKEN_KEY.to_string(), token.value.clone().into());
        self.session.save(response, &values)
    }

    /// The stored token. Missing, tampered and expired cookies give `None`.
    pub fn get(&self, headers: &HeaderMap) -> Option<Token> {
        let values = match self.session.get(headers) {
            Ok(values) => values,
            Err(e) => {
                tracing::debug!("Ignoring {AUTH_COOKIE} cookie: {e}");
                return None;
            }
        };
        values.get(TOKEN_KEY)?.as_str().map(Token::new)
    }

    pub fn clear(&self, response: &mut HttpResponse) -> Result<()> {
        self.session.clear(response)
    }
}

/// Value of the cookie `name` in the request headers.
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name).then_some(value)
        })
}
