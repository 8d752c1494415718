//! JWT creation and verification.

use hyper::http::HeaderMap;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::UserDetails;
use crate::config::Jwt as JwtConfig;
use crate::router::Context;
use crate::token::Token;
use crate::{Error, Result};

const MIN_SECRET_LENGTH: usize = 32;

/// Standard claims issued for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (the username)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Token id
    pub jti: String,
}

/// Signs and verifies tokens with an HMAC secret.
#[derive(Clone)]
pub struct JwtService {
    algorithm: Algorithm,
    exp_hours: u32,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl std::fmt::Debug for JwtService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtService")
            .field("algorithm", &self.algorithm)
            .field("exp_hours", &self.exp_hours)
            .finish_non_exhaustive()
    }
}

/// `now` plus `hours`, failing when it leaves the supported time range.
fn expiry(now: jiff::Timestamp, hours: u32) -> Result<jiff::Timestamp> {
    jiff::Span::new()
        .try_hours(i64::from(hours))
        .and_then(|span| now.checked_add(span))
        .map_err(|e| Error::Config(format!("JWT expiry of {hours} hours is out of range: {e}")))
}

impl JwtService {
    /// Create a service signing with HS256.
    ///
    /// The secret must be at least 32 bytes.
    pub fn new(config: &JwtConfig) -> Result<Self> {
        if config.secret.len() < MIN_SECRET_LENGTH {
            return Err(Error::Config(format!(
                "JWT secret must be at least {MIN_SECRET_LENGTH} bytes"
            )));
        }
        expiry(jiff::Timestamp::now(), config.exp_hours())?;

        let secret = config.secret.as_bytes();
        Ok(Self {
            algorithm: Algorithm::HS256,
            exp_hours: config.exp_hours(),
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        })
    }

    /// Switch the signing algorithm. Only the HMAC family fits a shared
    /// secret.
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Result<Self> {
        if !matches!(
            algorithm,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(Error::Config(format!(
                "Unsupported JWT algorithm {algorithm:?}, expected HS256, HS384 or HS512"
            )));
        }
        self.algorithm = algorithm;
        Ok(self)
    }

    /// Token lifetime in hours.
    pub fn exp_hours(&self) -> u32 {
        self.exp_hours
    }

    /// Issue a token for `user`, valid for the configured hours.
    pub fn generate_token(&self, user: &UserDetails) -> Result<Token> {
        let now = jiff::Timestamp::now();
        let exp = expiry(now, self.exp_hours)?;

        let claims = Claims {
            sub: user.username.clone(),
            exp: exp.as_second(),
            iat: now.as_second(),
            jti: Uuid::new_v4().to_string(),
        };
        self.generate_token_with_claims(&claims)
    }

    /// Sign arbitrary claims. Verification requires an `exp` claim.
    pub fn generate_token_with_claims<C: Serialize>(&self, claims: &C) -> Result<Token> {
        let value = encode(&Header::new(self.algorithm), claims, &self.encoding)
            .map_err(|e| Error::Internal(format!("Token creation failed: {e}")))?;
        Ok(Token::new(value))
    }

    /// Verify a token issued by [`generate_token`](Self::generate_token).
    pub fn verify(&self, token: &str) -> Result<Claims> {
        self.verify_claims(token)
    }

    /// Verify a token and decode its claims into `C`.
    pub fn verify_claims<C: DeserializeOwned>(&self, token: &str) -> Result<C> {
        let validation = Validation::new(self.algorithm);
        let data = decode::<C>(token, &self.decoding, &validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => Error::not_authorized("Token expired."),
            _ => Error::not_authorized("Invalid token."),
        })?;
        Ok(data.claims)
    }
}

/// The token of an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get("Authorization")?.to_str().ok()?;
    value
        .get(..7)
        .filter(|p| p.eq_ignore_ascii_case("bearer "))
        .map(|_| value[7..].trim())
        .filter(|t| !t.is_empty())
}

/// Store verified claims in the request context.
pub fn claims_to_context(ctx: &mut Context, claims: Claims) {
    ctx.insert(claims);
}

/// Claims stored by [`claims_to_context`].
pub fn claims_from_context(ctx: &Context) -> Result<&Claims> {
    ctx.require::<Claims>()
}
