//! Bearer tokens issued after authentication.

use serde::{Deserialize, Serialize};

use crate::auth::{DefaultService, PasswordStrategy, UserDetails, UserDetailsService};
use crate::jwt::JwtService;
use crate::router::Context;
use crate::Result;

/// An opaque bearer credential, serialized as `{"token": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    #[serde(rename = "token")]
    pub value: String,
}

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

/// Issues tokens for authenticated users.
pub trait TokenService: Send + Sync {
    fn generate_token(&self, user: &UserDetails) -> Result<Token>;
}

impl TokenService for JwtService {
    fn generate_token(&self, user: &UserDetails) -> Result<Token> {
        JwtService::generate_token(self, user)
    }
}

/// Authenticates credentials and answers with a JWT.
pub struct JwtTokenService<U, P> {
    auth: DefaultService<U, P>,
    jwt: JwtService,
}

impl<U: UserDetailsService, P: PasswordStrategy> JwtTokenService<U, P> {
    pub fn new(auth: DefaultService<U, P>, jwt: JwtService) -> Self {
        Self { auth, jwt }
    }

    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    pub async fn authenticate(&self, username: &str, password: &str) -> Result<Token> {
        let user = self.auth.authenticate(username, password).await?;
        self.generate_token(&user)
    }
}

impl<U: UserDetailsService, P: PasswordStrategy> TokenService for JwtTokenService<U, P> {
    fn generate_token(&self, user: &UserDetails) -> Result<Token> {
        self.jwt.generate_token(user)
    }
}

/// Store a token in the request context.
pub fn to_context(ctx: &mut Context, token: Token) {
    ctx.insert(token);
}

pub fn from_context(ctx: &Context) -> Option<&Token> {
    ctx.get::<Token>()
}
