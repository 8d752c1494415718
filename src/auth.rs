//! Username/password authentication.
//!
//! Applications load their users through a [`UserDetailsService`] and pick a
//! [`PasswordStrategy`]; [`DefaultService`] compares the two.

use std::fmt;
use std::future::Future;

use sha2::{Digest, Sha256};

use crate::router::Context;
use crate::{Error, Result};

const CREDENTIALS_NOT_AUTHORIZED: &str = "Credentials not authorized.";

/// A user as seen by authentication. The username should be unique, like an
/// email address.
#[derive(Clone, PartialEq, Eq)]
pub struct UserDetails {
    pub username: String,
    /// Stored password hash.
    pub password: String,
    pub is_active: bool,
}

impl UserDetails {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            is_active: true,
        }
    }
}

impl fmt::Debug for UserDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserDetails")
            .field("username", &self.username)
            .field("password", &"[redacted]")
            .field("is_active", &self.is_active)
            .finish()
    }
}

/// Loads users by username.
///
/// Return [`Error::UsernameNotFound`] when the user does not exist.
pub trait UserDetailsService: Send + Sync {
    fn load_user_by_username(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<UserDetails>> + Send;
}

/// Hashes and checks passwords.
pub trait PasswordStrategy: Send + Sync {
    fn hash(&self, password: &str) -> Result<String>;

    fn verify(&self, password: &str, hash: &str) -> Result<bool> {
        Ok(self.hash(password)? == hash)
    }
}

/// Unsalted SHA-256, hex encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Password;

impl PasswordStrategy for Sha256Password {
    fn hash(&self, password: &str) -> Result<String> {
        Ok(sha256_password(password))
    }
}

/// Hex SHA-256 digest of `password`.
pub fn sha256_password(password: &str) -> String {
    let digest = Sha256::digest(password.as_bytes());
    format!("{digest:x}")
}

/// bcrypt with a configurable cost.
#[derive(Debug, Clone, Copy)]
pub struct BcryptPassword {
    pub cost: u32,
}

impl Default for BcryptPassword {
    fn default() -> Self {
        Self {
            cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl PasswordStrategy for BcryptPassword {
    fn hash(&self, password: &str) -> Result<String> {
        bcrypt::hash(password, self.cost).map_err(|e| Error::Internal(format!("bcrypt: {e}")))
    }

    fn verify(&self, password: &str, hash: &str) -> Result<bool> {
        // A malformed stored hash is a mismatch, not a server error
        Ok(bcrypt::verify(password, hash).unwrap_or(false))
    }
}

/// Loads the user and compares passwords.
#[derive(Debug, Clone)]
pub struct DefaultService<U, P> {
    users: U,
    passwords: P,
}

impl<U: UserDetailsService, P: PasswordStrategy> DefaultService<U, P> {
    pub fn new(users: U, passwords: P) -> Self {
        Self { users, passwords }
    }

    pub fn password_strategy(&self) -> &P {
        &self.passwords
    }

    /// Authenticate a user.
    ///
    /// Errors from the user service pass through unchanged; inactive users
    /// and wrong passwords are [`Error::NotAuthorized`].
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<UserDetails> {
        let user = self.users.load_user_by_username(username).await?;

        if !user.is_active {
            tracing::debug!("Rejected inactive user {username}");
            return Err(Error::not_authorized(CREDENTIALS_NOT_AUTHORIZED));
        }
        if !self.passwords.verify(password, &user.password)? {
            tracing::debug!("Rejected credentials for {username}");
            return Err(Error::not_authorized(CREDENTIALS_NOT_AUTHORIZED));
        }

        Ok(user)
    }
}

/// Store the authenticated user in the request context.
pub fn to_context(ctx: &mut Context, user: UserDetails) {
    ctx.insert(user);
}

/// The authenticated user stored by [`to_context`].
pub fn from_context(ctx: &Context) -> Result<&UserDetails> {
    ctx.require::<UserDetails>()
}
