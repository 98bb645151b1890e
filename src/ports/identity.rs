use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by identity collaborators (account store and token service)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum IdentityError {
    /// Malformed registration input
    #[error("{0}")]
    Validation(String),

    /// Username or email already taken
    #[error("{0}")]
    Conflict(String),

    /// Unknown user or wrong password
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Account exists but is disabled
    #[error("account is inactive")]
    Inactive,

    #[error("user not found: {0}")]
    NotFound(String),

    /// Token missing, malformed, badly signed or expired
    #[error("invalid token: {0}")]
    Token(String),

    #[error("identity backend error: {0}")]
    Internal(String),
}

pub type IdentityResult<T> = Result<T, IdentityError>;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_USER: &str = "user";

/// Public view of an account; never carries the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }
}

/// Verified identity token contents, placed in request extensions by the
/// authentication stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub username: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }
}

/// IdentityProvider defines the port (interface) for the account store
#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// Create a new account with role `user`
    async fn register(&self, username: &str, email: &str, password: &str)
    -> IdentityResult<User>;

    /// Check a username/password pair
    async fn verify_credentials(&self, username: &str, password: &str) -> IdentityResult<User>;

    /// Look up an account by id
    async fn find(&self, user_id: &str) -> IdentityResult<User>;

    /// Check that the store is reachable
    async fn ping(&self) -> IdentityResult<()>;
}
