//! In-memory account store.
//!
//! Passwords are kept as Argon2id PHC strings; hashing and verification run
//! on the blocking pool so a login burst does not stall the request workers.
use std::{
    collections::HashMap,
    sync::{LazyLock, PoisonError, RwLock},
};

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use uuid::Uuid;

use crate::{
    config::models::SeedUser,
    ports::identity::{IdentityError, IdentityProvider, IdentityResult, ROLE_USER, User},
};

static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("invalid email regex"));

#[derive(Debug, Clone)]
struct Account {
    user: User,
    password_hash: String,
}

fn hash_password(password: &str) -> IdentityResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| IdentityError::Internal(format!("failed to hash password: {e}")))
}

fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

async fn blocking<T, F>(f: F) -> IdentityResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| IdentityError::Internal(format!("password task failed: {e}")))
}

fn validate_registration(username: &str, email: &str, password: &str) -> IdentityResult<()> {
    let len = username.chars().count();
    if !(3..=50).contains(&len) {
        return Err(IdentityError::Validation(
            "Username must be between 3 and 50 characters".to_string(),
        ));
    }
    if !EMAIL.is_match(email) {
        return Err(IdentityError::Validation(
            "Email address is invalid".to_string(),
        ));
    }
    if password.chars().count() < 6 {
        return Err(IdentityError::Validation(
            "Password must be at least 6 characters".to_string(),
        ));
    }
    Ok(())
}

/// Account store held in process memory, keyed by user id.
#[derive(Debug, Default)]
pub struct InMemoryIdentityProvider {
    accounts: RwLock<HashMap<String, Account>>,
}

impl InMemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store holding the configured seed accounts.
    pub fn with_seed_users(seeds: &[SeedUser]) -> IdentityResult<Self> {
        let store = Self::new();
        for seed in seeds {
            store.insert(&seed.username, &seed.email, &seed.password, &seed.role)?;
        }
        if !seeds.is_empty() {
            tracing::info!(count = seeds.len(), "Seeded identity store");
        }
        Ok(store)
    }

    /// Insert an account synchronously with an explicit role.
    pub fn insert(
        &self,
        username: &str,
        email: &str,
        password: &str,
        role: &str,
    ) -> IdentityResult<User> {
        validate_registration(username, email, password)?;
        let password_hash = hash_password(password)?;
        self.store(username, email, role, password_hash)
    }

    fn store(
        &self,
        username: &str,
        email: &str,
        role: &str,
        password_hash: String,
    ) -> IdentityResult<User> {
        let email = email.to_ascii_lowercase();
        let mut accounts = self
            .accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if accounts.values().any(|a| a.user.username == username) {
            return Err(IdentityError::Conflict(
                "Username already exists".to_string(),
            ));
        }
        if accounts.values().any(|a| a.user.email == email) {
            return Err(IdentityError::Conflict("Email already exists".to_string()));
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            email,
            role: role.to_string(),
            active: true,
            created_at: now,
            updated_at: now,
        };
        accounts.insert(
            user.id.clone(),
            Account {
                user: user.clone(),
                password_hash,
            },
        );
        tracing::info!(user_id = %user.id, username = %user.username, "Registered user");
        Ok(user)
    }

    pub fn set_active(&self, user_id: &str, active: bool) -> IdentityResult<()> {
        let mut accounts = self
            .accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let account = accounts
            .get_mut(user_id)
            .ok_or_else(|| IdentityError::NotFound(user_id.to_string()))?;
        account.user.active = active;
        account.user.updated_at = Utc::now();
        Ok(())
    }

    fn find_by_username(&self, username: &str) -> Option<Account> {
        self.accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|a| a.user.username == username)
            .cloned()
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> IdentityResult<User> {
        validate_registration(username, email, password)?;
        let password = password.to_string();
        let password_hash = blocking(move || hash_password(&password)).await??;
        self.store(username, email, ROLE_USER, password_hash)
    }

    async fn verify_credentials(&self, username: &str, password: &str) -> IdentityResult<User> {
        let account = self
            .find_by_username(username)
            .ok_or(IdentityError::InvalidCredentials)?;

        let password = password.to_string();
        let hash = account.password_hash.clone();
        if !blocking(move || verify_password(&password, &hash)).await? {
            tracing::debug!(username = %username, "Password verification failed");
            return Err(IdentityError::InvalidCredentials);
        }
        if !account.user.active {
            return Err(IdentityError::Inactive);
        }
        Ok(account.user)
    }

    async fn find(&self, user_id: &str) -> IdentityResult<User> {
        self.accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .map(|a| a.user.clone())
            .ok_or_else(|| IdentityError::NotFound(user_id.to_string()))
    }

    async fn ping(&self) -> IdentityResult<()> {
        Ok(())
    }
}
