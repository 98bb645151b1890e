//! Configuration data structures for Waypoint.
//!
//! These types map directly to YAML (also JSON / TOML) configuration files and
//! to `WAYPOINT_*` environment variables. Every section carries defaults so a
//! minimal config, or none at all, still yields a runnable gateway.
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level gateway configuration
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub jwt: JwtConfig,
    pub rate_limit: RateLimitConfig,
    pub redis: Option<RedisConfig>,
    pub circuit_breaker: CircuitBreakerConfig,
    pub timeouts: TimeoutConfig,
    pub cors: CorsConfig,
    pub logging: LoggingConfig,
    /// Accounts seeded into the in-memory identity store at startup
    pub users: Vec<SeedUser>,
    /// Services registered at startup
    pub services: Vec<ServiceConfig>,
}

/// Listener settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    /// Upper bound on in-flight request draining at shutdown
    pub shutdown_grace_secs: u64,
}

/// Secrets and passwords starting with this are placeholders from the
/// defaults or the starter file.
pub const PLACEHOLDER_PREFIX: &str = "change-me";

impl GatewayConfig {
    /// Placeholder credentials that must not reach a production deployment.
    /// Always empty outside production.
    pub fn placeholder_credentials(&self) -> Vec<String> {
        if !self.server.is_production() {
            return Vec::new();
        }

        let mut found = Vec::new();
        if self.jwt.secret.starts_with(PLACEHOLDER_PREFIX) {
            found.push("jwt.secret".to_string());
        }
        for user in &self.users {
            if user.password.starts_with(PLACEHOLDER_PREFIX) {
                found.push(format!("users[{}].password", user.username));
            }
        }
        found
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            environment: "development".to_string(),
            shutdown_grace_secs: 30,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct JwtConfig {
    pub secret: String,
    /// Token lifetime, parsed by humantime ("24h", "90m", ...)
    pub expiry: String,
}

impl JwtConfig {
    pub fn expiry_duration(&self) -> Result<Duration, humantime::DurationError> {
        humantime::parse_duration(&self.expiry)
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: "change-me-in-production".to_string(),
            expiry: "24h".to_string(),
        }
    }
}

/// Behaviour when a client key could not be extracted (no peer address).
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MissingKeyPolicy {
    #[default]
    Allow,
    Deny,
}

/// Backing store for token buckets.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStore {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Bucket capacity
    pub requests: u32,
    /// Seconds to refill an empty bucket
    pub window_secs: u64,
    pub on_missing_key: MissingKeyPolicy,
    pub store: RateLimitStore,
    pub store_timeout_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: 100,
            window_secs: 60,
            on_missing_key: MissingKeyPolicy::Allow,
            store: RateLimitStore::Memory,
            store_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    /// Seconds an open breaker waits before admitting trial requests
    pub timeout_secs: u64,
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_secs: 30,
            half_open_max_requests: 3,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TimeoutConfig {
    pub read_secs: u64,
    pub write_secs: u64,
    pub idle_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            read_secs: 15,
            write_secs: 15,
            idle_secs: 60,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allowed_methods: ["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"]
                .into_iter()
                .map(String::from)
                .collect(),
            allowed_headers: ["Content-Type", "Authorization", "X-Request-ID"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

fn default_role() -> String {
    "user".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SeedUser {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_health_path() -> String {
    "/health".to_string()
}

/// A statically configured backend service
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServiceConfig {
    pub name: String,
    pub urls: Vec<String>,
    #[serde(default = "default_health_path")]
    pub health_path: String,
}
