//! Token-bucket admission control keyed by client identity.
//!
//! The bucket arithmetic lives in [`BucketState::acquire`], a pure function of
//! the stored state, the policy and the current time. Stores
//! ([`BucketStore`](crate::ports::bucket_store::BucketStore) implementations)
//! are responsible for running it atomically per key; the limiter itself only
//! derives keys, reads the clock and bounds the store call.
use std::{sync::Arc, time::Duration};

use thiserror::Error;

use crate::{
    config::models::{MissingKeyPolicy, RateLimitConfig},
    ports::bucket_store::BucketStore,
};

/// Errors raised while consulting the bucket store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RateLimitError {
    /// The store could not be reached or returned garbage
    #[error("rate limit store error: {0}")]
    Store(String),

    /// The store did not answer within the configured bound
    #[error("rate limit store timed out after {0:?}")]
    Timeout(Duration),
}

/// Bucket size and refill window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitPolicy {
    pub capacity: u32,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            window: window.max(Duration::from_millis(1)),
        }
    }

    /// Tokens regained per second.
    pub fn refill_rate(&self) -> f64 {
        f64::from(self.capacity) / self.window.as_secs_f64()
    }

    /// Idle buckets are forgotten after twice the window.
    pub fn expiry(&self) -> Duration {
        self.window * 2
    }
}

impl From<&RateLimitConfig> for RateLimitPolicy {
    fn from(config: &RateLimitConfig) -> Self {
        Self::new(config.requests, Duration::from_secs(config.window_secs))
    }
}

/// Persisted bucket contents. `updated_at` is seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    pub tokens: f64,
    pub updated_at: f64,
}

/// Outcome of one admission check, with the values exposed as
/// `X-RateLimit-*` / `Retry-After` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Unix timestamp (seconds)
    pub reset: u64,
    /// Seconds until a token is available; set only on rejection
    pub retry_after: Option<u64>,
}

impl RateDecision {
    /// Decision used when no client identity could be derived and the
    /// policy is to let such requests through unaccounted.
    pub fn unmetered(policy: &RateLimitPolicy, now: f64) -> Self {
        Self {
            allowed: true,
            limit: policy.capacity,
            remaining: policy.capacity,
            reset: (now + policy.window.as_secs_f64()) as u64,
            retry_after: None,
        }
    }
}

impl BucketState {
    /// Tokens available at `now`, capped at capacity.
    pub fn refilled(&self, policy: &RateLimitPolicy, now: f64) -> f64 {
        let capacity = f64::from(policy.capacity);
        let elapsed = (now - self.updated_at).max(0.0);
        (self.tokens + elapsed * capacity / policy.window.as_secs_f64()).min(capacity)
    }

    /// Run one admission step against `state` (`None` for an unseen or
    /// expired key). Returns the state to persist, if any, and the decision.
    pub fn acquire(
        state: Option<BucketState>,
        policy: &RateLimitPolicy,
        now: f64,
    ) -> (Option<BucketState>, RateDecision) {
        let Some(state) = state else {
            // First request consumes a token from a full bucket.
            let tokens = f64::from(policy.capacity) - 1.0;
            return (
                Some(BucketState {
                    tokens,
                    updated_at: now,
                }),
                RateDecision::from_tokens(true, tokens, policy, now),
            );
        };

        let tokens = state.refilled(policy, now);
        if tokens < 1.0 {
            return (None, RateDecision::from_tokens(false, tokens, policy, now));
        }

        let tokens = tokens - 1.0;
        (
            Some(BucketState {
                tokens,
                updated_at: now,
            }),
            RateDecision::from_tokens(true, tokens, policy, now),
        )
    }
}

impl RateDecision {
    /// Decision for a bucket holding `tokens` after the admission step:
    /// the balance after consumption when admitted, the refilled balance
    /// otherwise.
    pub fn from_tokens(allowed: bool, tokens: f64, policy: &RateLimitPolicy, now: f64) -> Self {
        let capacity = f64::from(policy.capacity);
        let window = policy.window.as_secs_f64();

        if allowed {
            return Self {
                allowed,
                limit: policy.capacity,
                remaining: tokens.max(0.0).floor() as u32,
                reset: (now + window) as u64,
                retry_after: None,
            };
        }

        // ceil((1 - tokens) / refill_rate)
        let retry_after = ((1.0 - tokens) * window / capacity).ceil().max(1.0) as u64;
        Self {
            allowed,
            limit: policy.capacity,
            remaining: 0,
            reset: now as u64 + retry_after,
            retry_after: Some(retry_after),
        }
    }
}

/// Current wall-clock time as fractional Unix seconds.
pub fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Per-client token-bucket limiter backed by a shared [`BucketStore`].
#[derive(Clone)]
pub struct TokenBucketLimiter {
    store: Arc<dyn BucketStore>,
    policy: RateLimitPolicy,
    on_missing_key: MissingKeyPolicy,
    store_timeout: Duration,
}

impl TokenBucketLimiter {
    pub fn new(
        store: Arc<dyn BucketStore>,
        policy: RateLimitPolicy,
        on_missing_key: MissingKeyPolicy,
        store_timeout: Duration,
    ) -> Self {
        tracing::info!(
            capacity = policy.capacity,
            window_secs = policy.window.as_secs_f64(),
            ?on_missing_key,
            "Creating token bucket rate limiter"
        );
        Self {
            store,
            policy,
            on_missing_key,
            store_timeout,
        }
    }

    pub fn from_config(store: Arc<dyn BucketStore>, config: &RateLimitConfig) -> Self {
        Self::new(
            store,
            RateLimitPolicy::from(config),
            config.on_missing_key,
            Duration::from_millis(config.store_timeout_ms),
        )
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn BucketStore> {
        &self.store
    }

    /// Storage key for a client identity.
    pub fn bucket_key(client: &str) -> String {
        format!("ratelimit:{client}")
    }

    /// Admission check for `client`; `None` when no identity could be derived.
    pub async fn check(&self, client: Option<&str>) -> Result<RateDecision, RateLimitError> {
        self.check_at(client, unix_now()).await
    }

    pub async fn check_at(
        &self,
        client: Option<&str>,
        now: f64,
    ) -> Result<RateDecision, RateLimitError> {
        let Some(client) = client else {
            return Ok(match self.on_missing_key {
                MissingKeyPolicy::Allow => RateDecision::unmetered(&self.policy, now),
                MissingKeyPolicy::Deny => RateDecision {
                    allowed: false,
                    limit: self.policy.capacity,
                    remaining: 0,
                    reset: (now + self.policy.window.as_secs_f64()) as u64,
                    retry_after: Some(self.policy.window.as_secs().max(1)),
                },
            });
        };

        let key = Self::bucket_key(client);
        tokio::time::timeout(
            self.store_timeout,
            self.store.acquire(&key, &self.policy, now),
        )
        .await
        .map_err(|_| RateLimitError::Timeout(self.store_timeout))?
    }
}
