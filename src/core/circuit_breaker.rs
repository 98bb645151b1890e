//! Per-service circuit breakers.
//!
//! Each service gets its own three-state breaker, created lazily the first
//! time a call for that service is guarded:
//!
//! ```text
//! Closed   --(failure_threshold consecutive failures)--> Open
//! Open     --(open_timeout elapsed, next call)---------> HalfOpen
//! HalfOpen --(half_open_max_requests successes)--------> Closed
//! HalfOpen --(any failure)-----------------------------> Open
//! ```
//!
//! Open rejects without running the guarded operation. HalfOpen admits at most
//! `half_open_max_requests` trial calls and rejects the rest. Every transition
//! starts a new generation so outcomes of calls admitted under an earlier
//! state are discarded.
use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock},
    time::Duration,
};

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::models::CircuitBreakerConfig;

/// Observable breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Error returned by a guarded call: either the breaker refused to run the
/// operation, or the operation itself failed.
#[derive(Error, Debug)]
pub enum BreakerError<E> {
    #[error("circuit breaker is open for service {0}")]
    Open(String),

    #[error("circuit breaker for service {0} is at its half-open trial limit")]
    TooManyRequests(String),

    #[error("{0}")]
    Operation(E),
}

impl<E> BreakerError<E> {
    /// True when the breaker rejected the call without running it.
    pub fn is_rejection(&self) -> bool {
        matches!(self, BreakerError::Open(_) | BreakerError::TooManyRequests(_))
    }
}

/// Tunables shared by every breaker a manager creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub open_timeout: Duration,
    pub half_open_max_requests: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
            half_open_max_requests: 3,
        }
    }
}

impl From<&CircuitBreakerConfig> for BreakerSettings {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            open_timeout: Duration::from_secs(config.timeout_secs),
            half_open_max_requests: config.half_open_max_requests.max(1),
        }
    }
}

/// Point-in-time view of a breaker, for diagnostics and admin listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub half_open_requests: u32,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    half_open_requests: u32,
    state_changed_at: Instant,
    generation: u64,
}

/// Three-state breaker guarding calls to a single service.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                half_open_requests: 0,
                state_changed_at: Instant::now(),
                generation: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state, applying the Open -> HalfOpen timeout if it has elapsed.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.lock();
        self.refresh(&mut inner, Instant::now());
        inner.state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut inner = self.lock();
        self.refresh(&mut inner, Instant::now());
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            half_open_requests: inner.half_open_requests,
        }
    }

    fn refresh(&self, inner: &mut BreakerInner, now: Instant) {
        if inner.state == BreakerState::Open
            && now.duration_since(inner.state_changed_at) >= self.settings.open_timeout
        {
            self.transition(inner, BreakerState::HalfOpen, now);
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: BreakerState, now: Instant) {
        let from = inner.state;
        inner.state = to;
        inner.state_changed_at = now;
        inner.generation = inner.generation.wrapping_add(1);
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.half_open_requests = 0;

        match to {
            BreakerState::Open => tracing::warn!(
                service = %self.name,
                %from,
                %to,
                "Circuit breaker opened"
            ),
            _ => tracing::info!(
                service = %self.name,
                %from,
                %to,
                "Circuit breaker state changed"
            ),
        }
    }

    /// Admission decision. Returns the generation the call was admitted under.
    fn before_call<E>(&self) -> Result<u64, BreakerError<E>> {
        let mut inner = self.lock();
        self.refresh(&mut inner, Instant::now());

        match inner.state {
            BreakerState::Closed => {}
            BreakerState::Open => return Err(BreakerError::Open(self.name.clone())),
            BreakerState::HalfOpen => {
                if inner.half_open_requests >= self.settings.half_open_max_requests {
                    return Err(BreakerError::TooManyRequests(self.name.clone()));
                }
                inner.half_open_requests += 1;
            }
        }
        Ok(inner.generation)
    }

    fn after_call(&self, generation: u64, success: bool) {
        let mut inner = self.lock();
        let now = Instant::now();
        self.refresh(&mut inner, now);
        if inner.generation != generation {
            return;
        }

        match (inner.state, success) {
            (BreakerState::Closed, true) => inner.consecutive_failures = 0,
            (BreakerState::Closed, false) => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.settings.failure_threshold {
                    self.transition(&mut inner, BreakerState::Open, now);
                }
            }
            (BreakerState::HalfOpen, true) => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.settings.half_open_max_requests {
                    self.transition(&mut inner, BreakerState::Closed, now);
                }
            }
            (BreakerState::HalfOpen, false) => {
                self.transition(&mut inner, BreakerState::Open, now);
            }
            (BreakerState::Open, _) => {}
        }
    }

    /// Give back a half-open trial slot whose call never reported an outcome.
    fn release(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation == generation
            && inner.state == BreakerState::HalfOpen
            && inner.half_open_requests > 0
        {
            inner.half_open_requests -= 1;
        }
    }

    /// Run `operation` under this breaker, counting any `Err` as a failure.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_classified(operation, |result| result.is_ok())
            .await
    }

    /// Run `operation` under this breaker, letting `is_success` decide how the
    /// outcome is recorded. The operation's result is returned untouched.
    pub async fn execute_classified<F, Fut, T, E, C>(
        &self,
        operation: F,
        is_success: C,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: FnOnce(&Result<T, E>) -> bool,
    {
        let generation = self.before_call::<E>()?;
        let mut permit = CallPermit {
            breaker: self,
            generation,
            settled: false,
        };

        let result = operation().await;
        permit.settled = true;
        self.after_call(generation, is_success(&result));

        result.map_err(BreakerError::Operation)
    }
}

/// Releases the trial slot if the guarded future is dropped mid-call
/// (e.g. the inbound client disconnected).
struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    settled: bool,
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release(self.generation);
        }
    }
}

/// Owns one breaker per service name for the lifetime of the gateway.
#[derive(Debug)]
pub struct CircuitBreakerManager {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    settings: BreakerSettings,
}

impl CircuitBreakerManager {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            settings,
        }
    }

    pub fn settings(&self) -> BreakerSettings {
        self.settings
    }

    /// Breaker for `service_name`, created on first use. Concurrent first
    /// callers always receive the same instance.
    pub fn breaker(&self, service_name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(service_name)
        {
            return breaker.clone();
        }

        let mut breakers = self.breakers.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have created it between the two locks.
        breakers
            .entry(service_name.to_string())
            .or_insert_with(|| {
                tracing::debug!(service = %service_name, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(service_name, self.settings))
            })
            .clone()
    }

    /// Guard `operation` with the breaker for `service_name`.
    pub async fn execute<F, Fut, T, E>(
        &self,
        service_name: &str,
        operation: F,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.breaker(service_name).execute(operation).await
    }

    pub async fn execute_classified<F, Fut, T, E, C>(
        &self,
        service_name: &str,
        operation: F,
        is_success: C,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: FnOnce(&Result<T, E>) -> bool,
    {
        self.breaker(service_name)
            .execute_classified(operation, is_success)
            .await
    }

    /// State of an existing breaker; `None` if the service was never called.
    pub fn state(&self, service_name: &str) -> Option<BreakerState> {
        self.breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(service_name)
            .map(|breaker| breaker.state())
    }

    pub fn snapshot(&self, service_name: &str) -> Option<BreakerSnapshot> {
        self.breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(service_name)
            .map(|breaker| breaker.snapshot())
    }

    pub fn len(&self) -> usize {
        self.breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
