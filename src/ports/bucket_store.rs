use async_trait::async_trait;

use crate::core::rate_limiter::{RateDecision, RateLimitError, RateLimitPolicy};

/// BucketStore defines the port (interface) for persisting token buckets.
///
/// Implementations must make `acquire` atomic per key: the read, refill,
/// consume and write of one bucket may not interleave with another `acquire`
/// for the same key, otherwise concurrent requests from one client can both
/// spend the same token.
#[async_trait]
pub trait BucketStore: Send + Sync + 'static {
    /// Run one token-bucket admission step for `key` at time `now`
    /// (fractional Unix seconds) and persist the result.
    async fn acquire(
        &self,
        key: &str,
        policy: &RateLimitPolicy,
        now: f64,
    ) -> Result<RateDecision, RateLimitError>;

    /// Check that the store is reachable
    async fn ping(&self) -> Result<(), RateLimitError>;

    /// Short name used in readiness reports and logs
    fn name(&self) -> &'static str;
}
