use std::time::Duration;

use async_trait::async_trait;
use scc::{HashMap, hash_map::Entry};

use crate::{
    core::rate_limiter::{BucketState, RateDecision, RateLimitError, RateLimitPolicy},
    ports::bucket_store::BucketStore,
};

#[derive(Debug, Clone, Copy)]
struct StoredBucket {
    state: BucketState,
    /// Unix seconds after which the bucket is treated as absent
    expires_at: f64,
}

/// In-process bucket store.
///
/// `scc::HashMap::entry_async` locks the bucket's slot for the duration of
/// the read-refill-consume-write, so concurrent requests for one key are
/// serialized while different keys proceed in parallel.
#[derive(Debug, Default)]
pub struct MemoryBucketStore {
    buckets: HashMap<String, StoredBucket>,
}

impl MemoryBucketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Tokens the bucket for `key` would hold at `now`, if it is live.
    pub async fn tokens(&self, key: &str, policy: &RateLimitPolicy, now: f64) -> Option<f64> {
        self.buckets
            .read_async(key, |_, bucket| {
                (bucket.expires_at > now).then(|| bucket.state.refilled(policy, now))
            })
            .await
            .flatten()
    }

    /// Drop every bucket whose expiry has passed. Returns how many were removed.
    pub async fn purge_expired(&self, now: f64) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain_async(|_, bucket| bucket.expires_at > now)
            .await;
        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            tracing::debug!(removed, "Purged expired rate limit buckets");
        }
        removed
    }

    fn expiry(policy: &RateLimitPolicy, now: f64) -> f64 {
        now + policy.expiry().as_secs_f64()
    }
}

#[async_trait]
impl BucketStore for MemoryBucketStore {
    async fn acquire(
        &self,
        key: &str,
        policy: &RateLimitPolicy,
        now: f64,
    ) -> Result<RateDecision, RateLimitError> {
        match self.buckets.entry_async(key.to_string()).await {
            Entry::Occupied(mut occupied) => {
                let stored = *occupied.get();
                let current = (stored.expires_at > now).then_some(stored.state);
                let (persist, decision) = BucketState::acquire(current, policy, now);
                if let Some(state) = persist {
                    *occupied.get_mut() = StoredBucket {
                        state,
                        expires_at: Self::expiry(policy, now),
                    };
                }
                Ok(decision)
            }
            Entry::Vacant(vacant) => {
                let (persist, decision) = BucketState::acquire(None, policy, now);
                if let Some(state) = persist {
                    vacant.insert_entry(StoredBucket {
                        state,
                        expires_at: Self::expiry(policy, now),
                    });
                }
                Ok(decision)
            }
        }
    }

    async fn ping(&self) -> Result<(), RateLimitError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Sweep expired buckets every `interval` until the task is aborted.
pub fn spawn_purge_task(
    store: std::sync::Arc<MemoryBucketStore>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            store
                .purge_expired(crate::core::rate_limiter::unix_now())
                .await;
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn policy(capacity: u32, window_secs: u64) -> RateLimitPolicy {
        RateLimitPolicy::new(capacity, Duration::from_secs(window_secs))
    }

    #[tokio::test]
    async fn test_capacity_then_reject() {
        let store = MemoryBucketStore::new();
        let p = policy(3, 60);

        for _ in 0..3 {
            assert!(store.acquire("k", &p, 0.0).await.unwrap().allowed);
        }
        let decision = store.acquire("k", &p, 0.0).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after, Some(20));
    }

    #[tokio::test]
    async fn test_refills_to_capacity_after_window() {
        let store = MemoryBucketStore::new();
        let p = policy(10, 60);

        for _ in 0..10 {
            store.acquire("k", &p, 100.0).await.unwrap();
        }
        assert!(store.tokens("k", &p, 100.0).await.unwrap() < 1.0);

        let refilled = store.tokens("k", &p, 160.0).await.unwrap();
        assert!(refilled >= 10.0 - 1e-9);
        // Partial refill is linear in elapsed time
        assert_eq!(store.tokens("k", &p, 118.0).await, Some(3.0));
    }

    #[tokio::test]
    async fn test_expired_bucket_starts_fresh() {
        let store = MemoryBucketStore::new();
        let p = policy(2, 10);

        store.acquire("k", &p, 0.0).await.unwrap();
        store.acquire("k", &p, 0.0).await.unwrap();
        assert!(!store.acquire("k", &p, 0.0).await.unwrap().allowed);

        // Past 2x window the stored bucket is ignored
        let decision = store.acquire("k", &p, 25.0).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
        assert_eq!(store.tokens("k", &p, 25.0).await, Some(1.0));
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = MemoryBucketStore::new();
        let p = policy(5, 10);
        store.acquire("old", &p, 0.0).await.unwrap();
        store.acquire("new", &p, 15.0).await.unwrap();

        assert_eq!(store.purge_expired(21.0).await, 1);
        assert_eq!(store.len(), 1);
        assert!(store.tokens("new", &p, 21.0).await.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_never_over_admits() {
        let store = Arc::new(MemoryBucketStore::new());
        let p = policy(50, 3600);

        let handles: Vec<_> = (0..200)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.acquire("hot", &p, 1_000.0).await.unwrap() })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap().allowed {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 50);
    }
}
