use async_trait::async_trait;
use redis::{Client, Script, aio::MultiplexedConnection};

use crate::{
    core::rate_limiter::{RateDecision, RateLimitError, RateLimitPolicy},
    ports::bucket_store::BucketStore,
};

/// Read, refill, consume and write one bucket inside Redis so concurrent
/// gateways never interleave on the same key.
///
/// KEYS[1] bucket hash; ARGV: capacity, window seconds, now (Unix seconds),
/// expiry in milliseconds. Returns `{admitted, tokens}` as strings since Lua
/// numbers are truncated to integers on the way out.
const ACQUIRE_SCRIPT: &str = r"
local capacity = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local ttl_ms = tonumber(ARGV[4])

local bucket = redis.call('HMGET', KEYS[1], 'tokens', 'ts')
local tokens = tonumber(bucket[1])
local ts = tonumber(bucket[2])

if tokens == nil or ts == nil then
    tokens = capacity - 1
else
    local elapsed = math.max(0, now - ts)
    tokens = math.min(capacity, tokens + elapsed * capacity / window)
    if tokens < 1 then
        return {'0', tostring(tokens)}
    end
    tokens = tokens - 1
end

redis.call('HSET', KEYS[1], 'tokens', tostring(tokens), 'ts', tostring(now))
redis.call('PEXPIRE', KEYS[1], ttl_ms)
return {'1', tostring(tokens)}
";

/// Bucket store shared by every gateway instance pointing at one Redis.
#[derive(Clone)]
pub struct RedisBucketStore {
    conn: MultiplexedConnection,
    script: Script,
}

fn store_error(err: redis::RedisError) -> RateLimitError {
    RateLimitError::Store(err.to_string())
}

impl RedisBucketStore {
    /// Connect to `url` (`redis://host:port/db`).
    pub async fn connect(url: &str) -> Result<Self, RateLimitError> {
        let client = Client::open(url).map_err(store_error)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(store_error)?;
        tracing::info!(url = %url, "Connected to redis bucket store");
        Ok(Self {
            conn,
            script: Script::new(ACQUIRE_SCRIPT),
        })
    }

    /// Turn the script reply into a decision.
    fn decision_from_reply(
        reply: &[String],
        policy: &RateLimitPolicy,
        now: f64,
    ) -> Result<RateDecision, RateLimitError> {
        let [admitted, tokens] = reply else {
            return Err(RateLimitError::Store(format!(
                "unexpected script reply: {reply:?}"
            )));
        };
        let tokens: f64 = tokens
            .parse()
            .map_err(|_| RateLimitError::Store(format!("invalid token count: {tokens}")))?;
        Ok(RateDecision::from_tokens(
            admitted == "1",
            tokens,
            policy,
            now,
        ))
    }
}

#[async_trait]
impl BucketStore for RedisBucketStore {
    async fn acquire(
        &self,
        key: &str,
        policy: &RateLimitPolicy,
        now: f64,
    ) -> Result<RateDecision, RateLimitError> {
        let mut conn = self.conn.clone();
        let reply: Vec<String> = self
            .script
            .key(key)
            .arg(policy.capacity)
            .arg(policy.window.as_secs_f64())
            .arg(format!("{now:.6}"))
            .arg(policy.expiry().as_millis() as u64)
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;

        Self::decision_from_reply(&reply, policy, now)
    }

    async fn ping(&self) -> Result<(), RateLimitError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
