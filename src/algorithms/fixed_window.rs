//! Fixed window rate limiting backed by Redis
//!
//! The counter lives at `mystbin:ratelimit:<zone>%<identity>` and expires
//! `per` seconds after the first hit of the window, so Redis does all the
//! cleanup.

use super::{unix_now, Bucket, Hit};
use crate::error::LimiterError;
use crate::redis_client::RedisClient;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

pub const KEY_PREFIX: &str = "mystbin:ratelimit:";

pub struct FixedWindowBucket {
    redis: Arc<RedisClient>,
    key: String,
    count: u64,
    per_secs: u64,
    reset: AtomicU64,
}

impl FixedWindowBucket {
    pub fn new(redis: Arc<RedisClient>, key: &str, count: u64, per_secs: u64) -> Self {
        Self {
            redis,
            key: format!("{}{}", KEY_PREFIX, key),
            count,
            per_secs: per_secs.max(1),
            reset: AtomicU64::new(0),
        }
    }

    pub fn redis_key(&self) -> &str {
        &self.key
    }

    /// Works out the window end after an increment that left `ttl` seconds.
    fn next_reset(&self, now: u64, ttl: i64, current: u64) -> (u64, bool) {
        if ttl < 0 {
            // Fresh key (or one that lost its expiry): this hit opens the window.
            (now + self.per_secs, true)
        } else if current <= now {
            // Window opened elsewhere or since the last hit we saw.
            (now + ttl as u64, false)
        } else {
            (current, false)
        }
    }
}

#[async_trait]
impl Bucket for FixedWindowBucket {
    async fn hit(&self) -> Result<Hit, LimiterError> {
        let (used, ttl) = self.redis.incr_with_ttl(&self.key).await?;
        let now = unix_now();

        let (reset, opens_window) = self.next_reset(now, ttl, self.reset.load(Ordering::Acquire));
        if opens_window {
            // The INCR already landed, so the hit stands. The next hit still
            // sees no TTL and retries the EXPIRE.
            if let Err(err) = self.redis.expire(&self.key, self.per_secs).await {
                warn!(key = %self.key, error = %err, "Failed to set rate limit window expiry");
            }
        }
        self.reset.store(reset, Ordering::Release);

        Ok(Hit::new(used, self.count))
    }

    async fn is_limited(&self) -> Result<bool, LimiterError> {
        let used = self.redis.get_counter(&self.key).await?;
        Ok(used.is_some_and(|used| used >= self.count))
    }

    fn reset_at(&self) -> u64 {
        self.reset.load(Ordering::Acquire)
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn strategy(&self) -> &'static str {
        "window"
    }

    fn is_idle(&self) -> bool {
        self.reset_at() <= unix_now()
    }
}
