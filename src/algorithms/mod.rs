//! Rate limiting algorithms module
//!
//! Every bucket tracks usage for one (zone, identity) pair. Two
//! implementations share the [`Bucket`] capability:
//!
//! - [`LeakyBucket`]: rolling window of hit instants kept in process memory.
//! - [`FixedWindowBucket`]: a Redis counter that expires `per` seconds after
//!   the first hit of the window.

pub mod fixed_window;
pub mod leaky_bucket;

use crate::error::LimiterError;
use async_trait::async_trait;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

pub use fixed_window::FixedWindowBucket;
pub use leaky_bucket::LeakyBucket;

/// Outcome of recording one hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Hit {
    /// Hits in the current window, including this one.
    pub used: u64,
    /// Configured quota count.
    pub count: u64,
}

impl Hit {
    pub fn new(used: u64, count: u64) -> Self {
        Self { used, count }
    }

    /// Usage now meets or exceeds the quota.
    pub fn limited(&self) -> bool {
        self.used >= self.count
    }

    /// The quota still had room for this hit.
    pub fn admitted(&self) -> bool {
        self.used <= self.count
    }

    pub fn available(&self) -> u64 {
        self.count.saturating_sub(self.used)
    }
}

/// Trait for rate limiting buckets
#[async_trait]
pub trait Bucket: Send + Sync {
    /// Record one usage event now.
    async fn hit(&self) -> Result<Hit, LimiterError>;

    /// Check without recording.
    async fn is_limited(&self) -> Result<bool, LimiterError>;

    /// Unix seconds at which the window resets, `0` when unknown.
    fn reset_at(&self) -> u64;

    fn count(&self) -> u64;

    /// Header value for `X-Ratelimit-Strategy`.
    fn strategy(&self) -> &'static str;

    /// Whether the bucket holds no live state and can be dropped.
    fn is_idle(&self) -> bool;
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
