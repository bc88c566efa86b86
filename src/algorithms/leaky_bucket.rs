use super::{Bucket, Hit};
use crate::error::LimiterError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// In-memory rolling window. There is no fixed reset time: each hit stops
/// counting `per` after it was recorded.
#[derive(Debug)]
pub struct LeakyBucket {
    count: u64,
    per: Duration,
    hits: Mutex<VecDeque<Instant>>,
}

impl LeakyBucket {
    pub fn new(count: u64, per: Duration) -> Self {
        Self {
            count,
            per,
            hits: Mutex::new(VecDeque::new()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, VecDeque<Instant>>, LimiterError> {
        self.hits
            .lock()
            .map_err(|_| LimiterError::Internal("bucket lock poisoned".to_string()))
    }

    /// Drops hits recorded at or before `now - per`.
    fn clear_dead_hits(&self, hits: &mut VecDeque<Instant>, now: Instant) {
        let Some(cutoff) = now.checked_sub(self.per) else {
            return;
        };
        while hits.front().is_some_and(|hit| *hit <= cutoff) {
            hits.pop_front();
        }
    }

    /// Hits currently inside the window.
    pub fn used(&self) -> Result<u64, LimiterError> {
        let mut hits = self.lock()?;
        self.clear_dead_hits(&mut hits, Instant::now());
        Ok(hits.len() as u64)
    }
}

#[async_trait]
impl Bucket for LeakyBucket {
    async fn hit(&self) -> Result<Hit, LimiterError> {
        let now = Instant::now();
        let mut hits = self.lock()?;
        self.clear_dead_hits(&mut hits, now);
        hits.push_back(now);
        Ok(Hit::new(hits.len() as u64, self.count))
    }

    async fn is_limited(&self) -> Result<bool, LimiterError> {
        Ok(self.used()? >= self.count)
    }

    fn reset_at(&self) -> u64 {
        0
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn strategy(&self) -> &'static str {
        "leakybucket"
    }

    fn is_idle(&self) -> bool {
        self.used().map(|used| used == 0).unwrap_or(true)
    }
}
