use crate::algorithms::{Bucket, FixedWindowBucket, LeakyBucket};
use crate::config::Backend;
use crate::error::LimiterError;
use crate::rate_limit_config::Quota;
use crate::redis_client::RedisClient;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

enum StoreBackend {
    Memory,
    External(Arc<RedisClient>),
}

/// Creates buckets on first use and hands out the same bucket for a key
/// afterwards. The backend is fixed at startup.
pub struct BucketStore {
    backend: StoreBackend,
    buckets: RwLock<HashMap<String, Arc<dyn Bucket>>>,
}

impl BucketStore {
    pub fn memory() -> Self {
        Self {
            backend: StoreBackend::Memory,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    pub fn external(redis: Arc<RedisClient>) -> Self {
        Self {
            backend: StoreBackend::External(redis),
            buckets: RwLock::new(HashMap::new()),
        }
    }

    pub fn for_backend(
        backend: Backend,
        redis_url: &str,
        timeout: Duration,
    ) -> Result<Self, LimiterError> {
        match backend {
            Backend::Memory => Ok(Self::memory()),
            Backend::External => Ok(Self::external(Arc::new(RedisClient::new(
                redis_url, timeout,
            )?))),
        }
    }

    pub fn backend(&self) -> Backend {
        match self.backend {
            StoreBackend::Memory => Backend::Memory,
            StoreBackend::External(_) => Backend::External,
        }
    }

    pub fn strategy(&self) -> &'static str {
        match self.backend {
            StoreBackend::Memory => "leakybucket",
            StoreBackend::External(_) => "window",
        }
    }

    /// Bucket for `key`, created with `quota` if it does not exist yet.
    pub async fn bucket(&self, key: &str, quota: Quota) -> Arc<dyn Bucket> {
        if let Some(bucket) = self.buckets.read().await.get(key) {
            return bucket.clone();
        }

        let mut buckets = self.buckets.write().await;
        buckets
            .entry(key.to_string())
            .or_insert_with(|| self.new_bucket(key, quota))
            .clone()
    }

    fn new_bucket(&self, key: &str, quota: Quota) -> Arc<dyn Bucket> {
        match &self.backend {
            StoreBackend::Memory => Arc::new(LeakyBucket::new(quota.count, quota.per)),
            StoreBackend::External(redis) => Arc::new(FixedWindowBucket::new(
                redis.clone(),
                key,
                quota.count,
                quota.per_secs(),
            )),
        }
    }

    /// Drops buckets with no hits left in their window. A bucket some caller
    /// still holds is kept, or the hit it is about to record would be lost.
    pub async fn prune_idle(&self) -> usize {
        let mut buckets = self.buckets.write().await;
        let before = buckets.len();
        buckets.retain(|_, bucket| Arc::strong_count(bucket) > 1 || !bucket.is_idle());
        before - buckets.len()
    }

    pub async fn len(&self) -> usize {
        self.buckets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.buckets.read().await.is_empty()
    }

    /// Memory stores are always reachable.
    pub async fn ping(&self) -> Result<(), LimiterError> {
        match &self.backend {
            StoreBackend::Memory => Ok(()),
            StoreBackend::External(redis) => redis.ping().await.map(|_| ()),
        }
    }
}
