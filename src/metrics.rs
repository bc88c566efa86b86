use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneMetrics {
    pub total_requests: u64,
    pub admitted_requests: u64,
    pub throttled_requests: u64,
    /// Hits waived because the bucket store was unreachable.
    pub fail_open_requests: u64,
    pub last_reset: u64,
}

impl Default for ZoneMetrics {
    fn default() -> Self {
        Self {
            total_requests: 0,
            admitted_requests: 0,
            throttled_requests: 0,
            fail_open_requests: 0,
            last_reset: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub zones: HashMap<String, ZoneMetrics>,
    pub banned_requests: u64,
}

/// Per-zone admission counters, keyed by the declared (unprefixed) zone.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    zone_metrics: Arc<RwLock<HashMap<String, ZoneMetrics>>>,
    banned: Arc<AtomicU64>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_request(&self, zone: &str, admitted: bool) {
        let mut metrics = self.zone_metrics.write().await;
        let zone_metrics = metrics.entry(zone.to_string()).or_default();

        zone_metrics.total_requests += 1;
        if admitted {
            zone_metrics.admitted_requests += 1;
        } else {
            zone_metrics.throttled_requests += 1;
        }
    }

    pub async fn record_fail_open(&self, zone: &str) {
        let mut metrics = self.zone_metrics.write().await;
        let zone_metrics = metrics.entry(zone.to_string()).or_default();
        zone_metrics.total_requests += 1;
        zone_metrics.admitted_requests += 1;
        zone_metrics.fail_open_requests += 1;
    }

    pub fn record_banned(&self) {
        self.banned.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn get_zone_metrics(&self, zone: &str) -> Option<ZoneMetrics> {
        let metrics = self.zone_metrics.read().await;
        metrics.get(zone).cloned()
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            zones: self.zone_metrics.read().await.clone(),
            banned_requests: self.banned.load(Ordering::Relaxed),
        }
    }
}
