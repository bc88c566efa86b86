use serde::{Deserialize, Serialize};
use std::time::{Instant, SystemTime};

use crate::bucket_store::BucketStore;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: DependencyStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub bucket_store: ServiceStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub backend: String,
    pub status: String,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

pub struct HealthChecker<'a> {
    store: &'a BucketStore,
    started_at: Instant,
}

impl<'a> HealthChecker<'a> {
    pub fn new(store: &'a BucketStore, started_at: Instant) -> Self {
        Self { store, started_at }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let store_status = self.check_store().await;

        let overall_status = if store_status.status == "healthy" {
            "healthy"
        } else {
            "degraded" // requests are still admitted while the store is away
        };

        HealthStatus {
            status: overall_status.to_string(),
            timestamp: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            dependencies: DependencyStatus {
                bucket_store: store_status,
            },
        }
    }

    async fn check_store(&self) -> ServiceStatus {
        let start = Instant::now();
        let result = self.store.ping().await;
        let response_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => ServiceStatus {
                backend: self.store.backend().to_string(),
                status: "healthy".to_string(),
                response_time_ms,
                error: None,
            },
            Err(err) => ServiceStatus {
                backend: self.store.backend().to_string(),
                status: "unavailable".to_string(),
                response_time_ms,
                error: Some(err.to_string()),
            },
        }
    }
}
