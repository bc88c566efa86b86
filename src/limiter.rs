use crate::algorithms::{Bucket, Hit};
use crate::bans::{Ban, BanCache, BanStore, MemoryBanStore};
use crate::bucket_store::BucketStore;
use crate::config::{Backend, Config, LimitsFile};
use crate::config_validator::ConfigValidator;
use crate::error::{LimiterError, Result};
use crate::identity::{bearer_token, resolve_identity, TokenDecoder};
use crate::metrics::MetricsCollector;
use crate::users::{StaticUserDirectory, User, UserDirectory};
use crate::zones::{RouteZones, Tier, ZoneResolver};
use axum::http::HeaderMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{debug, warn};

/// The resolved requester, stored in request extensions by the global layer.
#[derive(Debug, Clone)]
pub struct Caller {
    pub ip: String,
    pub identity: String,
    pub user: Option<User>,
}

impl Caller {
    pub fn tier(&self) -> Tier {
        self.user.as_ref().map(User::tier).unwrap_or(Tier::Anonymous)
    }

    /// Admins bypass every quota.
    pub fn is_exempt(&self) -> bool {
        self.user.as_ref().is_some_and(|user| user.admin)
    }
}

/// Values for one set of quota headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaUsage {
    pub used: u64,
    pub reset: u64,
    pub max: u64,
    pub available: u64,
}

impl QuotaUsage {
    /// Placeholder for zones that were not charged.
    pub fn unused() -> Self {
        Self {
            used: 0,
            reset: 0,
            max: 1,
            available: 1,
        }
    }
}

/// Result of charging one zone.
#[derive(Debug, Clone)]
pub struct ZoneCheck {
    pub zone: String,
    pub count: u64,
    /// `None` when the store could not be reached and the hit was waived.
    pub hit: Option<Hit>,
    pub reset_at: u64,
}

impl ZoneCheck {
    pub fn admitted(&self) -> bool {
        self.hit.map_or(true, |hit| hit.admitted())
    }

    pub fn usage(&self) -> QuotaUsage {
        match self.hit {
            Some(hit) => QuotaUsage {
                used: hit.used,
                reset: self.reset_at,
                max: hit.count,
                available: hit.available(),
            },
            None => QuotaUsage {
                used: 0,
                reset: 0,
                max: self.count,
                available: self.count,
            },
        }
    }
}

/// Ties zones, buckets, identities and bans together for the middleware.
pub struct Limiter {
    zones: ZoneResolver,
    routes: RouteZones,
    buckets: BucketStore,
    tokens: TokenDecoder,
    users: Arc<dyn UserDirectory>,
    bans: Arc<dyn BanStore>,
    ban_cache: BanCache,
    user_lookup_timeout: Duration,
    metrics: MetricsCollector,
}

impl Limiter {
    /// Validates the zone table against `routes` and builds the limiter.
    /// Any configuration problem surfaces here, never per request.
    pub fn from_config(config: &Config, limits: &LimitsFile, routes: RouteZones) -> Result<Self> {
        ConfigValidator::validate_zones(&limits.ratelimits, &routes)?;
        if config.backend == Backend::External {
            ConfigValidator::validate_redis_url(&config.redis_url)?;
        }

        let buckets =
            BucketStore::for_backend(config.backend, &config.redis_url, limits.timeouts.store)?;

        Ok(Self {
            zones: ZoneResolver::new(limits.ratelimits.clone()),
            routes,
            buckets,
            tokens: TokenDecoder::new(config.token_secret.clone()),
            users: Arc::new(StaticUserDirectory::new(&limits.users)),
            bans: Arc::new(MemoryBanStore::new(limits.bans.clone())),
            ban_cache: BanCache::new(limits.timeouts.ban_cache_ttl),
            user_lookup_timeout: limits.timeouts.user_lookup,
            metrics: MetricsCollector::new(),
        })
    }

    pub fn with_user_directory(mut self, users: Arc<dyn UserDirectory>) -> Self {
        self.users = users;
        self
    }

    pub fn with_ban_store(mut self, bans: Arc<dyn BanStore>) -> Self {
        self.bans = bans;
        self
    }

    pub fn routes(&self) -> &RouteZones {
        &self.routes
    }

    pub fn buckets(&self) -> &BucketStore {
        &self.buckets
    }

    pub fn tokens(&self) -> &TokenDecoder {
        &self.tokens
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn strategy(&self) -> &'static str {
        self.buckets.strategy()
    }

    /// Works out who is calling. Fails only with `IdentityBanned`; directory
    /// and ban store errors degrade to an anonymous, unbanned caller.
    pub async fn resolve_caller(&self, headers: &HeaderMap, ip: String) -> Result<Caller> {
        let user = match bearer_token(headers) {
            Some(token) => self.lookup_user(token).await,
            None => None,
        };

        match self
            .ban_cache
            .check(self.bans.as_ref(), &ip, user.as_ref().map(|user| user.id))
            .await
        {
            Ok(Some(ban)) => {
                debug!(ip = %ip, user_id = ?user.as_ref().map(|u| u.id), "Rejected banned caller");
                self.metrics.record_banned();
                return Err(LimiterError::IdentityBanned { reason: ban.reason });
            }
            Ok(None) => {}
            Err(err) => warn!(ip = %ip, error = %err, "Ban lookup failed, treating caller as unbanned"),
        }

        let identity = resolve_identity(&self.tokens, headers, &ip);
        Ok(Caller { ip, identity, user })
    }

    async fn lookup_user(&self, token: &str) -> Option<User> {
        match time::timeout(self.user_lookup_timeout, self.users.fetch_by_token(token)).await {
            Ok(Ok(user)) => user,
            Ok(Err(err)) => {
                warn!(error = %err, "User lookup failed, continuing anonymously");
                None
            }
            Err(_) => {
                warn!(timeout = ?self.user_lookup_timeout, "User lookup timed out, continuing anonymously");
                None
            }
        }
    }

    /// Charges one hit to `zone` for `caller`. An unknown zone or an
    /// unreachable store admits the request.
    pub async fn check_zone(&self, zone: &str, caller: &Caller) -> Option<ZoneCheck> {
        let Some(resolved) = self.zones.resolve(zone, caller.tier()) else {
            warn!(zone = %zone, "No quota configured for zone, not limiting");
            return None;
        };

        let key = format!("{}%{}", resolved.name, caller.identity);
        let bucket = self.buckets.bucket(&key, resolved.quota).await;

        let hit = match record_hit(bucket.clone()).await {
            Ok(hit) => Some(hit),
            Err(err) => {
                warn!(zone = %resolved.name, error = %err, "Rate limit store unavailable, admitting request");
                self.metrics.record_fail_open(zone).await;
                None
            }
        };

        let check = ZoneCheck {
            zone: resolved.name,
            count: resolved.quota.count,
            hit,
            reset_at: bucket.reset_at(),
        };
        if check.hit.is_some() {
            self.metrics.record_request(zone, check.admitted()).await;
        }
        Some(check)
    }

    /// Periodic housekeeping: idle buckets and expired ban lookups.
    /// Returns how many of each were dropped.
    pub async fn prune(&self) -> (usize, usize) {
        let buckets = self.buckets.prune_idle().await;
        let lookups = self.ban_cache.prune_expired().await;
        (buckets, lookups)
    }

    pub async fn list_bans(&self) -> Result<Vec<Ban>> {
        self.bans.list().await
    }

    pub async fn ban(&self, ban: Ban) -> Result<()> {
        self.bans.insert(ban.clone()).await?;
        self.ban_cache.invalidate_ban(&ban).await;
        Ok(())
    }

    /// Returns the removed bans; empty when nothing matched.
    pub async fn unban(&self, ip: Option<&str>, user_id: Option<i64>) -> Result<Vec<Ban>> {
        let removed = self.bans.remove(ip, user_id).await?;
        for ban in &removed {
            self.ban_cache.invalidate_ban(ban).await;
        }
        Ok(removed)
    }
}

/// Runs the hit on its own task so a dropped connection cannot cancel it
/// halfway through a store round trip.
async fn record_hit(bucket: Arc<dyn Bucket>) -> Result<Hit> {
    tokio::spawn(async move { bucket.hit().await })
        .await
        .map_err(|e| LimiterError::Internal(format!("hit task failed: {}", e)))?
}
