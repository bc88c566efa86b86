//! Ban list and the lookup cache the limiter consults before any quota work.

use crate::error::LimiterError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ban {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Ban {
    pub fn covers(&self, subject: &BanSubject) -> bool {
        match subject {
            BanSubject::Ip(ip) => self.ip.as_deref() == Some(ip.as_str()),
            BanSubject::User(id) => self.user_id == Some(*id),
        }
    }

    pub fn subjects(&self) -> Vec<BanSubject> {
        let mut subjects = Vec::with_capacity(2);
        if let Some(ip) = &self.ip {
            subjects.push(BanSubject::Ip(ip.clone()));
        }
        if let Some(id) = self.user_id {
            subjects.push(BanSubject::User(id));
        }
        subjects
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BanSubject {
    Ip(String),
    User(i64),
}

#[async_trait]
pub trait BanStore: Send + Sync {
    async fn find(&self, subject: &BanSubject) -> Result<Option<Ban>, LimiterError>;

    async fn insert(&self, ban: Ban) -> Result<(), LimiterError>;

    /// Removes every ban matching `ip` or `user_id` and returns them.
    async fn remove(&self, ip: Option<&str>, user_id: Option<i64>)
        -> Result<Vec<Ban>, LimiterError>;

    async fn list(&self) -> Result<Vec<Ban>, LimiterError>;
}

#[derive(Debug, Default)]
pub struct MemoryBanStore {
    bans: RwLock<Vec<Ban>>,
}

impl MemoryBanStore {
    pub fn new(bans: Vec<Ban>) -> Self {
        Self {
            bans: RwLock::new(bans),
        }
    }
}

#[async_trait]
impl BanStore for MemoryBanStore {
    async fn find(&self, subject: &BanSubject) -> Result<Option<Ban>, LimiterError> {
        let bans = self.bans.read().await;
        Ok(bans.iter().find(|ban| ban.covers(subject)).cloned())
    }

    async fn insert(&self, ban: Ban) -> Result<(), LimiterError> {
        self.bans.write().await.push(ban);
        Ok(())
    }

    async fn remove(
        &self,
        ip: Option<&str>,
        user_id: Option<i64>,
    ) -> Result<Vec<Ban>, LimiterError> {
        let mut bans = self.bans.write().await;
        let (removed, kept): (Vec<Ban>, Vec<Ban>) = bans.drain(..).partition(|ban| {
            (ip.is_some() && ban.ip.as_deref() == ip)
                || (user_id.is_some() && ban.user_id == user_id)
        });
        *bans = kept;
        Ok(removed)
    }

    async fn list(&self) -> Result<Vec<Ban>, LimiterError> {
        Ok(self.bans.read().await.clone())
    }
}

struct CachedLookup {
    ban: Option<Ban>,
    fetched_at: Instant,
}

/// Expired entries are swept on insert once the map reaches this size.
const MIN_SWEEP_AT: usize = 1024;

/// Remembers ban lookups (hits and misses) for `ttl`. Owned by the limiter;
/// ban mutations must call [`BanCache::invalidate_ban`].
pub struct BanCache {
    ttl: Duration,
    entries: RwLock<HashMap<BanSubject, CachedLookup>>,
    /// Bumped by every invalidation; a lookup that straddles one is not cached.
    generation: AtomicU64,
    sweep_at: AtomicUsize,
}

impl BanCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            sweep_at: AtomicUsize::new(MIN_SWEEP_AT),
        }
    }

    pub async fn lookup(
        &self,
        store: &dyn BanStore,
        subject: &BanSubject,
    ) -> Result<Option<Ban>, LimiterError> {
        if let Some(cached) = self.entries.read().await.get(subject) {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.ban.clone());
            }
        }

        let generation = self.generation.load(Ordering::Acquire);
        let ban = store.find(subject).await?;

        let mut entries = self.entries.write().await;
        if self.generation.load(Ordering::Acquire) != generation {
            return Ok(ban);
        }
        if entries.len() >= self.sweep_at.load(Ordering::Relaxed) {
            self.sweep(&mut entries);
        }
        entries.insert(
            subject.clone(),
            CachedLookup {
                ban: ban.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(ban)
    }

    fn sweep(&self, entries: &mut HashMap<BanSubject, CachedLookup>) -> usize {
        let before = entries.len();
        entries.retain(|_, cached| cached.fetched_at.elapsed() < self.ttl);
        self.sweep_at
            .store((entries.len() * 2).max(MIN_SWEEP_AT), Ordering::Relaxed);
        before - entries.len()
    }

    /// Drops expired lookups and returns how many went.
    pub async fn prune_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        self.sweep(&mut entries)
    }

    /// IP ban first, then the user's ban.
    pub async fn check(
        &self,
        store: &dyn BanStore,
        ip: &str,
        user_id: Option<i64>,
    ) -> Result<Option<Ban>, LimiterError> {
        if let Some(ban) = self.lookup(store, &BanSubject::Ip(ip.to_string())).await? {
            return Ok(Some(ban));
        }
        match user_id {
            Some(id) => self.lookup(store, &BanSubject::User(id)).await,
            None => Ok(None),
        }
    }

    pub async fn invalidate_ban(&self, ban: &Ban) {
        let mut entries = self.entries.write().await;
        for subject in ban.subjects() {
            entries.remove(&subject);
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
