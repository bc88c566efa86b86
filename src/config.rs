use crate::bans::Ban;
use crate::error::{LimiterError, Result};
use crate::rate_limit_config::RateLimitConfig;
use crate::users::UserRecord;
use envconfig::Envconfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Envconfig, Clone)]
pub struct Config {
    /// Server bind address
    #[envconfig(from = "BIND_ADDR", default = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Bucket backend: `memory` or `external`
    #[envconfig(from = "RATELIMIT_BACKEND", default = "memory")]
    pub backend: Backend,

    /// Redis connection URL, used by the `external` backend
    #[envconfig(from = "REDIS_URL", default = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// TOML file with zones, users and bans
    #[envconfig(from = "LIMITS_FILE")]
    pub limits_file: Option<PathBuf>,

    /// HMAC secret bearer tokens are signed with
    #[envconfig(from = "TOKEN_SECRET")]
    pub token_secret: Option<String>,

    /// Idle bucket pruning interval in seconds
    #[envconfig(from = "CLEANUP_INTERVAL", default = "300")]
    pub cleanup_interval_secs: u64,

    /// Default level for the tracing filter
    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Config::init_from_env()?)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    /// Reads `limits_file` if set, otherwise the built-in defaults.
    pub fn load_limits(&self) -> Result<LimitsFile> {
        match &self.limits_file {
            Some(path) => LimitsFile::load(path),
            None => Ok(LimitsFile::default()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Per-process leaky buckets
    Memory,
    /// Fixed windows in a shared Redis
    External,
}

impl FromStr for Backend {
    type Err = LimiterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Backend::Memory),
            "external" => Ok(Backend::External),
            other => Err(LimiterError::Configuration(format!(
                "unknown backend '{}': expected 'memory' or 'external'",
                other
            ))),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Memory => write!(f, "memory"),
            Backend::External => write!(f, "external"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Upper bound on one bucket store round trip
    #[serde(with = "humantime_serde")]
    pub store: Duration,
    /// Upper bound on resolving a bearer token to a user
    #[serde(with = "humantime_serde")]
    pub user_lookup: Duration,
    /// How long a ban lookup result is reused
    #[serde(with = "humantime_serde")]
    pub ban_cache_ttl: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            store: Duration::from_millis(250),
            user_lookup: Duration::from_millis(500),
            ban_cache_ttl: Duration::from_secs(120),
        }
    }
}

/// Contents of the limits file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsFile {
    pub ratelimits: RateLimitConfig,
    pub timeouts: Timeouts,
    pub users: Vec<UserRecord>,
    pub bans: Vec<Ban>,
}

impl Default for LimitsFile {
    fn default() -> Self {
        Self {
            ratelimits: default_ratelimits(),
            timeouts: Timeouts::default(),
            users: Vec::new(),
            bans: Vec::new(),
        }
    }
}

fn default_ratelimits() -> RateLimitConfig {
    RateLimitConfig::from_strings([
        ("global", "120/minute"),
        ("postpastes", "30/minute"),
        ("getpaste", "120/minute"),
        ("deletepaste", "30/minute"),
        ("admin", "60/minute"),
    ])
    .unwrap_or_default()
}

impl LimitsFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            LimiterError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }
}
