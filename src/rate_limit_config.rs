use crate::error::{LimiterError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

/// Name of the zone every non-exempt request is charged against.
pub const GLOBAL_ZONE: &str = "global";

static QUOTA_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)\s*/\s*(second|minute|hour|day|week|month|year)\s*$")
        .expect("quota pattern is valid")
});

/// A `count` of hits allowed every `per`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Quota {
    pub count: u64,
    pub per: Duration,
}

impl Quota {
    pub fn new(count: u64, per: Duration) -> Self {
        Self { count, per }
    }

    pub fn per_secs(&self) -> u64 {
        self.per.as_secs()
    }
}

fn unit_seconds(unit: &str) -> Option<u64> {
    let secs = match unit {
        "second" => 1,
        "minute" => 60,
        "hour" => 60 * 60,
        "day" => 60 * 60 * 24,
        "week" => 60 * 60 * 24 * 7,
        "month" => 60 * 60 * 24 * 30,
        "year" => 60 * 60 * 24 * 365,
        _ => return None,
    };
    Some(secs)
}

fn unit_name(secs: u64) -> Option<&'static str> {
    ["second", "minute", "hour", "day", "week", "month", "year"]
        .into_iter()
        .find(|unit| unit_seconds(unit) == Some(secs))
}

impl FromStr for Quota {
    type Err = LimiterError;

    /// Parses `"<count>/<unit>"`, e.g. `"30/minute"`.
    fn from_str(s: &str) -> Result<Self> {
        let captures = QUOTA_PATTERN.captures(s).ok_or_else(|| {
            LimiterError::Configuration(format!(
                "invalid quota '{}': expected '<count>/<second|minute|hour|day|week|month|year>'",
                s
            ))
        })?;

        let count: u64 = captures[1].parse().map_err(|_| {
            LimiterError::Configuration(format!("quota count out of range in '{}'", s))
        })?;
        if count == 0 {
            return Err(LimiterError::Configuration(format!(
                "quota '{}' must allow at least one request",
                s
            )));
        }

        let per = unit_seconds(&captures[2]).ok_or_else(|| {
            LimiterError::Configuration(format!("unknown quota unit in '{}'", s))
        })?;

        Ok(Quota::new(count, Duration::from_secs(per)))
    }
}

impl TryFrom<String> for Quota {
    type Error = LimiterError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Quota> for String {
    fn from(quota: Quota) -> Self {
        quota.to_string()
    }
}

impl fmt::Display for Quota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match unit_name(self.per_secs()) {
            Some(unit) => write!(f, "{}/{}", self.count, unit),
            None => write!(f, "{}/{}s", self.count, self.per_secs()),
        }
    }
}

/// Quota per zone name, including tier-prefixed overrides such as
/// `authed_global` or `premium_postpastes`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RateLimitConfig {
    pub zones: HashMap<String, Quota>,
}

impl RateLimitConfig {
    /// Builds a config from raw quota strings, failing on the first malformed one.
    pub fn from_strings<'a, I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut zones = HashMap::new();
        for (zone, quota) in entries {
            zones.insert(zone.to_string(), quota.parse()?);
        }
        Ok(Self { zones })
    }

    pub fn get(&self, zone: &str) -> Option<Quota> {
        self.zones.get(zone).copied()
    }

    /// Quota for `effective_zone`, falling back to the unprefixed `base_zone`.
    pub fn get_with_fallback(&self, effective_zone: &str, base_zone: &str) -> Option<Quota> {
        self.get(effective_zone).or_else(|| self.get(base_zone))
    }

    pub fn contains(&self, zone: &str) -> bool {
        self.zones.contains_key(zone)
    }

    pub fn zone_names(&self) -> Vec<&String> {
        self.zones.keys().collect()
    }
}
