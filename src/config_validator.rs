use crate::error::LimiterError;
use crate::rate_limit_config::{RateLimitConfig, GLOBAL_ZONE};
use crate::zones::RouteZones;

const TIER_PREFIXES: [&str; 2] = ["authed_", "premium_"];

/// Startup checks; everything here is fatal.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates a Redis URL
    pub fn validate_redis_url(url: &str) -> Result<(), LimiterError> {
        if url.is_empty() {
            return Err(LimiterError::Configuration(
                "Redis URL cannot be empty".to_string(),
            ));
        }

        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(LimiterError::Configuration(
                "Redis URL must start with 'redis://' or 'rediss://'".to_string(),
            ));
        }

        Ok(())
    }

    /// `global` must exist, every routed zone must have an unprefixed quota
    /// to fall back to, and tier overrides must shadow a real zone.
    pub fn validate_zones(
        config: &RateLimitConfig,
        routes: &RouteZones,
    ) -> Result<(), LimiterError> {
        if !config.contains(GLOBAL_ZONE) {
            return Err(LimiterError::Configuration(format!(
                "the '{}' zone is mandatory",
                GLOBAL_ZONE
            )));
        }

        for zone in routes.zones() {
            if !config.contains(zone) {
                return Err(LimiterError::Configuration(format!(
                    "route zone '{}' has no quota configured",
                    zone
                )));
            }
        }

        for name in config.zone_names() {
            let base = TIER_PREFIXES
                .iter()
                .find_map(|prefix| name.strip_prefix(*prefix));
            if let Some(base) = base {
                if !config.contains(base) {
                    return Err(LimiterError::Configuration(format!(
                        "zone '{}' overrides '{}', which is not configured",
                        name, base
                    )));
                }
            }
        }

        Ok(())
    }
}
