//! Mapping from a declared zone and caller tier to the quota that applies,
//! and from a matched route to its declared zone.

use crate::rate_limit_config::{Quota, RateLimitConfig};
use axum::http::Method;
use std::collections::HashMap;

/// Which quota tier a caller is billed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Anonymous,
    Authed,
    Premium,
}

impl Tier {
    pub fn prefix(&self) -> &'static str {
        match self {
            Tier::Anonymous => "",
            Tier::Authed => "authed_",
            Tier::Premium => "premium_",
        }
    }

    /// Zone name this tier is charged under for `zone`.
    pub fn effective_zone(&self, zone: &str) -> String {
        format!("{}{}", self.prefix(), zone)
    }
}

/// A zone after tier prefixing and fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedZone {
    /// The tier-prefixed name; used in bucket keys even when the quota
    /// came from the unprefixed zone.
    pub name: String,
    pub quota: Quota,
}

#[derive(Debug, Clone)]
pub struct ZoneResolver {
    config: RateLimitConfig,
}

impl ZoneResolver {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config }
    }

    /// Looks up `authed_`/`premium_` overrides first, then the bare zone.
    pub fn resolve(&self, zone: &str, tier: Tier) -> Option<ResolvedZone> {
        let name = tier.effective_zone(zone);
        let quota = self.config.get_with_fallback(&name, zone)?;
        Some(ResolvedZone { name, quota })
    }
}

/// Route → zone table, built next to the router at startup.
#[derive(Debug, Clone, Default)]
pub struct RouteZones {
    routes: HashMap<(Method, String), String>,
}

impl RouteZones {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn zone(mut self, method: Method, path: &str, zone: &str) -> Self {
        self.routes
            .insert((method, path.to_string()), zone.to_string());
        self
    }

    /// `path` is the route template as reported by `MatchedPath`.
    pub fn lookup(&self, method: &Method, path: &str) -> Option<&str> {
        self.routes
            .get(&(method.clone(), path.to_string()))
            .map(String::as_str)
    }

    pub fn zones(&self) -> impl Iterator<Item = &str> {
        self.routes.values().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> ZoneResolver {
        ZoneResolver::new(
            RateLimitConfig::from_strings([
                ("global", "5/minute"),
                ("authed_global", "10/minute"),
                ("premium_global", "50/minute"),
                ("postpastes", "2/minute"),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn test_tier_prefixes() {
        assert_eq!(Tier::Anonymous.effective_zone("global"), "global");
        assert_eq!(Tier::Authed.effective_zone("global"), "authed_global");
        assert_eq!(Tier::Premium.effective_zone("global"), "premium_global");
    }

    #[test]
    fn test_resolve_prefers_tier_override() {
        let resolver = resolver();
        assert_eq!(resolver.resolve("global", Tier::Anonymous).unwrap().quota.count, 5);
        assert_eq!(resolver.resolve("global", Tier::Authed).unwrap().quota.count, 10);
        assert_eq!(resolver.resolve("global", Tier::Premium).unwrap().quota.count, 50);
    }

    #[test]
    fn test_resolve_falls_back_but_keeps_prefixed_name() {
        let resolved = resolver().resolve("postpastes", Tier::Authed).unwrap();
        assert_eq!(resolved.name, "authed_postpastes");
        assert_eq!(resolved.quota.count, 2);
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let resolver = resolver();
        let first = resolver.resolve("postpastes", Tier::Premium);
        let second = resolver.resolve("postpastes", Tier::Premium);
        assert_eq!(first, second);
    }

    #[test]
    fn test_unknown_zone() {
        assert!(resolver().resolve("admin", Tier::Authed).is_none());
    }

    #[test]
    fn test_route_lookup() {
        let routes = RouteZones::new()
            .zone(Method::POST, "/pastes", "postpastes")
            .zone(Method::GET, "/pastes/:id", "getpaste");

        assert_eq!(routes.lookup(&Method::POST, "/pastes"), Some("postpastes"));
        assert_eq!(routes.lookup(&Method::GET, "/pastes/:id"), Some("getpaste"));
        assert_eq!(routes.lookup(&Method::GET, "/pastes"), None);
    }
}
