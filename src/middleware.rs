//! Request middleware: access logging and the two rate limiting layers.
//!
//! `global_limit_middleware` wraps the whole router. It rejects banned
//! callers, charges the `global` zone and stores the [`Caller`] in the request
//! extensions. `route_limit_middleware` is a route layer, so it runs after
//! routing and can read [`MatchedPath`] to find the zone declared for the
//! route. The global layer merges its headers into whatever comes back,
//! including 429s produced by the route layer.

use axum::{
    extract::{MatchedPath, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::LimiterError;
use crate::handlers::SharedState;
use crate::identity::client_ip;
use crate::limiter::{Caller, QuotaUsage, ZoneCheck};
use crate::rate_limit_config::GLOBAL_ZONE;

pub const GLOBAL_USED: &str = "x-global-ratelimit-used";
pub const GLOBAL_RESET: &str = "x-global-ratelimit-reset";
pub const GLOBAL_MAX: &str = "x-global-ratelimit-max";
pub const GLOBAL_AVAILABLE: &str = "x-global-ratelimit-available";
pub const ROUTE_USED: &str = "x-ratelimit-used";
pub const ROUTE_RESET: &str = "x-ratelimit-reset";
pub const ROUTE_MAX: &str = "x-ratelimit-max";
pub const ROUTE_AVAILABLE: &str = "x-ratelimit-available";
pub const STRATEGY: &str = "x-ratelimit-strategy";

const GLOBAL_HEADERS: [&str; 4] = [GLOBAL_USED, GLOBAL_RESET, GLOBAL_MAX, GLOBAL_AVAILABLE];
const ROUTE_HEADERS: [&str; 4] = [ROUTE_USED, ROUTE_RESET, ROUTE_MAX, ROUTE_AVAILABLE];

fn write_usage(headers: &mut HeaderMap, names: [&'static str; 4], usage: QuotaUsage, overwrite: bool) {
    let values = [usage.used, usage.reset, usage.max, usage.available];
    for (name, value) in names.into_iter().zip(values) {
        let name = HeaderName::from_static(name);
        if overwrite || !headers.contains_key(&name) {
            headers.insert(name, HeaderValue::from(value));
        }
    }
}

fn write_strategy(headers: &mut HeaderMap, strategy: &'static str) {
    headers.insert(
        HeaderName::from_static(STRATEGY),
        HeaderValue::from_static(strategy),
    );
}

fn too_many_requests() -> Response {
    LimiterError::QuotaExceeded.into_response()
}

/// Logging middleware for request/response tracking
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client_ip = client_ip(&request);
    let request_id = Uuid::new_v4();

    info!(
        target: "mystbin_limiter::middleware",
        request_id = %request_id,
        method = %method,
        uri = %uri,
        client_ip = %client_ip,
        "Incoming request"
    );

    let response = next.run(request).await;

    let status = response.status();
    info!(
        target: "mystbin_limiter::middleware",
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %status,
        "Request completed"
    );

    response
}

/// Bans, exemption and the `global` zone.
pub async fn global_limit_middleware(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Response {
    let limiter = &state.limiter;
    let ip = client_ip(&request);

    let caller = match limiter.resolve_caller(request.headers(), ip).await {
        Ok(caller) => caller,
        Err(err) => return err.into_response(),
    };

    if caller.is_exempt() {
        debug!(identity = %caller.identity, "Exempt caller, skipping rate limits");
        request.extensions_mut().insert(caller);
        let mut response = next.run(request).await;
        let headers = response.headers_mut();
        write_usage(headers, GLOBAL_HEADERS, QuotaUsage::unused(), true);
        write_usage(headers, ROUTE_HEADERS, QuotaUsage::unused(), true);
        write_strategy(headers, "ignore");
        return response;
    }

    let check = limiter.check_zone(GLOBAL_ZONE, &caller).await;
    let global = check
        .as_ref()
        .map_or_else(QuotaUsage::unused, ZoneCheck::usage);

    let mut response = if check.as_ref().map_or(true, ZoneCheck::admitted) {
        request.extensions_mut().insert(caller);
        next.run(request).await
    } else {
        debug!(identity = %caller.identity, used = global.used, "Global quota exceeded");
        too_many_requests()
    };

    let headers = response.headers_mut();
    write_usage(headers, GLOBAL_HEADERS, global, true);
    write_usage(headers, ROUTE_HEADERS, QuotaUsage::unused(), false);
    write_strategy(headers, limiter.strategy());
    response
}

/// The zone declared for the matched route, if any.
pub async fn route_limit_middleware(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Response {
    let limiter = &state.limiter;

    let zone = request
        .extensions()
        .get::<MatchedPath>()
        .and_then(|path| limiter.routes().lookup(request.method(), path.as_str()))
        .map(str::to_owned);
    let caller = request.extensions().get::<Caller>().cloned();

    let (Some(zone), Some(caller)) = (zone, caller) else {
        return next.run(request).await;
    };
    if caller.is_exempt() {
        return next.run(request).await;
    }

    let Some(check) = limiter.check_zone(&zone, &caller).await else {
        return next.run(request).await;
    };

    let mut response = if check.admitted() {
        next.run(request).await
    } else {
        debug!(identity = %caller.identity, zone = %check.zone, "Route quota exceeded");
        too_many_requests()
    };

    write_usage(response.headers_mut(), ROUTE_HEADERS, check.usage(), true);
    response
}
