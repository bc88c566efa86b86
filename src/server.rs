use crate::config::{Config, LimitsFile};
use crate::error::LimiterError;
use crate::handlers::{
    create_ban, create_paste, delete_paste, get_paste, health_check, list_bans, metrics,
    readiness_check, remove_ban, AppState, SharedState,
};
use crate::limiter::Limiter;
use crate::middleware::{global_limit_middleware, logging_middleware, route_limit_middleware};
use crate::zones::RouteZones;
use axum::http::Method;
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub const PASTES: &str = "/pastes";
pub const PASTE: &str = "/pastes/:id";
pub const ADMIN_BANS: &str = "/admin/bans";

/// Zones declared per route. Routes missing here only pay the global zone.
pub fn route_zones() -> RouteZones {
    RouteZones::new()
        .zone(Method::POST, PASTES, "postpastes")
        .zone(Method::GET, PASTE, "getpaste")
        .zone(Method::DELETE, PASTE, "deletepaste")
        .zone(Method::GET, ADMIN_BANS, "admin")
        .zone(Method::POST, ADMIN_BANS, "admin")
        .zone(Method::DELETE, ADMIN_BANS, "admin")
}

pub fn build_state(config: &Config, limits: &LimitsFile) -> Result<SharedState, LimiterError> {
    let limiter = Limiter::from_config(config, limits, route_zones())?;
    Ok(Arc::new(AppState::new(limiter)))
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route(PASTES, post(create_paste))
        .route(PASTE, get(get_paste).delete(delete_paste))
        .route(ADMIN_BANS, get(list_bans).post(create_ban).delete(remove_ban))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            route_limit_middleware,
        ))
        // Health and metrics carry no route zone.
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            global_limit_middleware,
        ))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        )
        .with_state(state)
}

/// Builds the router for `config` and `limits`; configuration errors are
/// returned here rather than at request time.
pub fn create_app(config: &Config, limits: &LimitsFile) -> Result<Router, LimiterError> {
    Ok(router(build_state(config, limits)?))
}

pub struct Server {
    state: SharedState,
    bind_addr: SocketAddr,
    cleanup_interval: Duration,
}

impl Server {
    pub fn new(config: Config) -> Result<Self, LimiterError> {
        let limits = config.load_limits()?;
        let state = build_state(&config, &limits)?;

        Ok(Self {
            state,
            bind_addr: config.bind_addr,
            cleanup_interval: config.cleanup_interval(),
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let cleanup = tokio::spawn(prune_idle_state(
            self.state.clone(),
            self.cleanup_interval,
            shutdown_rx,
        ));

        tracing::info!("MystBin limiter listening on {}", self.bind_addr);
        tracing::info!(
            backend = %self.state.limiter.buckets().backend(),
            "Rate limit buckets use the {} strategy",
            self.state.limiter.strategy()
        );

        let app = router(self.state);
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        let _ = shutdown_tx.send(true);
        cleanup.await?;
        Ok(())
    }
}

async fn prune_idle_state(state: SharedState, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let (buckets, ban_lookups) = state.limiter.prune().await;
                if buckets > 0 || ban_lookups > 0 {
                    tracing::debug!(buckets, ban_lookups, "Pruned idle limiter state");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to install signal handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
