use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::bans::Ban;
use crate::error::LimiterError;
use crate::health::HealthChecker;
use crate::limiter::{Caller, Limiter};
use crate::response::{BanListResponse, BanResponse, PasteResponse, ReadinessResponse};

/// Shared application state
pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub limiter: Limiter,
    pub pastes: RwLock<HashMap<String, PasteResponse>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(limiter: Limiter) -> Self {
        Self {
            limiter,
            pastes: RwLock::new(HashMap::new()),
            started_at: Instant::now(),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePasteRequest {
    #[validate(length(min = 1, max = 128))]
    pub filename: Option<String>,
    #[validate(length(min = 1, max = 300000))]
    pub content: String,
}

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "validate_ban_target"))]
pub struct BanRequest {
    #[validate(ip)]
    pub ip: Option<String>,
    #[validate(range(min = 1))]
    pub user_id: Option<i64>,
    #[validate(length(max = 512))]
    pub reason: Option<String>,
}

fn validate_ban_target(request: &BanRequest) -> Result<(), ValidationError> {
    if request.ip.is_none() && request.user_id.is_none() {
        return Err(ValidationError::new("ban_target")
            .with_message("either 'ip' or 'user_id' is required".into()));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct UnbanParams {
    pub ip: Option<String>,
    pub user_id: Option<i64>,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Create a paste
pub async fn create_paste(
    State(state): State<SharedState>,
    Json(payload): Json<CreatePasteRequest>,
) -> Result<impl IntoResponse, LimiterError> {
    payload.validate()?;

    let paste = PasteResponse {
        id: Uuid::new_v4().simple().to_string(),
        filename: payload.filename,
        content: payload.content,
        created_at: unix_now(),
    };
    state
        .pastes
        .write()
        .await
        .insert(paste.id.clone(), paste.clone());

    Ok((StatusCode::CREATED, Json(paste)))
}

/// Fetch a paste by id
pub async fn get_paste(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, LimiterError> {
    let pastes = state.pastes.read().await;
    let paste = pastes
        .get(&id)
        .cloned()
        .ok_or_else(|| LimiterError::NotFound(format!("paste {}", id)))?;
    Ok(Json(paste))
}

/// Delete a paste by id
pub async fn delete_paste(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, LimiterError> {
    match state.pastes.write().await.remove(&id) {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(LimiterError::NotFound(format!("paste {}", id))),
    }
}

fn require_admin(caller: Option<Extension<Caller>>) -> Result<Caller, LimiterError> {
    let Extension(caller) = caller.ok_or(LimiterError::Unauthorized)?;
    match &caller.user {
        None => Err(LimiterError::Unauthorized),
        Some(user) if !user.admin => Err(LimiterError::Forbidden(
            "admin access required".to_string(),
        )),
        Some(_) => Ok(caller),
    }
}

/// List current bans
pub async fn list_bans(
    State(state): State<SharedState>,
    caller: Option<Extension<Caller>>,
) -> Result<impl IntoResponse, LimiterError> {
    require_admin(caller)?;
    let bans = state.limiter.list_bans().await?;
    Ok(Json(BanListResponse::new(bans)))
}

/// Ban an address and/or a user id
pub async fn create_ban(
    State(state): State<SharedState>,
    caller: Option<Extension<Caller>>,
    Json(payload): Json<BanRequest>,
) -> Result<impl IntoResponse, LimiterError> {
    let admin = require_admin(caller)?;
    payload.validate()?;

    let ban = Ban {
        ip: payload.ip,
        user_id: payload.user_id,
        reason: payload.reason,
    };
    state.limiter.ban(ban.clone()).await?;

    info!(
        admin = ?admin.user.as_ref().map(|u| u.id),
        ip = ?ban.ip,
        user_id = ?ban.user_id,
        "Ban created"
    );

    Ok((StatusCode::CREATED, Json(BanResponse::created(ban))))
}

/// Lift bans matching `ip` or `user_id`
pub async fn remove_ban(
    State(state): State<SharedState>,
    caller: Option<Extension<Caller>>,
    Query(params): Query<UnbanParams>,
) -> Result<impl IntoResponse, LimiterError> {
    require_admin(caller)?;
    if params.ip.is_none() && params.user_id.is_none() {
        return Err(LimiterError::Validation(
            "either 'ip' or 'user_id' is required".to_string(),
        ));
    }

    let removed = state
        .limiter
        .unban(params.ip.as_deref(), params.user_id)
        .await?;
    if removed.is_empty() {
        return Err(LimiterError::NotFound("no matching ban".to_string()));
    }

    info!(removed = removed.len(), "Bans lifted");
    Ok(StatusCode::NO_CONTENT)
}

/// Health check endpoint
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    let checker = HealthChecker::new(state.limiter.buckets(), state.started_at);
    Json(checker.check_health().await)
}

/// Readiness check endpoint
pub async fn readiness_check(State(state): State<SharedState>) -> impl IntoResponse {
    let store = state.limiter.buckets();
    let backend = store.backend().to_string();

    // Fail-open: the service stays ready without its store.
    let body = match store.ping().await {
        Ok(()) => ReadinessResponse::connected(&backend),
        Err(_) => ReadinessResponse::disconnected(&backend),
    };
    (StatusCode::OK, Json(body))
}

/// Per-zone admission counters
pub async fn metrics(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.limiter.metrics().snapshot().await)
}
