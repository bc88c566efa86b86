use serde::Serialize;

use crate::bans::Ban;

#[derive(Debug, Clone, Serialize)]
pub struct PasteResponse {
    pub id: String,
    pub filename: Option<String>,
    pub content: String,
    pub created_at: u64,
}

#[derive(Debug, Serialize)]
pub struct BanListResponse {
    pub bans: Vec<Ban>,
    pub count: usize,
}

impl BanListResponse {
    pub fn new(bans: Vec<Ban>) -> Self {
        Self {
            count: bans.len(),
            bans,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BanResponse {
    pub message: String,
    pub ban: Ban,
}

impl BanResponse {
    pub fn created(ban: Ban) -> Self {
        Self {
            message: "Ban created".to_string(),
            ban,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub backend: String,
    pub store: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ReadinessResponse {
    pub fn connected(backend: &str) -> Self {
        Self {
            status: "ready".to_string(),
            backend: backend.to_string(),
            store: "connected".to_string(),
            note: None,
        }
    }

    pub fn disconnected(backend: &str) -> Self {
        Self {
            status: "ready".to_string(),
            backend: backend.to_string(),
            store: "disconnected".to_string(),
            note: Some("Rate limits are not enforced until the store is back".to_string()),
        }
    }
}
