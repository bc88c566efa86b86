use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LimiterError>;

#[derive(Debug, Clone, Error)]
pub enum LimiterError {
    #[error("Rate limit exceeded")]
    QuotaExceeded,

    #[error("Banned from this service{}", reason_suffix(.reason))]
    IdentityBanned { reason: Option<String> },

    #[error("Rate limit store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn reason_suffix(reason: &Option<String>) -> String {
    match reason {
        Some(reason) => format!(": {}", reason),
        None => " for abuse".to_string(),
    }
}

impl LimiterError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            LimiterError::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
            LimiterError::IdentityBanned { .. } => StatusCode::FORBIDDEN,
            LimiterError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            LimiterError::Configuration(_) | LimiterError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            LimiterError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            LimiterError::Unauthorized => StatusCode::UNAUTHORIZED,
            LimiterError::Forbidden(_) => StatusCode::FORBIDDEN,
            LimiterError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            LimiterError::QuotaExceeded => "rate_limit_exceeded",
            LimiterError::IdentityBanned { .. } => "banned",
            LimiterError::StoreUnavailable(_) => "service_unavailable",
            LimiterError::Configuration(_) => "configuration_error",
            LimiterError::Validation(_) => "validation_error",
            LimiterError::Unauthorized => "unauthorized",
            LimiterError::Forbidden(_) => "forbidden",
            LimiterError::NotFound(_) => "not_found",
            LimiterError::Internal(_) => "internal_error",
        }
    }
}

impl From<redis::RedisError> for LimiterError {
    fn from(err: redis::RedisError) -> Self {
        LimiterError::StoreUnavailable(err.to_string())
    }
}

impl From<envconfig::Error> for LimiterError {
    fn from(err: envconfig::Error) -> Self {
        LimiterError::Configuration(err.to_string())
    }
}

impl From<toml::de::Error> for LimiterError {
    fn from(err: toml::de::Error) -> Self {
        LimiterError::Configuration(err.to_string())
    }
}

impl From<validator::ValidationErrors> for LimiterError {
    fn from(err: validator::ValidationErrors) -> Self {
        LimiterError::Validation(err.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }

    pub fn from_error(err: &LimiterError) -> Self {
        Self::new(err.kind(), &err.to_string(), err.status_code().as_u16())
    }
}

impl IntoResponse for LimiterError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Banned callers get a bare text body, everything else the JSON envelope.
        if let LimiterError::IdentityBanned { .. } = self {
            return (
                status,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                self.to_string(),
            )
                .into_response();
        }

        (status, Json(ErrorResponse::from_error(&self))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(LimiterError::QuotaExceeded.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            LimiterError::IdentityBanned { reason: None }.status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(LimiterError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            LimiterError::Validation("bad".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_ban_message_includes_reason() {
        let err = LimiterError::IdentityBanned {
            reason: Some("spam".to_string()),
        };
        assert_eq!(err.to_string(), "Banned from this service: spam");

        let err = LimiterError::IdentityBanned { reason: None };
        assert_eq!(err.to_string(), "Banned from this service for abuse");
    }

    #[test]
    fn test_error_response_envelope() {
        let body = ErrorResponse::from_error(&LimiterError::NotFound("paste abc".into()));
        assert_eq!(body.error, "not_found");
        assert_eq!(body.code, 404);
        assert_eq!(body.message, "Not found: paste abc");
    }
}
