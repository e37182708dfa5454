use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("locked: {0}")]
    Locked(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        AppError::Conflict(msg.into())
    }

    pub fn locked(msg: impl Into<String>) -> Self {
        AppError::Locked(msg.into())
    }

    pub fn quota(msg: impl Into<String>) -> Self {
        AppError::QuotaExceeded(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::QuotaExceeded(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Locked(_) => StatusCode::PRECONDITION_FAILED,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Database(_)
            | AppError::Redis(_)
            | AppError::Serialization(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error_type, code, msg) = match &self {
            AppError::Validation(m) => ("invalid_request_error", "validation_failed", m.clone()),
            AppError::NotFound(m) => ("not_found_error", "not_found", m.clone()),
            AppError::Conflict(m) => ("conflict_error", "conflict", m.clone()),
            AppError::Locked(m) => ("locked_error", "secret_locked", m.clone()),
            AppError::QuotaExceeded(m) => ("invalid_request_error", "quota_exceeded", m.clone()),
            AppError::Unauthorized => (
                "authentication_error",
                "unauthorized",
                "invalid or missing admin key".to_string(),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                internal()
            }
            AppError::Redis(e) => {
                tracing::error!("Redis error: {}", e);
                internal()
            }
            AppError::Serialization(e) => {
                tracing::error!("Serialization error: {}", e);
                internal()
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                internal()
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}

fn internal() -> (&'static str, &'static str, String) {
    (
        "internal_error",
        "internal_server_error",
        "internal server error".to_string(),
    )
}
