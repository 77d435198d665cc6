use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::recovery::{RecoveryError, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad Request: {0}")]
    BadRequest(String),
    #[error("Validation failed on {field}: {message}")]
    Validation { field: String, message: String },
    #[error("Rate Limited: {0}")]
    RateLimited(String),
    #[error("Internal Error: {0}")]
    Internal(String),
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::Validation { field, message } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "error": message, "field": field }),
            ),
            AppError::RateLimited(msg) => (StatusCode::TOO_MANY_REQUESTS, json!({ "error": msg })),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal server error" }),
                )
            }
            AppError::Database(err) => {
                tracing::error!("Database error: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal server error" }),
                )
            }
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<RecoveryError> for AppError {
    fn from(err: RecoveryError) -> Self {
        match err {
            RecoveryError::Validation { field, message } => AppError::Validation {
                field: field.to_string(),
                message,
            },
            RecoveryError::Rejected(reason) => AppError::BadRequest(reason.message().to_string()),
            RecoveryError::Store(StoreError::Database(e)) => AppError::Database(e),
            other => AppError::Internal(other.to_string()),
        }
    }
}
