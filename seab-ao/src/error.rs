//! API error types for seab-ao

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use seab_common::envelope::EnvelopeError;
use serde_json::json;
use thiserror::Error;

/// API error type
///
/// The status mapping follows the redelivery contract: 4xx for messages the
/// broker must not retry (malformed), 5xx for messages the service has not
/// durably processed and wants redelivered.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Unreadable envelope or missing required field (400)
    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    /// Internal server error (500); the broker will redeliver
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Shared-library error
    #[error("Common error: {0}")]
    Common(#[from] seab_common::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Envelope(ref err) => {
                (StatusCode::BAD_REQUEST, "BAD_ENVELOPE", err.to_string())
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                err.to_string(),
            ),
            ApiError::Other(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
