use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Serialize, Clone)]
pub enum ApiError {
    #[error("Internal server error")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Upstream failure: {0}")]
    UpstreamFailure(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Validation(msg) => Self::ValidationError(msg),
            // Ownership never leaks whether the resource exists to a caller who doesn't own it.
            AppError::Ownership(_) | AppError::NotFound(_) => {
                Self::NotFound("resource not found".to_string())
            }
            AppError::Retrieval(msg) => Self::UpstreamFailure(msg),
            AppError::GenerationSpawn(msg) | AppError::GenerationIo(msg) => {
                Self::UpstreamFailure(msg)
            }
            AppError::GenerationTimeout => {
                Self::UpstreamFailure("generation timed out".to_string())
            }
            AppError::GenerationExit(code) => {
                Self::UpstreamFailure(format!("generation subprocess exited with status {code}"))
            }
            AppError::GenerationFormat(msg) => Self::UpstreamFailure(msg),
            AppError::Cancelled => Self::Cancelled,
            AppError::Conflict(msg) => Self::Conflict(msg),
            AppError::Ingestion(_) | AppError::Database(_) | AppError::Io(_) | AppError::Join(_) => {
                tracing::error!(error = %err, "internal error");
                Self::InternalError("Internal server error".to_string())
            }
        }
    }
}
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match self {
            Self::InternalError(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    error: message,
                    status: "error".to_string(),
                },
            ),
            Self::ValidationError(message) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: message,
                    status: "error".to_string(),
                },
            ),
            Self::NotFound(message) => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    error: message,
                    status: "error".to_string(),
                },
            ),
            Self::Unauthorized(message) => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse {
                    error: message,
                    status: "error".to_string(),
                },
            ),
            Self::PayloadTooLarge(message) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                ErrorResponse {
                    error: message,
                    status: "error".to_string(),
                },
            ),
            Self::UpstreamFailure(message) => (
                StatusCode::BAD_GATEWAY,
                ErrorResponse {
                    error: message,
                    status: "error".to_string(),
                },
            ),
            Self::Conflict(message) => (
                StatusCode::CONFLICT,
                ErrorResponse {
                    error: message,
                    status: "error".to_string(),
                },
            ),
            Self::Cancelled => (
                StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                ErrorResponse {
                    error: "request cancelled".to_string(),
                    status: "error".to_string(),
                },
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    error: String,
    status: String,
}
