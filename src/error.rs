//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::DomainError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    // Domain errors, including store failures (5xx)
    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl AppError {
    /// Status code and machine-readable code for this error
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            AppError::UserNotFound(_) => (StatusCode::NOT_FOUND, "USER_NOT_FOUND"),
            AppError::Domain(err) => match err {
                DomainError::InvalidAmount(_) => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
                DomainError::InvalidState(_) => (StatusCode::BAD_REQUEST, "INVALID_STATE"),
                DomainError::InvalidSource(_) => {
                    (StatusCode::BAD_REQUEST, "INVALID_SOURCE_TYPE")
                }
                DomainError::InsufficientBalance { .. } => {
                    (StatusCode::BAD_REQUEST, "INSUFFICIENT_BALANCE")
                }
                DomainError::DuplicateKeyOwnerMismatch { .. } => {
                    (StatusCode::CONFLICT, "DUPLICATE_TRANSACTION")
                }
                DomainError::AccountNotFound(_) => (StatusCode::NOT_FOUND, "USER_NOT_FOUND"),
                DomainError::RecordNotFound(_) => {
                    (StatusCode::NOT_FOUND, "TRANSACTION_NOT_FOUND")
                }
                DomainError::Store(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR")
                }
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let (error, details) = match &self {
            AppError::InvalidRequest(msg) => ("Invalid request".to_string(), Some(msg.clone())),
            AppError::UserNotFound(_) => (self.to_string(), None),
            AppError::Domain(DomainError::Store(e)) => {
                tracing::error!(error = %e, "Store error");
                ("Internal server error".to_string(), None)
            }
            AppError::Domain(err) => (err.to_string(), None),
        };

        let body = ErrorResponse {
            error,
            code: code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}
