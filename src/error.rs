// src/error.rs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// Errors raised by a running exam session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The chosen option is outside `[0, options.len())` for that question.
    #[error("option {option_index} is out of range for question '{question_id}' ({option_count} options)")]
    InvalidOption {
        question_id: String,
        option_index: usize,
        option_count: usize,
    },

    #[error("question '{0}' is not part of this exam")]
    UnknownQuestion(String),

    /// Answers can only change while the session is active.
    #[error("session is no longer accepting answers")]
    NotActive,

    /// The session was torn down before it produced a submission.
    #[error("session was closed without a submission")]
    Closed,

    #[error("exam cannot be started: {0}")]
    InvalidExam(String),

    /// Saving the submission failed after every attempt. The submission is kept for a manual retry.
    #[error("failed to persist submission after {attempts} attempt(s): {message}")]
    StoragePersistFailure { attempts: u32, message: String },

    #[error("no failed submission to retry")]
    NothingToRetry,
}

/// Errors raised by the storage collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{entity} '{key}' not found")]
    NotFound { entity: &'static str, key: String },

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Global Application Error Enum.
/// Centralizes error handling and mapping to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    // 500 Internal Server Error
    InternalServerError(String),

    // 400 Bad Request
    BadRequest(String),

    // 401 Unauthorized
    AuthError(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict (e.g., answering after the session finalized)
    Conflict(String),

    // 503 Service Unavailable (storage could not take the submission)
    ServiceUnavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for AppError {}

/// Implements `IntoResponse` for `AppError`.
/// Converts the error into a JSON response with appropriate HTTP status code.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::AuthError(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };
        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::InvalidOption { .. }
            | SessionError::UnknownQuestion(_)
            | SessionError::InvalidExam(_) => AppError::BadRequest(err.to_string()),
            SessionError::NotActive | SessionError::Closed | SessionError::NothingToRetry => {
                AppError::Conflict(err.to_string())
            }
            SessionError::StoragePersistFailure { .. } => {
                AppError::ServiceUnavailable(err.to_string())
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => AppError::NotFound(err.to_string()),
            StoreError::Backend(msg) => AppError::InternalServerError(msg),
        }
    }
}
