// crates/server/src/error.rs
use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bizverify_server_jobs::{CancelError, DriveError, ExecutionError, SubmitError, ValidationError};
use serde::Serialize;
use thiserror::Error;

/// Structured JSON error response for API errors
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            message: None,
            field: None,
        }
    }

    pub fn with_message(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::new(error)
        }
    }
}

/// API error types that map to HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Too many in-flight jobs (limit {0})")]
    TooManyJobs(usize),

    #[error("Execution failed: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Operation timed out after {0}s")]
    Timeout(u64),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::TooManyInFlight { limit } => ApiError::TooManyJobs(limit),
        }
    }
}

impl From<CancelError> for ApiError {
    fn from(err: CancelError) -> Self {
        match err {
            CancelError::NotFound(id) => ApiError::JobNotFound(id),
            e @ CancelError::AlreadyFinished { .. } => ApiError::Conflict(e.to_string()),
        }
    }
}

impl From<DriveError> for ApiError {
    fn from(err: DriveError) -> Self {
        match err {
            DriveError::Failed(e) => ApiError::Execution(e),
            DriveError::Cancelled => ApiError::Internal("operation cancelled".to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            ApiError::Validation(err) => {
                tracing::warn!(field = err.field, message = %err.message, "Validation failed");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse {
                        field: Some(err.field.to_string()),
                        ..ErrorResponse::with_message(err.message.clone(), "Validation failed")
                    },
                )
            }
            ApiError::BadRequest(msg) => {
                tracing::warn!(message = %msg, "Bad request");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_message("Bad request", msg.clone()),
                )
            }
            ApiError::JobNotFound(id) => {
                tracing::warn!(job_id = %id, "Job not found");
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::with_message("Job not found", format!("Job ID: {id}")),
                )
            }
            ApiError::Conflict(msg) => {
                tracing::warn!(message = %msg, "Conflict");
                (
                    StatusCode::CONFLICT,
                    ErrorResponse::with_message("Conflict", msg.clone()),
                )
            }
            ApiError::TooManyJobs(limit) => {
                tracing::warn!(limit, "Job pool full");
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    ErrorResponse::with_message(
                        "Too many in-flight jobs",
                        format!("At most {limit} jobs may run at once; retry later"),
                    ),
                )
            }
            ApiError::Execution(err) => {
                tracing::error!(error = %err, "Operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::with_message("Operation failed", err.to_string()),
                )
            }
            ApiError::Timeout(secs) => {
                tracing::error!(timeout_secs = secs, "Operation timed out");
                (
                    StatusCode::GATEWAY_TIMEOUT,
                    ErrorResponse::with_message(
                        "Operation timed out",
                        format!("No result within {secs}s"),
                    ),
                )
            }
            ApiError::Internal(msg) => {
                tracing::error!(message = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("Internal server error"),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
