//! Error types for the approval daemon

use approval_engine::ApprovalError;
use approval_store::StorageError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server startup error
    #[error("Server error: {0}")]
    Server(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// API-specific errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The request is not in a state that allows the operation
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Actor lacks authority over the action
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Engine error
    #[error(transparent)]
    Engine(#[from] ApprovalError),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            ApiError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::Engine(e) => match e {
                ApprovalError::RequestNotFound(_)
                | ApprovalError::TemplateNotFound(_)
                | ApprovalError::DelegationNotFound(_)
                | ApprovalError::Storage(StorageError::NotFound(_)) => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND")
                }
                ApprovalError::InvalidTransition(_) => {
                    (StatusCode::CONFLICT, "INVALID_TRANSITION")
                }
                ApprovalError::UnauthorizedActor { .. } => {
                    (StatusCode::FORBIDDEN, "UNAUTHORIZED_ACTOR")
                }
                ApprovalError::DelegationLimitExceeded { .. } => {
                    (StatusCode::FORBIDDEN, "DELEGATION_LIMIT_EXCEEDED")
                }
                ApprovalError::Validation(_) | ApprovalError::NoApproverResolvable { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR")
                }
                ApprovalError::Storage(StorageError::Conflict(_)) => {
                    (StatusCode::CONFLICT, "CONFLICT")
                }
                ApprovalError::Directory(_) => (StatusCode::BAD_GATEWAY, "DIRECTORY_ERROR"),
                ApprovalError::Storage(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR")
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code, "Request failed");
        }

        let details = match &self {
            ApiError::Engine(ApprovalError::UnauthorizedActor { actor, request_id }) => Some(
                serde_json::json!({ "actor": actor, "request_id": request_id }),
            ),
            _ => None,
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;
