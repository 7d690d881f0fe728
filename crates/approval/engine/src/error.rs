use approval_store::StorageError;
use approval_types::{DelegationId, RequestId, UserId, ValidationError};
use thiserror::Error;

/// Result type for engine operations
pub type ApprovalResult<T> = Result<T, ApprovalError>;

/// Errors surfaced by the approval engine
#[derive(Debug, Error)]
pub enum ApprovalError {
    /// The request or action is not in a state that allows the operation
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("user {actor} may not act on request {request_id}")]
    UnauthorizedActor { actor: UserId, request_id: RequestId },

    /// Parks the request; never fails it
    #[error("no approver resolvable for level {level}: {reason}")]
    NoApproverResolvable { level: u32, reason: String },

    #[error("delegation {delegation_id} limit exceeded: {reason}")]
    DelegationLimitExceeded {
        delegation_id: DelegationId,
        reason: String,
    },

    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("request not found: {0}")]
    RequestNotFound(RequestId),

    #[error("delegation not found: {0}")]
    DelegationNotFound(DelegationId),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("directory lookup failed: {0}")]
    Directory(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ApprovalError {
    pub(crate) fn transition(msg: impl Into<String>) -> Self {
        ApprovalError::InvalidTransition(msg.into())
    }

    /// Errors that park a request instead of failing the operation. A
    /// directory outage is not one of them.
    pub fn is_unresolvable(&self) -> bool {
        matches!(self, ApprovalError::NoApproverResolvable { .. })
    }
}
