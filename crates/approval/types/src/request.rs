//! Approval requests: live instances of a template bound to one document

use crate::{Amount, AuthorityMatrixId, CompanyId, RequestId, TemplateId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Status ───────────────────────────────────────────────────────────

/// Overall state of an approval request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Created, first action open
    Pending,
    /// Past the first level, an action is open
    InProgress,
    /// Escalation recorded and no approver holds the request
    Escalated,
    Approved,
    Rejected,
    Cancelled,
    /// The request can no longer be processed (e.g. its template vanished)
    Failed,
    /// Frozen by an administrator; ignored by the scan
    Suspended,
}

impl ApprovalStatus {
    /// Terminal states never reopen and never get another action
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ApprovalStatus::Approved
                | ApprovalStatus::Rejected
                | ApprovalStatus::Cancelled
                | ApprovalStatus::Failed
        )
    }

    /// States in which the open action may be acted on or escalated
    pub fn is_actionable(&self) -> bool {
        matches!(self, ApprovalStatus::Pending | ApprovalStatus::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::InProgress => "in_progress",
            ApprovalStatus::Escalated => "escalated",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Cancelled => "cancelled",
            ApprovalStatus::Failed => "failed",
            ApprovalStatus::Suspended => "suspended",
        }
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a terminal request got there
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionType {
    Approved,
    Rejected,
    AutoApproved,
    AutoRejected,
    Cancelled,
    Failed,
}

impl CompletionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionType::Approved => "approved",
            CompletionType::Rejected => "rejected",
            CompletionType::AutoApproved => "auto_approved",
            CompletionType::AutoRejected => "auto_rejected",
            CompletionType::Cancelled => "cancelled",
            CompletionType::Failed => "failed",
        }
    }
}

// ── Creation Context ─────────────────────────────────────────────────

/// Caller-supplied context used to resolve the first approver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub company_id: CompanyId,
    pub requested_by: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority_matrix_id: Option<AuthorityMatrixId>,
    /// Approver for ad hoc requests that have no template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver: Option<UserId>,
}

impl RequestContext {
    pub fn new(company_id: CompanyId, requested_by: UserId) -> Self {
        Self {
            company_id,
            requested_by,
            amount: None,
            authority_matrix_id: None,
            approver: None,
        }
    }

    pub fn with_amount(mut self, amount: Amount) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_authority(mut self, authority_matrix_id: AuthorityMatrixId) -> Self {
        self.authority_matrix_id = Some(authority_matrix_id);
        self
    }

    pub fn with_approver(mut self, approver: UserId) -> Self {
        self.approver = Some(approver);
        self
    }
}

// ── Request ──────────────────────────────────────────────────────────

/// A business document travelling through an approval chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: RequestId,
    pub company_id: CompanyId,
    /// `None` for ad hoc requests
    pub template_id: Option<TemplateId>,
    pub entity_type: String,
    pub entity_id: String,
    pub requested_by: UserId,
    pub amount: Option<Amount>,
    pub authority_matrix_id: Option<AuthorityMatrixId>,
    /// Level of the open action, or of the level awaiting an approver
    pub current_level: u32,
    pub status: ApprovalStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completion_type: Option<CompletionType>,
    /// Due time of the open action
    pub sla_breach_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn new(
        template_id: Option<TemplateId>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        context: &RequestContext,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RequestId::generate(),
            company_id: context.company_id,
            template_id,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            requested_by: context.requested_by,
            amount: context.amount,
            authority_matrix_id: context.authority_matrix_id,
            current_level: 1,
            status: ApprovalStatus::Pending,
            started_at: now,
            completed_at: None,
            completion_type: None,
            sla_breach_at: None,
            updated_at: now,
        }
    }

    /// Move into a terminal state
    pub fn complete(
        &mut self,
        status: ApprovalStatus,
        completion_type: CompletionType,
        now: DateTime<Utc>,
    ) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.completion_type = Some(completion_type);
        self.completed_at = Some(now);
        self.sla_breach_at = None;
        self.updated_at = now;
    }

    /// Status and level, as recorded in audit old/new values
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "status": self.status,
            "current_level": self.current_level,
        })
    }
}
