//! Approval actions: the decision owed at one level of a request

use crate::{
    ActionId, CompanyId, DelegationId, RequestId, UserId, ValidationError, ValidationResult,
    MAX_SLA_HOURS,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// State of one action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Approved,
    Rejected,
    /// Handed to the next level by an escalation
    Escalated,
    /// Overdue with nowhere left to escalate, or resolved by timeout policy
    Expired,
    /// Closed because the request was cancelled
    Cancelled,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Approved => "approved",
            ActionStatus::Rejected => "rejected",
            ActionStatus::Escalated => "escalated",
            ActionStatus::Expired => "expired",
            ActionStatus::Cancelled => "cancelled",
        }
    }
}

/// Decision an approver hands down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Approve,
    Reject,
}

impl ActionOutcome {
    pub fn action_status(&self) -> ActionStatus {
        match self {
            ActionOutcome::Approve => ActionStatus::Approved,
            ActionOutcome::Reject => ActionStatus::Rejected,
        }
    }
}

/// The action owed by the approver responsible for one level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalAction {
    pub id: ActionId,
    pub company_id: CompanyId,
    pub request_id: RequestId,
    pub level_order: u32,
    pub approver_id: UserId,
    pub status: ActionStatus,
    pub assigned_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub acted_at: Option<DateTime<Utc>>,
    /// Who actually acted: the approver, a delegate, or `None` for the system
    pub acted_by: Option<UserId>,
    /// Delegation the actor relied on, when not the approver
    pub delegation_id: Option<DelegationId>,
    pub comments: Option<String>,
    pub reminded_at: Option<DateTime<Utc>>,
}

impl ApprovalAction {
    /// Open a pending action due `sla_hours` from `now`.
    ///
    /// Fails when the due time falls outside the representable range.
    pub fn open(
        company_id: CompanyId,
        request_id: RequestId,
        level_order: u32,
        approver_id: UserId,
        now: DateTime<Utc>,
        sla_hours: u32,
    ) -> ValidationResult<Self> {
        let due_at = now
            .checked_add_signed(Duration::hours(i64::from(sla_hours)))
            .ok_or(ValidationError::HoursOutOfRange {
                field: "sla_hours",
                hours: sla_hours,
                max: MAX_SLA_HOURS,
            })?;
        Ok(Self {
            id: ActionId::generate(),
            company_id,
            request_id,
            level_order,
            approver_id,
            status: ActionStatus::Pending,
            assigned_at: now,
            due_at,
            acted_at: None,
            acted_by: None,
            delegation_id: None,
            comments: None,
            reminded_at: None,
        })
    }

    pub fn is_pending(&self) -> bool {
        self.status == ActionStatus::Pending
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.due_at < now
    }

    /// Closed copy of this action. Storage applies it only while the stored
    /// row is still pending.
    pub fn closed(
        &self,
        status: ActionStatus,
        acted_by: Option<UserId>,
        delegation_id: Option<DelegationId>,
        comments: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            status,
            acted_at: Some(now),
            acted_by,
            delegation_id,
            comments,
            ..self.clone()
        }
    }
}
