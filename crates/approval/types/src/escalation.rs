//! Escalation records: append-only history of forced level changes

use crate::{CompanyId, EscalationId, RequestId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationType {
    /// Requested by an administrator
    Manual,
    /// Raised by the overdue scan
    Timeout,
}

impl EscalationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationType::Manual => "manual",
            EscalationType::Timeout => "timeout",
        }
    }
}

/// One escalation of a request from `from_level` to `from_level + 1`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalEscalation {
    pub id: EscalationId,
    pub company_id: CompanyId,
    pub request_id: RequestId,
    pub from_level: u32,
    pub to_level: u32,
    pub from_approver_id: UserId,
    /// `None` when nobody could be resolved for the new level
    pub to_approver_id: Option<UserId>,
    pub escalation_type: EscalationType,
    /// `None` for the system
    pub escalated_by: Option<UserId>,
    pub reason: Option<String>,
    pub escalated_at: DateTime<Utc>,
}

impl ApprovalEscalation {
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        company_id: CompanyId,
        request_id: RequestId,
        from_level: u32,
        from_approver_id: UserId,
        to_approver_id: Option<UserId>,
        escalation_type: EscalationType,
        escalated_by: Option<UserId>,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EscalationId::generate(),
            company_id,
            request_id,
            from_level,
            to_level: from_level + 1,
            from_approver_id,
            to_approver_id,
            escalation_type,
            escalated_by,
            reason,
            escalated_at: now,
        }
    }
}
