//! Audit log entries
//!
//! The audit log is write-only. Every state change in the engine appends
//! exactly one entry in the same transaction as the change itself.

use crate::request::ApprovalRequest;
use crate::{AuditId, CompanyId, RequestId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Event Names ──────────────────────────────────────────────────────

/// Closed set of audited events, rendered as dotted names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    #[serde(rename = "request.create")]
    RequestCreate,
    #[serde(rename = "request.approve")]
    RequestApprove,
    #[serde(rename = "request.reject")]
    RequestReject,
    #[serde(rename = "request.escalate")]
    RequestEscalate,
    #[serde(rename = "request.escalation_exhausted")]
    RequestEscalationExhausted,
    #[serde(rename = "request.auto_approve")]
    RequestAutoApprove,
    #[serde(rename = "request.auto_reject")]
    RequestAutoReject,
    #[serde(rename = "request.cancel")]
    RequestCancel,
    #[serde(rename = "request.suspend")]
    RequestSuspend,
    #[serde(rename = "request.resume")]
    RequestResume,
    #[serde(rename = "request.assign")]
    RequestAssign,
    #[serde(rename = "request.fail")]
    RequestFail,
    #[serde(rename = "request.act_denied")]
    RequestActDenied,
    #[serde(rename = "request.intervention_denied")]
    RequestInterventionDenied,
    #[serde(rename = "action.remind")]
    ActionRemind,
    #[serde(rename = "delegation.create")]
    DelegationCreate,
    #[serde(rename = "delegation.revoke")]
    DelegationRevoke,
    #[serde(rename = "delegation.expire")]
    DelegationExpire,
    #[serde(rename = "delegation.consume")]
    DelegationConsume,
    #[serde(rename = "template.register")]
    TemplateRegister,
}

impl AuditAction {
    pub const ALL: [AuditAction; 20] = [
        AuditAction::RequestCreate,
        AuditAction::RequestApprove,
        AuditAction::RequestReject,
        AuditAction::RequestEscalate,
        AuditAction::RequestEscalationExhausted,
        AuditAction::RequestAutoApprove,
        AuditAction::RequestAutoReject,
        AuditAction::RequestCancel,
        AuditAction::RequestSuspend,
        AuditAction::RequestResume,
        AuditAction::RequestAssign,
        AuditAction::RequestFail,
        AuditAction::RequestActDenied,
        AuditAction::RequestInterventionDenied,
        AuditAction::ActionRemind,
        AuditAction::DelegationCreate,
        AuditAction::DelegationRevoke,
        AuditAction::DelegationExpire,
        AuditAction::DelegationConsume,
        AuditAction::TemplateRegister,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::RequestCreate => "request.create",
            AuditAction::RequestApprove => "request.approve",
            AuditAction::RequestReject => "request.reject",
            AuditAction::RequestEscalate => "request.escalate",
            AuditAction::RequestEscalationExhausted => "request.escalation_exhausted",
            AuditAction::RequestAutoApprove => "request.auto_approve",
            AuditAction::RequestAutoReject => "request.auto_reject",
            AuditAction::RequestCancel => "request.cancel",
            AuditAction::RequestSuspend => "request.suspend",
            AuditAction::RequestResume => "request.resume",
            AuditAction::RequestAssign => "request.assign",
            AuditAction::RequestFail => "request.fail",
            AuditAction::RequestActDenied => "request.act_denied",
            AuditAction::RequestInterventionDenied => "request.intervention_denied",
            AuditAction::ActionRemind => "action.remind",
            AuditAction::DelegationCreate => "delegation.create",
            AuditAction::DelegationRevoke => "delegation.revoke",
            AuditAction::DelegationExpire => "delegation.expire",
            AuditAction::DelegationConsume => "delegation.consume",
            AuditAction::TemplateRegister => "template.register",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == name)
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Actors and Targets ───────────────────────────────────────────────

/// Who caused an audited change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    User(UserId),
    System,
}

impl Actor {
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Actor::User(id) => Some(*id),
            Actor::System => None,
        }
    }

    pub fn actor_type(&self) -> ActorType {
        match self {
            Actor::User(_) => ActorType::User,
            Actor::System => ActorType::System,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    User,
    System,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::User => "user",
            ActorType::System => "system",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Request,
    Action,
    Delegation,
    Template,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Request => "request",
            TargetType::Action => "action",
            TargetType::Delegation => "delegation",
            TargetType::Template => "template",
        }
    }
}

// ── Entry ────────────────────────────────────────────────────────────

/// One row of the audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditId,
    pub company_id: CompanyId,
    /// `None` for delegation and template events
    pub request_id: Option<RequestId>,
    pub action: AuditAction,
    pub actor_id: Option<UserId>,
    pub actor_type: ActorType,
    pub target_type: TargetType,
    pub target_id: Uuid,
    pub old_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        company_id: CompanyId,
        action: AuditAction,
        actor: Actor,
        target_type: TargetType,
        target_id: Uuid,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AuditId::generate(),
            company_id,
            request_id: None,
            action,
            actor_id: actor.user_id(),
            actor_type: actor.actor_type(),
            target_type,
            target_id,
            old_values: None,
            new_values: None,
            created_at: now,
        }
    }

    /// Entry targeting a request
    pub fn for_request(
        request: &ApprovalRequest,
        action: AuditAction,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new(
            request.company_id,
            action,
            actor,
            TargetType::Request,
            *request.id.as_uuid(),
            now,
        )
        .with_request(request.id)
    }

    pub fn with_request(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn with_old(mut self, old_values: serde_json::Value) -> Self {
        self.old_values = Some(old_values);
        self
    }

    pub fn with_new(mut self, new_values: serde_json::Value) -> Self {
        self.new_values = Some(new_values);
        self
    }
}
