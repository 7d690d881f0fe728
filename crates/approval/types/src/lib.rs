//! Approval domain types
//!
//! Plain data for the approval engine: workflow templates and their levels,
//! live approval requests, the actions owed at each level, delegations of
//! authority, escalation records and the append-only audit log.
//!
//! Entities reference each other by id only. A request never owns its
//! actions; actions and escalations point back at their request.

#![deny(unsafe_code)]

pub mod action;
pub mod audit;
pub mod delegation;
pub mod errors;
pub mod escalation;
pub mod ids;
pub mod request;
pub mod template;

pub use action::{ActionOutcome, ActionStatus, ApprovalAction};
pub use audit::{Actor, ActorType, AuditAction, AuditEntry, TargetType};
pub use delegation::{DelegationMismatch, DelegationType, DoADelegation, NewDelegation};
pub use errors::{ValidationError, ValidationResult};
pub use escalation::{ApprovalEscalation, EscalationType};
pub use ids::{
    ActionId, AuditId, AuthorityMatrixId, CompanyId, DelegationId, EscalationId, RequestId,
    TemplateId, UserId,
};
pub use request::{ApprovalRequest, ApprovalStatus, CompletionType, RequestContext};
pub use template::{
    AmountBand, ApproverRef, ApproverRule, NewTemplate, TimeoutAction, WorkflowLevel,
    WorkflowTemplate, MAX_SLA_HOURS,
};

/// Monetary amount in minor units (paise).
pub type Amount = i64;
