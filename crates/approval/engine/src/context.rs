//! Shared plumbing for the engine components
//!
//! Every component holds a clone of [`EngineContext`]. The helpers here are
//! the pieces of a transition that more than one component performs:
//! resolving a level's approver, opening its action and parking a request
//! that nobody can take.

use crate::clock::Clock;
use crate::error::{ApprovalError, ApprovalResult};
use crate::notify::Notifier;
use crate::resolver::ApproverResolver;
use approval_store::{ApprovalStore, StoreTransaction};
use approval_types::{
    Actor, ApprovalAction, ApprovalRequest, ApprovalStatus, AuditAction, AuditEntry, UserId,
    ValidationError, ValidationResult, WorkflowTemplate, MAX_SLA_HOURS,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Due window for ad hoc requests and levels beyond the template
    pub default_sla_hours: u32,

    /// Maximum candidates one scan pass works through
    pub batch_size: usize,

    /// Directory role whose members may cancel, suspend, resume, escalate
    /// and reassign any request of their company
    pub admin_role: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_sla_hours: 24,
            batch_size: 100,
            admin_role: "approval_admin".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> ValidationResult<()> {
        if self.default_sla_hours == 0 || self.default_sla_hours > MAX_SLA_HOURS {
            return Err(ValidationError::HoursOutOfRange {
                field: "default_sla_hours",
                hours: self.default_sla_hours,
                max: MAX_SLA_HOURS,
            });
        }
        if self.batch_size == 0 {
            return Err(ValidationError::Invalid("batch_size must be positive".to_string()));
        }
        if self.admin_role.trim().is_empty() {
            return Err(ValidationError::MissingField("admin_role"));
        }
        Ok(())
    }
}

/// Who may perform a manual intervention
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Intervener {
    RequesterOrAdmin,
    Admin,
}

#[derive(Clone)]
pub struct EngineContext {
    pub(crate) store: Arc<dyn ApprovalStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) resolver: ApproverResolver,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) config: EngineConfig,
}

impl EngineContext {
    pub fn new(
        store: Arc<dyn ApprovalStore>,
        clock: Arc<dyn Clock>,
        resolver: ApproverResolver,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            clock,
            resolver,
            notifier,
            config,
        }
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Template of a request as seen by the open transaction. `None` for ad
    /// hoc requests.
    pub(crate) async fn load_template(
        &self,
        tx: &mut dyn StoreTransaction,
        request: &ApprovalRequest,
    ) -> ApprovalResult<Option<WorkflowTemplate>> {
        let Some(template_id) = request.template_id else {
            return Ok(None);
        };
        tx.get_template(template_id)
            .await?
            .map(Some)
            .ok_or_else(|| ApprovalError::TemplateNotFound(template_id.to_string()))
    }

    /// Approver for `level`, or `None` when the request has to be parked.
    ///
    /// An explicit approver wins over the template rule. Directory failures
    /// propagate so the caller's transaction rolls back.
    pub(crate) async fn resolve_level(
        &self,
        template: Option<&WorkflowTemplate>,
        request: &ApprovalRequest,
        level: u32,
        explicit: Option<UserId>,
    ) -> ApprovalResult<Option<UserId>> {
        if let Some(user) = explicit {
            return Ok(Some(user));
        }
        let Some(rule) = template.and_then(|t| t.level(level)).map(|l| &l.approver) else {
            tracing::warn!(
                request_id = %request.id,
                level,
                "No approver rule for level; parking request"
            );
            return Ok(None);
        };

        match self
            .resolver
            .resolve(request.company_id, rule, request.amount, level)
            .await
        {
            Ok(user) => Ok(Some(user)),
            Err(e) if e.is_unresolvable() => {
                tracing::warn!(
                    request_id = %request.id,
                    level,
                    error = %e,
                    "Approver unresolvable; parking request"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Build the pending action for `level` and point the request at it.
    /// The caller persists both and sets the request status.
    pub(crate) fn open_action(
        &self,
        request: &mut ApprovalRequest,
        template: Option<&WorkflowTemplate>,
        level: u32,
        approver: UserId,
        now: DateTime<Utc>,
    ) -> ApprovalResult<ApprovalAction> {
        let sla_hours = template
            .and_then(|t| t.sla_hours_for(level))
            .unwrap_or(self.config.default_sla_hours);
        let action = ApprovalAction::open(
            request.company_id,
            request.id,
            level,
            approver,
            now,
            sla_hours,
        )?;
        request.current_level = level;
        request.sla_breach_at = Some(action.due_at);
        request.updated_at = now;
        Ok(action)
    }

    /// Whether `actor` may run an intervention of the given kind on `request`
    pub(crate) async fn may_intervene(
        &self,
        request: &ApprovalRequest,
        actor: UserId,
        who: Intervener,
    ) -> ApprovalResult<bool> {
        if who == Intervener::RequesterOrAdmin && request.requested_by == actor {
            return Ok(true);
        }
        self.resolver
            .is_member(request.company_id, &self.config.admin_role, actor)
            .await
    }

    /// Append a denied-attempt row in a transaction of its own and return
    /// the error for the caller. The caller must not hold a transaction.
    pub(crate) async fn record_denied(
        &self,
        request: &ApprovalRequest,
        actor: UserId,
        audit_action: AuditAction,
        details: serde_json::Value,
        now: DateTime<Utc>,
    ) -> ApprovalError {
        let denied = ApprovalError::UnauthorizedActor {
            actor,
            request_id: request.id,
        };
        let entry = AuditEntry::for_request(request, audit_action, Actor::User(actor), now)
            .with_new(details);
        let recorded = async {
            let mut tx = self.store.begin().await?;
            tx.append_audit(&entry).await?;
            tx.commit().await
        };
        match recorded.await {
            Ok(()) => denied,
            Err(e) => ApprovalError::Storage(e),
        }
    }

    /// Refused intervention: logged and audited
    pub(crate) async fn deny_intervention(
        &self,
        request: &ApprovalRequest,
        actor: UserId,
        operation: &'static str,
        now: DateTime<Utc>,
    ) -> ApprovalError {
        tracing::warn!(
            request_id = %request.id,
            actor = %actor,
            operation,
            "Unauthorized intervention attempt"
        );
        self.record_denied(
            request,
            actor,
            AuditAction::RequestInterventionDenied,
            serde_json::json!({ "operation": operation, "status": request.status }),
            now,
        )
        .await
    }

    /// Leave the request at `level` with no open action
    pub(crate) fn park(&self, request: &mut ApprovalRequest, level: u32, now: DateTime<Utc>) {
        request.current_level = level;
        request.status = ApprovalStatus::Escalated;
        request.sla_breach_at = None;
        request.updated_at = now;
    }
}
