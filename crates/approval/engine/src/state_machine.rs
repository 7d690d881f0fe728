//! Request state machine: creation, approver actions and manual intervention
//!
//! Every transition runs in one store transaction that locks the request,
//! re-checks its state, writes the change and exactly one audit row, then
//! commits. Notifications go out only after the commit.
//!
//! ```text
//! pending ──approve──▶ in_progress ──approve (last level)──▶ approved
//!    │                     │  ▲
//!    │ escalate            │  │ action opened
//!    ▼                     ▼  │
//! escalated ◀──────────────┘──┘        any live state ──▶ cancelled
//! ```

use crate::context::{EngineContext, Intervener};
use crate::delegation_registry::{consume, DelegationRegistry};
use crate::error::{ApprovalError, ApprovalResult};
use crate::notify::{NotificationEvent, Outbox};
use approval_store::StoreTransaction;
use approval_types::{
    ActionOutcome, ActionStatus, Actor, ApprovalAction, ApprovalEscalation, ApprovalRequest,
    ApprovalStatus, AuditAction, AuditEntry, CompanyId, CompletionType, RequestContext,
    RequestId, TemplateId, UserId, ValidationError,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A request with its full action and escalation history
#[derive(Debug, Clone, Serialize)]
pub struct RequestStatus {
    pub request: ApprovalRequest,
    pub actions: Vec<ApprovalAction>,
    pub escalations: Vec<ApprovalEscalation>,
}

impl RequestStatus {
    pub fn pending_action(&self) -> Option<&ApprovalAction> {
        self.actions.iter().find(|a| a.is_pending())
    }
}

#[derive(Clone)]
pub struct RequestStateMachine {
    ctx: EngineContext,
    delegations: DelegationRegistry,
}

impl RequestStateMachine {
    pub fn new(ctx: EngineContext, delegations: DelegationRegistry) -> Self {
        Self { ctx, delegations }
    }

    // ── Creation ─────────────────────────────────────────────────────

    /// Create a request and open its first action.
    ///
    /// Without a template the context must name the approver. A first level
    /// nobody can take leaves the request parked in `escalated`.
    pub async fn create(
        &self,
        template_id: Option<TemplateId>,
        entity_type: &str,
        entity_id: &str,
        context: RequestContext,
    ) -> ApprovalResult<ApprovalRequest> {
        if entity_type.trim().is_empty() {
            return Err(ValidationError::MissingField("entity_type").into());
        }
        if entity_id.trim().is_empty() {
            return Err(ValidationError::MissingField("entity_id").into());
        }
        if context.amount.is_some_and(|a| a < 0) {
            return Err(ValidationError::Invalid("amount must not be negative".into()).into());
        }

        let now = self.ctx.now();
        let mut tx = self.ctx.store.begin().await?;

        let template = match template_id {
            Some(id) => {
                let template = tx
                    .get_template(id)
                    .await?
                    .ok_or_else(|| ApprovalError::TemplateNotFound(id.to_string()))?;
                if template.company_id != context.company_id {
                    return Err(ApprovalError::TemplateNotFound(id.to_string()));
                }
                if template.entity_type != entity_type {
                    return Err(ValidationError::Invalid(format!(
                        "template {id} approves `{}`, not `{entity_type}`",
                        template.entity_type
                    ))
                    .into());
                }
                Some(template)
            }
            None if context.approver.is_none() => {
                return Err(ValidationError::MissingField("approver").into());
            }
            None => None,
        };

        let mut request = ApprovalRequest::new(template_id, entity_type, entity_id, &context, now);
        let approver = self
            .ctx
            .resolve_level(template.as_ref(), &request, 1, context.approver)
            .await?;
        let action = approver
            .map(|approver| {
                self.ctx
                    .open_action(&mut request, template.as_ref(), 1, approver, now)
            })
            .transpose()?;
        if action.is_none() {
            self.ctx.park(&mut request, 1, now);
        }

        tx.insert_request(&request).await?;
        let mut outbox = Outbox::default();
        if let Some(action) = &action {
            tx.insert_action(action).await?;
            outbox.push(action.approver_id, assigned(action));
        }

        let entry = AuditEntry::for_request(
            &request,
            AuditAction::RequestCreate,
            Actor::User(context.requested_by),
            now,
        )
        .with_new(serde_json::json!({
            "status": request.status,
            "current_level": request.current_level,
            "approver_id": approver,
            "amount": request.amount,
        }));
        tx.append_audit(&entry).await?;
        tx.commit().await?;
        outbox.deliver(self.ctx.notifier.as_ref());

        tracing::info!(
            request_id = %request.id,
            entity_type = %request.entity_type,
            entity_id = %request.entity_id,
            status = %request.status,
            "Approval request created"
        );
        Ok(request)
    }

    // ── Approver Actions ─────────────────────────────────────────────

    /// Approve or reject the open action of a request.
    ///
    /// The actor must be the action's approver or hold an effective
    /// delegation from that approver covering the request's authority and
    /// amount. A denied attempt is audited on its own and changes nothing
    /// else.
    pub async fn act(
        &self,
        request_id: RequestId,
        actor: UserId,
        outcome: ActionOutcome,
        comments: Option<String>,
    ) -> ApprovalResult<ApprovalRequest> {
        let now = self.ctx.now();
        let mut tx = self.ctx.store.begin().await?;
        let mut request = lock_request(tx.as_mut(), request_id).await?;
        if !request.status.is_actionable() {
            return Err(ApprovalError::transition(format!(
                "request {request_id} is {}",
                request.status
            )));
        }
        let action = tx.pending_action(request_id).await?.ok_or_else(|| {
            ApprovalError::transition(format!("request {request_id} has no pending action"))
        })?;

        let delegation = if actor == action.approver_id {
            None
        } else {
            match self
                .delegations
                .find_for_action(tx.as_mut(), &request, action.approver_id, actor, now)
                .await?
            {
                Some(delegation) => Some(delegation),
                None => {
                    drop(tx);
                    return Err(self.deny(&request, &action, actor, outcome, now).await);
                }
            }
        };

        let mut consumed = None;
        if let (Some(delegation), ActionOutcome::Approve, Some(amount)) =
            (&delegation, outcome, request.amount.filter(|a| *a > 0))
        {
            match consume(tx.as_mut(), delegation, amount).await {
                Ok(total) => consumed = Some((amount, total)),
                Err(ApprovalError::DelegationLimitExceeded { .. }) => {
                    drop(tx);
                    return Err(self.deny(&request, &action, actor, outcome, now).await);
                }
                Err(e) => return Err(e),
            }
        }

        let closed = action.closed(
            outcome.action_status(),
            Some(actor),
            delegation.as_ref().map(|d| d.id),
            comments,
            now,
        );
        if !tx.close_action(&closed).await? {
            return Err(ApprovalError::transition(format!(
                "action {} was already closed",
                action.id
            )));
        }

        let template = self.ctx.load_template(tx.as_mut(), &request).await?;
        let old = request.snapshot();
        let mut outbox = Outbox::default();

        let audit_action = match outcome {
            ActionOutcome::Reject => {
                request.complete(ApprovalStatus::Rejected, CompletionType::Rejected, now);
                AuditAction::RequestReject
            }
            ActionOutcome::Approve => {
                let last_level = template
                    .as_ref()
                    .map_or(request.current_level, |t| t.level_count());
                if request.current_level >= last_level {
                    request.complete(ApprovalStatus::Approved, CompletionType::Approved, now);
                } else {
                    let next = request.current_level + 1;
                    let approver = self
                        .ctx
                        .resolve_level(template.as_ref(), &request, next, None)
                        .await?;
                    match approver {
                        Some(approver) => {
                            let action = self.ctx.open_action(
                                &mut request,
                                template.as_ref(),
                                next,
                                approver,
                                now,
                            )?;
                            request.status = ApprovalStatus::InProgress;
                            tx.insert_action(&action).await?;
                            outbox.push(approver, assigned(&action));
                        }
                        None => self.ctx.park(&mut request, next, now),
                    }
                }
                AuditAction::RequestApprove
            }
        };
        request.updated_at = now;
        tx.update_request(&request).await?;

        let mut new = request.snapshot();
        new["action_id"] = serde_json::json!(action.id);
        if let Some(delegation) = &delegation {
            new["delegation_id"] = serde_json::json!(delegation.id);
            new["on_behalf_of"] = serde_json::json!(action.approver_id);
        }
        if let Some((amount, total)) = consumed {
            new["delegated_amount"] = serde_json::json!(amount);
            new["delegation_total_approved"] = serde_json::json!(total);
        }
        let entry = AuditEntry::for_request(&request, audit_action, Actor::User(actor), now)
            .with_old(old)
            .with_new(new);
        tx.append_audit(&entry).await?;
        tx.commit().await?;

        if request.status.is_terminal() {
            outbox.push(request.requested_by, resolved(&request));
        }
        outbox.deliver(self.ctx.notifier.as_ref());

        tracing::info!(
            request_id = %request_id,
            actor = %actor,
            outcome = ?outcome,
            delegated = delegation.is_some(),
            status = %request.status,
            level = request.current_level,
            "Approval action recorded"
        );
        Ok(request)
    }

    /// Record a denied attempt and produce the error for the caller
    async fn deny(
        &self,
        request: &ApprovalRequest,
        action: &ApprovalAction,
        actor: UserId,
        outcome: ActionOutcome,
        now: DateTime<Utc>,
    ) -> ApprovalError {
        tracing::warn!(request_id = %request.id, actor = %actor, "Unauthorized approval attempt");
        self.ctx
            .record_denied(
                request,
                actor,
                AuditAction::RequestActDenied,
                serde_json::json!({
                    "action_id": action.id,
                    "approver_id": action.approver_id,
                    "outcome": outcome,
                }),
                now,
            )
            .await
    }

    // ── Manual Intervention ──────────────────────────────────────────

    /// Cancel a request in any non-terminal state. Only the requester or an
    /// admin may cancel.
    pub async fn cancel(
        &self,
        request_id: RequestId,
        actor: UserId,
        reason: Option<String>,
    ) -> ApprovalResult<ApprovalRequest> {
        let now = self.ctx.now();
        let mut tx = self.ctx.store.begin().await?;
        let mut request = lock_request(tx.as_mut(), request_id).await?;
        if !self
            .ctx
            .may_intervene(&request, actor, Intervener::RequesterOrAdmin)
            .await?
        {
            drop(tx);
            return Err(self.ctx.deny_intervention(&request, actor, "cancel", now).await);
        }
        if request.status.is_terminal() {
            return Err(ApprovalError::transition(format!(
                "request {request_id} is already {}",
                request.status
            )));
        }

        let mut outbox = Outbox::default();
        if let Some(action) = tx.pending_action(request_id).await? {
            let closed = action.closed(
                ActionStatus::Cancelled,
                Some(actor),
                None,
                reason.clone(),
                now,
            );
            tx.close_action(&closed).await?;
            outbox.push(action.approver_id, resolved_as(request_id, ApprovalStatus::Cancelled));
        }

        let old = request.snapshot();
        request.complete(ApprovalStatus::Cancelled, CompletionType::Cancelled, now);
        tx.update_request(&request).await?;
        let mut new = request.snapshot();
        new["reason"] = serde_json::json!(reason);
        let entry =
            AuditEntry::for_request(&request, AuditAction::RequestCancel, Actor::User(actor), now)
                .with_old(old)
                .with_new(new);
        tx.append_audit(&entry).await?;
        tx.commit().await?;
        outbox.deliver(self.ctx.notifier.as_ref());

        tracing::info!(request_id = %request_id, actor = %actor, "Approval request cancelled");
        Ok(request)
    }

    /// Freeze a live request. The scan skips it and nobody may act on it.
    pub async fn suspend(
        &self,
        request_id: RequestId,
        actor: UserId,
        reason: Option<String>,
    ) -> ApprovalResult<ApprovalRequest> {
        self.set_hold(request_id, actor, reason, true).await
    }

    /// Thaw a suspended request
    pub async fn resume(
        &self,
        request_id: RequestId,
        actor: UserId,
        reason: Option<String>,
    ) -> ApprovalResult<ApprovalRequest> {
        self.set_hold(request_id, actor, reason, false).await
    }

    async fn set_hold(
        &self,
        request_id: RequestId,
        actor: UserId,
        reason: Option<String>,
        suspend: bool,
    ) -> ApprovalResult<ApprovalRequest> {
        let now = self.ctx.now();
        let mut tx = self.ctx.store.begin().await?;
        let mut request = lock_request(tx.as_mut(), request_id).await?;
        if !self.ctx.may_intervene(&request, actor, Intervener::Admin).await? {
            drop(tx);
            let operation = if suspend { "suspend" } else { "resume" };
            return Err(self.ctx.deny_intervention(&request, actor, operation, now).await);
        }
        let old = request.snapshot();

        let audit_action = if suspend {
            if !matches!(
                request.status,
                ApprovalStatus::Pending | ApprovalStatus::InProgress | ApprovalStatus::Escalated
            ) {
                return Err(ApprovalError::transition(format!(
                    "cannot suspend request {request_id} in state {}",
                    request.status
                )));
            }
            request.status = ApprovalStatus::Suspended;
            AuditAction::RequestSuspend
        } else {
            if request.status != ApprovalStatus::Suspended {
                return Err(ApprovalError::transition(format!(
                    "request {request_id} is not suspended"
                )));
            }
            request.status = match tx.pending_action(request_id).await? {
                Some(_) => ApprovalStatus::InProgress,
                None => ApprovalStatus::Escalated,
            };
            AuditAction::RequestResume
        };
        request.updated_at = now;
        tx.update_request(&request).await?;

        let mut new = request.snapshot();
        new["reason"] = serde_json::json!(reason);
        let entry = AuditEntry::for_request(&request, audit_action, Actor::User(actor), now)
            .with_old(old)
            .with_new(new);
        tx.append_audit(&entry).await?;
        tx.commit().await?;

        tracing::info!(
            request_id = %request_id,
            actor = %actor,
            status = %request.status,
            "Approval request hold changed"
        );
        Ok(request)
    }

    /// Hand a parked request to a named approver at its current level.
    /// Admins only.
    pub async fn assign_approver(
        &self,
        request_id: RequestId,
        actor: UserId,
        approver: UserId,
        reason: Option<String>,
    ) -> ApprovalResult<ApprovalRequest> {
        let now = self.ctx.now();
        let mut tx = self.ctx.store.begin().await?;
        let mut request = lock_request(tx.as_mut(), request_id).await?;
        if !self.ctx.may_intervene(&request, actor, Intervener::Admin).await? {
            drop(tx);
            return Err(self.ctx.deny_intervention(&request, actor, "assign", now).await);
        }
        if request.status != ApprovalStatus::Escalated {
            return Err(ApprovalError::transition(format!(
                "request {request_id} is {}, only escalated requests take a new approver",
                request.status
            )));
        }
        if tx.pending_action(request_id).await?.is_some() {
            return Err(ApprovalError::transition(format!(
                "request {request_id} already has a pending action"
            )));
        }

        let template = self.ctx.load_template(tx.as_mut(), &request).await?;
        let old = request.snapshot();
        let level = request.current_level;
        let action = self
            .ctx
            .open_action(&mut request, template.as_ref(), level, approver, now)?;
        request.status = ApprovalStatus::InProgress;
        tx.insert_action(&action).await?;
        tx.update_request(&request).await?;

        let mut new = request.snapshot();
        new["approver_id"] = serde_json::json!(approver);
        new["action_id"] = serde_json::json!(action.id);
        new["reason"] = serde_json::json!(reason);
        let entry =
            AuditEntry::for_request(&request, AuditAction::RequestAssign, Actor::User(actor), now)
                .with_old(old)
                .with_new(new);
        tx.append_audit(&entry).await?;
        tx.commit().await?;

        let mut outbox = Outbox::default();
        outbox.push(approver, assigned(&action));
        outbox.deliver(self.ctx.notifier.as_ref());

        tracing::info!(
            request_id = %request_id,
            approver = %approver,
            level,
            "Approver assigned to parked request"
        );
        Ok(request)
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub async fn status(&self, request_id: RequestId) -> ApprovalResult<RequestStatus> {
        let request = self
            .ctx
            .store
            .get_request(request_id)
            .await?
            .ok_or(ApprovalError::RequestNotFound(request_id))?;
        let actions = self.ctx.store.list_actions(request_id).await?;
        let escalations = self.ctx.store.list_escalations(request_id).await?;
        Ok(RequestStatus {
            request,
            actions,
            escalations,
        })
    }

    /// An approver's inbox
    pub async fn pending_actions_for(
        &self,
        company_id: CompanyId,
        approver: UserId,
    ) -> ApprovalResult<Vec<ApprovalAction>> {
        Ok(self
            .ctx
            .store
            .list_pending_for_approver(company_id, approver)
            .await?)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

pub(crate) async fn lock_request(
    tx: &mut dyn StoreTransaction,
    request_id: RequestId,
) -> ApprovalResult<ApprovalRequest> {
    tx.lock_request(request_id)
        .await?
        .ok_or(ApprovalError::RequestNotFound(request_id))
}

pub(crate) fn assigned(action: &ApprovalAction) -> NotificationEvent {
    NotificationEvent::ActionAssigned {
        request_id: action.request_id,
        action_id: action.id,
        level: action.level_order,
        due_at: action.due_at,
    }
}

pub(crate) fn resolved(request: &ApprovalRequest) -> NotificationEvent {
    resolved_as(request.id, request.status)
}

fn resolved_as(request_id: RequestId, status: ApprovalStatus) -> NotificationEvent {
    NotificationEvent::RequestResolved { request_id, status }
}
