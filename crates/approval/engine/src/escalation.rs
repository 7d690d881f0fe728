//! Escalation engine: manual escalation, timeout escalation, timeout
//! resolution and due-soon reminders
//!
//! The scan passes are idempotent. Candidates come from unlocked store
//! reads and every one is re-checked under the request lock by the
//! transaction that acts on it, so two scans racing over the same overdue
//! action escalate it once.

use crate::context::{EngineContext, Intervener};
use crate::error::{ApprovalError, ApprovalResult};
use crate::notify::{NotificationEvent, Outbox};
use crate::state_machine::{assigned, lock_request, resolved};
use approval_store::StoreTransaction;
use approval_types::{
    ActionId, ActionOutcome, ActionStatus, Actor, ApprovalAction, ApprovalEscalation,
    ApprovalRequest, ApprovalStatus, AuditAction, AuditEntry, CompanyId, CompletionType,
    EscalationType, RequestId, TargetType, UserId, WorkflowTemplate,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Counters from one or more scan passes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    /// Candidates examined
    pub processed: u64,
    /// Requests moved to the next level
    pub escalated: u64,
    /// Requests parked because escalation ran out
    pub exhausted: u64,
    /// Requests auto-approved or auto-rejected
    pub resolved: u64,
    pub reminded: u64,
    pub delegations_expired: u64,
    /// Requests moved to `failed`
    pub failed: u64,
    /// Candidates whose transition errored and was rolled back
    pub errors: u64,
}

impl ScanStats {
    pub fn merge(&mut self, other: &ScanStats) {
        self.processed += other.processed;
        self.escalated += other.escalated;
        self.exhausted += other.exhausted;
        self.resolved += other.resolved;
        self.reminded += other.reminded;
        self.delegations_expired += other.delegations_expired;
        self.failed += other.failed;
        self.errors += other.errors;
    }

    /// Whether the pass changed anything
    pub fn changed(&self) -> bool {
        self.escalated
            + self.exhausted
            + self.resolved
            + self.reminded
            + self.delegations_expired
            + self.failed
            > 0
    }
}

/// What happened to one scan candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Escalated,
    Exhausted,
    Resolved,
    Reminded,
    Failed,
    /// No longer eligible once locked
    Skipped,
}

impl ScanStats {
    fn record(&mut self, outcome: ApprovalResult<Outcome>, candidate: RequestId) {
        self.processed += 1;
        match outcome {
            Ok(Outcome::Escalated) => self.escalated += 1,
            Ok(Outcome::Exhausted) => self.exhausted += 1,
            Ok(Outcome::Resolved) => self.resolved += 1,
            Ok(Outcome::Reminded) => self.reminded += 1,
            Ok(Outcome::Failed) => self.failed += 1,
            Ok(Outcome::Skipped) => {}
            Err(e) => {
                self.errors += 1;
                tracing::warn!(request_id = %candidate, error = %e, "Scan transition failed");
            }
        }
    }
}

#[derive(Clone)]
pub struct EscalationEngine {
    ctx: EngineContext,
}

impl EscalationEngine {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    // ── Manual ───────────────────────────────────────────────────────

    /// Push a live request to its next level.
    ///
    /// Admins only. The new level goes to `to_approver` when given, else to
    /// the template's approver for that level. With nobody available the
    /// request stays `escalated` without an action.
    pub async fn manual_escalate(
        &self,
        request_id: RequestId,
        escalated_by: UserId,
        to_approver: Option<UserId>,
        reason: Option<String>,
    ) -> ApprovalResult<ApprovalRequest> {
        let now = self.ctx.now();
        let mut tx = self.ctx.store.begin().await?;
        let mut request = lock_request(tx.as_mut(), request_id).await?;
        if !self
            .ctx
            .may_intervene(&request, escalated_by, Intervener::Admin)
            .await?
        {
            drop(tx);
            return Err(self
                .ctx
                .deny_intervention(&request, escalated_by, "escalate", now)
                .await);
        }
        if !request.status.is_actionable() {
            return Err(ApprovalError::transition(format!(
                "request {request_id} is {} and cannot be escalated",
                request.status
            )));
        }
        let action = tx.pending_action(request_id).await?.ok_or_else(|| {
            ApprovalError::transition(format!("request {request_id} has no pending action"))
        })?;
        let template = self.ctx.load_template(tx.as_mut(), &request).await?;

        let mut outbox = Outbox::default();
        self.escalate_locked(
            tx.as_mut(),
            &mut request,
            &action,
            template.as_ref(),
            Escalation {
                kind: EscalationType::Manual,
                actor: Actor::User(escalated_by),
                to_approver,
                reason,
            },
            now,
            &mut outbox,
        )
        .await?;
        tx.commit().await?;
        outbox.deliver(self.ctx.notifier.as_ref());

        Ok(request)
    }

    // ── Timeout Escalation ───────────────────────────────────────────

    /// Escalate overdue actions whose template escalates on timeout
    #[tracing::instrument(skip(self))]
    pub async fn auto_escalate_overdue(
        &self,
        company_id: Option<CompanyId>,
    ) -> ApprovalResult<ScanStats> {
        let now = self.ctx.now();
        let candidates = self
            .ctx
            .store
            .find_overdue_actions(company_id, now, self.ctx.config.batch_size)
            .await?;

        let mut stats = ScanStats::default();
        for candidate in candidates {
            let outcome = self.escalate_overdue(candidate.request_id, candidate.id, now).await;
            stats.record(outcome, candidate.request_id);
        }
        if stats.changed() {
            tracing::info!(?stats, "Overdue escalation pass finished");
        }
        Ok(stats)
    }

    async fn escalate_overdue(
        &self,
        request_id: RequestId,
        action_id: ActionId,
        now: DateTime<Utc>,
    ) -> ApprovalResult<Outcome> {
        let mut tx = self.ctx.store.begin().await?;
        let Some(mut request) = tx.lock_request(request_id).await? else {
            return Ok(Outcome::Skipped);
        };
        if !request.status.is_actionable() {
            return Ok(Outcome::Skipped);
        }
        let Some(action) = tx.pending_action(request_id).await? else {
            return Ok(Outcome::Skipped);
        };
        if action.id != action_id || !action.is_overdue(now) {
            return Ok(Outcome::Skipped);
        }
        let template = match self.ctx.load_template(tx.as_mut(), &request).await {
            Ok(Some(template)) => template,
            Ok(None) => return Ok(Outcome::Skipped),
            Err(ApprovalError::TemplateNotFound(_)) => {
                self.fail_locked(tx.as_mut(), &mut request, "workflow template missing", now)
                    .await?;
                tx.commit().await?;
                return Ok(Outcome::Failed);
            }
            Err(e) => return Err(e),
        };
        if !template.escalates_on_timeout() {
            return Ok(Outcome::Skipped);
        }

        let count = tx.count_escalations(request_id).await?;
        if template.escalation_exhausted(request.current_level, count) {
            if template.timeout_resolution().is_some() {
                // Timeout policy takes over once escalation is exhausted.
                return Ok(Outcome::Skipped);
            }
            self.exhaust_locked(tx.as_mut(), &mut request, &action, count, now)
                .await?;
            tx.commit().await?;
            return Ok(Outcome::Exhausted);
        }

        let mut outbox = Outbox::default();
        self.escalate_locked(
            tx.as_mut(),
            &mut request,
            &action,
            Some(&template),
            Escalation {
                kind: EscalationType::Timeout,
                actor: Actor::System,
                to_approver: None,
                reason: Some(format!("SLA breached at {}", action.due_at)),
            },
            now,
            &mut outbox,
        )
        .await?;
        tx.commit().await?;
        outbox.deliver(self.ctx.notifier.as_ref());
        Ok(Outcome::Escalated)
    }

    // ── Timeout Resolution ───────────────────────────────────────────

    /// Auto-approve or auto-reject breached requests whose template says so
    #[tracing::instrument(skip(self))]
    pub async fn process_timeout_actions(
        &self,
        company_id: Option<CompanyId>,
    ) -> ApprovalResult<ScanStats> {
        let now = self.ctx.now();
        let candidates = self
            .ctx
            .store
            .find_breached_requests(company_id, now, self.ctx.config.batch_size)
            .await?;

        let mut stats = ScanStats::default();
        for candidate in candidates {
            let outcome = self.resolve_breached(candidate.id, now).await;
            stats.record(outcome, candidate.id);
        }
        if stats.changed() {
            tracing::info!(?stats, "Timeout resolution pass finished");
        }
        Ok(stats)
    }

    async fn resolve_breached(
        &self,
        request_id: RequestId,
        now: DateTime<Utc>,
    ) -> ApprovalResult<Outcome> {
        let mut tx = self.ctx.store.begin().await?;
        let Some(mut request) = tx.lock_request(request_id).await? else {
            return Ok(Outcome::Skipped);
        };
        if !request.status.is_actionable() || !request.sla_breach_at.is_some_and(|at| at < now) {
            return Ok(Outcome::Skipped);
        }
        let template = match self.ctx.load_template(tx.as_mut(), &request).await {
            Ok(Some(template)) => template,
            Ok(None) => return Ok(Outcome::Skipped),
            Err(ApprovalError::TemplateNotFound(_)) => {
                self.fail_locked(tx.as_mut(), &mut request, "workflow template missing", now)
                    .await?;
                tx.commit().await?;
                return Ok(Outcome::Failed);
            }
            Err(e) => return Err(e),
        };
        let Some(resolution) = template.timeout_resolution() else {
            return Ok(Outcome::Skipped);
        };
        if template.escalates_on_timeout() {
            let count = tx.count_escalations(request_id).await?;
            if !template.escalation_exhausted(request.current_level, count) {
                return Ok(Outcome::Skipped);
            }
        }

        if let Some(action) = tx.pending_action(request_id).await? {
            let closed = action.closed(
                ActionStatus::Expired,
                None,
                None,
                Some("resolved by timeout policy".to_string()),
                now,
            );
            tx.close_action(&closed).await?;
        }

        let old = request.snapshot();
        let audit_action = match resolution {
            ActionOutcome::Approve => {
                request.complete(ApprovalStatus::Approved, CompletionType::AutoApproved, now);
                AuditAction::RequestAutoApprove
            }
            ActionOutcome::Reject => {
                request.complete(ApprovalStatus::Rejected, CompletionType::AutoRejected, now);
                AuditAction::RequestAutoReject
            }
        };
        tx.update_request(&request).await?;
        let entry = AuditEntry::for_request(&request, audit_action, Actor::System, now)
            .with_old(old)
            .with_new(request.snapshot());
        tx.append_audit(&entry).await?;
        tx.commit().await?;

        let mut outbox = Outbox::default();
        outbox.push(request.requested_by, resolved(&request));
        outbox.deliver(self.ctx.notifier.as_ref());

        tracing::info!(
            request_id = %request_id,
            status = %request.status,
            "Request resolved by timeout policy"
        );
        Ok(Outcome::Resolved)
    }

    // ── Reminders ────────────────────────────────────────────────────

    /// Remind approvers whose actions fall due within `window`
    #[tracing::instrument(skip(self))]
    pub async fn send_due_reminders(
        &self,
        company_id: Option<CompanyId>,
        window: Duration,
    ) -> ApprovalResult<ScanStats> {
        let now = self.ctx.now();
        let candidates = self
            .ctx
            .store
            .find_due_soon(company_id, now, now + window, self.ctx.config.batch_size)
            .await?;

        let mut stats = ScanStats::default();
        for candidate in candidates {
            let outcome = self.remind(&candidate, now).await;
            stats.record(outcome, candidate.request_id);
        }
        Ok(stats)
    }

    async fn remind(&self, action: &ApprovalAction, now: DateTime<Utc>) -> ApprovalResult<Outcome> {
        let mut tx = self.ctx.store.begin().await?;
        let Some(request) = tx.lock_request(action.request_id).await? else {
            return Ok(Outcome::Skipped);
        };
        if !request.status.is_actionable() || !tx.mark_reminded(action.id, now).await? {
            return Ok(Outcome::Skipped);
        }

        let entry = AuditEntry::new(
            action.company_id,
            AuditAction::ActionRemind,
            Actor::System,
            TargetType::Action,
            *action.id.as_uuid(),
            now,
        )
        .with_request(action.request_id)
        .with_new(serde_json::json!({
            "approver_id": action.approver_id,
            "due_at": action.due_at,
            "reminded_at": now,
        }));
        tx.append_audit(&entry).await?;
        tx.commit().await?;

        self.ctx.notifier.notify(
            action.approver_id,
            &NotificationEvent::ActionReminder {
                request_id: action.request_id,
                action_id: action.id,
                due_at: action.due_at,
            },
        );
        Ok(Outcome::Reminded)
    }

    // ── Transitions ──────────────────────────────────────────────────

    /// Close `action` as escalated, record the escalation and open the next
    /// level (or park). Caller holds the request lock and commits.
    #[allow(clippy::too_many_arguments)]
    async fn escalate_locked(
        &self,
        tx: &mut dyn StoreTransaction,
        request: &mut ApprovalRequest,
        action: &ApprovalAction,
        template: Option<&WorkflowTemplate>,
        escalation: Escalation,
        now: DateTime<Utc>,
        outbox: &mut Outbox,
    ) -> ApprovalResult<()> {
        let closed = action.closed(
            ActionStatus::Escalated,
            escalation.actor.user_id(),
            None,
            escalation.reason.clone(),
            now,
        );
        if !tx.close_action(&closed).await? {
            return Err(ApprovalError::transition(format!(
                "action {} was already closed",
                action.id
            )));
        }

        let old = request.snapshot();
        let from = request.current_level;
        let to = from + 1;
        request.status = ApprovalStatus::Escalated;

        let approver = self
            .ctx
            .resolve_level(template, request, to, escalation.to_approver)
            .await?;
        match approver {
            Some(approver) => {
                let next = self.ctx.open_action(request, template, to, approver, now)?;
                request.status = ApprovalStatus::InProgress;
                tx.insert_action(&next).await?;
                outbox.push(approver, assigned(&next));
            }
            None => self.ctx.park(request, to, now),
        }

        let record = ApprovalEscalation::record(
            request.company_id,
            request.id,
            from,
            action.approver_id,
            approver,
            escalation.kind,
            escalation.actor.user_id(),
            escalation.reason,
            now,
        );
        tx.insert_escalation(&record).await?;
        tx.update_request(request).await?;

        let mut new = request.snapshot();
        new["escalation_id"] = serde_json::json!(record.id);
        new["escalation_type"] = serde_json::json!(record.escalation_type);
        new["to_approver_id"] = serde_json::json!(approver);
        let entry =
            AuditEntry::for_request(request, AuditAction::RequestEscalate, escalation.actor, now)
                .with_old(old)
                .with_new(new);
        tx.append_audit(&entry).await?;

        outbox.push(
            action.approver_id,
            NotificationEvent::RequestEscalated {
                request_id: request.id,
                from_level: from,
                to_level: to,
            },
        );

        tracing::info!(
            request_id = %request.id,
            from_level = from,
            to_level = to,
            escalation_type = record.escalation_type.as_str(),
            parked = approver.is_none(),
            "Request escalated"
        );
        Ok(())
    }

    /// Expire the overdue action and park the request for manual handling
    async fn exhaust_locked(
        &self,
        tx: &mut dyn StoreTransaction,
        request: &mut ApprovalRequest,
        action: &ApprovalAction,
        escalation_count: u32,
        now: DateTime<Utc>,
    ) -> ApprovalResult<()> {
        let closed = action.closed(ActionStatus::Expired, None, None, None, now);
        if !tx.close_action(&closed).await? {
            return Err(ApprovalError::transition(format!(
                "action {} was already closed",
                action.id
            )));
        }

        let old = request.snapshot();
        let level = request.current_level;
        self.ctx.park(request, level, now);
        tx.update_request(request).await?;

        let mut new = request.snapshot();
        new["expired_action_id"] = serde_json::json!(action.id);
        new["escalation_count"] = serde_json::json!(escalation_count);
        let entry = AuditEntry::for_request(
            request,
            AuditAction::RequestEscalationExhausted,
            Actor::System,
            now,
        )
        .with_old(old)
        .with_new(new);
        tx.append_audit(&entry).await?;

        tracing::warn!(
            request_id = %request.id,
            level,
            escalation_count,
            "Escalation exhausted; request needs manual intervention"
        );
        Ok(())
    }

    /// Terminate a request that can no longer be processed
    async fn fail_locked(
        &self,
        tx: &mut dyn StoreTransaction,
        request: &mut ApprovalRequest,
        reason: &str,
        now: DateTime<Utc>,
    ) -> ApprovalResult<()> {
        if let Some(action) = tx.pending_action(request.id).await? {
            let closed = action.closed(
                ActionStatus::Cancelled,
                None,
                None,
                Some(reason.to_string()),
                now,
            );
            tx.close_action(&closed).await?;
        }

        let old = request.snapshot();
        request.complete(ApprovalStatus::Failed, CompletionType::Failed, now);
        tx.update_request(request).await?;

        let mut new = request.snapshot();
        new["reason"] = serde_json::json!(reason);
        let entry = AuditEntry::for_request(request, AuditAction::RequestFail, Actor::System, now)
            .with_old(old)
            .with_new(new);
        tx.append_audit(&entry).await?;

        tracing::error!(request_id = %request.id, reason, "Approval request failed");
        Ok(())
    }
}

struct Escalation {
    kind: EscalationType,
    actor: Actor,
    to_approver: Option<UserId>,
    reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_stats_merge() {
        let mut total = ScanStats {
            processed: 2,
            escalated: 1,
            ..Default::default()
        };
        total.merge(&ScanStats {
            processed: 3,
            resolved: 2,
            errors: 1,
            ..Default::default()
        });

        assert_eq!(total.processed, 5);
        assert_eq!(total.escalated, 1);
        assert_eq!(total.resolved, 2);
        assert_eq!(total.errors, 1);
        assert!(total.changed());
        assert!(!ScanStats::default().changed());
    }

    #[test]
    fn test_record_counts_outcomes() {
        let mut stats = ScanStats::default();
        let id = RequestId::generate();
        stats.record(Ok(Outcome::Skipped), id);
        stats.record(Ok(Outcome::Exhausted), id);
        stats.record(Err(ApprovalError::RequestNotFound(id)), id);

        assert_eq!(stats.processed, 3);
        assert_eq!(stats.exhausted, 1);
        assert_eq!(stats.errors, 1);
    }
}
