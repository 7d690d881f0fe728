//! Approval engine: the entry point callers use
//!
//! The engine composes the registries, the state machine and the escalation
//! engine over one shared context. It holds no state of its own; all of it
//! lives in the store.

use crate::clock::{Clock, SystemClock};
use crate::context::{EngineConfig, EngineContext};
use crate::delegation_registry::DelegationRegistry;
use crate::directory::ApproverDirectory;
use crate::error::ApprovalResult;
use crate::escalation::{EscalationEngine, ScanStats};
use crate::notify::{LogNotifier, Notifier};
use crate::resolver::ApproverResolver;
use crate::state_machine::{RequestStateMachine, RequestStatus};
use crate::template_registry::TemplateRegistry;
use approval_store::{ApprovalStore, QueryWindow};
use approval_types::{
    ActionOutcome, Actor, Amount, ApprovalAction, ApprovalRequest, AuditEntry, AuthorityMatrixId,
    CompanyId, DelegationId, DoADelegation, NewDelegation, NewTemplate, RequestContext,
    RequestId, TemplateId, UserId, WorkflowTemplate,
};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

#[derive(Clone)]
pub struct ApprovalEngine {
    ctx: EngineContext,
    templates: TemplateRegistry,
    delegations: DelegationRegistry,
    requests: RequestStateMachine,
    escalations: EscalationEngine,
}

impl ApprovalEngine {
    /// Engine on the system clock, logging notifications, default tuning
    pub fn new(store: Arc<dyn ApprovalStore>, directory: Arc<dyn ApproverDirectory>) -> Self {
        Self::from_context(EngineContext::new(
            store,
            Arc::new(SystemClock),
            ApproverResolver::new(directory),
            Arc::new(LogNotifier),
            EngineConfig::default(),
        ))
    }

    pub fn from_context(ctx: EngineContext) -> Self {
        let delegations = DelegationRegistry::new(ctx.clone());
        Self {
            templates: TemplateRegistry::new(ctx.clone()),
            requests: RequestStateMachine::new(ctx.clone(), delegations.clone()),
            escalations: EscalationEngine::new(ctx.clone()),
            delegations,
            ctx,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.ctx.clock = clock;
        Self::from_context(self.ctx)
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.ctx.notifier = notifier;
        Self::from_context(self.ctx)
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.ctx.config = config;
        Self::from_context(self.ctx)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    /// Current time on the engine's clock
    pub fn now(&self) -> DateTime<Utc> {
        self.ctx.now()
    }

    // ── Templates ────────────────────────────────────────────────────

    pub async fn register_template(
        &self,
        template: NewTemplate,
        registered_by: Option<UserId>,
    ) -> ApprovalResult<WorkflowTemplate> {
        self.templates.register(template, registered_by).await
    }

    pub async fn get_template(&self, id: TemplateId) -> ApprovalResult<WorkflowTemplate> {
        self.templates.get(id).await
    }

    pub async fn latest_template(
        &self,
        company_id: CompanyId,
        name: &str,
    ) -> ApprovalResult<WorkflowTemplate> {
        self.templates.latest(company_id, name).await
    }

    pub async fn template_versions(
        &self,
        company_id: CompanyId,
        name: &str,
    ) -> ApprovalResult<Vec<WorkflowTemplate>> {
        self.templates.versions(company_id, name).await
    }

    // ── Requests ─────────────────────────────────────────────────────

    pub async fn create_request(
        &self,
        template_id: Option<TemplateId>,
        entity_type: &str,
        entity_id: &str,
        context: RequestContext,
    ) -> ApprovalResult<ApprovalRequest> {
        self.requests
            .create(template_id, entity_type, entity_id, context)
            .await
    }

    pub async fn act(
        &self,
        request_id: RequestId,
        actor: UserId,
        outcome: ActionOutcome,
        comments: Option<String>,
    ) -> ApprovalResult<ApprovalRequest> {
        self.requests.act(request_id, actor, outcome, comments).await
    }

    pub async fn cancel_request(
        &self,
        request_id: RequestId,
        actor: UserId,
        reason: Option<String>,
    ) -> ApprovalResult<ApprovalRequest> {
        self.requests.cancel(request_id, actor, reason).await
    }

    pub async fn suspend_request(
        &self,
        request_id: RequestId,
        actor: UserId,
        reason: Option<String>,
    ) -> ApprovalResult<ApprovalRequest> {
        self.requests.suspend(request_id, actor, reason).await
    }

    pub async fn resume_request(
        &self,
        request_id: RequestId,
        actor: UserId,
        reason: Option<String>,
    ) -> ApprovalResult<ApprovalRequest> {
        self.requests.resume(request_id, actor, reason).await
    }

    pub async fn assign_approver(
        &self,
        request_id: RequestId,
        actor: UserId,
        approver: UserId,
        reason: Option<String>,
    ) -> ApprovalResult<ApprovalRequest> {
        self.requests
            .assign_approver(request_id, actor, approver, reason)
            .await
    }

    pub async fn get_status(&self, request_id: RequestId) -> ApprovalResult<RequestStatus> {
        self.requests.status(request_id).await
    }

    pub async fn pending_actions_for(
        &self,
        company_id: CompanyId,
        approver: UserId,
    ) -> ApprovalResult<Vec<ApprovalAction>> {
        self.requests.pending_actions_for(company_id, approver).await
    }

    // ── Escalation ───────────────────────────────────────────────────

    pub async fn manual_escalate(
        &self,
        request_id: RequestId,
        escalated_by: UserId,
        to_approver: Option<UserId>,
        reason: Option<String>,
    ) -> ApprovalResult<ApprovalRequest> {
        self.escalations
            .manual_escalate(request_id, escalated_by, to_approver, reason)
            .await
    }

    pub async fn auto_escalate_overdue(
        &self,
        company_id: Option<CompanyId>,
    ) -> ApprovalResult<ScanStats> {
        self.escalations.auto_escalate_overdue(company_id).await
    }

    pub async fn process_timeout_actions(
        &self,
        company_id: Option<CompanyId>,
    ) -> ApprovalResult<ScanStats> {
        self.escalations.process_timeout_actions(company_id).await
    }

    pub async fn send_due_reminders(
        &self,
        company_id: Option<CompanyId>,
        window: Duration,
    ) -> ApprovalResult<ScanStats> {
        self.escalations.send_due_reminders(company_id, window).await
    }

    /// One full background pass: expire delegations, remind, escalate,
    /// then resolve by timeout policy.
    pub async fn run_scan(
        &self,
        company_id: Option<CompanyId>,
        reminder_window: Duration,
    ) -> ApprovalResult<ScanStats> {
        let mut stats = self.expire_lapsed_delegations(company_id).await?;
        stats.merge(&self.send_due_reminders(company_id, reminder_window).await?);
        stats.merge(&self.auto_escalate_overdue(company_id).await?);
        stats.merge(&self.process_timeout_actions(company_id).await?);
        Ok(stats)
    }

    // ── Delegations ──────────────────────────────────────────────────

    pub async fn create_delegation(
        &self,
        delegation: NewDelegation,
        created_by: UserId,
    ) -> ApprovalResult<DoADelegation> {
        self.delegations.create(delegation, created_by).await
    }

    pub async fn revoke_delegation(
        &self,
        id: DelegationId,
        revoked_by: UserId,
        reason: Option<String>,
    ) -> ApprovalResult<DoADelegation> {
        self.delegations.revoke(id, revoked_by, reason).await
    }

    pub async fn get_delegation(&self, id: DelegationId) -> ApprovalResult<DoADelegation> {
        self.delegations.get(id).await
    }

    pub async fn list_delegations(
        &self,
        company_id: CompanyId,
        user: Option<UserId>,
    ) -> ApprovalResult<Vec<DoADelegation>> {
        self.delegations.list(company_id, user).await
    }

    pub async fn check_delegation(
        &self,
        company_id: CompanyId,
        delegate_id: UserId,
        authority: Option<AuthorityMatrixId>,
        amount: Option<Amount>,
    ) -> ApprovalResult<Option<DoADelegation>> {
        self.delegations
            .check(company_id, delegate_id, authority, amount)
            .await
    }

    pub async fn update_delegation_amount(
        &self,
        id: DelegationId,
        amount: Amount,
        actor: Actor,
    ) -> ApprovalResult<Amount> {
        self.delegations.update_amount(id, amount, actor).await
    }

    pub async fn expire_lapsed_delegations(
        &self,
        company_id: Option<CompanyId>,
    ) -> ApprovalResult<ScanStats> {
        self.delegations.expire_lapsed(company_id).await
    }

    // ── Audit ────────────────────────────────────────────────────────

    /// Audit trail of one request, oldest first
    pub async fn audit_trail(&self, request_id: RequestId) -> ApprovalResult<Vec<AuditEntry>> {
        Ok(self.ctx.store.list_audit_for_request(request_id).await?)
    }

    /// Most recent audit entries of a company, newest first
    pub async fn audit_for_company(
        &self,
        company_id: CompanyId,
        limit: usize,
    ) -> ApprovalResult<Vec<AuditEntry>> {
        Ok(self
            .ctx
            .store
            .list_audit(company_id, QueryWindow::new(limit, 0))
            .await?)
    }
}
