use crate::StorageResult;
use approval_types::{
    ActionId, Amount, ApprovalAction, ApprovalEscalation, ApprovalRequest, AuditEntry, CompanyId,
    DelegationId, DoADelegation, RequestId, TemplateId, UserId, WorkflowTemplate,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Generic query window for paged reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryWindow {
    pub limit: usize,
    pub offset: usize,
}

impl QueryWindow {
    pub fn new(limit: usize, offset: usize) -> Self {
        Self { limit, offset }
    }
}

/// Entry point to approval storage: opens transactions and serves reads
/// that need no lock.
///
/// Callers must not issue reads on the store while holding an open
/// transaction from the same task; the in-memory backend serializes both on
/// one lock.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    /// Start a unit of work. Dropping it without `commit` rolls back.
    async fn begin(&self) -> StorageResult<Box<dyn StoreTransaction>>;

    // ── Templates ──

    async fn get_template(&self, id: TemplateId) -> StorageResult<Option<WorkflowTemplate>>;

    /// All versions of a template, oldest first.
    async fn list_template_versions(
        &self,
        company_id: CompanyId,
        name: &str,
    ) -> StorageResult<Vec<WorkflowTemplate>>;

    // ── Requests ──

    async fn get_request(&self, id: RequestId) -> StorageResult<Option<ApprovalRequest>>;

    /// Actions of a request, in the order they were opened.
    async fn list_actions(&self, request_id: RequestId) -> StorageResult<Vec<ApprovalAction>>;

    async fn list_escalations(
        &self,
        request_id: RequestId,
    ) -> StorageResult<Vec<ApprovalEscalation>>;

    /// Pending actions assigned to an approver, soonest due first.
    async fn list_pending_for_approver(
        &self,
        company_id: CompanyId,
        approver_id: UserId,
    ) -> StorageResult<Vec<ApprovalAction>>;

    // ── Delegations ──

    async fn get_delegation(&self, id: DelegationId) -> StorageResult<Option<DoADelegation>>;

    /// Delegations of a company, optionally those where `user` is delegator
    /// or delegate.
    async fn list_delegations(
        &self,
        company_id: CompanyId,
        user: Option<UserId>,
    ) -> StorageResult<Vec<DoADelegation>>;

    // ── Audit ──

    /// Audit trail of one request, oldest first.
    async fn list_audit_for_request(&self, request_id: RequestId)
        -> StorageResult<Vec<AuditEntry>>;

    /// Company audit log, newest first.
    async fn list_audit(
        &self,
        company_id: CompanyId,
        window: QueryWindow,
    ) -> StorageResult<Vec<AuditEntry>>;

    // ── Scan Candidates ──
    //
    // Candidates are only hints: every one is re-checked under lock by the
    // transaction that acts on it.

    /// Pending, overdue actions on `pending`/`in_progress` requests whose
    /// template escalates on timeout, plus those whose template is missing.
    async fn find_overdue_actions(
        &self,
        company_id: Option<CompanyId>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<ApprovalAction>>;

    /// `pending`/`in_progress` requests past `sla_breach_at` whose template
    /// resolves on timeout.
    async fn find_breached_requests(
        &self,
        company_id: Option<CompanyId>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<ApprovalRequest>>;

    /// Pending, not yet reminded actions due in `(now, cutoff]`.
    async fn find_due_soon(
        &self,
        company_id: Option<CompanyId>,
        now: DateTime<Utc>,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<ApprovalAction>>;

    /// Active delegations whose end date has passed.
    async fn find_lapsed_delegations(
        &self,
        company_id: Option<CompanyId>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<DoADelegation>>;
}

/// One atomic unit of work.
#[async_trait]
pub trait StoreTransaction: Send {
    // ── Templates ──

    async fn get_template(&mut self, id: TemplateId) -> StorageResult<Option<WorkflowTemplate>>;

    /// Highest stored version for (company, name).
    async fn latest_template_version(
        &mut self,
        company_id: CompanyId,
        name: &str,
    ) -> StorageResult<Option<u32>>;

    /// Fails with `Conflict` if the (company, name, version) exists.
    async fn insert_template(&mut self, template: &WorkflowTemplate) -> StorageResult<()>;

    // ── Requests ──

    /// Read a request and hold its lock until the transaction ends.
    async fn lock_request(&mut self, id: RequestId) -> StorageResult<Option<ApprovalRequest>>;

    async fn insert_request(&mut self, request: &ApprovalRequest) -> StorageResult<()>;

    async fn update_request(&mut self, request: &ApprovalRequest) -> StorageResult<()>;

    // ── Actions ──

    async fn pending_action(
        &mut self,
        request_id: RequestId,
    ) -> StorageResult<Option<ApprovalAction>>;

    /// Fails with `Conflict` if the request already has a pending action.
    async fn insert_action(&mut self, action: &ApprovalAction) -> StorageResult<()>;

    /// Write the closing fields of `action` only if the stored row is still
    /// pending. Returns whether it was.
    async fn close_action(&mut self, action: &ApprovalAction) -> StorageResult<bool>;

    /// Stamp a reminder on a pending, not yet reminded action.
    async fn mark_reminded(&mut self, id: ActionId, at: DateTime<Utc>) -> StorageResult<bool>;

    // ── Escalations ──

    async fn insert_escalation(&mut self, escalation: &ApprovalEscalation) -> StorageResult<()>;

    async fn count_escalations(&mut self, request_id: RequestId) -> StorageResult<u32>;

    // ── Delegations ──

    /// Delegations to `delegate_id` effective at `now`, oldest first.
    async fn effective_delegations(
        &mut self,
        company_id: CompanyId,
        delegate_id: UserId,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<DoADelegation>>;

    async fn insert_delegation(&mut self, delegation: &DoADelegation) -> StorageResult<()>;

    async fn lock_delegation(&mut self, id: DelegationId) -> StorageResult<Option<DoADelegation>>;

    /// Persist activity and revocation fields. Never touches the balance.
    async fn update_delegation(&mut self, delegation: &DoADelegation) -> StorageResult<()>;

    /// Add `amount` to the approved total if the delegation is active and
    /// both caps hold afterwards. Returns the new total, or `None` when the
    /// increment was refused.
    async fn add_delegation_amount(
        &mut self,
        id: DelegationId,
        amount: Amount,
    ) -> StorageResult<Option<Amount>>;

    // ── Audit ──

    async fn append_audit(&mut self, entry: &AuditEntry) -> StorageResult<()>;

    async fn commit(self: Box<Self>) -> StorageResult<()>;
}
