//! In-memory reference implementation of the approval store.
//!
//! Transactions take one global async lock and write straight into the
//! state, recording the inverse of every write. `commit` forgets the undo
//! log; dropping an uncommitted transaction replays it in reverse. This is
//! deterministic and test-friendly. Production deployments should use the
//! PostgreSQL backend.

use crate::traits::{ApprovalStore, QueryWindow, StoreTransaction};
use crate::{StorageError, StorageResult};
use approval_types::{
    ActionId, Amount, ApprovalAction, ApprovalEscalation, ApprovalRequest, AuditEntry, CompanyId,
    DelegationId, DoADelegation, RequestId, TemplateId, UserId, WorkflowTemplate,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
struct MemoryState {
    templates: HashMap<TemplateId, WorkflowTemplate>,
    requests: HashMap<RequestId, ApprovalRequest>,
    /// Insertion order is opening order
    actions: Vec<ApprovalAction>,
    /// Position in `actions` of each request's pending action
    pending: HashMap<RequestId, usize>,
    escalations: Vec<ApprovalEscalation>,
    delegations: HashMap<DelegationId, DoADelegation>,
    audit: Vec<AuditEntry>,
}

impl MemoryState {
    fn action_index(&self, id: ActionId) -> Option<usize> {
        self.actions.iter().rposition(|a| a.id == id)
    }

    /// Keep `pending` in step with the action stored at `index`
    fn reindex(&mut self, index: usize) {
        let action = &self.actions[index];
        if action.is_pending() {
            self.pending.insert(action.request_id, index);
        } else if self.pending.get(&action.request_id) == Some(&index) {
            self.pending.remove(&action.request_id);
        }
    }

    fn revert(&mut self, undo: Undo) {
        match undo {
            Undo::TemplateInserted(id) => {
                self.templates.remove(&id);
            }
            Undo::RequestInserted(id) => {
                self.requests.remove(&id);
            }
            Undo::RequestReplaced(previous) => {
                self.requests.insert(previous.id, *previous);
            }
            Undo::ActionPushed => {
                if let Some(action) = self.actions.pop() {
                    if self.pending.get(&action.request_id) == Some(&self.actions.len()) {
                        self.pending.remove(&action.request_id);
                    }
                }
            }
            Undo::ActionReplaced(index, previous) => {
                self.actions[index] = *previous;
                self.reindex(index);
            }
            Undo::EscalationPushed => {
                self.escalations.pop();
            }
            Undo::DelegationInserted(id) => {
                self.delegations.remove(&id);
            }
            Undo::DelegationReplaced(previous) => {
                self.delegations.insert(previous.id, *previous);
            }
            Undo::AuditPushed => {
                self.audit.pop();
            }
        }
    }

    fn in_company(filter: Option<CompanyId>, company_id: CompanyId) -> bool {
        filter.map_or(true, |c| c == company_id)
    }

    fn request_is_live(&self, request_id: RequestId) -> Option<&ApprovalRequest> {
        self.requests
            .get(&request_id)
            .filter(|r| r.status.is_actionable())
    }
}

/// In-memory approval store.
#[derive(Clone, Default)]
pub struct InMemoryApprovalStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn take_window<T>(items: impl Iterator<Item = T>, limit: usize) -> Vec<T> {
    if limit > 0 {
        items.take(limit).collect()
    } else {
        items.collect()
    }
}

#[async_trait]
impl ApprovalStore for InMemoryApprovalStore {
    async fn begin(&self) -> StorageResult<Box<dyn StoreTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        Ok(Box::new(MemoryTransaction {
            state: guard,
            undo: Vec::new(),
        }))
    }

    async fn get_template(&self, id: TemplateId) -> StorageResult<Option<WorkflowTemplate>> {
        Ok(self.state.lock().await.templates.get(&id).cloned())
    }

    async fn list_template_versions(
        &self,
        company_id: CompanyId,
        name: &str,
    ) -> StorageResult<Vec<WorkflowTemplate>> {
        let state = self.state.lock().await;
        let mut versions: Vec<_> = state
            .templates
            .values()
            .filter(|t| t.company_id == company_id && t.name == name)
            .cloned()
            .collect();
        versions.sort_by_key(|t| t.version);
        Ok(versions)
    }

    async fn get_request(&self, id: RequestId) -> StorageResult<Option<ApprovalRequest>> {
        Ok(self.state.lock().await.requests.get(&id).cloned())
    }

    async fn list_actions(&self, request_id: RequestId) -> StorageResult<Vec<ApprovalAction>> {
        let state = self.state.lock().await;
        Ok(state
            .actions
            .iter()
            .filter(|a| a.request_id == request_id)
            .cloned()
            .collect())
    }

    async fn list_escalations(
        &self,
        request_id: RequestId,
    ) -> StorageResult<Vec<ApprovalEscalation>> {
        let state = self.state.lock().await;
        Ok(state
            .escalations
            .iter()
            .filter(|e| e.request_id == request_id)
            .cloned()
            .collect())
    }

    async fn list_pending_for_approver(
        &self,
        company_id: CompanyId,
        approver_id: UserId,
    ) -> StorageResult<Vec<ApprovalAction>> {
        let state = self.state.lock().await;
        let mut inbox: Vec<_> = state
            .actions
            .iter()
            .filter(|a| {
                a.company_id == company_id && a.approver_id == approver_id && a.is_pending()
            })
            .cloned()
            .collect();
        inbox.sort_by_key(|a| (a.due_at, a.id));
        Ok(inbox)
    }

    async fn get_delegation(&self, id: DelegationId) -> StorageResult<Option<DoADelegation>> {
        Ok(self.state.lock().await.delegations.get(&id).cloned())
    }

    async fn list_delegations(
        &self,
        company_id: CompanyId,
        user: Option<UserId>,
    ) -> StorageResult<Vec<DoADelegation>> {
        let state = self.state.lock().await;
        let mut delegations: Vec<_> = state
            .delegations
            .values()
            .filter(|d| d.company_id == company_id)
            .filter(|d| user.map_or(true, |u| d.delegator_id == u || d.delegate_id == u))
            .cloned()
            .collect();
        delegations.sort_by_key(|d| (d.created_at, d.id));
        Ok(delegations)
    }

    async fn list_audit_for_request(
        &self,
        request_id: RequestId,
    ) -> StorageResult<Vec<AuditEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .audit
            .iter()
            .filter(|e| e.request_id == Some(request_id))
            .cloned()
            .collect())
    }

    async fn list_audit(
        &self,
        company_id: CompanyId,
        window: QueryWindow,
    ) -> StorageResult<Vec<AuditEntry>> {
        let state = self.state.lock().await;
        let entries = state
            .audit
            .iter()
            .rev()
            .filter(|e| e.company_id == company_id)
            .skip(window.offset)
            .cloned();
        Ok(take_window(entries, window.limit))
    }

    async fn find_overdue_actions(
        &self,
        company_id: Option<CompanyId>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<ApprovalAction>> {
        let state = self.state.lock().await;
        let mut overdue: Vec<_> = state
            .actions
            .iter()
            .filter(|a| a.is_overdue(now) && MemoryState::in_company(company_id, a.company_id))
            .filter(|a| {
                let Some(request) = state.request_is_live(a.request_id) else {
                    return false;
                };
                match request.template_id {
                    None => false,
                    Some(template_id) => state
                        .templates
                        .get(&template_id)
                        .map_or(true, |t| t.escalates_on_timeout()),
                }
            })
            .cloned()
            .collect();
        overdue.sort_by_key(|a| (a.due_at, a.id));
        Ok(take_window(overdue.into_iter(), limit))
    }

    async fn find_breached_requests(
        &self,
        company_id: Option<CompanyId>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<ApprovalRequest>> {
        let state = self.state.lock().await;
        let mut breached: Vec<_> = state
            .requests
            .values()
            .filter(|r| {
                r.status.is_actionable() && MemoryState::in_company(company_id, r.company_id)
            })
            .filter(|r| r.sla_breach_at.is_some_and(|at| at < now))
            .filter(|r| {
                r.template_id
                    .and_then(|id| state.templates.get(&id))
                    .is_some_and(|t| t.timeout_resolution().is_some())
            })
            .cloned()
            .collect();
        breached.sort_by_key(|r| (r.sla_breach_at, r.id));
        Ok(take_window(breached.into_iter(), limit))
    }

    async fn find_due_soon(
        &self,
        company_id: Option<CompanyId>,
        now: DateTime<Utc>,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<ApprovalAction>> {
        let state = self.state.lock().await;
        let mut due: Vec<_> = state
            .actions
            .iter()
            .filter(|a| {
                a.is_pending()
                    && a.reminded_at.is_none()
                    && a.due_at > now
                    && a.due_at <= cutoff
                    && MemoryState::in_company(company_id, a.company_id)
                    && state.request_is_live(a.request_id).is_some()
            })
            .cloned()
            .collect();
        due.sort_by_key(|a| (a.due_at, a.id));
        Ok(take_window(due.into_iter(), limit))
    }

    async fn find_lapsed_delegations(
        &self,
        company_id: Option<CompanyId>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<DoADelegation>> {
        let state = self.state.lock().await;
        let mut lapsed: Vec<_> = state
            .delegations
            .values()
            .filter(|d| d.is_lapsed(now) && MemoryState::in_company(company_id, d.company_id))
            .cloned()
            .collect();
        lapsed.sort_by_key(|d| (d.end_date, d.id));
        Ok(take_window(lapsed.into_iter(), limit))
    }
}

// ── Transaction ──────────────────────────────────────────────────────

/// Inverse of one write
#[derive(Debug)]
enum Undo {
    TemplateInserted(TemplateId),
    RequestInserted(RequestId),
    RequestReplaced(Box<ApprovalRequest>),
    ActionPushed,
    ActionReplaced(usize, Box<ApprovalAction>),
    EscalationPushed,
    DelegationInserted(DelegationId),
    DelegationReplaced(Box<DoADelegation>),
    AuditPushed,
}

struct MemoryTransaction {
    state: OwnedMutexGuard<MemoryState>,
    undo: Vec<Undo>,
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        while let Some(undo) = self.undo.pop() {
            self.state.revert(undo);
        }
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn get_template(&mut self, id: TemplateId) -> StorageResult<Option<WorkflowTemplate>> {
        Ok(self.state.templates.get(&id).cloned())
    }

    async fn latest_template_version(
        &mut self,
        company_id: CompanyId,
        name: &str,
    ) -> StorageResult<Option<u32>> {
        Ok(self
            .state
            .templates
            .values()
            .filter(|t| t.company_id == company_id && t.name == name)
            .map(|t| t.version)
            .max())
    }

    async fn insert_template(&mut self, template: &WorkflowTemplate) -> StorageResult<()> {
        let duplicate = self.state.templates.values().any(|t| {
            t.company_id == template.company_id
                && t.name == template.name
                && t.version == template.version
        });
        if duplicate || self.state.templates.contains_key(&template.id) {
            return Err(StorageError::Conflict(format!(
                "template {} version {} already exists",
                template.name, template.version
            )));
        }
        self.state.templates.insert(template.id, template.clone());
        self.undo.push(Undo::TemplateInserted(template.id));
        Ok(())
    }

    async fn lock_request(&mut self, id: RequestId) -> StorageResult<Option<ApprovalRequest>> {
        Ok(self.state.requests.get(&id).cloned())
    }

    async fn insert_request(&mut self, request: &ApprovalRequest) -> StorageResult<()> {
        if self.state.requests.contains_key(&request.id) {
            return Err(StorageError::Conflict(format!(
                "request {} already exists",
                request.id
            )));
        }
        self.state.requests.insert(request.id, request.clone());
        self.undo.push(Undo::RequestInserted(request.id));
        Ok(())
    }

    async fn update_request(&mut self, request: &ApprovalRequest) -> StorageResult<()> {
        let stored = self
            .state
            .requests
            .get_mut(&request.id)
            .ok_or_else(|| StorageError::NotFound(format!("request {} not found", request.id)))?;
        let previous = std::mem::replace(stored, request.clone());
        self.undo.push(Undo::RequestReplaced(Box::new(previous)));
        Ok(())
    }

    async fn pending_action(
        &mut self,
        request_id: RequestId,
    ) -> StorageResult<Option<ApprovalAction>> {
        Ok(self
            .state
            .pending
            .get(&request_id)
            .map(|&index| self.state.actions[index].clone()))
    }

    async fn insert_action(&mut self, action: &ApprovalAction) -> StorageResult<()> {
        if !self.state.requests.contains_key(&action.request_id) {
            return Err(StorageError::InvariantViolation(format!(
                "action {} references unknown request {}",
                action.id, action.request_id
            )));
        }
        if action.is_pending() && self.state.pending.contains_key(&action.request_id) {
            return Err(StorageError::Conflict(format!(
                "request {} already has a pending action",
                action.request_id
            )));
        }
        self.state.actions.push(action.clone());
        self.undo.push(Undo::ActionPushed);
        let index = self.state.actions.len() - 1;
        self.state.reindex(index);
        Ok(())
    }

    async fn close_action(&mut self, action: &ApprovalAction) -> StorageResult<bool> {
        let index = self
            .state
            .action_index(action.id)
            .ok_or_else(|| StorageError::NotFound(format!("action {} not found", action.id)))?;
        let stored = &mut self.state.actions[index];
        if !stored.is_pending() {
            return Ok(false);
        }
        let previous = stored.clone();
        stored.status = action.status;
        stored.acted_at = action.acted_at;
        stored.acted_by = action.acted_by;
        stored.delegation_id = action.delegation_id;
        stored.comments = action.comments.clone();
        self.undo.push(Undo::ActionReplaced(index, Box::new(previous)));
        self.state.reindex(index);
        Ok(true)
    }

    async fn mark_reminded(&mut self, id: ActionId, at: DateTime<Utc>) -> StorageResult<bool> {
        let Some(index) = self.state.action_index(id) else {
            return Ok(false);
        };
        let action = &mut self.state.actions[index];
        if !action.is_pending() || action.reminded_at.is_some() {
            return Ok(false);
        }
        let previous = action.clone();
        action.reminded_at = Some(at);
        self.undo.push(Undo::ActionReplaced(index, Box::new(previous)));
        Ok(true)
    }

    async fn insert_escalation(&mut self, escalation: &ApprovalEscalation) -> StorageResult<()> {
        self.state.escalations.push(escalation.clone());
        self.undo.push(Undo::EscalationPushed);
        Ok(())
    }

    async fn count_escalations(&mut self, request_id: RequestId) -> StorageResult<u32> {
        Ok(self
            .state
            .escalations
            .iter()
            .filter(|e| e.request_id == request_id)
            .count() as u32)
    }

    async fn effective_delegations(
        &mut self,
        company_id: CompanyId,
        delegate_id: UserId,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<DoADelegation>> {
        let mut effective: Vec<_> = self
            .state
            .delegations
            .values()
            .filter(|d| {
                d.company_id == company_id && d.delegate_id == delegate_id && d.is_effective(now)
            })
            .cloned()
            .collect();
        effective.sort_by_key(|d| (d.created_at, d.id));
        Ok(effective)
    }

    async fn insert_delegation(&mut self, delegation: &DoADelegation) -> StorageResult<()> {
        if self.state.delegations.contains_key(&delegation.id) {
            return Err(StorageError::Conflict(format!(
                "delegation {} already exists",
                delegation.id
            )));
        }
        self.state
            .delegations
            .insert(delegation.id, delegation.clone());
        self.undo.push(Undo::DelegationInserted(delegation.id));
        Ok(())
    }

    async fn lock_delegation(&mut self, id: DelegationId) -> StorageResult<Option<DoADelegation>> {
        Ok(self.state.delegations.get(&id).cloned())
    }

    async fn update_delegation(&mut self, delegation: &DoADelegation) -> StorageResult<()> {
        let stored = self
            .state
            .delegations
            .get_mut(&delegation.id)
            .ok_or_else(|| {
                StorageError::NotFound(format!("delegation {} not found", delegation.id))
            })?;
        let previous = stored.clone();
        stored.is_active = delegation.is_active;
        stored.revoked_at = delegation.revoked_at;
        stored.revoked_by = delegation.revoked_by;
        stored.revocation_reason = delegation.revocation_reason.clone();
        self.undo.push(Undo::DelegationReplaced(Box::new(previous)));
        Ok(())
    }

    async fn add_delegation_amount(
        &mut self,
        id: DelegationId,
        amount: Amount,
    ) -> StorageResult<Option<Amount>> {
        let Some(delegation) = self.state.delegations.get_mut(&id) else {
            return Ok(None);
        };
        if !delegation.is_active {
            return Ok(None);
        }
        if delegation
            .max_amount_per_transaction
            .is_some_and(|limit| amount > limit)
        {
            return Ok(None);
        }
        let total = delegation.total_approved_amount + amount;
        if delegation.max_total_amount.is_some_and(|max| total > max) {
            return Ok(None);
        }
        let previous = delegation.clone();
        delegation.total_approved_amount = total;
        self.undo.push(Undo::DelegationReplaced(Box::new(previous)));
        Ok(Some(total))
    }

    async fn append_audit(&mut self, entry: &AuditEntry) -> StorageResult<()> {
        self.state.audit.push(entry.clone());
        self.undo.push(Undo::AuditPushed);
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> StorageResult<()> {
        self.undo.clear();
        Ok(())
    }
}
