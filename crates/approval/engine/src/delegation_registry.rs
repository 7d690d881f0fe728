//! Delegation registry: grants, matching and balance consumption
//!
//! A delegation lets its delegate act for the delegator inside a date range,
//! for a set of authorities and below optional amount caps. The cumulative
//! balance only ever changes through [`DelegationRegistry::update_amount`]
//! or an approval made under the delegation, both of which go through the
//! store's conditional increment.

use crate::context::EngineContext;
use crate::error::{ApprovalError, ApprovalResult};
use crate::escalation::ScanStats;
use approval_store::StoreTransaction;
use approval_types::{
    Actor, Amount, ApprovalRequest, AuditAction, AuditEntry, AuthorityMatrixId, CompanyId,
    DelegationId, DoADelegation, NewDelegation, TargetType, UserId, ValidationError,
};
use chrono::{DateTime, Utc};

#[derive(Clone)]
pub struct DelegationRegistry {
    ctx: EngineContext,
}

impl DelegationRegistry {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    // ── Grants ───────────────────────────────────────────────────────

    pub async fn create(
        &self,
        delegation: NewDelegation,
        created_by: UserId,
    ) -> ApprovalResult<DoADelegation> {
        delegation.validate()?;

        let now = self.ctx.now();
        let delegation = delegation.into_delegation(Some(created_by), now);

        let mut tx = self.ctx.store.begin().await?;
        tx.insert_delegation(&delegation).await?;
        let entry = delegation_entry(
            &delegation,
            AuditAction::DelegationCreate,
            Actor::User(created_by),
            now,
        )
        .with_new(serde_json::json!({
            "delegator_id": delegation.delegator_id,
            "delegate_id": delegation.delegate_id,
            "delegation_type": delegation.delegation_type,
            "delegate_all_authorities": delegation.delegate_all_authorities,
            "max_amount_per_transaction": delegation.max_amount_per_transaction,
            "max_total_amount": delegation.max_total_amount,
            "start_date": delegation.start_date,
            "end_date": delegation.end_date,
        }));
        tx.append_audit(&entry).await?;
        tx.commit().await?;

        tracing::info!(
            delegation_id = %delegation.id,
            delegator_id = %delegation.delegator_id,
            delegate_id = %delegation.delegate_id,
            "Delegation created"
        );
        Ok(delegation)
    }

    pub async fn revoke(
        &self,
        id: DelegationId,
        revoked_by: UserId,
        reason: Option<String>,
    ) -> ApprovalResult<DoADelegation> {
        let now = self.ctx.now();
        let mut tx = self.ctx.store.begin().await?;
        let mut delegation = tx
            .lock_delegation(id)
            .await?
            .ok_or(ApprovalError::DelegationNotFound(id))?;
        if !delegation.is_active {
            return Err(ApprovalError::transition(format!(
                "delegation {id} is no longer active"
            )));
        }

        let old = delegation.snapshot();
        delegation.revoke(revoked_by, reason.clone(), now);
        tx.update_delegation(&delegation).await?;
        let entry = delegation_entry(
            &delegation,
            AuditAction::DelegationRevoke,
            Actor::User(revoked_by),
            now,
        )
        .with_old(old)
        .with_new(serde_json::json!({
            "is_active": false,
            "revocation_reason": reason,
        }));
        tx.append_audit(&entry).await?;
        tx.commit().await?;

        tracing::info!(delegation_id = %id, revoked_by = %revoked_by, "Delegation revoked");
        Ok(delegation)
    }

    pub async fn get(&self, id: DelegationId) -> ApprovalResult<DoADelegation> {
        self.ctx
            .store
            .get_delegation(id)
            .await?
            .ok_or(ApprovalError::DelegationNotFound(id))
    }

    /// Delegations of a company, optionally only those involving `user`
    pub async fn list(
        &self,
        company_id: CompanyId,
        user: Option<UserId>,
    ) -> ApprovalResult<Vec<DoADelegation>> {
        Ok(self.ctx.store.list_delegations(company_id, user).await?)
    }

    // ── Matching ─────────────────────────────────────────────────────

    /// First effective delegation held by `delegate_id` that covers the
    /// authority and amount, or `None` when the nominal approver must act.
    pub async fn check(
        &self,
        company_id: CompanyId,
        delegate_id: UserId,
        authority: Option<AuthorityMatrixId>,
        amount: Option<Amount>,
    ) -> ApprovalResult<Option<DoADelegation>> {
        let now = self.ctx.now();
        // Read-only; dropped without commit.
        let mut tx = self.ctx.store.begin().await?;
        let candidates = tx.effective_delegations(company_id, delegate_id, now).await?;
        drop(tx);

        Ok(first_admitting(candidates, authority, amount))
    }

    /// Delegation letting `actor` act for `approver` on `request`, looked up
    /// inside the transition's transaction.
    pub(crate) async fn find_for_action(
        &self,
        tx: &mut dyn StoreTransaction,
        request: &ApprovalRequest,
        approver: UserId,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> ApprovalResult<Option<DoADelegation>> {
        let candidates = tx
            .effective_delegations(request.company_id, actor, now)
            .await?
            .into_iter()
            .filter(|d| d.delegator_id == approver)
            .collect();

        Ok(first_admitting(
            candidates,
            request.authority_matrix_id,
            request.amount,
        ))
    }

    // ── Balances ─────────────────────────────────────────────────────

    /// Consume `amount` of a delegation's cumulative cap. Returns the new
    /// approved total.
    pub async fn update_amount(
        &self,
        id: DelegationId,
        amount: Amount,
        actor: Actor,
    ) -> ApprovalResult<Amount> {
        if amount <= 0 {
            return Err(ValidationError::NonPositiveAmount(amount).into());
        }

        let now = self.ctx.now();
        let mut tx = self.ctx.store.begin().await?;
        let delegation = tx
            .lock_delegation(id)
            .await?
            .ok_or(ApprovalError::DelegationNotFound(id))?;

        let total = consume(tx.as_mut(), &delegation, amount).await?;

        let entry = delegation_entry(&delegation, AuditAction::DelegationConsume, actor, now)
            .with_old(delegation.snapshot())
            .with_new(serde_json::json!({
                "amount": amount,
                "total_approved_amount": total,
            }));
        tx.append_audit(&entry).await?;
        tx.commit().await?;

        tracing::debug!(delegation_id = %id, amount, total, "Delegation balance consumed");
        Ok(total)
    }

    // ── Expiry ───────────────────────────────────────────────────────

    /// Deactivate delegations whose end date has passed
    pub async fn expire_lapsed(&self, company_id: Option<CompanyId>) -> ApprovalResult<ScanStats> {
        let now = self.ctx.now();
        let candidates = self
            .ctx
            .store
            .find_lapsed_delegations(company_id, now, self.ctx.config.batch_size)
            .await?;

        let mut stats = ScanStats::default();
        for candidate in candidates {
            stats.processed += 1;
            match self.expire_one(candidate.id, now).await {
                Ok(true) => stats.delegations_expired += 1,
                Ok(false) => {}
                Err(e) => {
                    stats.errors += 1;
                    tracing::warn!(
                        delegation_id = %candidate.id,
                        error = %e,
                        "Failed to expire delegation"
                    );
                }
            }
        }
        Ok(stats)
    }

    async fn expire_one(&self, id: DelegationId, now: DateTime<Utc>) -> ApprovalResult<bool> {
        let mut tx = self.ctx.store.begin().await?;
        let Some(mut delegation) = tx.lock_delegation(id).await? else {
            return Ok(false);
        };
        if !delegation.is_lapsed(now) {
            return Ok(false);
        }

        let old = delegation.snapshot();
        delegation.is_active = false;
        tx.update_delegation(&delegation).await?;
        let entry = delegation_entry(&delegation, AuditAction::DelegationExpire, Actor::System, now)
            .with_old(old)
            .with_new(delegation.snapshot());
        tx.append_audit(&entry).await?;
        tx.commit().await?;

        tracing::info!(delegation_id = %id, "Delegation expired");
        Ok(true)
    }
}

/// Atomically add `amount` to the delegation's balance inside `tx`
pub(crate) async fn consume(
    tx: &mut dyn StoreTransaction,
    delegation: &DoADelegation,
    amount: Amount,
) -> ApprovalResult<Amount> {
    tx.add_delegation_amount(delegation.id, amount)
        .await?
        .ok_or_else(|| ApprovalError::DelegationLimitExceeded {
            delegation_id: delegation.id,
            reason: match delegation.admits(None, Some(amount)) {
                Err(mismatch) if mismatch.is_limit() => mismatch.to_string(),
                _ if !delegation.is_active => "delegation is not active".to_string(),
                _ => format!("amount {amount} exceeds the remaining balance"),
            },
        })
}

fn first_admitting(
    candidates: Vec<DoADelegation>,
    authority: Option<AuthorityMatrixId>,
    amount: Option<Amount>,
) -> Option<DoADelegation> {
    candidates.into_iter().find(|d| match d.admits(authority, amount) {
        Ok(()) => true,
        Err(mismatch) => {
            if mismatch.is_limit() {
                tracing::debug!(
                    delegation_id = %d.id,
                    %mismatch,
                    "Skipping delegation over its limit"
                );
            }
            false
        }
    })
}

fn delegation_entry(
    delegation: &DoADelegation,
    action: AuditAction,
    actor: Actor,
    now: DateTime<Utc>,
) -> AuditEntry {
    AuditEntry::new(
        delegation.company_id,
        action,
        actor,
        TargetType::Delegation,
        *delegation.id.as_uuid(),
        now,
    )
}
