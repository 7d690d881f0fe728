//! Delegation of authority
//!
//! A delegation lets the delegate act in place of the delegator on approval
//! actions, inside a date range and below optional per-transaction and
//! cumulative amount caps.

use crate::errors::{ValidationError, ValidationResult};
use crate::{Amount, AuthorityMatrixId, CompanyId, DelegationId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationType {
    #[default]
    Full,
    Partial,
    /// Must carry an end date
    Temporary,
}

impl DelegationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DelegationType::Full => "full",
            DelegationType::Partial => "partial",
            DelegationType::Temporary => "temporary",
        }
    }
}

/// Why a delegation does not cover a particular use
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DelegationMismatch {
    #[error("delegation is not effective")]
    NotEffective,

    #[error("authority not covered by delegation")]
    AuthorityNotCovered,

    #[error("amount {amount} exceeds per-transaction limit {limit}")]
    ExceedsPerTransaction { amount: Amount, limit: Amount },

    #[error("amount {amount} exceeds remaining balance {remaining}")]
    ExceedsRemaining { amount: Amount, remaining: Amount },
}

impl DelegationMismatch {
    /// The delegation covers the authority but not the amount
    pub fn is_limit(&self) -> bool {
        matches!(
            self,
            DelegationMismatch::ExceedsPerTransaction { .. }
                | DelegationMismatch::ExceedsRemaining { .. }
        )
    }
}

/// A stored delegation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoADelegation {
    pub id: DelegationId,
    pub company_id: CompanyId,
    pub delegator_id: UserId,
    pub delegate_id: UserId,
    pub delegation_type: DelegationType,
    pub authority_matrix_ids: BTreeSet<AuthorityMatrixId>,
    pub delegate_all_authorities: bool,
    pub max_amount_per_transaction: Option<Amount>,
    pub max_total_amount: Option<Amount>,
    /// Only ever grows; never exceeds `max_total_amount`
    pub total_approved_amount: Amount,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<UserId>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by: Option<UserId>,
    pub revocation_reason: Option<String>,
}

impl DoADelegation {
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.start_date <= now
            && self.end_date.map_or(true, |end| now <= end)
    }

    /// Active but past its end date
    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.end_date.is_some_and(|end| end < now)
    }

    pub fn remaining_total(&self) -> Option<Amount> {
        self.max_total_amount
            .map(|max| max - self.total_approved_amount)
    }

    pub fn covers_authority(&self, authority: Option<AuthorityMatrixId>) -> bool {
        self.delegate_all_authorities
            || authority.is_some_and(|id| self.authority_matrix_ids.contains(&id))
    }

    /// Check authority then amount caps. Effectiveness is the caller's
    /// concern; candidates are pre-filtered by date.
    pub fn admits(
        &self,
        authority: Option<AuthorityMatrixId>,
        amount: Option<Amount>,
    ) -> Result<(), DelegationMismatch> {
        if !self.covers_authority(authority) {
            return Err(DelegationMismatch::AuthorityNotCovered);
        }

        let Some(amount) = amount else {
            return Ok(());
        };

        if let Some(limit) = self.max_amount_per_transaction {
            if amount > limit {
                return Err(DelegationMismatch::ExceedsPerTransaction { amount, limit });
            }
        }
        if let Some(remaining) = self.remaining_total() {
            if amount > remaining {
                return Err(DelegationMismatch::ExceedsRemaining { amount, remaining });
            }
        }
        Ok(())
    }

    pub fn revoke(&mut self, by: UserId, reason: Option<String>, now: DateTime<Utc>) {
        self.is_active = false;
        self.revoked_at = Some(now);
        self.revoked_by = Some(by);
        self.revocation_reason = reason;
    }

    /// Fields recorded in audit old/new values
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "is_active": self.is_active,
            "total_approved_amount": self.total_approved_amount,
            "max_total_amount": self.max_total_amount,
        })
    }
}

// ── Creation Input ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDelegation {
    pub company_id: CompanyId,
    pub delegator_id: UserId,
    pub delegate_id: UserId,
    #[serde(default)]
    pub delegation_type: DelegationType,
    #[serde(default)]
    pub authority_matrix_ids: BTreeSet<AuthorityMatrixId>,
    #[serde(default)]
    pub delegate_all_authorities: bool,
    #[serde(default)]
    pub max_amount_per_transaction: Option<Amount>,
    #[serde(default)]
    pub max_total_amount: Option<Amount>,
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl NewDelegation {
    pub fn new(
        company_id: CompanyId,
        delegator_id: UserId,
        delegate_id: UserId,
        start_date: DateTime<Utc>,
    ) -> Self {
        Self {
            company_id,
            delegator_id,
            delegate_id,
            delegation_type: DelegationType::Full,
            authority_matrix_ids: BTreeSet::new(),
            delegate_all_authorities: false,
            max_amount_per_transaction: None,
            max_total_amount: None,
            start_date,
            end_date: None,
            reason: None,
        }
    }

    pub fn with_type(mut self, delegation_type: DelegationType) -> Self {
        self.delegation_type = delegation_type;
        self
    }

    pub fn with_all_authorities(mut self) -> Self {
        self.delegate_all_authorities = true;
        self
    }

    pub fn with_authority(mut self, authority: AuthorityMatrixId) -> Self {
        self.authority_matrix_ids.insert(authority);
        self
    }

    pub fn with_limits(mut self, per_transaction: Option<Amount>, total: Option<Amount>) -> Self {
        self.max_amount_per_transaction = per_transaction;
        self.max_total_amount = total;
        self
    }

    pub fn with_end_date(mut self, end_date: DateTime<Utc>) -> Self {
        self.end_date = Some(end_date);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn validate(&self) -> ValidationResult<()> {
        if self.delegator_id == self.delegate_id {
            return Err(ValidationError::SelfDelegation);
        }
        if let Some(end) = self.end_date {
            if end <= self.start_date {
                return Err(ValidationError::InvertedDateRange);
            }
        } else if self.delegation_type == DelegationType::Temporary {
            return Err(ValidationError::MissingField("end_date"));
        }
        if !self.delegate_all_authorities && self.authority_matrix_ids.is_empty() {
            return Err(ValidationError::EmptyAuthority);
        }
        for cap in [self.max_amount_per_transaction, self.max_total_amount]
            .into_iter()
            .flatten()
        {
            if cap <= 0 {
                return Err(ValidationError::NonPositiveAmount(cap));
            }
        }
        if let (Some(per_tx), Some(total)) = (self.max_amount_per_transaction, self.max_total_amount)
        {
            if per_tx > total {
                return Err(ValidationError::Invalid(
                    "per-transaction limit exceeds total limit".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn into_delegation(self, created_by: Option<UserId>, now: DateTime<Utc>) -> DoADelegation {
        DoADelegation {
            id: DelegationId::generate(),
            company_id: self.company_id,
            delegator_id: self.delegator_id,
            delegate_id: self.delegate_id,
            delegation_type: self.delegation_type,
            authority_matrix_ids: self.authority_matrix_ids,
            delegate_all_authorities: self.delegate_all_authorities,
            max_amount_per_transaction: self.max_amount_per_transaction,
            max_total_amount: self.max_total_amount,
            total_approved_amount: 0,
            start_date: self.start_date,
            end_date: self.end_date,
            is_active: true,
            reason: self.reason,
            created_at: now,
            created_by,
            revoked_at: None,
            revoked_by: None,
            revocation_reason: None,
        }
    }
}
