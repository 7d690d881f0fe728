//! Approver resolution: turns a level's [`ApproverRule`] into a user

use crate::directory::ApproverDirectory;
use crate::error::{ApprovalError, ApprovalResult};
use approval_types::{Amount, ApproverRef, ApproverRule, CompanyId, UserId};
use std::sync::Arc;

/// Resolves approver rules against the directory
#[derive(Clone)]
pub struct ApproverResolver {
    directory: Arc<dyn ApproverDirectory>,
}

impl ApproverResolver {
    pub fn new(directory: Arc<dyn ApproverDirectory>) -> Self {
        Self { directory }
    }

    /// Pick the approver for one level.
    ///
    /// Role members are ordered by id and the first is chosen, so the same
    /// directory always yields the same approver.
    pub async fn resolve(
        &self,
        company_id: CompanyId,
        rule: &ApproverRule,
        amount: Option<Amount>,
        level: u32,
    ) -> ApprovalResult<UserId> {
        match rule {
            ApproverRule::User { user_id } => Ok(*user_id),
            ApproverRule::Role { role } => self.first_member(company_id, role, level).await,
            ApproverRule::AmountBand { bands } => {
                let amount = amount.ok_or_else(|| ApprovalError::NoApproverResolvable {
                    level,
                    reason: "amount-banded level on a request without an amount".to_string(),
                })?;
                let band = bands.iter().find(|b| b.contains(amount)).ok_or_else(|| {
                    ApprovalError::NoApproverResolvable {
                        level,
                        reason: format!("no amount band covers {amount}"),
                    }
                })?;
                match &band.approver {
                    ApproverRef::User { user_id } => Ok(*user_id),
                    ApproverRef::Role { role } => {
                        self.first_member(company_id, role, level).await
                    }
                }
            }
        }
    }

    /// Whether `user` belongs to `role` within a company
    pub async fn is_member(
        &self,
        company_id: CompanyId,
        role: &str,
        user: UserId,
    ) -> ApprovalResult<bool> {
        let members = self.directory.members_of_role(company_id, role).await?;
        Ok(members.contains(&user))
    }

    async fn first_member(
        &self,
        company_id: CompanyId,
        role: &str,
        level: u32,
    ) -> ApprovalResult<UserId> {
        let mut members = self.directory.members_of_role(company_id, role).await?;
        members.sort();
        members
            .first()
            .copied()
            .ok_or_else(|| ApprovalError::NoApproverResolvable {
                level,
                reason: format!("role `{role}` has no members"),
            })
    }
}
