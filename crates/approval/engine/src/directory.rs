//! User/role directory consulted to resolve role-based approvers

use crate::error::ApprovalResult;
use approval_types::{CompanyId, UserId};
use async_trait::async_trait;
use std::collections::HashMap;

/// Source of role membership
#[async_trait]
pub trait ApproverDirectory: Send + Sync {
    /// Members of `role` within a company. An empty list is a valid answer.
    async fn members_of_role(&self, company_id: CompanyId, role: &str)
        -> ApprovalResult<Vec<UserId>>;
}

/// Directory held in memory, usually loaded from configuration.
///
/// Company-specific entries shadow the shared role map.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    roles: HashMap<String, Vec<UserId>>,
    company_roles: HashMap<(CompanyId, String), Vec<UserId>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Role shared by every company
    pub fn with_role(mut self, role: impl Into<String>, members: Vec<UserId>) -> Self {
        self.roles.insert(role.into(), members);
        self
    }

    pub fn with_company_role(
        mut self,
        company_id: CompanyId,
        role: impl Into<String>,
        members: Vec<UserId>,
    ) -> Self {
        self.company_roles.insert((company_id, role.into()), members);
        self
    }

    pub fn role_count(&self) -> usize {
        self.roles.len() + self.company_roles.len()
    }
}

#[async_trait]
impl ApproverDirectory for StaticDirectory {
    async fn members_of_role(
        &self,
        company_id: CompanyId,
        role: &str,
    ) -> ApprovalResult<Vec<UserId>> {
        let members = self
            .company_roles
            .get(&(company_id, role.to_string()))
            .or_else(|| self.roles.get(role))
            .cloned()
            .unwrap_or_default();
        Ok(members)
    }
}
