//! Template registry: versioned, immutable approval chains
//!
//! Templates are never edited in place. Registering under an existing
//! (company, name) stores the next version; live requests stay on the
//! version they were created from.

use crate::context::EngineContext;
use crate::error::{ApprovalError, ApprovalResult};
use approval_types::{
    Actor, AuditAction, AuditEntry, CompanyId, NewTemplate, TargetType, TemplateId, UserId,
    WorkflowTemplate,
};

#[derive(Clone)]
pub struct TemplateRegistry {
    ctx: EngineContext,
}

impl TemplateRegistry {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Validate and store the next version of a template
    pub async fn register(
        &self,
        template: NewTemplate,
        registered_by: Option<UserId>,
    ) -> ApprovalResult<WorkflowTemplate> {
        template.validate()?;

        let now = self.ctx.now();
        let mut tx = self.ctx.store.begin().await?;
        let version = tx
            .latest_template_version(template.company_id, &template.name)
            .await?
            .map_or(1, |v| v + 1);
        let template = template.into_template(version, registered_by, now);
        tx.insert_template(&template).await?;

        let actor = registered_by.map_or(Actor::System, Actor::User);
        let entry = AuditEntry::new(
            template.company_id,
            AuditAction::TemplateRegister,
            actor,
            TargetType::Template,
            *template.id.as_uuid(),
            now,
        )
        .with_new(serde_json::json!({
            "name": template.name,
            "version": template.version,
            "entity_type": template.entity_type,
            "levels": template.level_count(),
        }));
        tx.append_audit(&entry).await?;
        tx.commit().await?;

        tracing::info!(
            template_id = %template.id,
            name = %template.name,
            version = template.version,
            "Workflow template registered"
        );
        Ok(template)
    }

    pub async fn get(&self, id: TemplateId) -> ApprovalResult<WorkflowTemplate> {
        self.ctx
            .store
            .get_template(id)
            .await?
            .ok_or_else(|| ApprovalError::TemplateNotFound(id.to_string()))
    }

    /// Highest version of a template
    pub async fn latest(
        &self,
        company_id: CompanyId,
        name: &str,
    ) -> ApprovalResult<WorkflowTemplate> {
        self.versions(company_id, name)
            .await?
            .pop()
            .ok_or_else(|| ApprovalError::TemplateNotFound(format!("{company_id}/{name}")))
    }

    /// Every version of a template, oldest first
    pub async fn versions(
        &self,
        company_id: CompanyId,
        name: &str,
    ) -> ApprovalResult<Vec<WorkflowTemplate>> {
        Ok(self
            .ctx
            .store
            .list_template_versions(company_id, name)
            .await?)
    }
}
