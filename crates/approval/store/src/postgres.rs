//! PostgreSQL adapter for the approval store.
//!
//! Request transitions lock the request row with `SELECT ... FOR UPDATE`.
//! Action closing and delegation balance changes are conditional updates, and
//! a partial unique index keeps at most one pending action per request. The
//! audit table rejects UPDATE and DELETE through a trigger.

use crate::traits::{ApprovalStore, QueryWindow, StoreTransaction};
use crate::{StorageError, StorageResult};
use approval_types::{
    ActionId, ActionStatus, ActorType, Amount, ApprovalAction, ApprovalEscalation,
    ApprovalRequest, ApprovalStatus, AuditAction, AuditEntry, AuditId, AuthorityMatrixId,
    CompanyId, CompletionType, DelegationId, DelegationType, DoADelegation, EscalationId,
    EscalationType, RequestId, TargetType, TemplateId, TimeoutAction, UserId, WorkflowLevel,
    WorkflowTemplate,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

/// PostgreSQL-backed approval store.
#[derive(Clone)]
pub struct PostgresApprovalStore {
    pool: PgPool,
}

impl PostgresApprovalStore {
    /// Connect to PostgreSQL and initialize required schema.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        Self::connect_with_options(database_url, 10, 5).await
    }

    /// Connect with explicit pool parameters.
    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Backend(format!("failed to connect postgres: {e}")))?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create adapter from an existing pool.
    pub async fn from_pool(pool: PgPool) -> StorageResult<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> StorageResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS approval_templates (
                id UUID PRIMARY KEY,
                company_id UUID NOT NULL,
                name TEXT NOT NULL,
                version INTEGER NOT NULL,
                entity_type TEXT NOT NULL,
                levels JSONB NOT NULL,
                auto_escalate BOOLEAN NOT NULL,
                escalation_hours INTEGER NOT NULL,
                max_escalations INTEGER NOT NULL,
                auto_action_on_timeout TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                created_by UUID,
                UNIQUE (company_id, name, version)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS approval_requests (
                id UUID PRIMARY KEY,
                company_id UUID NOT NULL,
                template_id UUID,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                requested_by UUID NOT NULL,
                amount BIGINT,
                authority_matrix_id UUID,
                current_level INTEGER NOT NULL,
                status TEXT NOT NULL,
                started_at TIMESTAMPTZ NOT NULL,
                completed_at TIMESTAMPTZ,
                completion_type TEXT,
                sla_breach_at TIMESTAMPTZ,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS approval_requests_breach_idx
                ON approval_requests (status, sla_breach_at)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS approval_actions (
                id UUID PRIMARY KEY,
                company_id UUID NOT NULL,
                request_id UUID NOT NULL REFERENCES approval_requests (id),
                level_order INTEGER NOT NULL,
                approver_id UUID NOT NULL,
                status TEXT NOT NULL,
                assigned_at TIMESTAMPTZ NOT NULL,
                due_at TIMESTAMPTZ NOT NULL,
                acted_at TIMESTAMPTZ,
                acted_by UUID,
                delegation_id UUID,
                comments TEXT,
                reminded_at TIMESTAMPTZ,
                seq BIGSERIAL
            )
            "#,
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS approval_actions_one_pending
                ON approval_actions (request_id) WHERE status = 'pending'
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS approval_actions_due_idx
                ON approval_actions (status, due_at)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS approval_escalations (
                id UUID PRIMARY KEY,
                company_id UUID NOT NULL,
                request_id UUID NOT NULL REFERENCES approval_requests (id),
                from_level INTEGER NOT NULL,
                to_level INTEGER NOT NULL CHECK (to_level = from_level + 1),
                from_approver_id UUID NOT NULL,
                to_approver_id UUID,
                escalation_type TEXT NOT NULL,
                escalated_by UUID,
                reason TEXT,
                escalated_at TIMESTAMPTZ NOT NULL,
                seq BIGSERIAL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS doa_delegations (
                id UUID PRIMARY KEY,
                company_id UUID NOT NULL,
                delegator_id UUID NOT NULL,
                delegate_id UUID NOT NULL,
                delegation_type TEXT NOT NULL,
                authority_matrix_ids UUID[] NOT NULL,
                delegate_all_authorities BOOLEAN NOT NULL,
                max_amount_per_transaction BIGINT,
                max_total_amount BIGINT,
                total_approved_amount BIGINT NOT NULL DEFAULT 0,
                start_date TIMESTAMPTZ NOT NULL,
                end_date TIMESTAMPTZ,
                is_active BOOLEAN NOT NULL,
                reason TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                created_by UUID,
                revoked_at TIMESTAMPTZ,
                revoked_by UUID,
                revocation_reason TEXT,
                CHECK (max_total_amount IS NULL OR total_approved_amount <= max_total_amount)
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS doa_delegations_delegate_idx
                ON doa_delegations (company_id, delegate_id, is_active)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS approval_audit_log (
                id UUID PRIMARY KEY,
                seq BIGSERIAL,
                company_id UUID NOT NULL,
                request_id UUID,
                action TEXT NOT NULL,
                actor_id UUID,
                actor_type TEXT NOT NULL,
                target_type TEXT NOT NULL,
                target_id UUID NOT NULL,
                old_values JSONB,
                new_values JSONB,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS approval_audit_log_request_idx
                ON approval_audit_log (request_id, seq)
            "#,
            r#"
            CREATE OR REPLACE FUNCTION approval_audit_log_immutable() RETURNS trigger AS $$
            BEGIN
                RAISE EXCEPTION 'approval_audit_log is append-only';
            END;
            $$ LANGUAGE plpgsql
            "#,
            r#"
            CREATE OR REPLACE TRIGGER approval_audit_log_no_mutation
                BEFORE UPDATE OR DELETE ON approval_audit_log
                FOR EACH ROW EXECUTE FUNCTION approval_audit_log_immutable()
            "#,
        ];

        for stmt in ddl {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }
}

#[async_trait]
impl ApprovalStore for PostgresApprovalStore {
    async fn begin(&self) -> StorageResult<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await.map_err(backend)?;
        Ok(Box::new(PgStoreTransaction { tx }))
    }

    async fn get_template(&self, id: TemplateId) -> StorageResult<Option<WorkflowTemplate>> {
        sqlx::query("SELECT * FROM approval_templates WHERE id = $1")
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .map(template_row_to_record)
            .transpose()
    }

    async fn list_template_versions(
        &self,
        company_id: CompanyId,
        name: &str,
    ) -> StorageResult<Vec<WorkflowTemplate>> {
        sqlx::query(
            "SELECT * FROM approval_templates WHERE company_id = $1 AND name = $2 ORDER BY version",
        )
        .bind(*company_id.as_uuid())
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?
        .into_iter()
        .map(template_row_to_record)
        .collect()
    }

    async fn get_request(&self, id: RequestId) -> StorageResult<Option<ApprovalRequest>> {
        sqlx::query("SELECT * FROM approval_requests WHERE id = $1")
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .map(request_row_to_record)
            .transpose()
    }

    async fn list_actions(&self, request_id: RequestId) -> StorageResult<Vec<ApprovalAction>> {
        sqlx::query("SELECT * FROM approval_actions WHERE request_id = $1 ORDER BY seq")
            .bind(*request_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?
            .into_iter()
            .map(action_row_to_record)
            .collect()
    }

    async fn list_escalations(
        &self,
        request_id: RequestId,
    ) -> StorageResult<Vec<ApprovalEscalation>> {
        sqlx::query("SELECT * FROM approval_escalations WHERE request_id = $1 ORDER BY seq")
            .bind(*request_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?
            .into_iter()
            .map(escalation_row_to_record)
            .collect()
    }

    async fn list_pending_for_approver(
        &self,
        company_id: CompanyId,
        approver_id: UserId,
    ) -> StorageResult<Vec<ApprovalAction>> {
        sqlx::query(
            r#"
            SELECT * FROM approval_actions
             WHERE company_id = $1 AND approver_id = $2 AND status = 'pending'
             ORDER BY due_at, id
            "#,
        )
        .bind(*company_id.as_uuid())
        .bind(*approver_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?
        .into_iter()
        .map(action_row_to_record)
        .collect()
    }

    async fn get_delegation(&self, id: DelegationId) -> StorageResult<Option<DoADelegation>> {
        sqlx::query("SELECT * FROM doa_delegations WHERE id = $1")
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .map(delegation_row_to_record)
            .transpose()
    }

    async fn list_delegations(
        &self,
        company_id: CompanyId,
        user: Option<UserId>,
    ) -> StorageResult<Vec<DoADelegation>> {
        sqlx::query(
            r#"
            SELECT * FROM doa_delegations
             WHERE company_id = $1
               AND ($2::UUID IS NULL OR delegator_id = $2 OR delegate_id = $2)
             ORDER BY created_at, id
            "#,
        )
        .bind(*company_id.as_uuid())
        .bind(user.map(|u| *u.as_uuid()))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?
        .into_iter()
        .map(delegation_row_to_record)
        .collect()
    }

    async fn list_audit_for_request(
        &self,
        request_id: RequestId,
    ) -> StorageResult<Vec<AuditEntry>> {
        sqlx::query("SELECT * FROM approval_audit_log WHERE request_id = $1 ORDER BY seq")
            .bind(*request_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?
            .into_iter()
            .map(audit_row_to_record)
            .collect()
    }

    async fn list_audit(
        &self,
        company_id: CompanyId,
        window: QueryWindow,
    ) -> StorageResult<Vec<AuditEntry>> {
        sqlx::query(
            r#"
            SELECT * FROM approval_audit_log
             WHERE company_id = $1
             ORDER BY seq DESC
             LIMIT $2 OFFSET $3
            "#,
        )
        .bind(*company_id.as_uuid())
        .bind(limit_param(window.limit)?)
        .bind(to_i64(window.offset)?)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?
        .into_iter()
        .map(audit_row_to_record)
        .collect()
    }

    async fn find_overdue_actions(
        &self,
        company_id: Option<CompanyId>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<ApprovalAction>> {
        sqlx::query(
            r#"
            SELECT a.* FROM approval_actions a
              JOIN approval_requests r ON r.id = a.request_id
              LEFT JOIN approval_templates t ON t.id = r.template_id
             WHERE a.status = 'pending'
               AND a.due_at < $1
               AND r.status IN ('pending', 'in_progress')
               AND r.template_id IS NOT NULL
               AND (t.id IS NULL OR t.auto_escalate OR t.auto_action_on_timeout = 'escalate')
               AND ($2::UUID IS NULL OR a.company_id = $2)
             ORDER BY a.due_at, a.id
             LIMIT $3
            "#,
        )
        .bind(now)
        .bind(company_id.map(|c| *c.as_uuid()))
        .bind(limit_param(limit)?)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?
        .into_iter()
        .map(action_row_to_record)
        .collect()
    }

    async fn find_breached_requests(
        &self,
        company_id: Option<CompanyId>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<ApprovalRequest>> {
        sqlx::query(
            r#"
            SELECT r.* FROM approval_requests r
              JOIN approval_templates t ON t.id = r.template_id
             WHERE r.status IN ('pending', 'in_progress')
               AND r.sla_breach_at < $1
               AND t.auto_action_on_timeout IN ('approve', 'reject')
               AND ($2::UUID IS NULL OR r.company_id = $2)
             ORDER BY r.sla_breach_at, r.id
             LIMIT $3
            "#,
        )
        .bind(now)
        .bind(company_id.map(|c| *c.as_uuid()))
        .bind(limit_param(limit)?)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?
        .into_iter()
        .map(request_row_to_record)
        .collect()
    }

    async fn find_due_soon(
        &self,
        company_id: Option<CompanyId>,
        now: DateTime<Utc>,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<ApprovalAction>> {
        sqlx::query(
            r#"
            SELECT a.* FROM approval_actions a
              JOIN approval_requests r ON r.id = a.request_id
             WHERE a.status = 'pending'
               AND a.reminded_at IS NULL
               AND a.due_at > $1 AND a.due_at <= $2
               AND r.status IN ('pending', 'in_progress')
               AND ($3::UUID IS NULL OR a.company_id = $3)
             ORDER BY a.due_at, a.id
             LIMIT $4
            "#,
        )
        .bind(now)
        .bind(cutoff)
        .bind(company_id.map(|c| *c.as_uuid()))
        .bind(limit_param(limit)?)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?
        .into_iter()
        .map(action_row_to_record)
        .collect()
    }

    async fn find_lapsed_delegations(
        &self,
        company_id: Option<CompanyId>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<DoADelegation>> {
        sqlx::query(
            r#"
            SELECT * FROM doa_delegations
             WHERE is_active AND end_date IS NOT NULL AND end_date < $1
               AND ($2::UUID IS NULL OR company_id = $2)
             ORDER BY end_date, id
             LIMIT $3
            "#,
        )
        .bind(now)
        .bind(company_id.map(|c| *c.as_uuid()))
        .bind(limit_param(limit)?)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?
        .into_iter()
        .map(delegation_row_to_record)
        .collect()
    }
}

// ── Transaction ──────────────────────────────────────────────────────

struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn get_template(&mut self, id: TemplateId) -> StorageResult<Option<WorkflowTemplate>> {
        sqlx::query("SELECT * FROM approval_templates WHERE id = $1")
            .bind(*id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(backend)?
            .map(template_row_to_record)
            .transpose()
    }

    async fn latest_template_version(
        &mut self,
        company_id: CompanyId,
        name: &str,
    ) -> StorageResult<Option<u32>> {
        let row = sqlx::query(
            "SELECT MAX(version) AS version FROM approval_templates WHERE company_id = $1 AND name = $2",
        )
        .bind(*company_id.as_uuid())
        .bind(name)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(backend)?;
        let version: Option<i32> = get(&row, "version")?;
        version.map(to_u32).transpose()
    }

    async fn insert_template(&mut self, template: &WorkflowTemplate) -> StorageResult<()> {
        let levels = serde_json::to_value(&template.levels)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO approval_templates
                (id, company_id, name, version, entity_type, levels, auto_escalate,
                 escalation_hours, max_escalations, auto_action_on_timeout, created_at, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(*template.id.as_uuid())
        .bind(*template.company_id.as_uuid())
        .bind(&template.name)
        .bind(to_i32(template.version)?)
        .bind(&template.entity_type)
        .bind(levels)
        .bind(template.auto_escalate)
        .bind(to_i32(template.escalation_hours)?)
        .bind(to_i32(template.max_escalations)?)
        .bind(timeout_action_to_str(template.auto_action_on_timeout))
        .bind(template.created_at)
        .bind(template.created_by.map(|u| *u.as_uuid()))
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_conflict)?;
        Ok(())
    }

    async fn lock_request(&mut self, id: RequestId) -> StorageResult<Option<ApprovalRequest>> {
        sqlx::query("SELECT * FROM approval_requests WHERE id = $1 FOR UPDATE")
            .bind(*id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(backend)?
            .map(request_row_to_record)
            .transpose()
    }

    async fn insert_request(&mut self, request: &ApprovalRequest) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO approval_requests
                (id, company_id, template_id, entity_type, entity_id, requested_by, amount,
                 authority_matrix_id, current_level, status, started_at, completed_at,
                 completion_type, sla_breach_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(*request.id.as_uuid())
        .bind(*request.company_id.as_uuid())
        .bind(request.template_id.map(|t| *t.as_uuid()))
        .bind(&request.entity_type)
        .bind(&request.entity_id)
        .bind(*request.requested_by.as_uuid())
        .bind(request.amount)
        .bind(request.authority_matrix_id.map(|a| *a.as_uuid()))
        .bind(to_i32(request.current_level)?)
        .bind(request.status.as_str())
        .bind(request.started_at)
        .bind(request.completed_at)
        .bind(request.completion_type.map(|c| c.as_str()))
        .bind(request.sla_breach_at)
        .bind(request.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_conflict)?;
        Ok(())
    }

    async fn update_request(&mut self, request: &ApprovalRequest) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE approval_requests
               SET current_level = $2,
                   status = $3,
                   completed_at = $4,
                   completion_type = $5,
                   sla_breach_at = $6,
                   updated_at = $7
             WHERE id = $1
            "#,
        )
        .bind(*request.id.as_uuid())
        .bind(to_i32(request.current_level)?)
        .bind(request.status.as_str())
        .bind(request.completed_at)
        .bind(request.completion_type.map(|c| c.as_str()))
        .bind(request.sla_breach_at)
        .bind(request.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!(
                "request {} not found",
                request.id
            )));
        }
        Ok(())
    }

    async fn pending_action(
        &mut self,
        request_id: RequestId,
    ) -> StorageResult<Option<ApprovalAction>> {
        sqlx::query(
            "SELECT * FROM approval_actions WHERE request_id = $1 AND status = 'pending' FOR UPDATE",
        )
        .bind(*request_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(backend)?
        .map(action_row_to_record)
        .transpose()
    }

    async fn insert_action(&mut self, action: &ApprovalAction) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO approval_actions
                (id, company_id, request_id, level_order, approver_id, status, assigned_at,
                 due_at, acted_at, acted_by, delegation_id, comments, reminded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(*action.id.as_uuid())
        .bind(*action.company_id.as_uuid())
        .bind(*action.request_id.as_uuid())
        .bind(to_i32(action.level_order)?)
        .bind(*action.approver_id.as_uuid())
        .bind(action.status.as_str())
        .bind(action.assigned_at)
        .bind(action.due_at)
        .bind(action.acted_at)
        .bind(action.acted_by.map(|u| *u.as_uuid()))
        .bind(action.delegation_id.map(|d| *d.as_uuid()))
        .bind(&action.comments)
        .bind(action.reminded_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_conflict)?;
        Ok(())
    }

    async fn close_action(&mut self, action: &ApprovalAction) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE approval_actions
               SET status = $2, acted_at = $3, acted_by = $4, delegation_id = $5, comments = $6
             WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(*action.id.as_uuid())
        .bind(action.status.as_str())
        .bind(action.acted_at)
        .bind(action.acted_by.map(|u| *u.as_uuid()))
        .bind(action.delegation_id.map(|d| *d.as_uuid()))
        .bind(&action.comments)
        .execute(&mut *self.tx)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_reminded(&mut self, id: ActionId, at: DateTime<Utc>) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE approval_actions SET reminded_at = $2
             WHERE id = $1 AND status = 'pending' AND reminded_at IS NULL
            "#,
        )
        .bind(*id.as_uuid())
        .bind(at)
        .execute(&mut *self.tx)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_escalation(&mut self, escalation: &ApprovalEscalation) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO approval_escalations
                (id, company_id, request_id, from_level, to_level, from_approver_id,
                 to_approver_id, escalation_type, escalated_by, reason, escalated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(*escalation.id.as_uuid())
        .bind(*escalation.company_id.as_uuid())
        .bind(*escalation.request_id.as_uuid())
        .bind(to_i32(escalation.from_level)?)
        .bind(to_i32(escalation.to_level)?)
        .bind(*escalation.from_approver_id.as_uuid())
        .bind(escalation.to_approver_id.map(|u| *u.as_uuid()))
        .bind(escalation.escalation_type.as_str())
        .bind(escalation.escalated_by.map(|u| *u.as_uuid()))
        .bind(&escalation.reason)
        .bind(escalation.escalated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_conflict)?;
        Ok(())
    }

    async fn count_escalations(&mut self, request_id: RequestId) -> StorageResult<u32> {
        let row =
            sqlx::query("SELECT COUNT(*) AS n FROM approval_escalations WHERE request_id = $1")
                .bind(*request_id.as_uuid())
                .fetch_one(&mut *self.tx)
                .await
                .map_err(backend)?;
        let n: i64 = get(&row, "n")?;
        u32::try_from(n).map_err(|_| StorageError::InvariantViolation("escalation count overflow".into()))
    }

    async fn effective_delegations(
        &mut self,
        company_id: CompanyId,
        delegate_id: UserId,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<DoADelegation>> {
        sqlx::query(
            r#"
            SELECT * FROM doa_delegations
             WHERE company_id = $1
               AND delegate_id = $2
               AND is_active
               AND start_date <= $3
               AND (end_date IS NULL OR end_date >= $3)
             ORDER BY created_at, id
            "#,
        )
        .bind(*company_id.as_uuid())
        .bind(*delegate_id.as_uuid())
        .bind(now)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(backend)?
        .into_iter()
        .map(delegation_row_to_record)
        .collect()
    }

    async fn insert_delegation(&mut self, delegation: &DoADelegation) -> StorageResult<()> {
        let authorities: Vec<Uuid> = delegation
            .authority_matrix_ids
            .iter()
            .map(|a| *a.as_uuid())
            .collect();

        sqlx::query(
            r#"
            INSERT INTO doa_delegations
                (id, company_id, delegator_id, delegate_id, delegation_type, authority_matrix_ids,
                 delegate_all_authorities, max_amount_per_transaction, max_total_amount,
                 total_approved_amount, start_date, end_date, is_active, reason, created_at,
                 created_by, revoked_at, revoked_by, revocation_reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(*delegation.id.as_uuid())
        .bind(*delegation.company_id.as_uuid())
        .bind(*delegation.delegator_id.as_uuid())
        .bind(*delegation.delegate_id.as_uuid())
        .bind(delegation.delegation_type.as_str())
        .bind(authorities)
        .bind(delegation.delegate_all_authorities)
        .bind(delegation.max_amount_per_transaction)
        .bind(delegation.max_total_amount)
        .bind(delegation.total_approved_amount)
        .bind(delegation.start_date)
        .bind(delegation.end_date)
        .bind(delegation.is_active)
        .bind(&delegation.reason)
        .bind(delegation.created_at)
        .bind(delegation.created_by.map(|u| *u.as_uuid()))
        .bind(delegation.revoked_at)
        .bind(delegation.revoked_by.map(|u| *u.as_uuid()))
        .bind(&delegation.revocation_reason)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_conflict)?;
        Ok(())
    }

    async fn lock_delegation(&mut self, id: DelegationId) -> StorageResult<Option<DoADelegation>> {
        sqlx::query("SELECT * FROM doa_delegations WHERE id = $1 FOR UPDATE")
            .bind(*id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(backend)?
            .map(delegation_row_to_record)
            .transpose()
    }

    async fn update_delegation(&mut self, delegation: &DoADelegation) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE doa_delegations
               SET is_active = $2, revoked_at = $3, revoked_by = $4, revocation_reason = $5
             WHERE id = $1
            "#,
        )
        .bind(*delegation.id.as_uuid())
        .bind(delegation.is_active)
        .bind(delegation.revoked_at)
        .bind(delegation.revoked_by.map(|u| *u.as_uuid()))
        .bind(&delegation.revocation_reason)
        .execute(&mut *self.tx)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!(
                "delegation {} not found",
                delegation.id
            )));
        }
        Ok(())
    }

    async fn add_delegation_amount(
        &mut self,
        id: DelegationId,
        amount: Amount,
    ) -> StorageResult<Option<Amount>> {
        let row = sqlx::query(
            r#"
            UPDATE doa_delegations
               SET total_approved_amount = total_approved_amount + $2
             WHERE id = $1
               AND is_active
               AND (max_amount_per_transaction IS NULL OR $2 <= max_amount_per_transaction)
               AND (max_total_amount IS NULL OR total_approved_amount + $2 <= max_total_amount)
            RETURNING total_approved_amount
            "#,
        )
        .bind(*id.as_uuid())
        .bind(amount)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(backend)?;

        row.map(|r| get::<i64>(&r, "total_approved_amount"))
            .transpose()
    }

    async fn append_audit(&mut self, entry: &AuditEntry) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO approval_audit_log
                (id, company_id, request_id, action, actor_id, actor_type, target_type,
                 target_id, old_values, new_values, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(*entry.id.as_uuid())
        .bind(*entry.company_id.as_uuid())
        .bind(entry.request_id.map(|r| *r.as_uuid()))
        .bind(entry.action.as_str())
        .bind(entry.actor_id.map(|u| *u.as_uuid()))
        .bind(entry.actor_type.as_str())
        .bind(entry.target_type.as_str())
        .bind(entry.target_id)
        .bind(&entry.old_values)
        .bind(&entry.new_values)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        self.tx.commit().await.map_err(backend)
    }
}

// ── Row Mapping ──────────────────────────────────────────────────────

fn get<'r, T>(row: &'r PgRow, column: &str) -> StorageResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StorageError::Backend(e.to_string()))
}

fn template_row_to_record(row: PgRow) -> StorageResult<WorkflowTemplate> {
    let levels: serde_json::Value = get(&row, "levels")?;
    let levels: Vec<WorkflowLevel> =
        serde_json::from_value(levels).map_err(|e| StorageError::Serialization(e.to_string()))?;
    let timeout: String = get(&row, "auto_action_on_timeout")?;

    Ok(WorkflowTemplate {
        id: TemplateId::from_uuid(get(&row, "id")?),
        company_id: CompanyId::from_uuid(get(&row, "company_id")?),
        name: get(&row, "name")?,
        version: to_u32(get(&row, "version")?)?,
        entity_type: get(&row, "entity_type")?,
        levels,
        auto_escalate: get(&row, "auto_escalate")?,
        escalation_hours: to_u32(get(&row, "escalation_hours")?)?,
        max_escalations: to_u32(get(&row, "max_escalations")?)?,
        auto_action_on_timeout: parse_timeout_action(&timeout)?,
        created_at: get(&row, "created_at")?,
        created_by: get::<Option<Uuid>>(&row, "created_by")?.map(UserId::from_uuid),
    })
}

fn request_row_to_record(row: PgRow) -> StorageResult<ApprovalRequest> {
    let status: String = get(&row, "status")?;
    let completion: Option<String> = get(&row, "completion_type")?;

    Ok(ApprovalRequest {
        id: RequestId::from_uuid(get(&row, "id")?),
        company_id: CompanyId::from_uuid(get(&row, "company_id")?),
        template_id: get::<Option<Uuid>>(&row, "template_id")?.map(TemplateId::from_uuid),
        entity_type: get(&row, "entity_type")?,
        entity_id: get(&row, "entity_id")?,
        requested_by: UserId::from_uuid(get(&row, "requested_by")?),
        amount: get(&row, "amount")?,
        authority_matrix_id: get::<Option<Uuid>>(&row, "authority_matrix_id")?
            .map(AuthorityMatrixId::from_uuid),
        current_level: to_u32(get(&row, "current_level")?)?,
        status: parse_approval_status(&status)?,
        started_at: get(&row, "started_at")?,
        completed_at: get(&row, "completed_at")?,
        completion_type: completion.as_deref().map(parse_completion_type).transpose()?,
        sla_breach_at: get(&row, "sla_breach_at")?,
        updated_at: get(&row, "updated_at")?,
    })
}

fn action_row_to_record(row: PgRow) -> StorageResult<ApprovalAction> {
    let status: String = get(&row, "status")?;

    Ok(ApprovalAction {
        id: ActionId::from_uuid(get(&row, "id")?),
        company_id: CompanyId::from_uuid(get(&row, "company_id")?),
        request_id: RequestId::from_uuid(get(&row, "request_id")?),
        level_order: to_u32(get(&row, "level_order")?)?,
        approver_id: UserId::from_uuid(get(&row, "approver_id")?),
        status: parse_action_status(&status)?,
        assigned_at: get(&row, "assigned_at")?,
        due_at: get(&row, "due_at")?,
        acted_at: get(&row, "acted_at")?,
        acted_by: get::<Option<Uuid>>(&row, "acted_by")?.map(UserId::from_uuid),
        delegation_id: get::<Option<Uuid>>(&row, "delegation_id")?.map(DelegationId::from_uuid),
        comments: get(&row, "comments")?,
        reminded_at: get(&row, "reminded_at")?,
    })
}

fn escalation_row_to_record(row: PgRow) -> StorageResult<ApprovalEscalation> {
    let escalation_type: String = get(&row, "escalation_type")?;

    Ok(ApprovalEscalation {
        id: EscalationId::from_uuid(get(&row, "id")?),
        company_id: CompanyId::from_uuid(get(&row, "company_id")?),
        request_id: RequestId::from_uuid(get(&row, "request_id")?),
        from_level: to_u32(get(&row, "from_level")?)?,
        to_level: to_u32(get(&row, "to_level")?)?,
        from_approver_id: UserId::from_uuid(get(&row, "from_approver_id")?),
        to_approver_id: get::<Option<Uuid>>(&row, "to_approver_id")?.map(UserId::from_uuid),
        escalation_type: parse_escalation_type(&escalation_type)?,
        escalated_by: get::<Option<Uuid>>(&row, "escalated_by")?.map(UserId::from_uuid),
        reason: get(&row, "reason")?,
        escalated_at: get(&row, "escalated_at")?,
    })
}

fn delegation_row_to_record(row: PgRow) -> StorageResult<DoADelegation> {
    let delegation_type: String = get(&row, "delegation_type")?;
    let authorities: Vec<Uuid> = get(&row, "authority_matrix_ids")?;

    Ok(DoADelegation {
        id: DelegationId::from_uuid(get(&row, "id")?),
        company_id: CompanyId::from_uuid(get(&row, "company_id")?),
        delegator_id: UserId::from_uuid(get(&row, "delegator_id")?),
        delegate_id: UserId::from_uuid(get(&row, "delegate_id")?),
        delegation_type: parse_delegation_type(&delegation_type)?,
        authority_matrix_ids: authorities
            .into_iter()
            .map(AuthorityMatrixId::from_uuid)
            .collect(),
        delegate_all_authorities: get(&row, "delegate_all_authorities")?,
        max_amount_per_transaction: get(&row, "max_amount_per_transaction")?,
        max_total_amount: get(&row, "max_total_amount")?,
        total_approved_amount: get(&row, "total_approved_amount")?,
        start_date: get(&row, "start_date")?,
        end_date: get(&row, "end_date")?,
        is_active: get(&row, "is_active")?,
        reason: get(&row, "reason")?,
        created_at: get(&row, "created_at")?,
        created_by: get::<Option<Uuid>>(&row, "created_by")?.map(UserId::from_uuid),
        revoked_at: get(&row, "revoked_at")?,
        revoked_by: get::<Option<Uuid>>(&row, "revoked_by")?.map(UserId::from_uuid),
        revocation_reason: get(&row, "revocation_reason")?,
    })
}

fn audit_row_to_record(row: PgRow) -> StorageResult<AuditEntry> {
    let action: String = get(&row, "action")?;
    let actor_type: String = get(&row, "actor_type")?;
    let target_type: String = get(&row, "target_type")?;

    Ok(AuditEntry {
        id: AuditId::from_uuid(get(&row, "id")?),
        company_id: CompanyId::from_uuid(get(&row, "company_id")?),
        request_id: get::<Option<Uuid>>(&row, "request_id")?.map(RequestId::from_uuid),
        action: AuditAction::from_name(&action).ok_or_else(|| {
            StorageError::Serialization(format!("unknown audit action `{action}`"))
        })?,
        actor_id: get::<Option<Uuid>>(&row, "actor_id")?.map(UserId::from_uuid),
        actor_type: parse_actor_type(&actor_type)?,
        target_type: parse_target_type(&target_type)?,
        target_id: get(&row, "target_id")?,
        old_values: get(&row, "old_values")?,
        new_values: get(&row, "new_values")?,
        created_at: get(&row, "created_at")?,
    })
}

// ── Enum Codecs ──────────────────────────────────────────────────────

fn unknown(kind: &str, raw: &str) -> StorageError {
    StorageError::Serialization(format!("unknown {kind} `{raw}`"))
}

fn parse_approval_status(raw: &str) -> StorageResult<ApprovalStatus> {
    match raw {
        "pending" => Ok(ApprovalStatus::Pending),
        "in_progress" => Ok(ApprovalStatus::InProgress),
        "escalated" => Ok(ApprovalStatus::Escalated),
        "approved" => Ok(ApprovalStatus::Approved),
        "rejected" => Ok(ApprovalStatus::Rejected),
        "cancelled" => Ok(ApprovalStatus::Cancelled),
        "failed" => Ok(ApprovalStatus::Failed),
        "suspended" => Ok(ApprovalStatus::Suspended),
        _ => Err(unknown("approval status", raw)),
    }
}

fn parse_completion_type(raw: &str) -> StorageResult<CompletionType> {
    match raw {
        "approved" => Ok(CompletionType::Approved),
        "rejected" => Ok(CompletionType::Rejected),
        "auto_approved" => Ok(CompletionType::AutoApproved),
        "auto_rejected" => Ok(CompletionType::AutoRejected),
        "cancelled" => Ok(CompletionType::Cancelled),
        "failed" => Ok(CompletionType::Failed),
        _ => Err(unknown("completion type", raw)),
    }
}

fn parse_action_status(raw: &str) -> StorageResult<ActionStatus> {
    match raw {
        "pending" => Ok(ActionStatus::Pending),
        "approved" => Ok(ActionStatus::Approved),
        "rejected" => Ok(ActionStatus::Rejected),
        "escalated" => Ok(ActionStatus::Escalated),
        "expired" => Ok(ActionStatus::Expired),
        "cancelled" => Ok(ActionStatus::Cancelled),
        _ => Err(unknown("action status", raw)),
    }
}

fn parse_escalation_type(raw: &str) -> StorageResult<EscalationType> {
    match raw {
        "manual" => Ok(EscalationType::Manual),
        "timeout" => Ok(EscalationType::Timeout),
        _ => Err(unknown("escalation type", raw)),
    }
}

fn parse_delegation_type(raw: &str) -> StorageResult<DelegationType> {
    match raw {
        "full" => Ok(DelegationType::Full),
        "partial" => Ok(DelegationType::Partial),
        "temporary" => Ok(DelegationType::Temporary),
        _ => Err(unknown("delegation type", raw)),
    }
}

fn parse_actor_type(raw: &str) -> StorageResult<ActorType> {
    match raw {
        "user" => Ok(ActorType::User),
        "system" => Ok(ActorType::System),
        _ => Err(unknown("actor type", raw)),
    }
}

fn parse_target_type(raw: &str) -> StorageResult<TargetType> {
    match raw {
        "request" => Ok(TargetType::Request),
        "action" => Ok(TargetType::Action),
        "delegation" => Ok(TargetType::Delegation),
        "template" => Ok(TargetType::Template),
        _ => Err(unknown("target type", raw)),
    }
}

fn timeout_action_to_str(action: TimeoutAction) -> &'static str {
    match action {
        TimeoutAction::None => "none",
        TimeoutAction::Escalate => "escalate",
        TimeoutAction::Approve => "approve",
        TimeoutAction::Reject => "reject",
    }
}

fn parse_timeout_action(raw: &str) -> StorageResult<TimeoutAction> {
    match raw {
        "none" => Ok(TimeoutAction::None),
        "escalate" => Ok(TimeoutAction::Escalate),
        "approve" => Ok(TimeoutAction::Approve),
        "reject" => Ok(TimeoutAction::Reject),
        _ => Err(unknown("timeout action", raw)),
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn backend(err: sqlx::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

fn map_sqlx_conflict(err: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return StorageError::Conflict(db_err.message().to_string());
        }
    }
    StorageError::Backend(err.to_string())
}

fn to_i32(value: u32) -> StorageResult<i32> {
    i32::try_from(value).map_err(|_| StorageError::InvalidInput(format!("{value} out of range")))
}

fn to_u32(value: i32) -> StorageResult<u32> {
    u32::try_from(value)
        .map_err(|_| StorageError::Serialization(format!("negative counter {value}")))
}

fn to_i64(value: usize) -> StorageResult<i64> {
    i64::try_from(value)
        .map_err(|_| StorageError::InvalidInput("window value too large".to_string()))
}

/// `LIMIT NULL` means no limit
fn limit_param(limit: usize) -> StorageResult<Option<i64>> {
    if limit == 0 {
        Ok(None)
    } else {
        to_i64(limit).map(Some)
    }
}
