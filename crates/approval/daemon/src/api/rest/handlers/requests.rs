//! Approval request handlers

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use approval_engine::RequestStatus;
use approval_types::{
    ActionOutcome, Amount, ApprovalAction, ApprovalRequest, AuditEntry, AuthorityMatrixId,
    CompanyId, RequestContext, RequestId, TemplateId, UserId,
};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

/// Create request body
#[derive(Debug, Deserialize)]
pub struct CreateRequestBody {
    /// Omitted for ad hoc requests, which then need `approver`
    #[serde(default)]
    pub template_id: Option<TemplateId>,
    pub company_id: CompanyId,
    pub entity_type: String,
    pub entity_id: String,
    pub requested_by: UserId,
    #[serde(default)]
    pub amount: Option<Amount>,
    #[serde(default)]
    pub authority_matrix_id: Option<AuthorityMatrixId>,
    #[serde(default)]
    pub approver: Option<UserId>,
}

impl CreateRequestBody {
    fn context(&self) -> RequestContext {
        RequestContext {
            company_id: self.company_id,
            requested_by: self.requested_by,
            amount: self.amount,
            authority_matrix_id: self.authority_matrix_id,
            approver: self.approver,
        }
    }
}

/// Submit a document for approval
pub async fn create_request(
    State(state): State<AppState>,
    Json(body): Json<CreateRequestBody>,
) -> ApiResult<Json<ApprovalRequest>> {
    let request = state
        .engine
        .create_request(body.template_id, &body.entity_type, &body.entity_id, body.context())
        .await?;

    tracing::info!(
        request_id = %request.id,
        entity_type = %request.entity_type,
        entity_id = %request.entity_id,
        "Created approval request"
    );

    Ok(Json(request))
}

/// Request with its actions and escalations
pub async fn get_request(
    State(state): State<AppState>,
    Path(id): Path<RequestId>,
) -> ApiResult<Json<RequestStatus>> {
    Ok(Json(state.engine.get_status(id).await?))
}

/// Approve or reject body
#[derive(Debug, Deserialize)]
pub struct ActBody {
    pub actor: UserId,
    pub outcome: ActionOutcome,
    #[serde(default)]
    pub comments: Option<String>,
}

/// Act on the request's open action
pub async fn act_on_request(
    State(state): State<AppState>,
    Path(id): Path<RequestId>,
    Json(body): Json<ActBody>,
) -> ApiResult<Json<ApprovalRequest>> {
    let request = state
        .engine
        .act(id, body.actor, body.outcome, body.comments)
        .await?;
    Ok(Json(request))
}

/// Body shared by cancel, suspend and resume
#[derive(Debug, Deserialize)]
pub struct InterventionBody {
    pub actor: UserId,
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn cancel_request(
    State(state): State<AppState>,
    Path(id): Path<RequestId>,
    Json(body): Json<InterventionBody>,
) -> ApiResult<Json<ApprovalRequest>> {
    Ok(Json(
        state
            .engine
            .cancel_request(id, body.actor, body.reason)
            .await?,
    ))
}

pub async fn suspend_request(
    State(state): State<AppState>,
    Path(id): Path<RequestId>,
    Json(body): Json<InterventionBody>,
) -> ApiResult<Json<ApprovalRequest>> {
    Ok(Json(
        state
            .engine
            .suspend_request(id, body.actor, body.reason)
            .await?,
    ))
}

pub async fn resume_request(
    State(state): State<AppState>,
    Path(id): Path<RequestId>,
    Json(body): Json<InterventionBody>,
) -> ApiResult<Json<ApprovalRequest>> {
    Ok(Json(
        state
            .engine
            .resume_request(id, body.actor, body.reason)
            .await?,
    ))
}

/// Manual escalation body
#[derive(Debug, Deserialize)]
pub struct EscalateBody {
    pub actor: UserId,
    #[serde(default)]
    pub to_approver: Option<UserId>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Push the request to its next level
pub async fn escalate_request(
    State(state): State<AppState>,
    Path(id): Path<RequestId>,
    Json(body): Json<EscalateBody>,
) -> ApiResult<Json<ApprovalRequest>> {
    Ok(Json(
        state
            .engine
            .manual_escalate(id, body.actor, body.to_approver, body.reason)
            .await?,
    ))
}

/// Assign body for parked requests
#[derive(Debug, Deserialize)]
pub struct AssignBody {
    pub actor: UserId,
    pub approver: UserId,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Hand a parked request to a named approver
pub async fn assign_approver(
    State(state): State<AppState>,
    Path(id): Path<RequestId>,
    Json(body): Json<AssignBody>,
) -> ApiResult<Json<ApprovalRequest>> {
    Ok(Json(
        state
            .engine
            .assign_approver(id, body.actor, body.approver, body.reason)
            .await?,
    ))
}

/// Audit trail of one request, oldest first
pub async fn get_request_audit(
    State(state): State<AppState>,
    Path(id): Path<RequestId>,
) -> ApiResult<Json<Vec<AuditEntry>>> {
    // 404 for unknown requests rather than an empty trail
    state.engine.get_status(id).await?;
    Ok(Json(state.engine.audit_trail(id).await?))
}

/// Pending actions assigned to an approver
pub async fn get_inbox(
    State(state): State<AppState>,
    Path((company_id, user_id)): Path<(CompanyId, UserId)>,
) -> ApiResult<Json<Vec<ApprovalAction>>> {
    Ok(Json(
        state.engine.pending_actions_for(company_id, user_id).await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(default = "default_audit_limit")]
    pub limit: usize,
}

fn default_audit_limit() -> usize {
    100
}

/// Most recent audit entries of a company, newest first
pub async fn get_company_audit(
    State(state): State<AppState>,
    Path(company_id): Path<CompanyId>,
    Query(query): Query<AuditQuery>,
) -> ApiResult<Json<Vec<AuditEntry>>> {
    Ok(Json(
        state
            .engine
            .audit_for_company(company_id, query.limit.min(1000))
            .await?,
    ))
}
