//! Workflow template handlers

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use approval_types::{CompanyId, NewTemplate, TemplateId, UserId, WorkflowTemplate};
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

/// Register template request
#[derive(Debug, Deserialize)]
pub struct RegisterTemplateRequest {
    #[serde(flatten)]
    pub template: NewTemplate,
    #[serde(default)]
    pub registered_by: Option<UserId>,
}

/// Register a new template version
pub async fn register_template(
    State(state): State<AppState>,
    Json(request): Json<RegisterTemplateRequest>,
) -> ApiResult<Json<WorkflowTemplate>> {
    let template = state
        .engine
        .register_template(request.template, request.registered_by)
        .await?;
    Ok(Json(template))
}

/// Get one template version by id
pub async fn get_template(
    State(state): State<AppState>,
    Path(id): Path<TemplateId>,
) -> ApiResult<Json<WorkflowTemplate>> {
    Ok(Json(state.engine.get_template(id).await?))
}

/// Every version of a named template, oldest first
pub async fn list_template_versions(
    State(state): State<AppState>,
    Path((company_id, name)): Path<(CompanyId, String)>,
) -> ApiResult<Json<Vec<WorkflowTemplate>>> {
    Ok(Json(
        state.engine.template_versions(company_id, &name).await?,
    ))
}

/// Latest version of a named template
pub async fn get_latest_template(
    State(state): State<AppState>,
    Path((company_id, name)): Path<(CompanyId, String)>,
) -> ApiResult<Json<WorkflowTemplate>> {
    Ok(Json(state.engine.latest_template(company_id, &name).await?))
}
