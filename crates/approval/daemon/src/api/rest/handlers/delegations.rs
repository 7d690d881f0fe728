//! Delegation of authority handlers

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use approval_types::{
    Amount, AuthorityMatrixId, CompanyId, DelegationId, DoADelegation, NewDelegation, UserId,
};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

/// Create delegation request
#[derive(Debug, Deserialize)]
pub struct CreateDelegationRequest {
    #[serde(flatten)]
    pub delegation: NewDelegation,
    pub created_by: UserId,
}

/// Grant a delegation
pub async fn create_delegation(
    State(state): State<AppState>,
    Json(request): Json<CreateDelegationRequest>,
) -> ApiResult<Json<DoADelegation>> {
    let delegation = state
        .engine
        .create_delegation(request.delegation, request.created_by)
        .await?;
    Ok(Json(delegation))
}

pub async fn get_delegation(
    State(state): State<AppState>,
    Path(id): Path<DelegationId>,
) -> ApiResult<Json<DoADelegation>> {
    Ok(Json(state.engine.get_delegation(id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListDelegationsQuery {
    /// Delegations where this user is delegator or delegate
    #[serde(default)]
    pub user: Option<UserId>,
}

pub async fn list_delegations(
    State(state): State<AppState>,
    Path(company_id): Path<CompanyId>,
    Query(query): Query<ListDelegationsQuery>,
) -> ApiResult<Json<Vec<DoADelegation>>> {
    Ok(Json(
        state
            .engine
            .list_delegations(company_id, query.user)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct CheckDelegationQuery {
    pub delegate_id: UserId,
    #[serde(default)]
    pub authority_matrix_id: Option<AuthorityMatrixId>,
    #[serde(default)]
    pub amount: Option<Amount>,
}

#[derive(Debug, Serialize)]
pub struct CheckDelegationResponse {
    pub eligible: bool,
    pub delegation: Option<DoADelegation>,
}

/// First effective delegation that would admit the authority and amount
pub async fn check_delegation(
    State(state): State<AppState>,
    Path(company_id): Path<CompanyId>,
    Query(query): Query<CheckDelegationQuery>,
) -> ApiResult<Json<CheckDelegationResponse>> {
    let delegation = state
        .engine
        .check_delegation(
            company_id,
            query.delegate_id,
            query.authority_matrix_id,
            query.amount,
        )
        .await?;
    Ok(Json(CheckDelegationResponse {
        eligible: delegation.is_some(),
        delegation,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RevokeDelegationRequest {
    pub actor: UserId,
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn revoke_delegation(
    State(state): State<AppState>,
    Path(id): Path<DelegationId>,
    Json(request): Json<RevokeDelegationRequest>,
) -> ApiResult<Json<DoADelegation>> {
    Ok(Json(
        state
            .engine
            .revoke_delegation(id, request.actor, request.reason)
            .await?,
    ))
}
