//! Manual scan trigger

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use approval_engine::ScanStats;
use approval_types::CompanyId;
use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct ScanQuery {
    #[serde(default)]
    pub company_id: Option<CompanyId>,
}

/// Run one full scan immediately and return its counters
pub async fn trigger_scan(
    State(state): State<AppState>,
    Query(query): Query<ScanQuery>,
) -> ApiResult<Json<ScanStats>> {
    let stats = state.scheduler.scan_now(query.company_id).await?;
    Ok(Json(stats))
}
