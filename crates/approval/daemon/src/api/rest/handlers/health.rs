//! Health and status handlers

use crate::api::rest::state::AppState;
use crate::scheduler::LastScan;
use axum::{extract::State, Json};
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
    })
}

/// Daemon status response
#[derive(Debug, Serialize)]
pub struct DaemonStatusResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub storage: String,
    pub scheduler_enabled: bool,
    pub scan_interval_secs: u64,
    pub last_scan: Option<LastScan>,
}

/// Daemon status endpoint
pub async fn daemon_status(State(state): State<AppState>) -> Json<DaemonStatusResponse> {
    let scheduler = state.scheduler.config();
    Json(DaemonStatusResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
        started_at: state.started_at,
        storage: state.storage_backend.to_string(),
        scheduler_enabled: scheduler.enabled,
        scan_interval_secs: scheduler.scan_interval_secs,
        last_scan: state.scheduler.last_scan().await,
    })
}
