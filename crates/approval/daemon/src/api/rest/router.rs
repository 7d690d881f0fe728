//! API Router configuration

use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main API router
pub fn create_router(state: AppState, enable_cors: bool) -> Router {
    let api_routes = Router::new()
        // Health and status
        .route("/health", get(handlers::health_check))
        .route("/status", get(handlers::daemon_status))
        // Templates
        .route("/templates", post(handlers::register_template))
        .route("/templates/:id", get(handlers::get_template))
        .route(
            "/companies/:company_id/templates/:name",
            get(handlers::list_template_versions),
        )
        .route(
            "/companies/:company_id/templates/:name/latest",
            get(handlers::get_latest_template),
        )
        // Requests
        .route("/requests", post(handlers::create_request))
        .route("/requests/:id", get(handlers::get_request))
        .route("/requests/:id/act", post(handlers::act_on_request))
        .route("/requests/:id/cancel", post(handlers::cancel_request))
        .route("/requests/:id/suspend", post(handlers::suspend_request))
        .route("/requests/:id/resume", post(handlers::resume_request))
        .route("/requests/:id/escalate", post(handlers::escalate_request))
        .route("/requests/:id/assign", post(handlers::assign_approver))
        .route("/requests/:id/audit", get(handlers::get_request_audit))
        // Inbox and company audit
        .route(
            "/companies/:company_id/inbox/:user_id",
            get(handlers::get_inbox),
        )
        .route("/companies/:company_id/audit", get(handlers::get_company_audit))
        // Delegations
        .route("/delegations", post(handlers::create_delegation))
        .route("/delegations/:id", get(handlers::get_delegation))
        .route("/delegations/:id/revoke", post(handlers::revoke_delegation))
        .route(
            "/companies/:company_id/delegations",
            get(handlers::list_delegations),
        )
        .route(
            "/companies/:company_id/delegations/check",
            get(handlers::check_delegation),
        )
        // Scheduler
        .route("/scan", post(handlers::trigger_scan));

    let router = Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http());

    let router = if enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::scheduler::Scheduler;
    use approval_engine::{ApprovalEngine, StaticDirectory};
    use approval_store::InMemoryApprovalStore;
    use approval_types::{ApprovalRequest, CompanyId, UserId, WorkflowTemplate};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let engine = ApprovalEngine::new(
            Arc::new(InMemoryApprovalStore::new()),
            Arc::new(StaticDirectory::new()),
        );
        let scheduler = Scheduler::new(SchedulerConfig::default(), engine.clone());
        create_router(AppState::new(engine, scheduler, "memory"), true)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> Response {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();
        app.clone().oneshot(request).await.unwrap()
    }

    async fn json_body<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = app();
        let response = send(&app, "GET", "/api/v1/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body: Value = json_body(response).await;
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_request_lifecycle_over_http() {
        let app = app();
        let company = CompanyId::generate();
        let (manager, requester, stranger) =
            (UserId::generate(), UserId::generate(), UserId::generate());

        let response = send(
            &app,
            "POST",
            "/api/v1/templates",
            Some(json!({
                "company_id": company,
                "name": "expense",
                "entity_type": "expense_claim",
                "levels": [{
                    "level_order": 1,
                    "approver": { "strategy": "user", "user_id": manager },
                    "sla_hours": 24
                }]
            })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let template: WorkflowTemplate = json_body(response).await;
        assert_eq!(template.version, 1);

        let response = send(
            &app,
            "POST",
            "/api/v1/requests",
            Some(json!({
                "template_id": template.id,
                "company_id": company,
                "entity_type": "expense_claim",
                "entity_id": "EXP-9",
                "requested_by": requester,
                "amount": 120_000
            })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let request: ApprovalRequest = json_body(response).await;

        let inbox = send(
            &app,
            "GET",
            &format!("/api/v1/companies/{company}/inbox/{manager}"),
            None,
        )
        .await;
        let inbox: Vec<Value> = json_body(inbox).await;
        assert_eq!(inbox.len(), 1);

        let denied = send(
            &app,
            "POST",
            &format!("/api/v1/requests/{}/act", request.id),
            Some(json!({ "actor": stranger, "outcome": "approve" })),
        )
        .await;
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);
        let error: Value = json_body(denied).await;
        assert_eq!(error["code"], "UNAUTHORIZED_ACTOR");

        let approved = send(
            &app,
            "POST",
            &format!("/api/v1/requests/{}/act", request.id),
            Some(json!({ "actor": manager, "outcome": "approve", "comments": "fine" })),
        )
        .await;
        assert_eq!(approved.status(), StatusCode::OK);
        let approved: ApprovalRequest = json_body(approved).await;
        assert!(approved.status.is_terminal());

        let again = send(
            &app,
            "POST",
            &format!("/api/v1/requests/{}/cancel", request.id),
            Some(json!({ "actor": requester })),
        )
        .await;
        assert_eq!(again.status(), StatusCode::CONFLICT);

        let audit = send(
            &app,
            "GET",
            &format!("/api/v1/requests/{}/audit", request.id),
            None,
        )
        .await;
        let audit: Vec<Value> = json_body(audit).await;
        let actions: Vec<&str> = audit
            .iter()
            .filter_map(|entry| entry["action"].as_str())
            .collect();
        assert_eq!(
            actions,
            vec!["request.create", "request.act_denied", "request.approve"]
        );
    }

    #[tokio::test]
    async fn test_unknown_request_is_404() {
        let app = app();
        let response = send(
            &app,
            "GET",
            &format!("/api/v1/requests/{}", uuid::Uuid::new_v4()),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: Value = json_body(response).await;
        assert_eq!(body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_invalid_template_is_422() {
        let app = app();
        let response = send(
            &app,
            "POST",
            "/api/v1/templates",
            Some(json!({
                "company_id": CompanyId::generate(),
                "name": "empty",
                "entity_type": "leave",
                "levels": []
            })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_oversized_sla_is_422() {
        let app = app();
        let response = send(
            &app,
            "POST",
            "/api/v1/templates",
            Some(json!({
                "company_id": CompanyId::generate(),
                "name": "expense",
                "entity_type": "expense_claim",
                "levels": [{
                    "level_order": 1,
                    "approver": { "strategy": "user", "user_id": UserId::generate() },
                    "sla_hours": u32::MAX
                }]
            })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_stranger_cannot_cancel() {
        let app = app();
        let company = CompanyId::generate();
        let (manager, requester) = (UserId::generate(), UserId::generate());

        let response = send(
            &app,
            "POST",
            "/api/v1/requests",
            Some(json!({
                "company_id": company,
                "entity_type": "expense_claim",
                "entity_id": "EXP-10",
                "requested_by": requester,
                "approver": manager
            })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let request: ApprovalRequest = json_body(response).await;

        let denied = send(
            &app,
            "POST",
            &format!("/api/v1/requests/{}/cancel", request.id),
            Some(json!({ "actor": UserId::generate() })),
        )
        .await;
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);

        let cancelled = send(
            &app,
            "POST",
            &format!("/api/v1/requests/{}/cancel", request.id),
            Some(json!({ "actor": requester, "reason": "withdrawn" })),
        )
        .await;
        assert_eq!(cancelled.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_delegation_check_and_revoke() {
        let app = app();
        let company = CompanyId::generate();
        let (delegator, delegate) = (UserId::generate(), UserId::generate());

        let response = send(
            &app,
            "POST",
            "/api/v1/delegations",
            Some(json!({
                "company_id": company,
                "delegator_id": delegator,
                "delegate_id": delegate,
                "delegate_all_authorities": true,
                "max_amount_per_transaction": 500_000,
                "start_date": chrono::Utc::now() - chrono::Duration::hours(1),
                "created_by": delegator
            })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let delegation: Value = json_body(response).await;
        let id = delegation["id"].as_str().unwrap().to_string();

        let check = |amount: i64| {
            format!(
                "/api/v1/companies/{company}/delegations/check?delegate_id={delegate}&amount={amount}"
            )
        };
        let body: Value = json_body(send(&app, "GET", &check(100_000), None).await).await;
        assert_eq!(body["eligible"], true);
        let body: Value = json_body(send(&app, "GET", &check(900_000), None).await).await;
        assert_eq!(body["eligible"], false);

        let revoke = send(
            &app,
            "POST",
            &format!("/api/v1/delegations/{id}/revoke"),
            Some(json!({ "actor": delegator, "reason": "returned" })),
        )
        .await;
        assert_eq!(revoke.status(), StatusCode::OK);

        let body: Value = json_body(send(&app, "GET", &check(100_000), None).await).await;
        assert_eq!(body["eligible"], false);

        let listed: Vec<Value> = json_body(
            send(
                &app,
                "GET",
                &format!("/api/v1/companies/{company}/delegations?user={delegate}"),
                None,
            )
            .await,
        )
        .await;
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_scan_trigger_returns_stats() {
        let app = app();
        let response = send(&app, "POST", "/api/v1/scan", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let stats: Value = json_body(response).await;
        assert_eq!(stats["escalated"], 0);

        let status: Value = json_body(send(&app, "GET", "/api/v1/status", None).await).await;
        assert_eq!(status["storage"], "memory");
        assert!(status["last_scan"].is_object());
    }
}
