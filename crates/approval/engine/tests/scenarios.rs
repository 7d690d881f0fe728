//! End-to-end approval scenarios over the in-memory store

mod common;

use approval_engine::{
    ApprovalError, ApprovalResult, ApproverDirectory, NotificationEvent, StaticDirectory,
};
use approval_types::*;
use async_trait::async_trait;
use chrono::Duration;
use common::{admin_role, start, Harness};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Static directory that can be taken offline
struct FlakyDirectory {
    inner: StaticDirectory,
    down: AtomicBool,
}

#[async_trait]
impl ApproverDirectory for FlakyDirectory {
    async fn members_of_role(
        &self,
        company_id: CompanyId,
        role: &str,
    ) -> ApprovalResult<Vec<UserId>> {
        if self.down.load(Ordering::SeqCst) {
            return Err(ApprovalError::Directory("connection refused".into()));
        }
        self.inner.members_of_role(company_id, role).await
    }
}

// ── Chains ───────────────────────────────────────────────────────────

#[tokio::test]
async fn two_level_chain_advances_then_approves() {
    let h = Harness::new();
    let (a, b) = (UserId::generate(), UserId::generate());
    let template = h.register(h.chain(&[a, b])).await;

    let request = h.create(&template, Some(1_500_000)).await;
    assert_eq!(request.status, ApprovalStatus::Pending);
    assert_eq!(request.current_level, 1);

    let status = h.status(request.id).await;
    let first = status.pending_action().unwrap();
    assert_eq!(first.approver_id, a);
    assert_eq!(first.level_order, 1);
    assert_eq!(first.due_at, start() + Duration::hours(24));
    assert_eq!(status.request.sla_breach_at, Some(first.due_at));

    let request = h
        .engine
        .act(request.id, a, ActionOutcome::Approve, Some("ok".into()))
        .await
        .unwrap();
    assert_eq!(request.status, ApprovalStatus::InProgress);
    assert_eq!(request.current_level, 2);

    let status = h.status(request.id).await;
    assert_eq!(status.actions[0].status, ActionStatus::Approved);
    assert_eq!(status.actions[0].acted_by, Some(a));
    let second = status.pending_action().unwrap();
    assert_eq!((second.level_order, second.approver_id), (2, b));

    let request = h
        .engine
        .act(request.id, b, ActionOutcome::Approve, None)
        .await
        .unwrap();
    assert_eq!(request.status, ApprovalStatus::Approved);
    assert_eq!(request.completion_type, Some(CompletionType::Approved));
    assert!(request.completed_at.is_some());
    assert!(h.status(request.id).await.pending_action().is_none());

    assert_eq!(
        h.audit_names(request.id).await,
        vec!["request.create", "request.approve", "request.approve"]
    );
    assert!(h
        .notifier
        .sent_to(request.requested_by)
        .iter()
        .any(|e| matches!(e, NotificationEvent::RequestResolved { status: ApprovalStatus::Approved, .. })));
}

#[tokio::test]
async fn rejection_is_terminal() {
    let h = Harness::new();
    let (a, b, c) = (UserId::generate(), UserId::generate(), UserId::generate());
    let template = h.register(h.chain(&[a, b, c])).await;
    let request = h.create(&template, None).await;

    h.engine
        .act(request.id, a, ActionOutcome::Approve, None)
        .await
        .unwrap();
    let request = h
        .engine
        .act(request.id, b, ActionOutcome::Reject, Some("over budget".into()))
        .await
        .unwrap();

    assert_eq!(request.status, ApprovalStatus::Rejected);
    assert_eq!(request.completion_type, Some(CompletionType::Rejected));
    let status = h.status(request.id).await;
    assert_eq!(status.actions.len(), 2);
    assert!(status.actions.iter().all(|a| a.level_order < 3));

    let err = h
        .engine
        .act(request.id, c, ActionOutcome::Approve, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::InvalidTransition(_)));
}

#[tokio::test]
async fn acting_twice_is_an_invalid_transition() {
    let h = Harness::new();
    let a = UserId::generate();
    let template = h.register(h.chain(&[a])).await;
    let request = h.create(&template, None).await;

    h.engine
        .act(request.id, a, ActionOutcome::Approve, None)
        .await
        .unwrap();
    let err = h
        .engine
        .act(request.id, a, ActionOutcome::Approve, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::InvalidTransition(_)));
}

#[tokio::test]
async fn role_levels_resolve_through_directory() {
    let manager = UserId::generate();
    let h = Harness::with_directory(
        StaticDirectory::new().with_role("finance_manager", vec![manager]),
    );
    let template = h
        .register(
            NewTemplate::new(h.company, "po", "purchase_order")
                .with_level(WorkflowLevel::role(1, "finance_manager", 48)),
        )
        .await;

    let request = h.create(&template, Some(10_000)).await;
    let status = h.status(request.id).await;
    assert_eq!(status.pending_action().unwrap().approver_id, manager);
    assert_eq!(
        h.engine
            .pending_actions_for(h.company, manager)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn unresolvable_first_level_parks_request() {
    let h = Harness::new();
    let template = h
        .register(
            NewTemplate::new(h.company, "po", "purchase_order")
                .with_level(WorkflowLevel::role(1, "ghost_role", 24)),
        )
        .await;

    let request = h.create(&template, None).await;
    assert_eq!(request.status, ApprovalStatus::Escalated);
    assert_eq!(request.sla_breach_at, None);
    assert!(h.status(request.id).await.actions.is_empty());

    let admin = h.admin;
    let stand_in = UserId::generate();
    let request = h
        .engine
        .assign_approver(request.id, admin, stand_in, Some("role vacant".into()))
        .await
        .unwrap();
    assert_eq!(request.status, ApprovalStatus::InProgress);
    assert_eq!(request.current_level, 1);

    let request = h
        .engine
        .act(request.id, stand_in, ActionOutcome::Approve, None)
        .await
        .unwrap();
    assert_eq!(request.status, ApprovalStatus::Approved);
    assert_eq!(
        h.audit_names(request.id).await,
        vec!["request.create", "request.assign", "request.approve"]
    );
}

#[tokio::test]
async fn amount_band_without_amount_parks() {
    let h = Harness::new();
    let lead = UserId::generate();
    let template = h
        .register(
            NewTemplate::new(h.company, "je", "journal_entry").with_level(
                WorkflowLevel::amount_banded(
                    1,
                    vec![AmountBand::new(0, None, ApproverRef::User { user_id: lead })],
                    24,
                ),
            ),
        )
        .await;

    assert_eq!(
        h.create(&template, None).await.status,
        ApprovalStatus::Escalated
    );
    assert_eq!(
        h.create(&template, Some(100)).await.status,
        ApprovalStatus::Pending
    );
}

#[tokio::test]
async fn ad_hoc_request_needs_an_approver() {
    let h = Harness::new();
    let approver = UserId::generate();
    let requester = UserId::generate();

    let err = h
        .engine
        .create_request(
            None,
            "leave",
            "LV-7",
            RequestContext::new(h.company, requester),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ApprovalError::Validation(ValidationError::MissingField("approver"))
    ));

    let request = h
        .engine
        .create_request(
            None,
            "leave",
            "LV-7",
            RequestContext::new(h.company, requester).with_approver(approver),
        )
        .await
        .unwrap();
    let due = h.status(request.id).await.pending_action().unwrap().due_at;
    assert_eq!(due, start() + Duration::hours(24));

    let request = h
        .engine
        .act(request.id, approver, ActionOutcome::Approve, None)
        .await
        .unwrap();
    assert_eq!(request.status, ApprovalStatus::Approved);
}

#[tokio::test]
async fn template_must_match_entity_type() {
    let h = Harness::new();
    let template = h.register(h.chain(&[UserId::generate()])).await;

    let err = h
        .engine
        .create_request(
            Some(template.id),
            "purchase_order",
            "PO-1",
            RequestContext::new(h.company, UserId::generate()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::Validation(_)));
}

// ── Templates ────────────────────────────────────────────────────────

#[tokio::test]
async fn templates_are_versioned() {
    let h = Harness::new();
    let (a, b) = (UserId::generate(), UserId::generate());

    let v1 = h.register(h.chain(&[a])).await;
    let pinned = h.create(&v1, None).await;
    let v2 = h.register(h.chain(&[a, b])).await;

    assert_eq!((v1.version, v2.version), (1, 2));
    let latest = h.engine.latest_template(h.company, "expense").await.unwrap();
    assert_eq!(latest.id, v2.id);
    assert_eq!(
        h.engine
            .template_versions(h.company, "expense")
            .await
            .unwrap()
            .len(),
        2
    );

    // The request keeps the single-level chain it was created from.
    let request = h
        .engine
        .act(pinned.id, a, ActionOutcome::Approve, None)
        .await
        .unwrap();
    assert_eq!(request.status, ApprovalStatus::Approved);
}

#[tokio::test]
async fn invalid_template_rejected() {
    let h = Harness::new();
    let err = h
        .engine
        .register_template(NewTemplate::new(h.company, "empty", "leave"), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ApprovalError::Validation(ValidationError::NoLevels)
    ));
}

// ── Escalation ───────────────────────────────────────────────────────

#[tokio::test]
async fn overdue_action_escalates_on_timeout() {
    let h = Harness::new();
    let (a, b) = (UserId::generate(), UserId::generate());
    let template = h
        .register(h.chain(&[a, b]).with_auto_escalate(true))
        .await;
    let request = h.create(&template, None).await;

    h.advance_hours(25);
    let stats = h.engine.auto_escalate_overdue(None).await.unwrap();
    assert_eq!(stats.escalated, 1);

    let status = h.status(request.id).await;
    assert_eq!(status.request.status, ApprovalStatus::InProgress);
    assert_eq!(status.request.current_level, 2);
    assert_eq!(status.actions[0].status, ActionStatus::Escalated);
    assert_eq!(status.escalations.len(), 1);
    let escalation = &status.escalations[0];
    assert_eq!((escalation.from_level, escalation.to_level), (1, 2));
    assert_eq!(escalation.escalation_type, EscalationType::Timeout);
    assert_eq!(escalation.escalated_by, None);
    assert_eq!(escalation.to_approver_id, Some(b));

    let next = status.pending_action().unwrap();
    assert_eq!(next.approver_id, b);
    assert_eq!(next.due_at, h.now() + Duration::hours(24));
    assert!(h
        .notifier
        .sent_to(b)
        .iter()
        .any(|e| matches!(e, NotificationEvent::ActionAssigned { level: 2, .. })));

    let trail = h.engine.audit_trail(request.id).await.unwrap();
    let escalate = trail.last().unwrap();
    assert_eq!(escalate.action, AuditAction::RequestEscalate);
    assert_eq!(escalate.actor_type, ActorType::System);
}

#[tokio::test]
async fn escalation_scan_is_idempotent() {
    let h = Harness::new();
    let template = h
        .register(
            h.chain(&[UserId::generate(), UserId::generate()])
                .with_timeout_action(TimeoutAction::Escalate),
        )
        .await;
    let request = h.create(&template, None).await;

    h.advance_hours(25);
    let first = h.engine.auto_escalate_overdue(None).await.unwrap();
    let second = h.engine.auto_escalate_overdue(None).await.unwrap();

    assert_eq!(first.escalated, 1);
    assert_eq!(second.escalated, 0);
    assert_eq!(h.status(request.id).await.escalations.len(), 1);
}

#[tokio::test]
async fn escalation_stops_at_max_escalations() {
    let h = Harness::new();
    let approvers = [UserId::generate(), UserId::generate(), UserId::generate()];
    let template = h
        .register(
            h.chain(&approvers)
                .with_auto_escalate(true)
                .with_max_escalations(1),
        )
        .await;
    let request = h.create(&template, None).await;

    h.advance_hours(25);
    assert_eq!(h.engine.auto_escalate_overdue(None).await.unwrap().escalated, 1);

    h.advance_hours(25);
    let stats = h.engine.auto_escalate_overdue(None).await.unwrap();
    assert_eq!(stats.escalated, 0);
    assert_eq!(stats.exhausted, 1);

    let status = h.status(request.id).await;
    assert_eq!(status.escalations.len(), 1);
    assert_eq!(status.request.status, ApprovalStatus::Escalated);
    assert_eq!(status.request.current_level, 2);
    assert!(status.pending_action().is_none());
    assert_eq!(status.actions[1].status, ActionStatus::Expired);
    assert!(h
        .audit_names(request.id)
        .await
        .contains(&"request.escalation_exhausted"));

    // Parked requests wait for a person.
    h.advance_hours(100);
    let stats = h.engine.run_scan(None, Duration::hours(4)).await.unwrap();
    assert!(!stats.changed());

    let admin = h.admin;
    let request = h
        .engine
        .assign_approver(request.id, admin, approvers[2], None)
        .await
        .unwrap();
    assert_eq!(request.status, ApprovalStatus::InProgress);
    assert_eq!(request.current_level, 2);
}

#[tokio::test]
async fn directory_outage_rolls_back_and_retries() {
    let (a, manager, admin) = (UserId::generate(), UserId::generate(), UserId::generate());
    let directory = Arc::new(FlakyDirectory {
        inner: StaticDirectory::new()
            .with_role("finance_manager", vec![manager])
            .with_role(admin_role(), vec![admin]),
        down: AtomicBool::new(true),
    });
    let h = Harness::from_directory(directory.clone(), admin);
    let template = h
        .register(
            NewTemplate::new(h.company, "po", "purchase_order")
                .with_level(WorkflowLevel::user(1, a, 24))
                .with_level(WorkflowLevel::role(2, "finance_manager", 24))
                .with_auto_escalate(true)
                .with_max_escalations(1),
        )
        .await;
    let request = h.create(&template, None).await;

    h.advance_hours(25);
    let stats = h.engine.auto_escalate_overdue(None).await.unwrap();
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.escalated, 0);

    let status = h.status(request.id).await;
    assert_eq!(status.request.status, ApprovalStatus::Pending);
    assert_eq!(status.request.current_level, 1);
    assert!(status.escalations.is_empty());
    assert_eq!(status.pending_action().unwrap().approver_id, a);
    assert_eq!(h.audit_names(request.id).await, vec!["request.create"]);

    // Approving into a role level fails the same way and keeps the action.
    let err = h
        .engine
        .act(request.id, a, ActionOutcome::Approve, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::Directory(_)));
    assert!(h.status(request.id).await.pending_action().is_some());

    directory.down.store(false, Ordering::SeqCst);
    let stats = h.engine.auto_escalate_overdue(None).await.unwrap();
    assert_eq!(stats.escalated, 1);

    let status = h.status(request.id).await;
    assert_eq!(status.request.status, ApprovalStatus::InProgress);
    assert_eq!(status.request.current_level, 2);
    assert_eq!(status.escalations.len(), 1);
    assert_eq!(status.pending_action().unwrap().approver_id, manager);
}

#[tokio::test]
async fn templates_without_timeout_policy_do_not_escalate() {
    let h = Harness::new();
    let template = h
        .register(h.chain(&[UserId::generate(), UserId::generate()]))
        .await;
    let request = h.create(&template, None).await;

    h.advance_hours(48);
    let stats = h.engine.run_scan(None, Duration::hours(4)).await.unwrap();
    assert!(!stats.changed());
    assert_eq!(h.status(request.id).await.request.status, ApprovalStatus::Pending);
}

#[tokio::test]
async fn manual_escalation_to_named_approver() {
    let h = Harness::new();
    let (a, b, stand_in) = (UserId::generate(), UserId::generate(), UserId::generate());
    let admin = h.admin;
    let template = h.register(h.chain(&[a, b])).await;
    let request = h.create(&template, None).await;

    let request = h
        .engine
        .manual_escalate(request.id, admin, Some(stand_in), Some("A on leave".into()))
        .await
        .unwrap();
    assert_eq!(request.status, ApprovalStatus::InProgress);
    assert_eq!(request.current_level, 2);

    let status = h.status(request.id).await;
    let escalation = &status.escalations[0];
    assert_eq!(escalation.escalation_type, EscalationType::Manual);
    assert_eq!(escalation.escalated_by, Some(admin));
    assert_eq!(escalation.from_approver_id, a);
    assert_eq!(status.pending_action().unwrap().approver_id, stand_in);

    let request = h
        .engine
        .act(request.id, stand_in, ActionOutcome::Approve, None)
        .await
        .unwrap();
    assert_eq!(request.status, ApprovalStatus::Approved);
}

#[tokio::test]
async fn manual_escalation_past_last_level_parks() {
    let h = Harness::new();
    let a = UserId::generate();
    let template = h.register(h.chain(&[a])).await;
    let request = h.create(&template, None).await;

    let request = h
        .engine
        .manual_escalate(request.id, h.admin, None, None)
        .await
        .unwrap();
    assert_eq!(request.status, ApprovalStatus::Escalated);
    assert_eq!(request.current_level, 2);

    let status = h.status(request.id).await;
    assert!(status.pending_action().is_none());
    assert_eq!(status.escalations[0].to_approver_id, None);

    let err = h
        .engine
        .manual_escalate(request.id, h.admin, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::InvalidTransition(_)));
}

// ── Timeout Resolution ───────────────────────────────────────────────

#[tokio::test]
async fn breached_request_auto_approves() {
    let h = Harness::new();
    let template = h
        .register(
            h.chain(&[UserId::generate()])
                .with_timeout_action(TimeoutAction::Approve),
        )
        .await;
    let request = h.create(&template, Some(50_000)).await;

    h.advance_hours(23);
    assert_eq!(h.engine.process_timeout_actions(None).await.unwrap().resolved, 0);

    h.advance_hours(2);
    assert_eq!(h.engine.auto_escalate_overdue(None).await.unwrap().escalated, 0);
    let stats = h.engine.process_timeout_actions(None).await.unwrap();
    assert_eq!(stats.resolved, 1);

    let status = h.status(request.id).await;
    assert_eq!(status.request.status, ApprovalStatus::Approved);
    assert_eq!(status.request.completion_type, Some(CompletionType::AutoApproved));
    assert_eq!(status.actions[0].status, ActionStatus::Expired);

    let entry = h.engine.audit_trail(request.id).await.unwrap().pop().unwrap();
    assert_eq!(entry.action, AuditAction::RequestAutoApprove);
    assert_eq!(entry.actor_type, ActorType::System);
    assert_eq!(entry.actor_id, None);
}

#[tokio::test]
async fn escalation_precedes_timeout_resolution() {
    let h = Harness::new();
    let template = h
        .register(
            h.chain(&[UserId::generate(), UserId::generate()])
                .with_auto_escalate(true)
                .with_timeout_action(TimeoutAction::Reject),
        )
        .await;
    let request = h.create(&template, None).await;

    h.advance_hours(25);
    let stats = h.engine.run_scan(None, Duration::hours(1)).await.unwrap();
    assert_eq!((stats.escalated, stats.resolved), (1, 0));

    h.advance_hours(25);
    let stats = h.engine.run_scan(None, Duration::hours(1)).await.unwrap();
    assert_eq!((stats.escalated, stats.exhausted, stats.resolved), (0, 0, 1));

    let status = h.status(request.id).await;
    assert_eq!(status.request.status, ApprovalStatus::Rejected);
    assert_eq!(status.request.completion_type, Some(CompletionType::AutoRejected));
    assert_eq!(status.escalations.len(), 1);
}

// ── Manual Intervention ──────────────────────────────────────────────

#[tokio::test]
async fn cancel_closes_pending_action() {
    let h = Harness::new();
    let a = UserId::generate();
    let template = h.register(h.chain(&[a, UserId::generate()])).await;
    let request = h.create(&template, None).await;

    let request = h
        .engine
        .cancel_request(request.id, request.requested_by, Some("duplicate".into()))
        .await
        .unwrap();
    assert_eq!(request.status, ApprovalStatus::Cancelled);
    assert_eq!(request.completion_type, Some(CompletionType::Cancelled));

    let status = h.status(request.id).await;
    assert_eq!(status.actions[0].status, ActionStatus::Cancelled);
    assert!(h.engine.pending_actions_for(h.company, a).await.unwrap().is_empty());

    let err = h
        .engine
        .cancel_request(request.id, request.requested_by, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::InvalidTransition(_)));
}

#[tokio::test]
async fn suspended_requests_are_frozen() {
    let h = Harness::new();
    let a = UserId::generate();
    let template = h
        .register(h.chain(&[a, UserId::generate()]).with_auto_escalate(true))
        .await;
    let request = h.create(&template, None).await;
    let admin = h.admin;

    h.engine
        .suspend_request(request.id, admin, Some("audit hold".into()))
        .await
        .unwrap();
    let err = h
        .engine
        .act(request.id, a, ActionOutcome::Approve, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::InvalidTransition(_)));

    h.advance_hours(30);
    assert!(!h.engine.run_scan(None, Duration::hours(4)).await.unwrap().changed());

    let request = h.engine.resume_request(request.id, admin, None).await.unwrap();
    assert_eq!(request.status, ApprovalStatus::InProgress);
    assert!(h
        .engine
        .resume_request(request.id, admin, None)
        .await
        .is_err());

    let request = h
        .engine
        .act(request.id, a, ActionOutcome::Approve, None)
        .await
        .unwrap();
    assert_eq!(request.current_level, 2);
    assert_eq!(
        h.audit_names(request.id).await,
        vec![
            "request.create",
            "request.suspend",
            "request.resume",
            "request.approve"
        ]
    );
}

#[tokio::test]
async fn assign_requires_parked_request() {
    let h = Harness::new();
    let template = h.register(h.chain(&[UserId::generate()])).await;
    let request = h.create(&template, None).await;

    let err = h
        .engine
        .assign_approver(request.id, h.admin, UserId::generate(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::InvalidTransition(_)));
}

#[tokio::test]
async fn interventions_require_requester_or_admin() {
    let h = Harness::new();
    let a = UserId::generate();
    let template = h.register(h.chain(&[a, UserId::generate()])).await;
    let request = h.create(&template, None).await;
    let stranger = UserId::generate();

    let err = h
        .engine
        .cancel_request(request.id, stranger, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::UnauthorizedActor { actor, .. } if actor == stranger));
    assert!(h
        .engine
        .suspend_request(request.id, stranger, None)
        .await
        .is_err());
    assert!(h
        .engine
        .manual_escalate(request.id, stranger, Some(stranger), None)
        .await
        .is_err());

    // The approver may act but not run admin interventions.
    let err = h
        .engine
        .suspend_request(request.id, a, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::UnauthorizedActor { .. }));
    // The requester may withdraw but not suspend.
    assert!(h
        .engine
        .suspend_request(request.id, request.requested_by, None)
        .await
        .is_err());

    let status = h.status(request.id).await;
    assert_eq!(status.request.status, ApprovalStatus::Pending);
    assert_eq!(status.pending_action().unwrap().approver_id, a);
    assert!(status.escalations.is_empty());
    assert_eq!(
        h.audit_names(request.id).await,
        vec![
            "request.create",
            "request.intervention_denied",
            "request.intervention_denied",
            "request.intervention_denied",
            "request.intervention_denied",
            "request.intervention_denied",
        ]
    );

    let request = h
        .engine
        .suspend_request(request.id, h.admin, None)
        .await
        .unwrap();
    assert_eq!(request.status, ApprovalStatus::Suspended);
    let request = h
        .engine
        .cancel_request(request.id, request.requested_by, None)
        .await
        .unwrap();
    assert_eq!(request.status, ApprovalStatus::Cancelled);
}

// ── Reminders ────────────────────────────────────────────────────────

#[tokio::test]
async fn reminders_sent_once() {
    let h = Harness::new();
    let a = UserId::generate();
    let template = h.register(h.chain(&[a])).await;
    let request = h.create(&template, None).await;

    h.advance_hours(10);
    let early = h
        .engine
        .send_due_reminders(None, Duration::hours(6))
        .await
        .unwrap();
    assert_eq!(early.reminded, 0);

    h.advance_hours(10);
    let stats = h
        .engine
        .send_due_reminders(None, Duration::hours(6))
        .await
        .unwrap();
    assert_eq!(stats.reminded, 1);
    let again = h
        .engine
        .send_due_reminders(None, Duration::hours(6))
        .await
        .unwrap();
    assert_eq!(again.reminded, 0);

    let status = h.status(request.id).await;
    assert_eq!(status.actions[0].reminded_at, Some(h.now()));
    assert!(h
        .notifier
        .sent_to(a)
        .iter()
        .any(|e| matches!(e, NotificationEvent::ActionReminder { .. })));
    assert!(h.audit_names(request.id).await.contains(&"action.remind"));
}

// ── Delegation ───────────────────────────────────────────────────────

#[tokio::test]
async fn delegate_approves_within_limits() {
    let h = Harness::new();
    let (a, c) = (UserId::generate(), UserId::generate());
    let template = h.register(h.chain(&[a])).await;
    let delegation = h
        .engine
        .create_delegation(
            NewDelegation::new(h.company, a, c, h.now())
                .with_all_authorities()
                .with_limits(Some(5_000_000), Some(10_000_000))
                .with_reason("annual leave"),
            a,
        )
        .await
        .unwrap();

    let request = h.create(&template, Some(4_000_000)).await;
    let request = h
        .engine
        .act(request.id, c, ActionOutcome::Approve, None)
        .await
        .unwrap();
    assert_eq!(request.status, ApprovalStatus::Approved);

    let status = h.status(request.id).await;
    assert_eq!(status.actions[0].acted_by, Some(c));
    assert_eq!(status.actions[0].delegation_id, Some(delegation.id));
    assert_eq!(
        h.engine
            .get_delegation(delegation.id)
            .await
            .unwrap()
            .total_approved_amount,
        4_000_000
    );

    let entry = h.engine.audit_trail(request.id).await.unwrap().pop().unwrap();
    let new = entry.new_values.unwrap();
    assert_eq!(new["delegation_id"], serde_json::json!(delegation.id));
    assert_eq!(new["delegated_amount"], serde_json::json!(4_000_000));
}

#[tokio::test]
async fn delegate_denied_over_per_transaction_limit() {
    let h = Harness::new();
    let (a, c) = (UserId::generate(), UserId::generate());
    let template = h.register(h.chain(&[a])).await;
    let delegation = h
        .engine
        .create_delegation(
            NewDelegation::new(h.company, a, c, h.now())
                .with_all_authorities()
                .with_limits(Some(5_000_000), Some(10_000_000)),
            a,
        )
        .await
        .unwrap();

    let request = h.create(&template, Some(7_000_000)).await;
    assert!(h
        .engine
        .check_delegation(h.company, c, None, Some(7_000_000))
        .await
        .unwrap()
        .is_none());

    let err = h
        .engine
        .act(request.id, c, ActionOutcome::Approve, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::UnauthorizedActor { .. }));

    let status = h.status(request.id).await;
    assert!(status.pending_action().is_some());
    assert_eq!(status.request.status, ApprovalStatus::Pending);
    assert_eq!(
        h.audit_names(request.id).await,
        vec!["request.create", "request.act_denied"]
    );
    assert_eq!(
        h.engine
            .get_delegation(delegation.id)
            .await
            .unwrap()
            .total_approved_amount,
        0
    );

    let request = h
        .engine
        .act(request.id, a, ActionOutcome::Approve, None)
        .await
        .unwrap();
    assert_eq!(request.status, ApprovalStatus::Approved);
}

#[tokio::test]
async fn delegation_total_cap_is_cumulative() {
    let h = Harness::new();
    let (a, c) = (UserId::generate(), UserId::generate());
    let template = h.register(h.chain(&[a])).await;
    h.engine
        .create_delegation(
            NewDelegation::new(h.company, a, c, h.now())
                .with_all_authorities()
                .with_limits(None, Some(10_000_000)),
            a,
        )
        .await
        .unwrap();

    for _ in 0..2 {
        let request = h.create(&template, Some(4_000_000)).await;
        h.engine
            .act(request.id, c, ActionOutcome::Approve, None)
            .await
            .unwrap();
    }

    let third = h.create(&template, Some(4_000_000)).await;
    let err = h
        .engine
        .act(third.id, c, ActionOutcome::Approve, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::UnauthorizedActor { .. }));
}

#[tokio::test]
async fn stranger_cannot_act() {
    let h = Harness::new();
    let template = h.register(h.chain(&[UserId::generate()])).await;
    let request = h.create(&template, None).await;

    let err = h
        .engine
        .act(request.id, UserId::generate(), ActionOutcome::Reject, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ApprovalError::UnauthorizedActor { request_id, .. } if request_id == request.id
    ));
}

#[tokio::test]
async fn delegation_scoped_to_authority() {
    let h = Harness::new();
    let (a, c) = (UserId::generate(), UserId::generate());
    let (purchases, payroll) = (AuthorityMatrixId::generate(), AuthorityMatrixId::generate());
    let template = h.register(h.chain(&[a])).await;
    h.engine
        .create_delegation(
            NewDelegation::new(h.company, a, c, h.now()).with_authority(purchases),
            a,
        )
        .await
        .unwrap();

    let context = |authority| {
        RequestContext::new(h.company, UserId::generate())
            .with_amount(1_000)
            .with_authority(authority)
    };
    let covered = h
        .engine
        .create_request(Some(template.id), "expense_claim", "EXP-1", context(purchases))
        .await
        .unwrap();
    let foreign = h
        .engine
        .create_request(Some(template.id), "expense_claim", "EXP-2", context(payroll))
        .await
        .unwrap();

    assert!(h
        .engine
        .act(foreign.id, c, ActionOutcome::Approve, None)
        .await
        .is_err());
    assert_eq!(
        h.engine
            .act(covered.id, c, ActionOutcome::Approve, None)
            .await
            .unwrap()
            .status,
        ApprovalStatus::Approved
    );
}

#[tokio::test]
async fn revoked_and_lapsed_delegations_stop_working() {
    let h = Harness::new();
    let (a, c, d) = (UserId::generate(), UserId::generate(), UserId::generate());
    let template = h.register(h.chain(&[a])).await;

    let revoked = h
        .engine
        .create_delegation(
            NewDelegation::new(h.company, a, c, h.now()).with_all_authorities(),
            a,
        )
        .await
        .unwrap();
    let revoked = h
        .engine
        .revoke_delegation(revoked.id, a, Some("back early".into()))
        .await
        .unwrap();
    assert!(!revoked.is_active);
    assert_eq!(revoked.revoked_by, Some(a));
    assert!(matches!(
        h.engine.revoke_delegation(revoked.id, a, None).await.unwrap_err(),
        ApprovalError::InvalidTransition(_)
    ));

    let lapsing = h
        .engine
        .create_delegation(
            NewDelegation::new(h.company, a, d, h.now())
                .with_type(DelegationType::Temporary)
                .with_all_authorities()
                .with_end_date(h.now() + Duration::hours(12)),
            a,
        )
        .await
        .unwrap();

    let request = h.create(&template, None).await;
    assert!(h
        .engine
        .act(request.id, c, ActionOutcome::Approve, None)
        .await
        .is_err());

    h.advance_hours(13);
    let stats = h.engine.expire_lapsed_delegations(None).await.unwrap();
    assert_eq!(stats.delegations_expired, 1);
    assert!(!h.engine.get_delegation(lapsing.id).await.unwrap().is_active);
    assert!(h
        .engine
        .act(request.id, d, ActionOutcome::Approve, None)
        .await
        .is_err());

    assert_eq!(
        h.engine
            .list_delegations(h.company, Some(a))
            .await
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn self_delegation_rejected() {
    let h = Harness::new();
    let a = UserId::generate();
    let err = h
        .engine
        .create_delegation(NewDelegation::new(h.company, a, a, h.now()), a)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ApprovalError::Validation(ValidationError::SelfDelegation)
    ));
}

// ── Unknown ids ──────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_request_is_not_found() {
    let h = Harness::new();
    let id = RequestId::generate();
    assert!(matches!(
        h.engine.get_status(id).await.unwrap_err(),
        ApprovalError::RequestNotFound(missing) if missing == id
    ));
    assert!(matches!(
        h.engine
            .act(id, UserId::generate(), ActionOutcome::Approve, None)
            .await
            .unwrap_err(),
        ApprovalError::RequestNotFound(_)
    ));
}
