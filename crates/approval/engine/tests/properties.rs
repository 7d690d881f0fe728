//! Property tests over random operation sequences

mod common;

use approval_engine::ApprovalError;
use approval_types::*;
use chrono::Duration;
use common::Harness;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    /// Act as the approver of the given level
    Act(usize, bool),
    Advance(i64),
    Scan,
    Escalate,
    Cancel,
    Suspend,
    Resume,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..3usize, any::<bool>()).prop_map(|(level, approve)| Op::Act(level, approve)),
        3 => (1..40i64).prop_map(Op::Advance),
        3 => Just(Op::Scan),
        1 => Just(Op::Escalate),
        1 => Just(Op::Cancel),
        1 => Just(Op::Suspend),
        1 => Just(Op::Resume),
    ]
}

fn template_strategy() -> impl Strategy<Value = (bool, u32, TimeoutAction)> {
    (
        any::<bool>(),
        0..4u32,
        prop_oneof![
            Just(TimeoutAction::None),
            Just(TimeoutAction::Escalate),
            Just(TimeoutAction::Approve),
            Just(TimeoutAction::Reject),
        ],
    )
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Errors an operation may legitimately return on a request in the
/// wrong state
fn expected(err: &ApprovalError) -> bool {
    matches!(
        err,
        ApprovalError::InvalidTransition(_) | ApprovalError::UnauthorizedActor { .. }
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn request_lifecycle_invariants(
        (auto_escalate, max_escalations, timeout_action) in template_strategy(),
        ops in prop::collection::vec(op_strategy(), 1..30),
    ) {
        runtime().block_on(async {
            let h = Harness::new();
            let approvers = [UserId::generate(), UserId::generate(), UserId::generate()];
            let admin = h.admin;
            let template = h
                .register(
                    h.chain(&approvers)
                        .with_auto_escalate(auto_escalate)
                        .with_max_escalations(max_escalations)
                        .with_timeout_action(timeout_action),
                )
                .await;
            let request = h.create(&template, Some(25_000)).await;

            let mut level = 1;
            let mut terminal = None;
            let mut audit_len = h.audit_names(request.id).await.len();

            for op in ops {
                let before = h.status(request.id).await.request;
                let result = match op {
                    Op::Act(i, approve) => {
                        let outcome = if approve { ActionOutcome::Approve } else { ActionOutcome::Reject };
                        h.engine.act(request.id, approvers[i], outcome, None).await.map(|_| ())
                    }
                    Op::Advance(hours) => {
                        h.advance_hours(hours);
                        Ok(())
                    }
                    Op::Scan => h
                        .engine
                        .run_scan(None, Duration::hours(4))
                        .await
                        .map(|_| ()),
                    Op::Escalate => h
                        .engine
                        .manual_escalate(request.id, admin, None, None)
                        .await
                        .map(|_| ()),
                    Op::Cancel => h.engine.cancel_request(request.id, admin, None).await.map(|_| ()),
                    Op::Suspend => h.engine.suspend_request(request.id, admin, None).await.map(|_| ()),
                    Op::Resume => h.engine.resume_request(request.id, admin, None).await.map(|_| ()),
                };
                if let Err(e) = &result {
                    prop_assert!(expected(e), "unexpected error: {e}");
                }

                let status = h.status(request.id).await;
                let pending = status.actions.iter().filter(|a| a.is_pending()).count();
                prop_assert!(pending <= 1);
                prop_assert!(status.request.current_level >= level);
                level = status.request.current_level;

                if let Some(final_status) = terminal {
                    prop_assert_eq!(status.request.status, final_status);
                    prop_assert_eq!(pending, 0);
                }
                if status.request.status.is_terminal() {
                    prop_assert_eq!(pending, 0);
                    prop_assert!(status.request.completed_at.is_some());
                    terminal = Some(status.request.status);
                }
                if let Some(action) = status.pending_action() {
                    prop_assert_eq!(action.level_order, status.request.current_level);
                }
                for escalation in &status.escalations {
                    prop_assert_eq!(escalation.to_level, escalation.from_level + 1);
                }

                let trail = h.audit_names(request.id).await;
                if status.request.status != before.status {
                    prop_assert!(trail.len() > audit_len);
                }
                audit_len = trail.len();
            }
            Ok(())
        })?;
    }

    #[test]
    fn concurrent_consumption_never_exceeds_cap(
        cap in 1_000i64..100_000,
        amounts in prop::collection::vec(1i64..20_000, 1..24),
    ) {
        runtime().block_on(async {
            let h = Harness::new();
            let (a, c) = (UserId::generate(), UserId::generate());
            let delegation = h
                .engine
                .create_delegation(
                    NewDelegation::new(h.company, a, c, h.now())
                        .with_all_authorities()
                        .with_limits(None, Some(cap)),
                    a,
                )
                .await
                .unwrap();

            let attempts = amounts.iter().map(|amount| {
                h.engine
                    .update_delegation_amount(delegation.id, *amount, Actor::User(c))
            });
            let results = futures::future::join_all(attempts).await;

            let mut accepted: Amount = 0;
            for (amount, result) in amounts.iter().zip(&results) {
                match result {
                    Ok(total) => {
                        accepted += *amount;
                        prop_assert!(*total <= cap);
                    }
                    Err(e) => prop_assert!(
                        matches!(e, ApprovalError::DelegationLimitExceeded { .. }),
                        "unexpected error: {e}"
                    ),
                }
            }

            let stored = h.engine.get_delegation(delegation.id).await.unwrap();
            prop_assert_eq!(stored.total_approved_amount, accepted);
            prop_assert!(stored.total_approved_amount <= cap);
            Ok(())
        })?;
    }
}
