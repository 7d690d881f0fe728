//! Approval engine
//!
//! Routes business requests through ordered approver chains, enforces
//! delegation-of-authority limits and escalates or resolves requests that
//! breach their SLA.
//!
//! # Architecture
//!
//! The [`ApprovalEngine`] composes specialized components over one shared
//! [`EngineContext`]:
//!
//! - [`TemplateRegistry`]: Versioned, immutable workflow templates
//! - [`RequestStateMachine`]: Request creation, approver actions, manual intervention
//! - [`DelegationRegistry`]: Delegation grants, matching and balance consumption
//! - [`EscalationEngine`]: Manual and timeout escalation, timeout resolution, reminders
//!
//! Waiting for an approver is data, never a blocked task: a pending action
//! with a due time. The background scan is driven from outside, normally
//! by the daemon's scheduler calling [`ApprovalEngine::run_scan`].
//!
//! # Example
//!
//! ```rust,no_run
//! use approval_engine::{ApprovalEngine, StaticDirectory};
//! use approval_store::InMemoryApprovalStore;
//! use approval_types::*;
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), approval_engine::ApprovalError> {
//! let engine = ApprovalEngine::new(
//!     Arc::new(InMemoryApprovalStore::new()),
//!     Arc::new(StaticDirectory::new()),
//! );
//!
//! let company = CompanyId::generate();
//! let (manager, finance) = (UserId::generate(), UserId::generate());
//! let template = engine
//!     .register_template(
//!         NewTemplate::new(company, "expense", "expense_claim")
//!             .with_level(WorkflowLevel::user(1, manager, 24))
//!             .with_level(WorkflowLevel::user(2, finance, 24)),
//!         None,
//!     )
//!     .await?;
//!
//! let requester = UserId::generate();
//! let request = engine
//!     .create_request(
//!         Some(template.id),
//!         "expense_claim",
//!         "EXP-1042",
//!         RequestContext::new(company, requester).with_amount(1_250_000),
//!     )
//!     .await?;
//!
//! engine.act(request.id, manager, ActionOutcome::Approve, None).await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod clock;
pub mod context;
pub mod delegation_registry;
pub mod directory;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod notify;
pub mod resolver;
pub mod state_machine;
pub mod template_registry;

// Re-export main types
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{EngineConfig, EngineContext};
pub use delegation_registry::DelegationRegistry;
pub use directory::{ApproverDirectory, StaticDirectory};
pub use engine::ApprovalEngine;
pub use error::{ApprovalError, ApprovalResult};
pub use escalation::{EscalationEngine, ScanStats};
pub use notify::{LogNotifier, MemoryNotifier, NotificationEvent, Notifier};
pub use resolver::ApproverResolver;
pub use state_machine::{RequestStateMachine, RequestStatus};
pub use template_registry::TemplateRegistry;
