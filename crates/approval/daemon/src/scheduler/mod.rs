//! Background scan loop
//!
//! The scheduler is responsible for:
//! - Expiring lapsed delegations
//! - Reminding approvers whose actions fall due soon
//! - Escalating overdue actions and resolving breached requests

mod scanner;

pub use scanner::{LastScan, Scheduler};
