//! Approval engine storage.
//!
//! Every state change in the engine runs inside one [`StoreTransaction`]:
//! the request row is locked, the change is applied, the audit entry is
//! appended, and the whole unit commits or rolls back together. Dropping a
//! transaction without committing discards it.
//!
//! Two backends are provided:
//! - [`memory::InMemoryApprovalStore`] serializes transactions behind one
//!   async mutex; deterministic and test-friendly.
//! - `postgres::PostgresApprovalStore` (feature `postgres`) uses row locks
//!   and conditional updates; the transactional source of truth.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod error;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
mod traits;

pub use error::{StorageError, StorageResult};
pub use memory::InMemoryApprovalStore;
pub use traits::{ApprovalStore, QueryWindow, StoreTransaction};
