//! Git-backed transaction guard for mutating operations.
//!
//! A mutating operation either completes, or the working tree is restored to
//! the commit it started from. Every transaction is recorded in a per-day
//! audit log.

mod audit;
mod git;
mod guard;

pub use audit::{AuditError, AuditEvent, AuditLog, AuditPhase};
pub use git::{Git, GitError};
pub use guard::{in_work_tree, state_dir, DirtyTreeStrategy, SafetyGuard, TransactionError};
