//! Tollgate billing core
//!
//! Everything that charges a caller lives here: the atomic debit-plus-log
//! settlement transaction, the bounded retry path for transient settlement
//! failures, the durable compensation task store that backstops both, and the
//! processor that sweeps pending tasks to eventual settlement.
//!
//! The gateway crate decides *whether* a call is billable; this crate owns
//! *that it is charged exactly once*.

pub mod audit;
pub mod compensation;
pub mod error;
pub mod processor;
pub mod retry;
pub mod settlement;

#[cfg(test)]
pub(crate) mod testutil;

pub use audit::AuditEntry;
pub use compensation::{CompensationStore, CompensationTask, TaskStatus};
pub use error::{SettlementError, SettlementResult};
pub use processor::{CompensationProcessor, ProcessOutcome, SweepReport};
pub use retry::{settle_with_recovery, RetryPolicy};
pub use settlement::SettlementEngine;
