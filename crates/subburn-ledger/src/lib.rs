//! Durable record of burn job state transitions.
//!
//! The ledger owns every job mutation. All transitions funnel through a
//! single guarded apply step, so concurrent readers always observe a job
//! either before or after a transition, never mid-update.

pub mod error;
pub mod ledger;

pub use error::{LedgerError, LedgerResult};
pub use ledger::JobLedger;
