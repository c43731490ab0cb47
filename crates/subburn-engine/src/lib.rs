//! Subtitle-burn job engine.
//!
//! This crate ties the ledger, artifact store, and encoder together:
//! - `Scheduler`: bounded-concurrency FIFO dispatcher with retry, backoff,
//!   per-attempt timeout, and cancellation
//! - `BurnService`: the facade an HTTP layer (out of scope here) calls to
//!   submit jobs, poll status, fetch outputs, and cancel

pub mod config;
pub mod error;
pub mod scheduler;
pub mod service;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult, FailureKind};
pub use service::BurnService;
