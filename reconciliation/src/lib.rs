//! Lumen Reconciliation Service
//!
//! Periodic consistency checks across the ledger, the treasury and
//! onchain stores, and the external providers. Small discrepancies are
//! corrected with compensating ledger transactions; everything else
//! becomes an exception that an operator must resolve. The service is
//! the sole creator of exceptions and never mutates balances directly.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]

pub mod config;
pub mod error;
pub mod ops;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use ops::{BufferStatus, OpsReport};
pub use scheduler::ReconciliationScheduler;
pub use service::ReconciliationService;
pub use store::ExceptionStore;
pub use types::{
    CheckKind, ExceptionStatus, ReconciliationException, ReconciliationReport, RunType, Severity,
};
