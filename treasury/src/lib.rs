//! Lumen Treasury Engine
//!
//! Keeps the platform's three working-capital buffers inside their
//! thresholds by creating, submitting, and settling conversion jobs:
//!
//! - **Onchain buffer** (USDC at the wallet provider)
//! - **Fiat buffer** (USD at the conversion provider)
//! - **Broker operational** (USD at the brokerage)
//!
//! Jobs are durable (RocksDB), retried with a bounded budget, and settle
//! into the ledger exactly once via idempotency keys.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]

pub mod config;
pub mod engine;
pub mod error;
pub mod scheduler;
pub mod store;
pub mod types;

// Re-exports
pub use config::Config;
pub use engine::TreasuryEngine;
pub use error::{Error, Result};
pub use scheduler::TreasuryScheduler;
pub use store::JobStore;
pub use types::{
    BufferHealth, BufferKind, BufferThreshold, ConversionJob, JobStatus, TreasuryEvent,
};
