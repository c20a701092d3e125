//! Onchain engine
//!
//! Bridges custodial wallet activity into the ledger. Confirmed deposits
//! are resolved to users through an address directory and credited
//! exactly once per (chain, tx_hash). Withdrawals post the ledger debit
//! before the payout and compensate with a reversal when the payout
//! fails, so user balances and wallet movements never drift apart
//! silently.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]

pub mod config;
pub mod engine;
pub mod error;
pub mod store;
pub mod types;
pub mod worker;

pub use config::Config;
pub use engine::OnchainEngine;
pub use error::{Error, Result};
pub use store::OnchainStore;
pub use types::{
    deposit_key, AddressDirectory, DepositRecord, MemoryAddressDirectory, Withdrawal,
    WithdrawalStatus,
};
pub use worker::{OnchainJob, OnchainWorkerPool, WithdrawalRequest};
