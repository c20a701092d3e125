//! Lumen Ledger Core
//!
//! Double-entry bookkeeping ledger for USDC and USD balances.
//!
//! # Architecture
//!
//! - **Double Entry**: Every transaction is a balanced set of debit and
//!   credit entries; balances are derived, never set
//! - **Single Writer**: One actor task serializes all balance mutations
//! - **Append-only**: Entries are immutable; corrections are compensating
//!   transactions
//! - **Idempotent**: At most one transaction per idempotency key
//!
//! # Invariants
//!
//! - Money conservation: Σ(debits) == Σ(credits) per transaction
//! - User accounts never go negative; system buffers may
//! - Cached balance == Σ(signed entry amounts) at all times

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod actor;
pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod storage;
pub mod types;

// Re-exports
pub use config::Config;
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use metrics::Metrics;
pub use storage::Storage;
pub use types::{
    AccountOwner, AccountType, Currency, EntryDirection, LedgerAccount, LedgerEntry,
    LedgerTransaction, NewEntry, NewTransaction, TransactionStatus, TransactionType, UserBalances,
};
