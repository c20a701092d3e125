//! Error types for the ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Transaction failed validation before commit
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    /// Debits and credits do not balance
    #[error("Unbalanced transaction: debits {debits} != credits {credits}")]
    Unbalanced {
        /// Sum of debit amounts
        debits: rust_decimal::Decimal,
        /// Sum of credit amounts
        credits: rust_decimal::Decimal,
    },

    /// Debit would take a non-negative account below zero
    #[error("Insufficient funds in account {account_id}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        /// Account that would go negative
        account_id: uuid::Uuid,
        /// Balance at the time of the check
        balance: rust_decimal::Decimal,
        /// Debit amount requested
        requested: rust_decimal::Decimal,
    },

    /// Account not found
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// Transaction not found
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    /// A completed transaction already exists for this idempotency key
    #[error("Duplicate idempotency key: {0}")]
    DuplicateIdempotencyKey(String),

    /// Transaction already reversed
    #[error("Transaction already reversed: {0}")]
    AlreadyReversed(uuid::Uuid),

    /// Invariant violation (money conservation, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
