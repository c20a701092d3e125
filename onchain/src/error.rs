//! Error types for the onchain engine

use thiserror::Error;

/// Result type for onchain operations
pub type Result<T> = std::result::Result<T, Error>;

/// Onchain engine errors
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger operation failed
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger_core::Error),

    /// Wallet provider call failed
    #[error("Provider error: {0}")]
    Provider(#[from] providers::Error),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Deposit address not registered to any user
    #[error("Unknown deposit address {address} on {chain}")]
    UnknownAddress {
        /// Chain the deposit arrived on
        chain: String,
        /// Unrecognized address
        address: String,
    },

    /// Withdrawal not found
    #[error("Withdrawal not found: {0}")]
    WithdrawalNotFound(uuid::Uuid),

    /// Worker pool is shut down or its queue is full
    #[error("Worker pool unavailable: {0}")]
    WorkerPool(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
