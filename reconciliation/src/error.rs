//! Error types for the reconciliation service

use thiserror::Error;
use uuid::Uuid;

/// Result type for reconciliation operations
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciliation errors
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger read or adjustment failed
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger_core::Error),

    /// External provider call failed
    #[error("Provider error: {0}")]
    Provider(#[from] providers::Error),

    /// Treasury store read failed
    #[error("Treasury error: {0}")]
    Treasury(#[from] treasury::Error),

    /// Onchain store read failed
    #[error("Onchain error: {0}")]
    Onchain(#[from] onchain::Error),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Exception not found
    #[error("Exception not found: {0}")]
    ExceptionNotFound(Uuid),

    /// Exception is not in a state that permits the transition
    #[error("Invalid exception transition: {0}")]
    InvalidTransition(String),

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
