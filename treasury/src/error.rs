//! Error types for the treasury engine

use thiserror::Error;

/// Result type for treasury operations
pub type Result<T> = std::result::Result<T, Error>;

/// Treasury errors
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger operation failed
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger_core::Error),

    /// Provider call failed
    #[error("Provider error: {0}")]
    Provider(#[from] providers::Error),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Conversion job not found
    #[error("Job not found: {0}")]
    JobNotFound(uuid::Uuid),

    /// No provider supports the requested direction
    #[error("No provider available for {0}")]
    NoProviderAvailable(String),

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
