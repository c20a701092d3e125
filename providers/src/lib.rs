//! Lumen Provider Clients
//!
//! Trait-based clients for the three external money rails:
//!
//! - **Wallet provider**: custodial USDC wallets, deposits and payouts
//! - **Conversion providers**: USDC <-> USD, priority-ordered with failover
//! - **Brokerage**: operational funding and buying power
//!
//! Every call site wraps providers with the [`circuit_breaker`] and
//! [`retry`] layers; errors classify as transient or permanent so retry
//! budgets are only spent where they can help.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]

pub mod brokerage;
pub mod circuit_breaker;
pub mod conversion;
pub mod error;
pub mod retry;
pub mod types;
pub mod wallet;

// Re-exports
pub use brokerage::{BrokerageClient, MockBrokerageClient};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerManager, CircuitState};
pub use conversion::{ConversionProvider, MockConversionProvider};
pub use error::{Error, Result};
pub use retry::{RetryConfig, RetryPolicy};
pub use types::{
    ConversionDirection, ConversionRequest, DepositNotification, PayoutRequest, TransferResult,
    TransferStatus,
};
pub use wallet::{MockWalletProvider, WalletProvider};
