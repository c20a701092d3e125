//! Shared types for provider interactions

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of an external transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    /// Accepted by the provider, still in flight
    Processing,
    /// Confirmed settled by the provider
    Completed,
    /// Terminally failed at the provider
    Failed,
    /// Cancelled before completion
    Cancelled,
}

impl TransferStatus {
    /// No further transitions expected
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferStatus::Processing)
    }
}

/// Result of initiating an external transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferResult {
    /// Provider-side reference for polling
    pub external_reference: String,

    /// Status at initiation time
    pub status: TransferStatus,

    /// When the provider accepted the transfer
    pub initiated_at: DateTime<Utc>,
}

/// Incoming deposit observed at the wallet provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositNotification {
    /// Deposit address that received the funds
    pub to_address: String,

    /// Chain the deposit arrived on ("ethereum", "polygon", ...)
    pub chain: String,

    /// Onchain transaction hash
    pub tx_hash: String,

    /// USDC amount
    pub amount: Decimal,

    /// Sender address
    pub from_address: String,

    /// When the wallet provider observed confirmation
    pub confirmed_at: DateTime<Utc>,
}

/// Payout request sent to the wallet provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutRequest {
    /// Internal withdrawal ID, doubles as the provider idempotency key
    pub withdrawal_id: Uuid,

    /// Destination chain
    pub chain: String,

    /// Destination address
    pub to_address: String,

    /// USDC amount
    pub amount: Decimal,
}

/// Direction of a treasury currency conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversionDirection {
    /// Sell USDC, receive USD
    UsdcToUsd,
    /// Buy USDC with USD
    UsdToUsdc,
}

impl std::fmt::Display for ConversionDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversionDirection::UsdcToUsd => write!(f, "usdc_to_usd"),
            ConversionDirection::UsdToUsdc => write!(f, "usd_to_usdc"),
        }
    }
}

/// Conversion order submitted to a conversion provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionRequest {
    /// Internal job ID, doubles as the provider idempotency key
    pub job_id: Uuid,

    /// Which way the conversion goes
    pub direction: ConversionDirection,

    /// Source-currency amount
    pub amount: Decimal,
}
