//! Types for deposits, withdrawals, and address resolution

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Resolves deposit addresses to the users that own them
pub trait AddressDirectory: Send + Sync {
    /// User owning the address on the given chain, if registered
    fn resolve(&self, chain: &str, address: &str) -> Option<Uuid>;
}

/// In-memory address directory for tests and demos
#[derive(Default)]
pub struct MemoryAddressDirectory {
    addresses: RwLock<HashMap<(String, String), Uuid>>,
}

impl MemoryAddressDirectory {
    /// Create empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an address for a user
    pub fn register(&self, chain: &str, address: &str, user_id: Uuid) {
        self.addresses
            .write()
            .insert((chain.to_string(), address.to_string()), user_id);
    }
}

impl AddressDirectory for MemoryAddressDirectory {
    fn resolve(&self, chain: &str, address: &str) -> Option<Uuid> {
        self.addresses
            .read()
            .get(&(chain.to_string(), address.to_string()))
            .copied()
    }
}

/// A credited deposit, recorded once per (chain, tx_hash)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRecord {
    /// Record ID
    pub id: Uuid,

    /// User credited
    pub user_id: Uuid,

    /// Chain the deposit arrived on
    pub chain: String,

    /// Onchain transaction hash
    pub tx_hash: String,

    /// USDC amount
    pub amount: Decimal,

    /// Sender address
    pub from_address: String,

    /// Ledger transaction that credited the user
    pub ledger_transaction_id: Uuid,

    /// When the credit was posted
    pub credited_at: DateTime<Utc>,
}

/// Withdrawal lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WithdrawalStatus {
    /// Ledger debit posted, payout not yet sent
    Requested,
    /// Payout accepted by the wallet provider
    Processing,
    /// Payout confirmed onchain
    Completed,
    /// Payout failed; ledger debit was reversed
    Failed,
    /// Processing too long; flagged for reconciliation
    Stuck,
}

/// A user withdrawal of USDC to an external address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Withdrawal {
    /// Withdrawal ID
    pub id: Uuid,

    /// Requesting user
    pub user_id: Uuid,

    /// Destination chain
    pub chain: String,

    /// Destination address
    pub to_address: String,

    /// USDC amount
    pub amount: Decimal,

    /// Lifecycle status
    pub status: WithdrawalStatus,

    /// Wallet provider reference for polling
    pub external_reference: Option<String>,

    /// Ledger transaction holding the debit
    pub ledger_transaction_id: Option<Uuid>,

    /// Why the withdrawal failed, if it did
    pub failure_reason: Option<String>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl Withdrawal {
    /// Create a fresh withdrawal request
    pub fn new(user_id: Uuid, chain: String, to_address: String, amount: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            chain,
            to_address,
            amount,
            status: WithdrawalStatus::Requested,
            external_reference: None,
            ledger_transaction_id: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Idempotency key for the ledger debit
    pub fn debit_key(&self) -> String {
        format!("withdrawal-{}-debit", self.id)
    }

    /// Idempotency key for the compensating reversal
    pub fn reversal_key(&self) -> String {
        format!("withdrawal-{}-reversal", self.id)
    }
}

/// Idempotency key for a deposit credit
pub fn deposit_key(chain: &str, tx_hash: &str) -> String {
    format!("deposit-{}-{}", chain, tx_hash)
}
