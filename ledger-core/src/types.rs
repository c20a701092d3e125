//! Core types for the double-entry ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Memory safety (no unsafe code)
//! - Exact arithmetic (Decimal for money)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Currency held by a ledger account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Currency {
    /// USD Coin (on-chain stablecoin)
    Usdc,
    /// US Dollar (fiat)
    Usd,
}

impl Currency {
    /// Currency code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usdc => "USDC",
            Currency::Usd => "USD",
        }
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "USDC" => Some(Currency::Usdc),
            "USD" => Some(Currency::Usd),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Owner of a ledger account: a user or the platform itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountOwner {
    /// User-owned account
    User(Uuid),
    /// Platform-owned system account
    System,
}

impl AccountOwner {
    /// User ID if user-owned
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            AccountOwner::User(id) => Some(*id),
            AccountOwner::System => None,
        }
    }
}

impl fmt::Display for AccountOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountOwner::User(id) => write!(f, "user:{}", id),
            AccountOwner::System => write!(f, "system"),
        }
    }
}

/// Account type (balance bucket)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AccountType {
    /// User's spendable USDC balance
    UsdcBalance = 1,
    /// User's USD exposure at the brokerage
    FiatExposure = 2,
    /// User's USDC reserved for an in-flight investment
    PendingInvestment = 3,
    /// System working capital held at the wallet provider (USDC)
    OnchainBuffer = 4,
    /// System working capital at the conversion provider (USD)
    FiatBuffer = 5,
    /// System operational account at the brokerage (USD)
    BrokerOperational = 6,
    /// System account absorbing reconciliation auto-corrections
    ReconciliationAdjustment = 7,
}

impl AccountType {
    /// True for platform-owned account types
    pub fn is_system(&self) -> bool {
        matches!(
            self,
            AccountType::OnchainBuffer
                | AccountType::FiatBuffer
                | AccountType::BrokerOperational
                | AccountType::ReconciliationAdjustment
        )
    }

    /// System buffers may go negative transiently between settlement cycles
    pub fn allows_negative(&self) -> bool {
        self.is_system()
    }

    /// Default currency for the account type
    pub fn default_currency(&self) -> Currency {
        match self {
            AccountType::UsdcBalance
            | AccountType::PendingInvestment
            | AccountType::OnchainBuffer => Currency::Usdc,
            AccountType::FiatExposure
            | AccountType::FiatBuffer
            | AccountType::BrokerOperational
            | AccountType::ReconciliationAdjustment => Currency::Usd,
        }
    }

    /// Snake-case name used in keys and logs
    pub fn name(&self) -> &'static str {
        match self {
            AccountType::UsdcBalance => "usdc_balance",
            AccountType::FiatExposure => "fiat_exposure",
            AccountType::PendingInvestment => "pending_investment",
            AccountType::OnchainBuffer => "onchain_buffer",
            AccountType::FiatBuffer => "fiat_buffer",
            AccountType::BrokerOperational => "broker_operational",
            AccountType::ReconciliationAdjustment => "reconciliation_adjustment",
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A ledger account: one row per (owner, account type, currency)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerAccount {
    /// Account ID
    pub id: Uuid,

    /// Account owner
    pub owner: AccountOwner,

    /// Account type
    pub account_type: AccountType,

    /// Currency
    pub currency: Currency,

    /// Cached balance: sum(credits) - sum(debits) over completed transactions
    pub balance: Decimal,

    /// Whether the balance is allowed to go below zero
    pub allow_negative: bool,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl LedgerAccount {
    /// Create a fresh account with zero balance
    pub fn new(owner: AccountOwner, account_type: AccountType, currency: Currency) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner,
            account_type,
            currency,
            balance: Decimal::ZERO,
            allow_negative: account_type.allows_negative(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Direction of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntryDirection {
    /// Decreases the account balance
    Debit = 1,
    /// Increases the account balance
    Credit = 2,
}

impl EntryDirection {
    /// Opposite direction (used when reversing a transaction)
    pub fn inverse(&self) -> Self {
        match self {
            EntryDirection::Debit => EntryDirection::Credit,
            EntryDirection::Credit => EntryDirection::Debit,
        }
    }
}

/// One immutable debit or credit line
///
/// Entries are never updated or deleted; corrections are new, compensating
/// entries under a new transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Entry ID
    pub id: Uuid,

    /// Parent transaction
    pub transaction_id: Uuid,

    /// Account affected
    pub account_id: Uuid,

    /// Debit or credit
    pub direction: EntryDirection,

    /// Amount (always >= 0; sign is carried by direction)
    pub amount: Decimal,

    /// Currency
    pub currency: Currency,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Signed effect of this entry on its account balance
    pub fn signed_amount(&self) -> Decimal {
        match self.direction {
            EntryDirection::Debit => -self.amount,
            EntryDirection::Credit => self.amount,
        }
    }
}

/// Business event category of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransactionType {
    /// External funds arriving (wallet-provider deposit)
    Deposit = 1,
    /// Funds leaving to an external address
    Withdrawal = 2,
    /// User funds moving toward/within the brokerage
    Investment = 3,
    /// Treasury buffer-to-buffer currency conversion
    Conversion = 4,
    /// Any other internal movement
    InternalTransfer = 5,
}

impl TransactionType {
    /// Whether entries in different currencies are permitted.
    ///
    /// Cross-currency legs balance on the common USD basis (1:1 USDC peg).
    pub fn allows_mixed_currency(&self) -> bool {
        matches!(self, TransactionType::Conversion | TransactionType::Investment)
    }
}

/// Transaction lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransactionStatus {
    /// Created but not yet applied to balances
    Pending = 1,
    /// Applied to balances
    Completed = 2,
    /// Undone by a compensating transaction
    Reversed = 3,
}

/// A balanced group of entries representing one business event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    /// Transaction ID
    pub id: Uuid,

    /// Business event category
    pub transaction_type: TransactionType,

    /// Lifecycle status
    pub status: TransactionStatus,

    /// Caller-supplied key; at most one transaction exists per key
    pub idempotency_key: String,

    /// External record this transaction points at (deposit, job, order...)
    pub reference_id: Option<Uuid>,

    /// Kind of the external record ("deposit", "conversion_job", ...)
    pub reference_type: Option<String>,

    /// Human-readable description
    pub description: Option<String>,

    /// Entry IDs in commit order
    pub entry_ids: Vec<Uuid>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Completed timestamp
    pub completed_at: Option<DateTime<Utc>>,
}

/// One requested entry inside a [`NewTransaction`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEntry {
    /// Account to debit or credit
    pub account_id: Uuid,

    /// Debit or credit
    pub direction: EntryDirection,

    /// Amount (must be >= 0)
    pub amount: Decimal,

    /// Currency (must match the account's currency)
    pub currency: Currency,
}

impl NewEntry {
    /// Convenience constructor
    pub fn new(
        account_id: Uuid,
        direction: EntryDirection,
        amount: Decimal,
        currency: Currency,
    ) -> Self {
        Self {
            account_id,
            direction,
            amount,
            currency,
        }
    }
}

/// Request to post a new balanced transaction
#[derive(Debug, Clone)]
pub struct NewTransaction {
    /// Business event category
    pub transaction_type: TransactionType,

    /// Idempotency key (unique per business event)
    pub idempotency_key: String,

    /// Entries; >= 2, debits and credits must balance
    pub entries: Vec<NewEntry>,

    /// External record reference
    pub reference_id: Option<Uuid>,

    /// Kind of the external record
    pub reference_type: Option<String>,

    /// Human-readable description
    pub description: Option<String>,
}

impl NewTransaction {
    /// Sum of debit amounts on the common USD basis
    pub fn total_debits(&self) -> Decimal {
        self.entries
            .iter()
            .filter(|e| e.direction == EntryDirection::Debit)
            .map(|e| e.amount)
            .sum()
    }

    /// Sum of credit amounts on the common USD basis
    pub fn total_credits(&self) -> Decimal {
        self.entries
            .iter()
            .filter(|e| e.direction == EntryDirection::Credit)
            .map(|e| e.amount)
            .sum()
    }
}

/// Aggregated per-user balance view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBalances {
    /// Spendable USDC
    pub usdc_balance: Decimal,

    /// USD exposure at the brokerage
    pub fiat_exposure: Decimal,

    /// USDC reserved for in-flight investments
    pub pending_investment: Decimal,
}

impl UserBalances {
    /// Total value across all buckets (USD basis, 1:1 peg)
    pub fn total_value(&self) -> Decimal {
        self.usdc_balance + self.fiat_exposure + self.pending_investment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_account_type_system_flags() {
        assert!(AccountType::OnchainBuffer.is_system());
        assert!(AccountType::OnchainBuffer.allows_negative());
        assert!(!AccountType::UsdcBalance.is_system());
        assert!(!AccountType::UsdcBalance.allows_negative());
    }

    #[test]
    fn test_currency_from_str() {
        assert_eq!(Currency::from_str("USDC"), Some(Currency::Usdc));
        assert_eq!(Currency::from_str("USD"), Some(Currency::Usd));
        assert_eq!(Currency::from_str("EUR"), None);
    }

    #[test]
    fn test_entry_signed_amount() {
        let mut entry = LedgerEntry {
            id: Uuid::new_v4(),
            transaction_id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            direction: EntryDirection::Credit,
            amount: dec!(100),
            currency: Currency::Usdc,
            created_at: Utc::now(),
        };
        assert_eq!(entry.signed_amount(), dec!(100));

        entry.direction = EntryDirection::Debit;
        assert_eq!(entry.signed_amount(), dec!(-100));
    }

    #[test]
    fn test_new_transaction_totals() {
        let tx = NewTransaction {
            transaction_type: TransactionType::Deposit,
            idempotency_key: "k".to_string(),
            entries: vec![
                NewEntry::new(Uuid::new_v4(), EntryDirection::Credit, dec!(100), Currency::Usdc),
                NewEntry::new(Uuid::new_v4(), EntryDirection::Debit, dec!(100), Currency::Usdc),
            ],
            reference_id: None,
            reference_type: None,
            description: None,
        };
        assert_eq!(tx.total_debits(), tx.total_credits());
    }

    #[test]
    fn test_user_balances_total() {
        let balances = UserBalances {
            usdc_balance: dec!(100),
            fiat_exposure: dec!(250),
            pending_investment: dec!(50),
        };
        assert_eq!(balances.total_value(), dec!(400));
    }
}
