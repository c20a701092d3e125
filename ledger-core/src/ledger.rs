//! Main ledger orchestration layer
//!
//! This module ties together storage and the actor into a high-level API
//! for double-entry bookkeeping. Mutations route through the single-writer
//! actor; reads go straight to storage.
//!
//! # Example
//!
//! ```no_run
//! use ledger_core::{Config, Ledger};
//!
//! #[tokio::main]
//! async fn main() -> ledger_core::Result<()> {
//!     let config = Config::default();
//!     let ledger = Ledger::open(config).await?;
//!
//!     // Post transactions via ledger.create_transaction(...)
//!
//!     ledger.shutdown().await?;
//!     Ok(())
//! }
//! ```

use crate::{
    actor::{spawn_ledger_actor, LedgerHandle},
    types::{
        AccountOwner, AccountType, Currency, EntryDirection, LedgerAccount, LedgerEntry,
        LedgerTransaction, NewEntry, NewTransaction, TransactionType, UserBalances,
    },
    Config, Error, Metrics, Result, Storage,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Main ledger interface
#[derive(Clone)]
pub struct Ledger {
    /// Actor handle for mutations
    handle: LedgerHandle,

    /// Direct storage access (for reads)
    storage: Arc<Storage>,

    /// Pipeline counters, shared with the actor
    metrics: Metrics,
}

impl Ledger {
    /// Open ledger with configuration
    pub async fn open(config: Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        let metrics =
            Metrics::new().map_err(|e| Error::Config(format!("Metrics registry: {}", e)))?;
        let handle = spawn_ledger_actor(storage.clone(), config.mailbox_capacity, metrics.clone());

        Ok(Self {
            handle,
            storage,
            metrics,
        })
    }

    /// Pipeline counters (commits, rejections, reversals) for scraping
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Post a balanced transaction.
    ///
    /// Idempotent on `idempotency_key`: a replay returns the transaction
    /// committed by the first call.
    pub async fn create_transaction(&self, request: NewTransaction) -> Result<LedgerTransaction> {
        self.handle.create_transaction(request).await
    }

    /// Find or create the unique account for (owner, type, currency)
    pub async fn get_or_create_account(
        &self,
        owner: AccountOwner,
        account_type: AccountType,
        currency: Currency,
    ) -> Result<LedgerAccount> {
        self.handle
            .get_or_create_account(owner, account_type, currency)
            .await
    }

    /// Reverse a completed transaction with a compensating one
    pub async fn reverse_transaction(
        &self,
        transaction_id: Uuid,
        idempotency_key: impl Into<String>,
    ) -> Result<LedgerTransaction> {
        self.handle
            .reverse_transaction(transaction_id, idempotency_key.into())
            .await
    }

    /// Cached balance of one account bucket; zero if the account does not exist
    pub async fn get_account_balance(
        &self,
        owner: AccountOwner,
        account_type: AccountType,
        currency: Currency,
    ) -> Result<Decimal> {
        match self.storage.find_account(&owner, account_type, currency)? {
            Some(account) => Ok(account.balance),
            None => Ok(Decimal::ZERO),
        }
    }

    /// All balance buckets for a user in one view
    pub async fn get_user_balances(&self, user_id: Uuid) -> Result<UserBalances> {
        let owner = AccountOwner::User(user_id);
        Ok(UserBalances {
            usdc_balance: self
                .get_account_balance(owner, AccountType::UsdcBalance, Currency::Usdc)
                .await?,
            fiat_exposure: self
                .get_account_balance(owner, AccountType::FiatExposure, Currency::Usd)
                .await?,
            pending_investment: self
                .get_account_balance(owner, AccountType::PendingInvestment, Currency::Usdc)
                .await?,
        })
    }

    /// Move user funds from spendable to the pending-investment bucket.
    ///
    /// Fails with [`Error::InsufficientFunds`] when the spendable balance
    /// cannot cover the amount. Two racing reservations serialize in the
    /// actor, so at most one can win the last dollar.
    pub async fn reserve_for_investment(
        &self,
        user_id: Uuid,
        amount: Decimal,
        idempotency_key: impl Into<String>,
    ) -> Result<LedgerTransaction> {
        let owner = AccountOwner::User(user_id);
        let spendable = self
            .get_or_create_account(owner, AccountType::UsdcBalance, Currency::Usdc)
            .await?;
        let pending = self
            .get_or_create_account(owner, AccountType::PendingInvestment, Currency::Usdc)
            .await?;

        self.create_transaction(NewTransaction {
            transaction_type: TransactionType::Investment,
            idempotency_key: idempotency_key.into(),
            entries: vec![
                NewEntry::new(spendable.id, EntryDirection::Debit, amount, Currency::Usdc),
                NewEntry::new(pending.id, EntryDirection::Credit, amount, Currency::Usdc),
            ],
            reference_id: None,
            reference_type: Some("investment_reservation".to_string()),
            description: Some(format!("Reserve {} USDC for investment", amount)),
        })
        .await
    }

    /// Return reserved funds to the spendable bucket (investment aborted)
    pub async fn release_reservation(
        &self,
        user_id: Uuid,
        amount: Decimal,
        idempotency_key: impl Into<String>,
    ) -> Result<LedgerTransaction> {
        let owner = AccountOwner::User(user_id);
        let spendable = self
            .get_or_create_account(owner, AccountType::UsdcBalance, Currency::Usdc)
            .await?;
        let pending = self
            .get_or_create_account(owner, AccountType::PendingInvestment, Currency::Usdc)
            .await?;

        self.create_transaction(NewTransaction {
            transaction_type: TransactionType::Investment,
            idempotency_key: idempotency_key.into(),
            entries: vec![
                NewEntry::new(pending.id, EntryDirection::Debit, amount, Currency::Usdc),
                NewEntry::new(spendable.id, EntryDirection::Credit, amount, Currency::Usdc),
            ],
            reference_id: None,
            reference_type: Some("investment_release".to_string()),
            description: Some(format!("Release {} USDC reservation", amount)),
        })
        .await
    }

    /// Get transaction by ID
    pub fn get_transaction(&self, transaction_id: Uuid) -> Result<LedgerTransaction> {
        self.storage.get_transaction(transaction_id)
    }

    /// Get transaction by idempotency key
    pub fn get_transaction_by_key(&self, key: &str) -> Result<Option<LedgerTransaction>> {
        self.storage.get_transaction_by_key(key)
    }

    /// Entries belonging to a transaction
    pub fn entries_for_transaction(&self, transaction_id: Uuid) -> Result<Vec<LedgerEntry>> {
        let tx = self.storage.get_transaction(transaction_id)?;
        tx.entry_ids
            .iter()
            .map(|id| self.storage.get_entry(*id))
            .collect()
    }

    /// List all accounts
    pub fn list_accounts(&self) -> Result<Vec<LedgerAccount>> {
        self.storage.list_accounts()
    }

    /// Full entry history of one account, oldest first
    pub fn account_entries(&self, account_id: Uuid) -> Result<Vec<LedgerEntry>> {
        self.storage.get_account_entries(account_id)
    }

    /// Recompute an account balance from its full entry history.
    ///
    /// Used by reconciliation to cross-check the cached balance.
    pub fn recompute_balance(&self, account_id: Uuid) -> Result<Decimal> {
        let entries = self.storage.get_account_entries(account_id)?;
        Ok(entries.iter().map(|e| e.signed_amount()).sum())
    }

    /// Check that a committed transaction still balances.
    ///
    /// This is a money-conservation invariant: sum of debits must equal
    /// sum of credits over the stored entries.
    pub fn verify_transaction(&self, transaction_id: Uuid) -> Result<()> {
        let entries = self.entries_for_transaction(transaction_id)?;

        let mut debits = Decimal::ZERO;
        let mut credits = Decimal::ZERO;
        for entry in &entries {
            match entry.direction {
                EntryDirection::Debit => debits += entry.amount,
                EntryDirection::Credit => credits += entry.amount,
            }
        }

        if debits != credits {
            return Err(Error::InvariantViolation(format!(
                "Transaction {} unbalanced: debits {} != credits {}",
                transaction_id, debits, credits
            )));
        }

        Ok(())
    }

    /// Shutdown ledger
    pub async fn shutdown(self) -> Result<()> {
        self.handle.shutdown().await
    }
}
