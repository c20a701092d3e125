//! Actor-based concurrency for the ledger
//!
//! This module implements the single-writer pattern using Tokio actors:
//! - One logical writer task serializes every balance mutation
//! - Validation and the atomic RocksDB commit happen inside the actor,
//!   so no interleaving can observe a partially applied transaction
//! - Async message passing with backpressure (bounded mailbox)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │     Callers (treasury, onchain, reconciliation)       │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ LedgerHandle (Clone)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              mpsc::channel (bounded)                  │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              LedgerActor (Single Task)                │
//! │   validate → check balances → apply → commit batch    │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       ▼
//!           Storage::commit_transaction()
//!           (atomic write to RocksDB)
//! ```

use crate::types::{
    AccountOwner, AccountType, Currency, LedgerAccount, LedgerEntry, LedgerTransaction,
    NewEntry, NewTransaction, TransactionStatus,
};
use crate::{Error, Metrics, Result, Storage};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Message sent to the ledger actor
pub enum LedgerMessage {
    /// Post a balanced transaction
    CreateTransaction {
        request: NewTransaction,
        response: oneshot::Sender<Result<LedgerTransaction>>,
    },

    /// Find or create the account for (owner, type, currency)
    GetOrCreateAccount {
        owner: AccountOwner,
        account_type: AccountType,
        currency: Currency,
        response: oneshot::Sender<Result<LedgerAccount>>,
    },

    /// Reverse a completed transaction with a compensating one
    ReverseTransaction {
        transaction_id: Uuid,
        idempotency_key: String,
        response: oneshot::Sender<Result<LedgerTransaction>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that processes ledger messages
pub struct LedgerActor {
    /// Storage backend
    storage: Arc<Storage>,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<LedgerMessage>,

    /// Transaction pipeline counters
    metrics: Metrics,
}

impl LedgerActor {
    /// Create new actor
    pub fn new(
        storage: Arc<Storage>,
        mailbox: mpsc::Receiver<LedgerMessage>,
        metrics: Metrics,
    ) -> Self {
        Self {
            storage,
            mailbox,
            metrics,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                LedgerMessage::Shutdown => break,

                LedgerMessage::CreateTransaction { request, response } => {
                    let started = std::time::Instant::now();
                    let result = self.post_transaction(request);
                    match &result {
                        Ok(_) => self.metrics.record_commit(started.elapsed().as_secs_f64()),
                        Err(_) => self.metrics.record_rejection(),
                    }
                    let _ = response.send(result);
                }

                LedgerMessage::GetOrCreateAccount {
                    owner,
                    account_type,
                    currency,
                    response,
                } => {
                    let result = self.get_or_create_account(owner, account_type, currency);
                    let _ = response.send(result);
                }

                LedgerMessage::ReverseTransaction {
                    transaction_id,
                    idempotency_key,
                    response,
                } => {
                    let started = std::time::Instant::now();
                    let result = self.reverse_transaction(transaction_id, idempotency_key);
                    if result.is_ok() {
                        self.metrics.record_commit(started.elapsed().as_secs_f64());
                        self.metrics.record_reversal();
                    }
                    let _ = response.send(result);
                }
            }
        }

        tracing::info!("Ledger actor stopped");
    }

    /// Validate, apply, and atomically commit a transaction.
    ///
    /// Retrying with an existing idempotency key returns the already
    /// committed transaction without posting anything. The same key with
    /// different entries is rejected: that is two distinct transactions
    /// colliding, not a retry.
    fn post_transaction(&self, request: NewTransaction) -> Result<LedgerTransaction> {
        if let Some(existing) = self.storage.get_transaction_by_key(&request.idempotency_key)? {
            self.ensure_replay_matches(&existing, &request)?;
            tracing::debug!(
                idempotency_key = %request.idempotency_key,
                transaction_id = %existing.id,
                "Idempotent replay, returning existing transaction"
            );
            return Ok(existing);
        }

        self.validate_request(&request)?;

        // Load touched accounts, keyed by ID so application order is
        // deterministic (ascending account ID).
        let mut accounts: BTreeMap<Uuid, LedgerAccount> = BTreeMap::new();
        for entry in &request.entries {
            if !accounts.contains_key(&entry.account_id) {
                let account = self.storage.get_account(entry.account_id)?;
                accounts.insert(entry.account_id, account);
            }
        }

        // Currency of each entry must match its account
        for entry in &request.entries {
            let account = &accounts[&entry.account_id];
            if entry.currency != account.currency {
                return Err(Error::InvalidTransaction(format!(
                    "Entry currency {} does not match account {} currency {}",
                    entry.currency, account.id, account.currency
                )));
            }
        }

        // Apply signed deltas per account
        let mut deltas: BTreeMap<Uuid, Decimal> = BTreeMap::new();
        for entry in &request.entries {
            let signed = match entry.direction {
                crate::types::EntryDirection::Debit => -entry.amount,
                crate::types::EntryDirection::Credit => entry.amount,
            };
            *deltas.entry(entry.account_id).or_insert(Decimal::ZERO) += signed;
        }

        let now = Utc::now();
        for (account_id, delta) in &deltas {
            let account = accounts
                .get_mut(account_id)
                .ok_or_else(|| Error::AccountNotFound(account_id.to_string()))?;
            let new_balance = account.balance + delta;
            if new_balance < Decimal::ZERO && !account.allow_negative {
                return Err(Error::InsufficientFunds {
                    account_id: *account_id,
                    balance: account.balance,
                    requested: -*delta,
                });
            }
            account.balance = new_balance;
            account.updated_at = now;
        }

        // Materialize entries and the transaction record
        let transaction_id = Uuid::new_v4();
        let entries: Vec<LedgerEntry> = request
            .entries
            .iter()
            .map(|e| LedgerEntry {
                id: Uuid::new_v4(),
                transaction_id,
                account_id: e.account_id,
                direction: e.direction,
                amount: e.amount,
                currency: e.currency,
                created_at: now,
            })
            .collect();

        let tx = LedgerTransaction {
            id: transaction_id,
            transaction_type: request.transaction_type,
            status: TransactionStatus::Completed,
            idempotency_key: request.idempotency_key,
            reference_id: request.reference_id,
            reference_type: request.reference_type,
            description: request.description,
            entry_ids: entries.iter().map(|e| e.id).collect(),
            created_at: now,
            completed_at: Some(now),
        };

        let updated_accounts: Vec<LedgerAccount> = accounts.into_values().collect();
        self.storage
            .commit_transaction(&tx, &entries, &updated_accounts)?;

        tracing::info!(
            transaction_id = %tx.id,
            transaction_type = ?tx.transaction_type,
            idempotency_key = %tx.idempotency_key,
            "Transaction posted"
        );

        Ok(tx)
    }

    /// Compare a replay against the stored transaction. Entry order does
    /// not matter, so both sides are compared as sorted shapes.
    fn ensure_replay_matches(
        &self,
        existing: &LedgerTransaction,
        request: &NewTransaction,
    ) -> Result<()> {
        let mut stored: Vec<(Uuid, u8, Decimal, u8)> =
            Vec::with_capacity(existing.entry_ids.len());
        for entry_id in &existing.entry_ids {
            let entry = self.storage.get_entry(*entry_id)?;
            stored.push((
                entry.account_id,
                entry.direction as u8,
                entry.amount,
                entry.currency as u8,
            ));
        }
        stored.sort();

        let mut incoming: Vec<(Uuid, u8, Decimal, u8)> = request
            .entries
            .iter()
            .map(|e| (e.account_id, e.direction as u8, e.amount, e.currency as u8))
            .collect();
        incoming.sort();

        if existing.transaction_type != request.transaction_type || stored != incoming {
            tracing::warn!(
                idempotency_key = %request.idempotency_key,
                transaction_id = %existing.id,
                "Idempotency key reused with different entries"
            );
            return Err(Error::DuplicateIdempotencyKey(
                request.idempotency_key.clone(),
            ));
        }
        Ok(())
    }

    fn validate_request(&self, request: &NewTransaction) -> Result<()> {
        if request.idempotency_key.is_empty() {
            return Err(Error::InvalidTransaction(
                "Idempotency key must not be empty".to_string(),
            ));
        }

        if request.entries.len() < 2 {
            return Err(Error::InvalidTransaction(
                "Transaction requires at least two entries".to_string(),
            ));
        }

        for entry in &request.entries {
            if entry.amount <= Decimal::ZERO {
                return Err(Error::InvalidTransaction(
                    "Entry amount must be positive".to_string(),
                ));
            }
        }

        // Debits and credits balance on the common USD basis (1:1 peg)
        let debits = request.total_debits();
        let credits = request.total_credits();
        if debits != credits {
            return Err(Error::Unbalanced { debits, credits });
        }

        // Mixed currencies only for conversions and investments
        let first_currency = request.entries[0].currency;
        let mixed = request.entries.iter().any(|e| e.currency != first_currency);
        if mixed && !request.transaction_type.allows_mixed_currency() {
            return Err(Error::InvalidTransaction(format!(
                "Mixed currencies not allowed for {:?} transactions",
                request.transaction_type
            )));
        }

        Ok(())
    }

    fn get_or_create_account(
        &self,
        owner: AccountOwner,
        account_type: AccountType,
        currency: Currency,
    ) -> Result<LedgerAccount> {
        if let Some(account) = self.storage.find_account(&owner, account_type, currency)? {
            return Ok(account);
        }

        let account = LedgerAccount::new(owner, account_type, currency);
        self.storage.put_account(&account)?;
        self.metrics
            .update_account_count(self.storage.list_accounts()?.len() as i64);

        tracing::info!(
            account_id = %account.id,
            owner = %account.owner,
            account_type = %account.account_type,
            "Account created"
        );

        Ok(account)
    }

    /// Post a compensating transaction that inverts every entry of the
    /// original, then mark the original as reversed.
    fn reverse_transaction(
        &self,
        transaction_id: Uuid,
        idempotency_key: String,
    ) -> Result<LedgerTransaction> {
        if let Some(existing) = self.storage.get_transaction_by_key(&idempotency_key)? {
            return Ok(existing);
        }

        let mut original = self.storage.get_transaction(transaction_id)?;
        if original.status == TransactionStatus::Reversed {
            return Err(Error::AlreadyReversed(transaction_id));
        }

        let mut inverse_entries = Vec::with_capacity(original.entry_ids.len());
        for entry_id in &original.entry_ids {
            let entry = self.storage.get_entry(*entry_id)?;
            inverse_entries.push(NewEntry::new(
                entry.account_id,
                entry.direction.inverse(),
                entry.amount,
                entry.currency,
            ));
        }

        let reversal = self.post_transaction(NewTransaction {
            transaction_type: original.transaction_type,
            idempotency_key,
            entries: inverse_entries,
            reference_id: Some(original.id),
            reference_type: Some("reversal".to_string()),
            description: Some(format!("Reversal of {}", original.id)),
        })?;

        original.status = TransactionStatus::Reversed;
        self.storage.put_transaction(&original)?;

        tracing::info!(
            original_id = %original.id,
            reversal_id = %reversal.id,
            "Transaction reversed"
        );

        Ok(reversal)
    }
}

/// Handle for sending messages to the actor
#[derive(Clone)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    /// Post a balanced transaction
    pub async fn create_transaction(&self, request: NewTransaction) -> Result<LedgerTransaction> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(LedgerMessage::CreateTransaction {
                request,
                response: tx,
            })
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Find or create an account
    pub async fn get_or_create_account(
        &self,
        owner: AccountOwner,
        account_type: AccountType,
        currency: Currency,
    ) -> Result<LedgerAccount> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(LedgerMessage::GetOrCreateAccount {
                owner,
                account_type,
                currency,
                response: tx,
            })
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Reverse a transaction
    pub async fn reverse_transaction(
        &self,
        transaction_id: Uuid,
        idempotency_key: String,
    ) -> Result<LedgerTransaction> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(LedgerMessage::ReverseTransaction {
                transaction_id,
                idempotency_key,
                response: tx,
            })
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(LedgerMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the ledger actor
pub fn spawn_ledger_actor(
    storage: Arc<Storage>,
    mailbox_capacity: usize,
    metrics: Metrics,
) -> LedgerHandle {
    let (tx, rx) = mpsc::channel(mailbox_capacity); // Bounded channel for backpressure
    let actor = LedgerActor::new(storage, rx, metrics);

    tokio::spawn(async move {
        actor.run().await;
    });

    LedgerHandle::new(tx)
}
