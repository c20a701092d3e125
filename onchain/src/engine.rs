//! Onchain engine: deposit crediting and withdrawal payouts
//!
//! Deposits credit the user once per (chain, tx_hash). Withdrawals run a
//! two-step saga: the ledger debit posts first, then the wallet payout;
//! a payout that exhausts its retries is compensated by reversing the
//! debit. Insufficient funds therefore fail before any money moves.

use crate::config::Config;
use crate::store::OnchainStore;
use crate::types::{deposit_key, AddressDirectory, DepositRecord, Withdrawal, WithdrawalStatus};
use crate::{Error, Result};
use chrono::Utc;
use ledger_core::{
    AccountOwner, AccountType, Currency, EntryDirection, Ledger, NewEntry, NewTransaction,
    TransactionType,
};
use providers::{
    CircuitBreakerConfig, CircuitBreakerManager, DepositNotification, PayoutRequest, RetryConfig,
    RetryPolicy, TransferStatus, WalletProvider,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

const WALLET_BREAKER_KEY: &str = "wallet";

/// Onchain engine
pub struct OnchainEngine {
    ledger: Ledger,
    wallet: Arc<dyn WalletProvider>,
    directory: Arc<dyn AddressDirectory>,
    breakers: CircuitBreakerManager,
    retry: RetryPolicy,
    store: OnchainStore,
    config: Config,
}

impl OnchainEngine {
    /// Create the engine, opening its store under the configured data dir
    pub fn new(
        ledger: Ledger,
        wallet: Arc<dyn WalletProvider>,
        directory: Arc<dyn AddressDirectory>,
        config: Config,
    ) -> Result<Self> {
        let store = OnchainStore::open(&config.data_dir)?;
        let retry = RetryPolicy::new(RetryConfig {
            max_retries: config.max_retries,
            initial_delay_ms: config.retry_initial_delay_ms,
            ..RetryConfig::default()
        });

        Ok(Self {
            ledger,
            wallet,
            directory,
            breakers: CircuitBreakerManager::new(CircuitBreakerConfig::default()),
            retry,
            store,
            config,
        })
    }

    /// Access the store (read paths for reconciliation and ops)
    pub fn store(&self) -> &OnchainStore {
        &self.store
    }

    /// Engine configuration (poll cadences for the worker pool)
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Credit a confirmed deposit to its user.
    ///
    /// Idempotent on (chain, tx_hash): a replayed notification returns the
    /// record created by the first call. The onchain buffer is debited so
    /// the buffer's ledger balance tracks the custodial wallet.
    pub async fn process_deposit(
        &self,
        notification: &DepositNotification,
    ) -> Result<DepositRecord> {
        if let Some(existing) = self
            .store
            .get_deposit(&notification.chain, &notification.tx_hash)?
        {
            info!(
                chain = %notification.chain,
                tx_hash = %notification.tx_hash,
                "Deposit already credited, skipping"
            );
            return Ok(existing);
        }

        let user_id = self
            .directory
            .resolve(&notification.chain, &notification.to_address)
            .ok_or_else(|| Error::UnknownAddress {
                chain: notification.chain.clone(),
                address: notification.to_address.clone(),
            })?;

        let buffer = self
            .ledger
            .get_or_create_account(AccountOwner::System, AccountType::OnchainBuffer, Currency::Usdc)
            .await?;
        let user_account = self
            .ledger
            .get_or_create_account(
                AccountOwner::User(user_id),
                AccountType::UsdcBalance,
                Currency::Usdc,
            )
            .await?;

        let transaction = self
            .ledger
            .create_transaction(NewTransaction {
                transaction_type: TransactionType::Deposit,
                idempotency_key: deposit_key(&notification.chain, &notification.tx_hash),
                entries: vec![
                    NewEntry::new(
                        buffer.id,
                        EntryDirection::Debit,
                        notification.amount,
                        Currency::Usdc,
                    ),
                    NewEntry::new(
                        user_account.id,
                        EntryDirection::Credit,
                        notification.amount,
                        Currency::Usdc,
                    ),
                ],
                reference_id: None,
                reference_type: Some("onchain_deposit".to_string()),
                description: Some(format!(
                    "Deposit {} on {}",
                    notification.tx_hash, notification.chain
                )),
            })
            .await?;

        let record = DepositRecord {
            id: Uuid::new_v4(),
            user_id,
            chain: notification.chain.clone(),
            tx_hash: notification.tx_hash.clone(),
            amount: notification.amount,
            from_address: notification.from_address.clone(),
            ledger_transaction_id: transaction.id,
            credited_at: Utc::now(),
        };
        self.store.put_deposit(&record)?;

        info!(
            user_id = %user_id,
            amount = %notification.amount,
            chain = %notification.chain,
            "Deposit credited"
        );
        Ok(record)
    }

    /// Withdraw USDC to an external address.
    ///
    /// The ledger debit posts before the payout is attempted, so an
    /// underfunded user is rejected without touching the wallet. A payout
    /// that fails permanently reverses the debit.
    pub async fn request_withdrawal(
        &self,
        user_id: Uuid,
        chain: &str,
        to_address: &str,
        amount: Decimal,
    ) -> Result<Withdrawal> {
        let mut withdrawal =
            Withdrawal::new(user_id, chain.to_string(), to_address.to_string(), amount);
        self.store.put_withdrawal(&withdrawal)?;

        let user_account = self
            .ledger
            .get_or_create_account(
                AccountOwner::User(user_id),
                AccountType::UsdcBalance,
                Currency::Usdc,
            )
            .await?;
        let buffer = self
            .ledger
            .get_or_create_account(AccountOwner::System, AccountType::OnchainBuffer, Currency::Usdc)
            .await?;

        let debit = self
            .ledger
            .create_transaction(NewTransaction {
                transaction_type: TransactionType::Withdrawal,
                idempotency_key: withdrawal.debit_key(),
                entries: vec![
                    NewEntry::new(user_account.id, EntryDirection::Debit, amount, Currency::Usdc),
                    NewEntry::new(buffer.id, EntryDirection::Credit, amount, Currency::Usdc),
                ],
                reference_id: Some(withdrawal.id),
                reference_type: Some("withdrawal".to_string()),
                description: Some(format!("Withdrawal to {} on {}", to_address, chain)),
            })
            .await;

        let debit = match debit {
            Ok(tx) => tx,
            Err(e) => {
                withdrawal.status = WithdrawalStatus::Failed;
                withdrawal.failure_reason = Some(e.to_string());
                withdrawal.updated_at = Utc::now();
                self.store.put_withdrawal(&withdrawal)?;
                return Err(e.into());
            }
        };
        withdrawal.ledger_transaction_id = Some(debit.id);

        match self.send_payout(&withdrawal).await {
            Ok(result) => {
                withdrawal.external_reference = Some(result.external_reference);
                withdrawal.status = match result.status {
                    TransferStatus::Completed => WithdrawalStatus::Completed,
                    _ => WithdrawalStatus::Processing,
                };
                withdrawal.updated_at = Utc::now();
                self.store.put_withdrawal(&withdrawal)?;

                info!(
                    withdrawal_id = %withdrawal.id,
                    amount = %amount,
                    "Withdrawal payout accepted"
                );
                Ok(withdrawal)
            }
            Err(e) => {
                warn!(
                    withdrawal_id = %withdrawal.id,
                    "Payout failed, reversing ledger debit: {}",
                    e
                );
                self.ledger
                    .reverse_transaction(debit.id, withdrawal.reversal_key())
                    .await?;

                withdrawal.status = WithdrawalStatus::Failed;
                withdrawal.failure_reason = Some(e.to_string());
                withdrawal.updated_at = Utc::now();
                self.store.put_withdrawal(&withdrawal)?;
                Err(e)
            }
        }
    }

    async fn send_payout(&self, withdrawal: &Withdrawal) -> Result<providers::TransferResult> {
        self.breakers.is_request_allowed(WALLET_BREAKER_KEY)?;

        let request = PayoutRequest {
            withdrawal_id: withdrawal.id,
            chain: withdrawal.chain.clone(),
            to_address: withdrawal.to_address.clone(),
            amount: withdrawal.amount,
        };
        let deadline = Duration::from_secs(self.config.payout_timeout_secs);

        let result = self
            .retry
            .execute(
                || async {
                    match tokio::time::timeout(deadline, self.wallet.send_payout(&request)).await {
                        Ok(r) => r,
                        Err(_) => Err(providers::Error::Timeout(self.config.payout_timeout_secs)),
                    }
                },
                "wallet_payout",
            )
            .await;

        match &result {
            Ok(_) => self.breakers.record_success(WALLET_BREAKER_KEY),
            Err(_) => self.breakers.record_failure(WALLET_BREAKER_KEY),
        }
        Ok(result?)
    }

    /// Poll processing withdrawals at the wallet and settle terminal ones.
    ///
    /// A failed payout at this stage still reverses the debit. Withdrawals
    /// processing past the configured age are flagged Stuck for
    /// reconciliation instead of being resolved blindly.
    pub async fn poll_processing(&self) -> Result<()> {
        let now = Utc::now();

        for mut withdrawal in self.store.list_processing()? {
            let reference = match &withdrawal.external_reference {
                Some(r) => r.clone(),
                None => continue,
            };

            match self.wallet.payout_status(&reference).await {
                Ok(TransferStatus::Completed) => {
                    withdrawal.status = WithdrawalStatus::Completed;
                    withdrawal.updated_at = now;
                    self.store.put_withdrawal(&withdrawal)?;
                    info!(withdrawal_id = %withdrawal.id, "Withdrawal confirmed");
                }
                Ok(TransferStatus::Failed) => {
                    self.reverse_and_fail(&mut withdrawal, "Payout failed at wallet", now)
                        .await?;
                }
                Ok(TransferStatus::Cancelled) => {
                    self.reverse_and_fail(&mut withdrawal, "Payout cancelled at wallet", now)
                        .await?;
                }
                Ok(TransferStatus::Processing) => {
                    let age = (now - withdrawal.created_at).num_seconds();
                    if age > self.config.stuck_after_secs as i64 {
                        withdrawal.status = WithdrawalStatus::Stuck;
                        withdrawal.updated_at = now;
                        self.store.put_withdrawal(&withdrawal)?;
                        warn!(
                            withdrawal_id = %withdrawal.id,
                            age_secs = age,
                            "Withdrawal flagged stuck"
                        );
                    }
                }
                Err(e) => {
                    warn!(withdrawal_id = %withdrawal.id, "Status poll failed: {}", e);
                }
            }
        }
        Ok(())
    }

    async fn reverse_and_fail(
        &self,
        withdrawal: &mut Withdrawal,
        reason: &str,
        now: chrono::DateTime<Utc>,
    ) -> Result<()> {
        if let Some(tx_id) = withdrawal.ledger_transaction_id {
            self.ledger
                .reverse_transaction(tx_id, withdrawal.reversal_key())
                .await?;
        }
        withdrawal.status = WithdrawalStatus::Failed;
        withdrawal.failure_reason = Some(reason.to_string());
        withdrawal.updated_at = now;
        self.store.put_withdrawal(withdrawal)?;
        warn!(withdrawal_id = %withdrawal.id, "{}, debit reversed", reason);
        Ok(())
    }
}
