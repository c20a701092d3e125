//! Reconciliation service
//!
//! The sole creator of exceptions. Runs a fixed battery of checks over
//! the ledger, the treasury and onchain stores, and the external
//! providers. Discrepancies at or below the auto-correct threshold are
//! settled with a compensating transaction against the
//! reconciliation_adjustment account; anything larger opens an exception
//! that only an operator can close. The service never edits balances
//! directly.

use crate::config::Config;
use crate::store::ExceptionStore;
use crate::types::{
    CheckKind, ExceptionStatus, ReconciliationException, ReconciliationReport, RunType,
};
use crate::{Error, Result};
use chrono::Utc;
use ledger_core::{
    AccountOwner, AccountType, Currency, EntryDirection, Ledger, NewEntry, NewTransaction,
    TransactionType,
};
use onchain::OnchainEngine;
use providers::{BrokerageClient, WalletProvider};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use treasury::{BufferKind, JobStatus, TreasuryEngine};
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome of one check
#[derive(Debug, Default)]
struct CheckOutcome {
    exceptions_created: usize,
    auto_corrected: usize,
}

impl CheckOutcome {
    fn passed(&self) -> bool {
        self.exceptions_created == 0 && self.auto_corrected == 0
    }
}

/// Reconciliation service
pub struct ReconciliationService {
    ledger: Ledger,
    wallet: Arc<dyn WalletProvider>,
    brokerage: Arc<dyn BrokerageClient>,
    treasury: Arc<TreasuryEngine>,
    onchain: Arc<OnchainEngine>,
    store: ExceptionStore,
    config: Config,
}

impl ReconciliationService {
    /// Create the service, opening its store under the configured data dir
    pub fn new(
        ledger: Ledger,
        wallet: Arc<dyn WalletProvider>,
        brokerage: Arc<dyn BrokerageClient>,
        treasury: Arc<TreasuryEngine>,
        onchain: Arc<OnchainEngine>,
        config: Config,
    ) -> Result<Self> {
        let store = ExceptionStore::open(&config.data_dir)?;
        Ok(Self {
            ledger,
            wallet,
            brokerage,
            treasury,
            onchain,
            store,
            config,
        })
    }

    /// Access the exception store (read paths for ops reporting)
    pub fn store(&self) -> &ExceptionStore {
        &self.store
    }

    /// Treasury engine view, for ops reporting
    pub fn treasury(&self) -> &TreasuryEngine {
        &self.treasury
    }

    /// Onchain engine view, for ops reporting
    pub fn onchain(&self) -> &OnchainEngine {
        &self.onchain
    }

    /// Execute one reconciliation run and persist its report
    pub async fn run(&self, run_type: RunType) -> Result<ReconciliationReport> {
        let started_at = Utc::now();
        info!(run_type = %run_type, "Reconciliation run started");

        let mut checks_passed = 0;
        let mut exceptions_created = 0;
        let mut auto_corrected = 0;

        let checks = run_type.checks();
        for check in checks {
            let outcome = match check {
                CheckKind::InternalConsistency => self.check_internal_consistency()?,
                CheckKind::WalletBalance => self.check_wallet_balance().await?,
                CheckKind::BrokerageBalance => self.check_brokerage_balance().await?,
                CheckKind::ConversionCompleteness => self.check_conversion_completeness()?,
                CheckKind::StuckWithdrawals => self.check_stuck_withdrawals()?,
            };

            if outcome.passed() {
                checks_passed += 1;
            } else {
                warn!(
                    check = %check,
                    exceptions = outcome.exceptions_created,
                    auto_corrected = outcome.auto_corrected,
                    "Check found discrepancies"
                );
            }
            exceptions_created += outcome.exceptions_created;
            auto_corrected += outcome.auto_corrected;
        }

        let report = ReconciliationReport {
            id: Uuid::new_v4(),
            run_type,
            checks_run: checks.len(),
            checks_passed,
            exceptions_created,
            auto_corrected,
            started_at,
            completed_at: Utc::now(),
        };
        self.store.put_report(&report)?;

        info!(
            run_type = %run_type,
            checks_passed,
            exceptions_created,
            auto_corrected,
            "Reconciliation run finished"
        );
        Ok(report)
    }

    /// Check 1: cached balances equal signed entry sums, and every entry
    /// belongs to a transaction that still balances.
    fn check_internal_consistency(&self) -> Result<CheckOutcome> {
        let mut outcome = CheckOutcome::default();
        let mut verified_transactions: HashSet<Uuid> = HashSet::new();

        for account in self.ledger.list_accounts()? {
            let derived = self.ledger.recompute_balance(account.id)?;
            if derived != account.balance && !self.store.has_open_exception_for(account.id)? {
                let discrepancy = account.balance - derived;
                let mut exception = ReconciliationException::new(
                    CheckKind::InternalConsistency,
                    discrepancy,
                    format!(
                        "Account {} cached balance {} != derived {}",
                        account.id, account.balance, derived
                    ),
                );
                exception.account_id = Some(account.id);
                exception.reference_id = Some(account.id);
                self.store.put_exception(&exception)?;
                outcome.exceptions_created += 1;
            }

            for entry in self.ledger.account_entries(account.id)? {
                if !verified_transactions.insert(entry.transaction_id) {
                    continue;
                }
                if let Err(e) = self.ledger.verify_transaction(entry.transaction_id) {
                    if self.store.has_open_exception_for(entry.transaction_id)? {
                        continue;
                    }
                    let mut exception = ReconciliationException::new(
                        CheckKind::InternalConsistency,
                        entry.amount,
                        format!("Transaction {} failed verification: {}", entry.transaction_id, e),
                    );
                    exception.reference_id = Some(entry.transaction_id);
                    self.store.put_exception(&exception)?;
                    outcome.exceptions_created += 1;
                }
            }
        }

        Ok(outcome)
    }

    /// Check 2: onchain buffer ledger balance vs the custodial wallet
    async fn check_wallet_balance(&self) -> Result<CheckOutcome> {
        let custodial = self.wallet.custodial_balance().await?;
        let ledger_balance = self.treasury.buffer_balance(BufferKind::Onchain).await?;
        let discrepancy = custodial - ledger_balance;

        if discrepancy.is_zero() {
            return Ok(CheckOutcome::default());
        }

        let description = format!(
            "Custodial balance {} vs onchain buffer ledger balance {}",
            custodial, ledger_balance
        );
        self.handle_buffer_discrepancy(
            CheckKind::WalletBalance,
            discrepancy,
            AccountType::OnchainBuffer,
            Currency::Usdc,
            description,
        )
        .await
    }

    /// Check 3: sum of users' fiat exposure vs brokerage buying power.
    ///
    /// Never auto-corrected: the ledger side is spread across per-user
    /// accounts, so there is no single account to adjust.
    async fn check_brokerage_balance(&self) -> Result<CheckOutcome> {
        let buying_power = self.brokerage.aggregate_buying_power().await?;
        let exposure: Decimal = self
            .ledger
            .list_accounts()?
            .iter()
            .filter(|a| a.account_type == AccountType::FiatExposure)
            .map(|a| a.balance)
            .sum();
        let discrepancy = buying_power - exposure;

        if discrepancy.is_zero() {
            return Ok(CheckOutcome::default());
        }

        // One open exception per check; a persistent drift does not pile
        // up a new exception every run
        if self
            .store
            .has_open_exception_for_check(CheckKind::BrokerageBalance)?
        {
            return Ok(CheckOutcome::default());
        }

        let exception = ReconciliationException::new(
            CheckKind::BrokerageBalance,
            discrepancy,
            format!(
                "Brokerage buying power {} vs total fiat exposure {}",
                buying_power, exposure
            ),
        );
        self.store.put_exception(&exception)?;
        Ok(CheckOutcome {
            exceptions_created: 1,
            auto_corrected: 0,
        })
    }

    /// Check 4: every completed conversion job has its ledger transaction
    fn check_conversion_completeness(&self) -> Result<CheckOutcome> {
        let mut outcome = CheckOutcome::default();

        for job in self.treasury.store().list_jobs()? {
            if job.status != JobStatus::Completed {
                continue;
            }
            if self
                .ledger
                .get_transaction_by_key(&job.idempotency_key())?
                .is_some()
            {
                continue;
            }
            if self.store.has_open_exception_for(job.id)? {
                continue;
            }

            let mut exception = ReconciliationException::new(
                CheckKind::ConversionCompleteness,
                job.amount,
                format!("Completed conversion job {} has no ledger transaction", job.id),
            );
            exception.reference_id = Some(job.id);
            self.store.put_exception(&exception)?;
            outcome.exceptions_created += 1;
        }

        Ok(outcome)
    }

    /// Check 5: stuck withdrawals become exceptions, once each
    fn check_stuck_withdrawals(&self) -> Result<CheckOutcome> {
        let mut outcome = CheckOutcome::default();

        for withdrawal in self.onchain.store().list_stuck()? {
            if self.store.has_open_exception_for(withdrawal.id)? {
                continue;
            }

            let mut exception = ReconciliationException::new(
                CheckKind::StuckWithdrawals,
                withdrawal.amount,
                format!(
                    "Withdrawal {} to {} on {} stuck since {}",
                    withdrawal.id, withdrawal.to_address, withdrawal.chain, withdrawal.created_at
                ),
            );
            exception.reference_id = Some(withdrawal.id);
            self.store.put_exception(&exception)?;
            outcome.exceptions_created += 1;
        }

        Ok(outcome)
    }

    /// Apply the correction policy to a buffer-level discrepancy.
    ///
    /// Positive discrepancy means the external system holds more than the
    /// ledger; the correction credits the buffer from the adjustment
    /// account so the ledger converges on observed reality.
    async fn handle_buffer_discrepancy(
        &self,
        check: CheckKind,
        discrepancy: Decimal,
        buffer_type: AccountType,
        currency: Currency,
        description: String,
    ) -> Result<CheckOutcome> {
        let mut exception = ReconciliationException::new(check, discrepancy, description);

        if discrepancy.abs() > self.config.auto_correct_threshold {
            if self.store.has_open_exception_for_check(check)? {
                return Ok(CheckOutcome::default());
            }
            self.store.put_exception(&exception)?;
            warn!(
                check = %check,
                discrepancy = %discrepancy,
                "Discrepancy above auto-correct threshold, exception opened"
            );
            return Ok(CheckOutcome {
                exceptions_created: 1,
                auto_corrected: 0,
            });
        }

        let buffer = self
            .ledger
            .get_or_create_account(AccountOwner::System, buffer_type, currency)
            .await?;
        let adjustment = self
            .ledger
            .get_or_create_account(
                AccountOwner::System,
                AccountType::ReconciliationAdjustment,
                currency,
            )
            .await?;

        let amount = discrepancy.abs();
        let entries = if discrepancy > Decimal::ZERO {
            vec![
                NewEntry::new(adjustment.id, EntryDirection::Debit, amount, currency),
                NewEntry::new(buffer.id, EntryDirection::Credit, amount, currency),
            ]
        } else {
            vec![
                NewEntry::new(buffer.id, EntryDirection::Debit, amount, currency),
                NewEntry::new(adjustment.id, EntryDirection::Credit, amount, currency),
            ]
        };

        let transaction = self
            .ledger
            .create_transaction(NewTransaction {
                transaction_type: TransactionType::InternalTransfer,
                idempotency_key: format!("recon-adjust-{}", exception.id),
                entries,
                reference_id: Some(exception.id),
                reference_type: Some("reconciliation_adjustment".to_string()),
                description: Some(format!("Auto-correction for {} discrepancy", check)),
            })
            .await?;

        exception.status = ExceptionStatus::AutoCorrected;
        exception.correction_transaction_id = Some(transaction.id);
        exception.updated_at = Utc::now();
        self.store.put_exception(&exception)?;

        info!(
            check = %check,
            discrepancy = %discrepancy,
            transaction_id = %transaction.id,
            "Discrepancy auto-corrected"
        );
        Ok(CheckOutcome {
            exceptions_created: 0,
            auto_corrected: 1,
        })
    }

    /// Move an open exception into review
    pub fn mark_under_review(&self, id: Uuid) -> Result<ReconciliationException> {
        let mut exception = self.store.get_exception(id)?;
        if exception.status != ExceptionStatus::Open {
            return Err(Error::InvalidTransition(format!(
                "Exception {} is {:?}, expected Open",
                id, exception.status
            )));
        }

        exception.status = ExceptionStatus::UnderReview;
        exception.updated_at = Utc::now();
        self.store.put_exception(&exception)?;
        Ok(exception)
    }

    /// Resolve an open or in-review exception
    pub fn resolve(&self, id: Uuid, by: &str, notes: &str) -> Result<ReconciliationException> {
        let mut exception = self.store.get_exception(id)?;
        if !exception.status.is_open() {
            return Err(Error::InvalidTransition(format!(
                "Exception {} is {:?}, cannot resolve",
                id, exception.status
            )));
        }

        exception.status = ExceptionStatus::Resolved;
        exception.resolved_by = Some(by.to_string());
        exception.resolution_notes = Some(notes.to_string());
        exception.updated_at = Utc::now();
        self.store.put_exception(&exception)?;

        info!(exception_id = %id, resolved_by = by, "Exception resolved");
        Ok(exception)
    }
}
