//! Treasury engine: buffer monitoring and automated conversions
//!
//! Each monitoring cycle runs five steps:
//!
//! 1. Poll in-flight jobs at their providers
//! 2. Read buffer balances from the ledger
//! 3. Create replenishment (or skim) jobs for unhealthy buffers
//! 4. Submit pending jobs, failing over across providers by priority
//! 5. Settle completed jobs into the ledger
//!
//! A buffer with an active job is skipped, so at most one conversion per
//! buffer is in flight at any time.

use crate::config::Config;
use crate::store::JobStore;
use crate::types::{BufferHealth, BufferKind, ConversionJob, JobStatus, TreasuryEvent};
use crate::{Error, Result};
use chrono::Utc;
use ledger_core::{
    AccountOwner, AccountType, Currency, EntryDirection, Ledger, NewEntry, NewTransaction,
    TransactionType,
};
use providers::{
    BrokerageClient, CircuitBreakerConfig, CircuitBreakerManager, ConversionDirection,
    ConversionProvider, ConversionRequest, TransferStatus,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Treasury engine
pub struct TreasuryEngine {
    ledger: Ledger,
    conversion_providers: Vec<Arc<dyn ConversionProvider>>,
    brokerage: Arc<dyn BrokerageClient>,
    breakers: CircuitBreakerManager,
    store: JobStore,
    config: Config,
    events: broadcast::Sender<TreasuryEvent>,
}

impl TreasuryEngine {
    /// Create engine. Providers are ordered by priority once, up front.
    pub fn new(
        ledger: Ledger,
        mut conversion_providers: Vec<Arc<dyn ConversionProvider>>,
        brokerage: Arc<dyn BrokerageClient>,
        config: Config,
    ) -> Result<Self> {
        conversion_providers.sort_by_key(|p| p.priority());
        let store = JobStore::open(&config.data_dir)?;
        let (events, _) = broadcast::channel(100);

        Ok(Self {
            ledger,
            conversion_providers,
            brokerage,
            breakers: CircuitBreakerManager::new(CircuitBreakerConfig::default()),
            store,
            config,
            events,
        })
    }

    /// Subscribe to treasury events
    pub fn subscribe(&self) -> broadcast::Receiver<TreasuryEvent> {
        self.events.subscribe()
    }

    /// Access the job store (read paths for ops reporting)
    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Run one full monitoring cycle
    pub async fn run_cycle(&self) -> Result<()> {
        let _ = self.events.send(TreasuryEvent::CycleStarted { at: Utc::now() });

        self.poll_in_flight().await?;
        self.evaluate_buffers().await?;
        self.submit_pending().await?;

        Ok(())
    }

    /// Step 1: poll jobs previously accepted by a provider
    async fn poll_in_flight(&self) -> Result<()> {
        for mut job in self.store.active_jobs()? {
            if job.status != JobStatus::Submitted {
                continue;
            }

            let (provider_name, reference) = match (&job.provider, &job.external_reference) {
                (Some(p), Some(r)) => (p.clone(), r.clone()),
                _ => continue,
            };

            let provider = match self
                .conversion_providers
                .iter()
                .find(|p| p.name() == provider_name)
            {
                Some(p) => p,
                None => continue,
            };

            match self.poll_provider(provider.as_ref(), &reference).await {
                Ok(TransferStatus::Completed) => {
                    // A settle failure leaves the job Submitted; the next
                    // poll sees Completed again and re-settles. The ledger
                    // replay key makes the retry harmless.
                    if let Err(e) = self.settle_job(&mut job).await {
                        warn!(job_id = %job.id, "Settlement failed: {}", e);
                        let _ = self.events.send(TreasuryEvent::JobFailed {
                            job_id: job.id,
                            error: e.to_string(),
                        });
                    }
                }
                Ok(TransferStatus::Failed) | Ok(TransferStatus::Cancelled) => {
                    self.record_attempt_failure(&mut job, "Provider reported failure")?;
                }
                Ok(TransferStatus::Processing) => {}
                Err(e) => {
                    warn!(job_id = %job.id, "Status poll failed: {}", e);
                }
            }
        }
        Ok(())
    }

    /// Status poll with the same timeout and breaker accounting as submits
    async fn poll_provider(
        &self,
        provider: &dyn ConversionProvider,
        reference: &str,
    ) -> std::result::Result<TransferStatus, providers::Error> {
        self.breakers.is_request_allowed(provider.name())?;

        let deadline = Duration::from_secs(self.config.provider_timeout_secs);
        let result = match tokio::time::timeout(deadline, provider.status(reference)).await {
            Ok(r) => r,
            Err(_) => Err(providers::Error::Timeout(self.config.provider_timeout_secs)),
        };

        match &result {
            Ok(_) => self.breakers.record_success(provider.name()),
            Err(_) => self.breakers.record_failure(provider.name()),
        }
        result
    }

    /// Step 2+3: read balances and create jobs for unhealthy buffers
    async fn evaluate_buffers(&self) -> Result<()> {
        for buffer in [BufferKind::Onchain, BufferKind::Fiat, BufferKind::Broker] {
            // One in-flight job per buffer
            if self.store.active_job_for_buffer(buffer)?.is_some() {
                continue;
            }

            let balance = self.buffer_balance(buffer).await?;
            let threshold = self.threshold(buffer);

            match threshold.health(balance) {
                BufferHealth::CriticalLow => {
                    let amount = threshold.replenishment_amount(balance);
                    self.create_job(buffer, buffer.replenish_direction(), amount)?;
                }
                BufferHealth::OverCapitalized => {
                    warn!(
                        buffer = %buffer,
                        balance = %balance,
                        maximum = %threshold.maximum,
                        "Buffer over-capitalized"
                    );
                    let _ = self.events.send(TreasuryEvent::BufferOverCapitalized {
                        buffer,
                        balance,
                        maximum: threshold.maximum,
                    });

                    if self.config.excess_rule_enabled {
                        let amount = threshold.excess_amount(balance);
                        let drain = match buffer.replenish_direction() {
                            ConversionDirection::UsdToUsdc => ConversionDirection::UsdcToUsd,
                            ConversionDirection::UsdcToUsd => ConversionDirection::UsdToUsdc,
                        };
                        self.create_job(buffer, drain, amount)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Step 4: submit pending jobs, and failed ones whose backoff elapsed
    async fn submit_pending(&self) -> Result<()> {
        let now = Utc::now();
        for mut job in self.store.active_jobs()? {
            let due = job.status == JobStatus::Pending || job.can_retry(now);
            if !due {
                continue;
            }
            if let Err(e) = self.submit_job(&mut job).await {
                warn!(job_id = %job.id, "Submit attempt failed: {}", e);
            }
        }
        Ok(())
    }

    fn create_job(
        &self,
        buffer: BufferKind,
        direction: ConversionDirection,
        amount: Decimal,
    ) -> Result<()> {
        if amount <= Decimal::ZERO {
            return Ok(());
        }

        let job = ConversionJob::new(buffer, direction, amount, self.config.max_retries);
        self.store.put_job(&job)?;

        info!(
            job_id = %job.id,
            buffer = %buffer,
            direction = %direction,
            amount = %amount,
            "Conversion job created"
        );
        let _ = self.events.send(TreasuryEvent::JobCreated {
            job_id: job.id,
            buffer,
            amount,
        });

        Ok(())
    }

    /// Try providers in priority order, skipping unsupported directions
    /// and open circuits.
    async fn submit_job(&self, job: &mut ConversionJob) -> Result<()> {
        let request = ConversionRequest {
            job_id: job.id,
            direction: job.direction,
            amount: job.amount,
        };

        let mut last_error: Option<String> = None;
        let mut attempted = false;

        for provider in &self.conversion_providers {
            if !provider.supports(job.direction) {
                continue;
            }
            if let Err(e) = self.breakers.is_request_allowed(provider.name()) {
                last_error = Some(e.to_string());
                continue;
            }
            attempted = true;

            let deadline = Duration::from_secs(self.config.provider_timeout_secs);
            let attempt = tokio::time::timeout(deadline, provider.submit(&request)).await;

            let result = match attempt {
                Ok(r) => r,
                Err(_) => Err(providers::Error::Timeout(self.config.provider_timeout_secs)),
            };

            match result {
                Ok(accepted) => {
                    self.breakers.record_success(provider.name());

                    job.provider = Some(provider.name().to_string());
                    job.external_reference = Some(accepted.external_reference.clone());
                    job.status = JobStatus::Submitted;
                    job.updated_at = Utc::now();
                    self.store.put_job(job)?;

                    info!(
                        job_id = %job.id,
                        provider = provider.name(),
                        "Conversion submitted"
                    );

                    if accepted.status == TransferStatus::Completed {
                        if let Err(e) = self.settle_job(job).await {
                            warn!(job_id = %job.id, "Settlement failed: {}", e);
                            let _ = self.events.send(TreasuryEvent::JobFailed {
                                job_id: job.id,
                                error: e.to_string(),
                            });
                        }
                    }
                    return Ok(());
                }
                Err(e) => {
                    self.breakers.record_failure(provider.name());
                    warn!(
                        job_id = %job.id,
                        provider = provider.name(),
                        "Submit failed: {}",
                        e
                    );
                    last_error = Some(e.to_string());
                }
            }
        }

        if !attempted {
            let err = Error::NoProviderAvailable(job.direction.to_string());
            self.record_attempt_failure(job, &err.to_string())?;
            return Err(err);
        }

        self.record_attempt_failure(
            job,
            &last_error.unwrap_or_else(|| "All providers rejected the order".to_string()),
        )
    }

    fn record_attempt_failure(&self, job: &mut ConversionJob, error: &str) -> Result<()> {
        job.retry_count += 1;
        job.last_error = Some(error.to_string());
        job.external_reference = None;
        job.updated_at = Utc::now();

        if job.retry_count > job.max_retries {
            job.status = JobStatus::Exhausted;
            job.next_attempt_at = None;
            self.store.put_job(job)?;

            warn!(
                job_id = %job.id,
                buffer = %job.buffer,
                "Conversion job exhausted after {} attempts",
                job.retry_count
            );
            let _ = self.events.send(TreasuryEvent::JobExhausted {
                job_id: job.id,
                buffer: job.buffer,
            });
        } else {
            job.status = JobStatus::Failed;
            let delay = chrono::Duration::seconds(self.backoff_secs(job.retry_count));
            job.next_attempt_at = Some(Utc::now() + delay);
            self.store.put_job(job)?;

            let _ = self.events.send(TreasuryEvent::JobFailed {
                job_id: job.id,
                error: error.to_string(),
            });
        }

        Ok(())
    }

    /// Exponential delay before retry number `attempt`, capped
    fn backoff_secs(&self, attempt: u32) -> i64 {
        let base = self.config.retry_backoff_base_secs;
        let delay = base.saturating_mul(1u64 << attempt.saturating_sub(1).min(32));
        delay.min(self.config.retry_backoff_cap_secs) as i64
    }

    /// Step 5: post the ledger transaction for a settled conversion.
    ///
    /// The USDC leg is always the onchain buffer; the USD leg is the fiat
    /// buffer, or the brokerage operational account for broker jobs.
    /// Idempotency key `conversion-{job_id}` makes replays harmless.
    async fn settle_job(&self, job: &mut ConversionJob) -> Result<()> {
        let onchain = self
            .ledger
            .get_or_create_account(AccountOwner::System, AccountType::OnchainBuffer, Currency::Usdc)
            .await?;

        let usd_account_type = match job.buffer {
            BufferKind::Broker => AccountType::BrokerOperational,
            _ => AccountType::FiatBuffer,
        };
        let usd_account = self
            .ledger
            .get_or_create_account(AccountOwner::System, usd_account_type, Currency::Usd)
            .await?;

        let entries = match job.direction {
            ConversionDirection::UsdToUsdc => vec![
                NewEntry::new(usd_account.id, EntryDirection::Debit, job.amount, Currency::Usd),
                NewEntry::new(onchain.id, EntryDirection::Credit, job.amount, Currency::Usdc),
            ],
            ConversionDirection::UsdcToUsd => vec![
                NewEntry::new(onchain.id, EntryDirection::Debit, job.amount, Currency::Usdc),
                NewEntry::new(usd_account.id, EntryDirection::Credit, job.amount, Currency::Usd),
            ],
        };

        self.ledger
            .create_transaction(NewTransaction {
                transaction_type: TransactionType::Conversion,
                idempotency_key: job.idempotency_key(),
                entries,
                reference_id: Some(job.id),
                reference_type: Some("conversion_job".to_string()),
                description: Some(format!(
                    "{} {} for {} buffer",
                    job.direction, job.amount, job.buffer
                )),
            })
            .await?;

        // Broker replenishments also push the USD into the brokerage
        if job.buffer == BufferKind::Broker && job.direction == ConversionDirection::UsdcToUsd {
            self.fund_brokerage(job.amount, &job.idempotency_key())
                .await?;
        }

        job.status = JobStatus::Completed;
        job.updated_at = Utc::now();
        self.store.put_job(job)?;

        info!(job_id = %job.id, buffer = %job.buffer, "Conversion settled");
        let _ = self.events.send(TreasuryEvent::JobCompleted {
            job_id: job.id,
            buffer: job.buffer,
        });

        Ok(())
    }

    /// Brokerage push with the same timeout and breaker discipline as
    /// conversion providers. The breaker key is the brokerage itself.
    async fn fund_brokerage(&self, amount: Decimal, idempotency_key: &str) -> Result<()> {
        self.breakers.is_request_allowed("brokerage")?;

        let deadline = Duration::from_secs(self.config.provider_timeout_secs);
        let push = self.brokerage.fund(amount, idempotency_key);
        let result = match tokio::time::timeout(deadline, push).await {
            Ok(r) => r,
            Err(_) => Err(providers::Error::Timeout(self.config.provider_timeout_secs)),
        };

        match result {
            Ok(_) => {
                self.breakers.record_success("brokerage");
                Ok(())
            }
            Err(e) => {
                self.breakers.record_failure("brokerage");
                Err(e.into())
            }
        }
    }

    /// Current ledger balance of a buffer
    pub async fn buffer_balance(&self, buffer: BufferKind) -> Result<Decimal> {
        let (account_type, currency) = match buffer {
            BufferKind::Onchain => (AccountType::OnchainBuffer, Currency::Usdc),
            BufferKind::Fiat => (AccountType::FiatBuffer, Currency::Usd),
            BufferKind::Broker => (AccountType::BrokerOperational, Currency::Usd),
        };
        Ok(self
            .ledger
            .get_account_balance(AccountOwner::System, account_type, currency)
            .await?)
    }

    /// Health snapshot of all buffers
    pub async fn buffer_report(&self) -> Result<Vec<(BufferKind, Decimal, BufferHealth)>> {
        let mut report = Vec::with_capacity(3);
        for buffer in [BufferKind::Onchain, BufferKind::Fiat, BufferKind::Broker] {
            let balance = self.buffer_balance(buffer).await?;
            let health = self.threshold(buffer).health(balance);
            report.push((buffer, balance, health));
        }
        Ok(report)
    }

    fn threshold(&self, buffer: BufferKind) -> &crate::types::BufferThreshold {
        match buffer {
            BufferKind::Onchain => &self.config.onchain,
            BufferKind::Fiat => &self.config.fiat,
            BufferKind::Broker => &self.config.broker,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::Config as LedgerConfig;
    use providers::{MockBrokerageClient, MockConversionProvider};
    use rust_decimal_macros::dec;

    async fn test_engine(
        providers_list: Vec<Arc<dyn ConversionProvider>>,
    ) -> (TreasuryEngine, Ledger, tempfile::TempDir) {
        let brokerage: Arc<dyn BrokerageClient> =
            Arc::new(MockBrokerageClient::new(1, 1.0, dec!(0)));
        test_engine_with(providers_list, brokerage, |_| {}).await
    }

    async fn test_engine_with(
        providers_list: Vec<Arc<dyn ConversionProvider>>,
        brokerage: Arc<dyn BrokerageClient>,
        configure: impl FnOnce(&mut Config),
    ) -> (TreasuryEngine, Ledger, tempfile::TempDir) {
        let temp = tempfile::tempdir().unwrap();

        let mut ledger_config = LedgerConfig::default();
        ledger_config.data_dir = temp.path().join("ledger");
        let ledger = Ledger::open(ledger_config).await.unwrap();

        let mut config = Config::default();
        config.data_dir = temp.path().join("treasury");
        configure(&mut config);

        let engine =
            TreasuryEngine::new(ledger.clone(), providers_list, brokerage, config).unwrap();

        (engine, ledger, temp)
    }

    async fn seed_buffer(ledger: &Ledger, account_type: AccountType, amount: Decimal) {
        let currency = account_type.default_currency();
        let buffer = ledger
            .get_or_create_account(AccountOwner::System, account_type, currency)
            .await
            .unwrap();
        let adjustment = ledger
            .get_or_create_account(
                AccountOwner::System,
                AccountType::ReconciliationAdjustment,
                Currency::Usd,
            )
            .await
            .unwrap();

        // Mixed currency seeding rides the conversion type
        ledger
            .create_transaction(NewTransaction {
                transaction_type: TransactionType::Conversion,
                idempotency_key: format!("seed-{}", account_type),
                entries: vec![
                    NewEntry::new(adjustment.id, EntryDirection::Debit, amount, Currency::Usd),
                    NewEntry::new(buffer.id, EntryDirection::Credit, amount, currency),
                ],
                reference_id: None,
                reference_type: None,
                description: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_healthy_buffers_create_no_jobs() {
        let provider: Arc<dyn ConversionProvider> =
            Arc::new(MockConversionProvider::new("primary", 1, 1, 1.0));
        let (engine, ledger, _temp) = test_engine(vec![provider]).await;

        seed_buffer(&ledger, AccountType::OnchainBuffer, dec!(15000)).await;
        seed_buffer(&ledger, AccountType::FiatBuffer, dec!(10000)).await;
        seed_buffer(&ledger, AccountType::BrokerOperational, dec!(10000)).await;

        engine.run_cycle().await.unwrap();
        assert!(engine.store().active_jobs().unwrap().is_empty());

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_over_capitalized_buffer_reported_without_excess_rule() {
        let provider: Arc<dyn ConversionProvider> =
            Arc::new(MockConversionProvider::new("primary", 1, 1, 1.0));
        let brokerage: Arc<dyn BrokerageClient> =
            Arc::new(MockBrokerageClient::new(1, 1.0, dec!(0)));
        let (engine, ledger, _temp) =
            test_engine_with(vec![provider], brokerage, |c| c.excess_rule_enabled = false).await;

        // Onchain max is 25000
        seed_buffer(&ledger, AccountType::OnchainBuffer, dec!(30000)).await;
        seed_buffer(&ledger, AccountType::FiatBuffer, dec!(10000)).await;
        seed_buffer(&ledger, AccountType::BrokerOperational, dec!(10000)).await;

        let mut events = engine.subscribe();
        engine.run_cycle().await.unwrap();

        // No skim job with the rule off, but the excess is not silent
        assert!(engine.store().active_jobs().unwrap().is_empty());

        let mut reported = None;
        while let Ok(event) = events.try_recv() {
            if let TreasuryEvent::BufferOverCapitalized { buffer, balance, maximum } = event {
                reported = Some((buffer, balance, maximum));
            }
        }
        assert_eq!(
            reported,
            Some((BufferKind::Onchain, dec!(30000), dec!(25000)))
        );

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_submit_waits_out_backoff() {
        // No direction supported, so every submit attempt fails
        let provider: Arc<dyn ConversionProvider> =
            Arc::new(MockConversionProvider::new("primary", 1, 1, 1.0).with_supported(vec![]));
        let (engine, ledger, _temp) = test_engine(vec![provider]).await;

        seed_buffer(&ledger, AccountType::OnchainBuffer, dec!(9000)).await;
        seed_buffer(&ledger, AccountType::FiatBuffer, dec!(10000)).await;
        seed_buffer(&ledger, AccountType::BrokerOperational, dec!(10000)).await;

        engine.run_cycle().await.unwrap();

        let job = &engine.store().list_jobs().unwrap()[0];
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, 1);
        assert!(job
            .last_error
            .as_deref()
            .unwrap()
            .contains("No provider available"));
        let next = job.next_attempt_at.unwrap();
        assert!(next > Utc::now());

        // An immediate second cycle must not burn another retry
        engine.run_cycle().await.unwrap();
        let job = &engine.store().list_jobs().unwrap()[0];
        assert_eq!(job.retry_count, 1);
        assert_eq!(job.next_attempt_at, Some(next));

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_brokerage_failure_does_not_abort_cycle() {
        let provider: Arc<dyn ConversionProvider> =
            Arc::new(MockConversionProvider::new("primary", 1, 1, 1.0));
        let brokerage: Arc<dyn BrokerageClient> =
            Arc::new(MockBrokerageClient::new(1, 0.0, dec!(0)));
        let (engine, ledger, _temp) = test_engine_with(vec![provider], brokerage, |_| {}).await;

        // Broker at 4000, min 5000, target 10000, batch 2500 -> 7500 job
        seed_buffer(&ledger, AccountType::OnchainBuffer, dec!(16000)).await;
        seed_buffer(&ledger, AccountType::FiatBuffer, dec!(10000)).await;
        seed_buffer(&ledger, AccountType::BrokerOperational, dec!(4000)).await;

        engine.run_cycle().await.unwrap();

        // Conversion succeeded but the brokerage push did not; the job
        // stays Submitted so the next poll re-settles it
        let jobs = engine.store().list_jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].buffer, BufferKind::Broker);
        assert_eq!(jobs[0].status, JobStatus::Submitted);

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_low_onchain_buffer_replenished() {
        let provider: Arc<dyn ConversionProvider> =
            Arc::new(MockConversionProvider::new("primary", 1, 1, 1.0));
        let (engine, ledger, _temp) = test_engine(vec![provider]).await;

        // Onchain at 9000, min 10000, target 15000, batch 2500 -> 7500 job
        seed_buffer(&ledger, AccountType::OnchainBuffer, dec!(9000)).await;
        seed_buffer(&ledger, AccountType::FiatBuffer, dec!(10000)).await;
        seed_buffer(&ledger, AccountType::BrokerOperational, dec!(10000)).await;

        engine.run_cycle().await.unwrap();

        let jobs = engine.store().list_jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        let job = &jobs[0];
        assert_eq!(job.buffer, BufferKind::Onchain);
        assert_eq!(job.amount, dec!(7500));
        assert_eq!(job.status, JobStatus::Completed);

        // Mock completes synchronously, so the ledger moves in one cycle
        assert_eq!(
            engine.buffer_balance(BufferKind::Onchain).await.unwrap(),
            dec!(16500)
        );
        assert_eq!(
            engine.buffer_balance(BufferKind::Fiat).await.unwrap(),
            dec!(2500)
        );

        ledger.shutdown().await.unwrap();
    }
}
