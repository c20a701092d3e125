//! End-to-end tests for reconciliation runs, policy, and exceptions

use ledger_core::{Config as LedgerConfig, Ledger};
use onchain::{
    AddressDirectory, MemoryAddressDirectory, OnchainEngine, Withdrawal, WithdrawalStatus,
};
use providers::{
    ConversionDirection, ConversionProvider, MockBrokerageClient, MockConversionProvider,
    MockWalletProvider, WalletProvider,
};
use reconciliation::{
    CheckKind, Config, ExceptionStatus, ReconciliationService, RunType, Severity,
};
use rust_decimal_macros::dec;
use std::sync::Arc;
use treasury::{BufferKind, ConversionJob, JobStatus, TreasuryEngine};
use uuid::Uuid;

struct Harness {
    service: ReconciliationService,
    ledger: Ledger,
    wallet: Arc<MockWalletProvider>,
    brokerage: Arc<MockBrokerageClient>,
    _temp: tempfile::TempDir,
}

async fn harness() -> Harness {
    let temp = tempfile::tempdir().unwrap();

    let mut ledger_config = LedgerConfig::default();
    ledger_config.data_dir = temp.path().join("ledger");
    let ledger = Ledger::open(ledger_config).await.unwrap();

    let wallet = Arc::new(MockWalletProvider::new(1, 1.0, dec!(0)));
    let brokerage = Arc::new(MockBrokerageClient::new(1, 1.0, dec!(0)));

    let mut treasury_config = treasury::Config::default();
    treasury_config.data_dir = temp.path().join("treasury");
    let conversion: Arc<dyn ConversionProvider> =
        Arc::new(MockConversionProvider::new("primary", 1, 1, 1.0));
    let treasury_engine = Arc::new(
        TreasuryEngine::new(
            ledger.clone(),
            vec![conversion],
            brokerage.clone(),
            treasury_config,
        )
        .unwrap(),
    );

    let mut onchain_config = onchain::Config::default();
    onchain_config.data_dir = temp.path().join("onchain");
    onchain_config.retry_initial_delay_ms = 1;
    onchain_config.stuck_after_secs = 0;
    let directory = Arc::new(MemoryAddressDirectory::new());
    let onchain_engine = Arc::new(
        OnchainEngine::new(
            ledger.clone(),
            wallet.clone() as Arc<dyn WalletProvider>,
            directory.clone() as Arc<dyn AddressDirectory>,
            onchain_config,
        )
        .unwrap(),
    );

    let mut config = Config::default();
    config.data_dir = temp.path().join("reconciliation");

    let service = ReconciliationService::new(
        ledger.clone(),
        wallet.clone() as Arc<dyn WalletProvider>,
        brokerage.clone(),
        treasury_engine,
        onchain_engine,
        config,
    )
    .unwrap();

    Harness {
        service,
        ledger,
        wallet,
        brokerage,
        _temp: temp,
    }
}

#[tokio::test]
async fn test_quiet_system_is_clean() {
    let h = harness().await;

    let report = h.service.run(RunType::Full).await.unwrap();
    assert_eq!(report.checks_run, 5);
    assert!(report.is_clean());
    assert_eq!(report.exceptions_created, 0);
    assert_eq!(report.auto_corrected, 0);

    // Reports are persisted per run
    assert_eq!(h.service.store().list_reports().unwrap().len(), 1);

    h.ledger.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cent_discrepancy_is_auto_corrected() {
    let h = harness().await;

    // Custodial wallet shows one cent the ledger does not
    h.wallet.set_balance(dec!(0.01)).await;

    let report = h.service.run(RunType::Full).await.unwrap();
    assert_eq!(report.auto_corrected, 1);
    assert_eq!(report.exceptions_created, 0);

    let exceptions = h.service.store().list_exceptions().unwrap();
    assert_eq!(exceptions.len(), 1);
    assert_eq!(exceptions[0].status, ExceptionStatus::AutoCorrected);
    assert_eq!(exceptions[0].check, CheckKind::WalletBalance);
    assert!(exceptions[0].correction_transaction_id.is_some());

    // The compensating transaction moved the buffer to observed reality,
    // so the next run is clean
    let next = h.service.run(RunType::Full).await.unwrap();
    assert!(next.is_clean());

    h.ledger.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_large_discrepancy_opens_exception_untouched() {
    let h = harness().await;

    h.wallet.set_balance(dec!(500)).await;

    let report = h.service.run(RunType::Full).await.unwrap();
    assert_eq!(report.exceptions_created, 1);
    assert_eq!(report.auto_corrected, 0);

    let exceptions = h.service.store().open_exceptions().unwrap();
    assert_eq!(exceptions.len(), 1);
    let exception = &exceptions[0];
    assert_eq!(exception.status, ExceptionStatus::Open);
    assert_eq!(exception.severity, Severity::High);
    assert_eq!(exception.discrepancy, dec!(500));

    // No compensating transaction was posted
    assert_eq!(
        h.ledger
            .get_transaction_by_key(&format!("recon-adjust-{}", exception.id))
            .unwrap(),
        None
    );

    // The drift persists, but a second run does not stack another
    // exception on top of the open one
    let again = h.service.run(RunType::Full).await.unwrap();
    assert_eq!(again.exceptions_created, 0);
    assert_eq!(h.service.store().open_exceptions().unwrap().len(), 1);

    h.ledger.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_exception_resolution_lifecycle() {
    let h = harness().await;

    h.wallet.set_balance(dec!(500)).await;
    h.service.run(RunType::Full).await.unwrap();
    let id = h.service.store().open_exceptions().unwrap()[0].id;

    let reviewed = h.service.mark_under_review(id).unwrap();
    assert_eq!(reviewed.status, ExceptionStatus::UnderReview);

    // Already in review, cannot re-open review
    assert!(h.service.mark_under_review(id).is_err());

    let resolved = h.service.resolve(id, "ops-alice", "bank deposit lag").unwrap();
    assert_eq!(resolved.status, ExceptionStatus::Resolved);
    assert_eq!(resolved.resolved_by.as_deref(), Some("ops-alice"));

    // Resolved is terminal
    assert!(h.service.resolve(id, "ops-bob", "again").is_err());
    assert!(h.service.store().open_exceptions().unwrap().is_empty());

    h.ledger.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_brokerage_mismatch_never_auto_corrected() {
    let h = harness().await;

    h.brokerage.set_buying_power(dec!(50)).await;

    let report = h.service.run(RunType::Full).await.unwrap();
    assert_eq!(report.exceptions_created, 1);
    assert_eq!(report.auto_corrected, 0);

    let exceptions = h.service.store().open_exceptions().unwrap();
    assert_eq!(exceptions[0].check, CheckKind::BrokerageBalance);
    assert_eq!(exceptions[0].severity, Severity::Medium);

    // The mismatch is still there on the next run; still one exception
    let again = h.service.run(RunType::Full).await.unwrap();
    assert_eq!(again.exceptions_created, 0);
    assert_eq!(h.service.store().open_exceptions().unwrap().len(), 1);

    h.ledger.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unsettled_conversion_job_detected() {
    let h = harness().await;

    // A job marked completed with no ledger transaction behind it
    let mut job = ConversionJob::new(
        BufferKind::Onchain,
        ConversionDirection::UsdToUsdc,
        dec!(2500),
        3,
    );
    job.status = JobStatus::Completed;
    h.service.treasury().store().put_job(&job).unwrap();

    let report = h.service.run(RunType::Full).await.unwrap();
    assert_eq!(report.exceptions_created, 1);

    let exceptions = h.service.store().open_exceptions().unwrap();
    assert_eq!(exceptions[0].check, CheckKind::ConversionCompleteness);
    assert_eq!(exceptions[0].reference_id, Some(job.id));
    assert_eq!(exceptions[0].severity, Severity::Critical);

    // The same job does not generate a second exception
    let again = h.service.run(RunType::Full).await.unwrap();
    assert_eq!(again.exceptions_created, 0);

    h.ledger.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stuck_withdrawal_surfaces_once() {
    let h = harness().await;

    // A withdrawal the onchain engine has flagged as stuck
    let mut withdrawal = Withdrawal::new(
        Uuid::new_v4(),
        "ethereum".to_string(),
        "0xdest".to_string(),
        dec!(200),
    );
    withdrawal.status = WithdrawalStatus::Stuck;
    h.service.onchain().store().put_withdrawal(&withdrawal).unwrap();

    let report = h.service.run(RunType::Internal).await.unwrap();
    assert_eq!(report.checks_run, 2);
    assert_eq!(report.exceptions_created, 1);

    let exceptions = h.service.store().open_exceptions().unwrap();
    assert_eq!(exceptions[0].check, CheckKind::StuckWithdrawals);
    assert_eq!(exceptions[0].reference_id, Some(withdrawal.id));
    assert_eq!(exceptions[0].discrepancy, dec!(200));

    // A second run does not duplicate the exception
    let again = h.service.run(RunType::Internal).await.unwrap();
    assert_eq!(again.exceptions_created, 0);

    h.ledger.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_ops_report_reflects_open_items() {
    let h = harness().await;

    let clean = h.service.ops_report().await.unwrap();
    assert_eq!(clean.buffers.len(), 3);
    // Empty buffers sit below their minimums
    assert!(clean.needs_attention());
    assert!(clean.open_exceptions.is_empty());
    assert_eq!(clean.stuck_withdrawals, 0);

    h.wallet.set_balance(dec!(500)).await;
    h.service.run(RunType::Full).await.unwrap();

    let flagged = h.service.ops_report().await.unwrap();
    assert_eq!(flagged.open_exceptions.len(), 1);
    assert!(flagged.needs_attention());

    h.ledger.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_scheduler_stops_on_shutdown() {
    let h = harness().await;

    let scheduler = Arc::new(reconciliation::ReconciliationScheduler::new(
        Arc::new(h.service),
        3600,
        86400,
    ));
    let handle = tokio::spawn(scheduler.clone().start());

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    scheduler.shutdown();

    tokio::time::timeout(std::time::Duration::from_secs(2), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();

    h.ledger.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_internal_run_skips_external_checks() {
    let h = harness().await;

    // An external drift that only the full run would see
    h.wallet.set_balance(dec!(500)).await;

    let report = h.service.run(RunType::Internal).await.unwrap();
    assert_eq!(report.checks_run, 2);
    assert!(report.is_clean());
    assert!(h.service.store().open_exceptions().unwrap().is_empty());

    h.ledger.shutdown().await.unwrap();
}
