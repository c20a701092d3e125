//! End-to-end demo of the Lumen core.
//!
//! Wires the ledger, mock providers, treasury, onchain engine, and
//! reconciliation together and walks one day of platform activity:
//! capitalization, user deposits, an investment, a withdrawal, a
//! treasury cycle, and a reconciliation run with both an auto-corrected
//! drift and an operator-resolved exception.

use anyhow::Result;
use chrono::Utc;
use colored::Colorize;
use ledger_core::{
    AccountOwner, AccountType, Currency, EntryDirection, Ledger, NewEntry, NewTransaction,
    TransactionType,
};
use onchain::{
    AddressDirectory, MemoryAddressDirectory, OnchainEngine, OnchainJob, OnchainWorkerPool,
    WithdrawalRequest,
};
use providers::{
    ConversionProvider, DepositNotification, MockBrokerageClient, MockConversionProvider,
    MockWalletProvider, WalletProvider,
};
use reconciliation::{ReconciliationScheduler, ReconciliationService, RunType};
use rust_decimal_macros::dec;
use std::path::Path;
use std::sync::Arc;
use treasury::{BufferKind, TreasuryEngine, TreasuryEvent, TreasuryScheduler};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const DATA_DIR: &str = "./demo-data";

fn banner(title: &str) {
    println!();
    println!("{}", "=".repeat(68).cyan());
    println!("{}", format!("  {}", title).cyan().bold());
    println!("{}", "=".repeat(68).cyan());
}

/// Initial capitalization: fund each buffer to its target from the
/// adjustment account, standing in for the platform's opening wire.
async fn capitalize_buffers(ledger: &Ledger) -> Result<()> {
    let seeds = [
        (AccountType::OnchainBuffer, dec!(15000)),
        (AccountType::FiatBuffer, dec!(10000)),
        (AccountType::BrokerOperational, dec!(10000)),
    ];

    for (account_type, amount) in seeds {
        let currency = account_type.default_currency();
        let buffer = ledger
            .get_or_create_account(AccountOwner::System, account_type, currency)
            .await?;
        let source = ledger
            .get_or_create_account(
                AccountOwner::System,
                AccountType::ReconciliationAdjustment,
                Currency::Usd,
            )
            .await?;

        ledger
            .create_transaction(NewTransaction {
                transaction_type: TransactionType::Conversion,
                idempotency_key: format!("capitalize-{}", account_type),
                entries: vec![
                    NewEntry::new(source.id, EntryDirection::Debit, amount, Currency::Usd),
                    NewEntry::new(buffer.id, EntryDirection::Credit, amount, currency),
                ],
                reference_id: None,
                reference_type: Some("capitalization".to_string()),
                description: Some(format!("Opening capital for {}", account_type)),
            })
            .await?;
        println!("  funded {} with {} {}", account_type, amount, currency.code());
    }
    Ok(())
}

async fn print_buffers(treasury: &TreasuryEngine) -> Result<()> {
    for (buffer, balance, health) in treasury.buffer_report().await? {
        println!("  {:<8} {:>12}  {:?}", buffer.name(), balance, health);
    }
    Ok(())
}

fn drain_events(events: &mut tokio::sync::broadcast::Receiver<TreasuryEvent>) {
    while let Ok(event) = events.try_recv() {
        match event {
            TreasuryEvent::CycleStarted { at } => {
                println!("  {} cycle started at {}", "event:".dimmed(), at)
            }
            TreasuryEvent::JobCreated {
                job_id,
                buffer,
                amount,
            } => println!(
                "  {} job {} created: {} {} ",
                "event:".dimmed(),
                job_id,
                buffer,
                amount
            ),
            TreasuryEvent::JobCompleted { job_id, buffer } => println!(
                "  {} job {} completed for {}",
                "event:".dimmed(),
                job_id,
                buffer
            ),
            TreasuryEvent::JobFailed { job_id, error } => {
                println!("  {} job {} failed: {}", "event:".dimmed(), job_id, error)
            }
            TreasuryEvent::JobExhausted { job_id, buffer } => println!(
                "  {} job {} exhausted for {}",
                "event:".dimmed(),
                job_id,
                buffer
            ),
            TreasuryEvent::BufferOverCapitalized {
                buffer,
                balance,
                maximum,
            } => println!(
                "  {} {} over-capitalized: {} above max {}",
                "event:".dimmed(),
                buffer,
                balance,
                maximum
            ),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    // Fresh state every run
    if Path::new(DATA_DIR).exists() {
        std::fs::remove_dir_all(DATA_DIR)?;
    }

    banner("LUMEN CORE DEMO");

    // Ledger and providers
    let mut ledger_config = ledger_core::Config::default();
    ledger_config.data_dir = format!("{}/ledger", DATA_DIR).into();
    let ledger = Ledger::open(ledger_config).await?;

    let wallet = Arc::new(MockWalletProvider::new(20, 1.0, dec!(15000)));
    let brokerage = Arc::new(MockBrokerageClient::new(20, 1.0, dec!(0)));
    let conversion_providers: Vec<Arc<dyn ConversionProvider>> = vec![
        Arc::new(MockConversionProvider::new("circle", 1, 30, 1.0)),
        Arc::new(MockConversionProvider::new("otc-desk", 2, 30, 1.0)),
    ];

    // Engines
    let mut treasury_config = treasury::Config::default();
    treasury_config.data_dir = format!("{}/treasury", DATA_DIR).into();
    let treasury_engine = Arc::new(TreasuryEngine::new(
        ledger.clone(),
        conversion_providers,
        brokerage.clone(),
        treasury_config,
    )?);
    let mut treasury_events = treasury_engine.subscribe();
    let treasury_scheduler = TreasuryScheduler::new(treasury_engine.clone(), 300);

    let mut onchain_config = onchain::Config::default();
    onchain_config.data_dir = format!("{}/onchain", DATA_DIR).into();
    let directory = Arc::new(MemoryAddressDirectory::new());
    let onchain_engine = Arc::new(OnchainEngine::new(
        ledger.clone(),
        wallet.clone() as Arc<dyn WalletProvider>,
        directory.clone() as Arc<dyn AddressDirectory>,
        onchain_config,
    )?);

    let mut recon_config = reconciliation::Config::default();
    recon_config.data_dir = format!("{}/reconciliation", DATA_DIR).into();
    let recon = Arc::new(ReconciliationService::new(
        ledger.clone(),
        wallet.clone() as Arc<dyn WalletProvider>,
        brokerage.clone(),
        treasury_engine.clone(),
        onchain_engine.clone(),
        recon_config,
    )?);
    let recon_scheduler = ReconciliationScheduler::new(recon.clone(), 3600, 86400);

    banner("1. CAPITALIZE BUFFERS");
    capitalize_buffers(&ledger).await?;
    print_buffers(&treasury_engine).await?;

    banner("2. USER DEPOSITS");
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    directory.register("ethereum", "0xalice", alice);
    directory.register("polygon", "0xbob", bob);

    let pool = OnchainWorkerPool::spawn(onchain_engine.clone(), 2, 64);
    let deposits = [
        ("ethereum", "0xtx-a1", "0xalice", dec!(4000)),
        ("polygon", "0xtx-b1", "0xbob", dec!(2500)),
        ("ethereum", "0xtx-a2", "0xalice", dec!(1500)),
    ];
    for (chain, tx_hash, to, amount) in deposits {
        pool.enqueue(OnchainJob::Deposit(DepositNotification {
            to_address: to.to_string(),
            chain: chain.to_string(),
            tx_hash: tx_hash.to_string(),
            amount,
            from_address: "0xexternal".to_string(),
            confirmed_at: Utc::now(),
        }))
        .await?;
    }
    // Let the workers drain before reading balances
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    for (name, user) in [("alice", alice), ("bob", bob)] {
        let balances = ledger.get_user_balances(user).await?;
        println!(
            "  {:<6} usdc={:<8} pending={:<8} exposure={}",
            name, balances.usdc_balance, balances.pending_investment, balances.fiat_exposure
        );
    }

    banner("3. INVESTMENT (alice moves 2000 into equities)");
    ledger
        .reserve_for_investment(alice, dec!(2000), "demo-invest-1-reserve")
        .await?;
    // Brokerage fill settles the reservation into fiat exposure
    let pending = ledger
        .get_or_create_account(
            AccountOwner::User(alice),
            AccountType::PendingInvestment,
            Currency::Usdc,
        )
        .await?;
    let exposure = ledger
        .get_or_create_account(
            AccountOwner::User(alice),
            AccountType::FiatExposure,
            Currency::Usd,
        )
        .await?;
    ledger
        .create_transaction(NewTransaction {
            transaction_type: TransactionType::Investment,
            idempotency_key: "demo-invest-1-settle".to_string(),
            entries: vec![
                NewEntry::new(pending.id, EntryDirection::Debit, dec!(2000), Currency::Usdc),
                NewEntry::new(exposure.id, EntryDirection::Credit, dec!(2000), Currency::Usd),
            ],
            reference_id: None,
            reference_type: Some("investment_settlement".to_string()),
            description: Some("Fill for demo order 1".to_string()),
        })
        .await?;
    brokerage.set_buying_power(dec!(2000)).await;

    let balances = ledger.get_user_balances(alice).await?;
    println!(
        "  alice  usdc={:<8} pending={:<8} exposure={}  (total {})",
        balances.usdc_balance,
        balances.pending_investment,
        balances.fiat_exposure,
        balances.total_value()
    );

    banner("4. WITHDRAWAL (bob sends 1000 back onchain)");
    pool.enqueue(OnchainJob::Withdrawal(WithdrawalRequest {
        user_id: bob,
        chain: "polygon".to_string(),
        to_address: "0xbob-cold".to_string(),
        amount: dec!(1000),
    }))
    .await?;
    pool.shutdown().await?;

    for withdrawal in onchain_engine.store().list_withdrawals()? {
        println!(
            "  withdrawal {} -> {:?} (ref {})",
            withdrawal.id,
            withdrawal.status,
            withdrawal.external_reference.as_deref().unwrap_or("-")
        );
    }

    banner("5. TREASURY CYCLE");
    print_buffers(&treasury_engine).await?;
    treasury_scheduler.trigger_adhoc_cycle("demo").await?;
    drain_events(&mut treasury_events);
    println!("  {}", "after cycle:".dimmed());
    print_buffers(&treasury_engine).await?;

    banner("6. RECONCILIATION");
    // Pull the custodial statement in line with the ledger, one cent off
    let buffer_balance = treasury_engine.buffer_balance(BufferKind::Onchain).await?;
    wallet.set_balance(buffer_balance + dec!(0.01)).await;

    let report = recon_scheduler.trigger_adhoc_run(RunType::Full, "demo").await?;
    println!(
        "  full run: {}/{} checks passed, {} auto-corrected, {} exceptions",
        report.checks_passed, report.checks_run, report.auto_corrected, report.exceptions_created
    );

    // A real drift: the custodial wallet is 500 short
    wallet
        .set_balance(
            treasury_engine.buffer_balance(BufferKind::Onchain).await? - dec!(500),
        )
        .await;
    let report = recon_scheduler.trigger_adhoc_run(RunType::Full, "demo").await?;
    println!(
        "  full run: {}/{} checks passed, {} exceptions opened",
        report.checks_passed, report.checks_run, report.exceptions_created
    );

    for exception in recon.store().open_exceptions()? {
        println!(
            "  {} {:?} {} discrepancy {}",
            "exception:".yellow(),
            exception.severity,
            exception.check,
            exception.discrepancy
        );
        recon.mark_under_review(exception.id)?;
        recon.resolve(exception.id, "ops-demo", "custodian statement lag, confirmed")?;
        println!("  resolved by ops-demo");
    }

    banner("7. OPS REPORT");
    let ops = recon.ops_report().await?;
    for buffer in &ops.buffers {
        println!(
            "  {:<8} {:>12}  {:?}",
            buffer.buffer.name(),
            buffer.balance,
            buffer.health
        );
    }
    println!(
        "  open exceptions: {}   stuck withdrawals: {}",
        ops.open_exceptions.len(),
        ops.stuck_withdrawals
    );
    let metrics = ledger.metrics();
    println!(
        "  ledger: {} committed, {} rejected, {} reversals, {} accounts",
        metrics.transactions_total.get(),
        metrics.transactions_rejected_total.get(),
        metrics.reversals_total.get(),
        metrics.accounts_total.get()
    );
    println!("{}", "  snapshot (json):".dimmed());
    println!("{}", serde_json::to_string_pretty(&ops)?);
    let status = if ops.needs_attention() {
        "NEEDS ATTENTION".yellow().bold()
    } else {
        "ALL CLEAR".green().bold()
    };
    println!("  status: {}", status);

    ledger.shutdown().await?;
    println!();
    println!("{}", "demo complete".green());
    Ok(())
}
