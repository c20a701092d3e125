//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `ledger_transactions_total` - Total transactions committed
//! - `ledger_transactions_rejected_total` - Transactions rejected by validation
//! - `ledger_reversals_total` - Compensating transactions posted
//! - `ledger_commit_duration_seconds` - Histogram of commit latencies
//! - `ledger_accounts_total` - Number of accounts

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Total transactions committed
    pub transactions_total: IntCounter,

    /// Transactions rejected by validation
    pub transactions_rejected_total: IntCounter,

    /// Compensating transactions posted
    pub reversals_total: IntCounter,

    /// Commit duration histogram
    pub commit_duration: Histogram,

    /// Number of accounts
    pub accounts_total: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transactions_total = IntCounter::with_opts(Opts::new(
            "ledger_transactions_total",
            "Total transactions committed",
        ))?;
        registry.register(Box::new(transactions_total.clone()))?;

        let transactions_rejected_total = IntCounter::with_opts(Opts::new(
            "ledger_transactions_rejected_total",
            "Transactions rejected by validation",
        ))?;
        registry.register(Box::new(transactions_rejected_total.clone()))?;

        let reversals_total = IntCounter::with_opts(Opts::new(
            "ledger_reversals_total",
            "Compensating transactions posted",
        ))?;
        registry.register(Box::new(reversals_total.clone()))?;

        let commit_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_commit_duration_seconds",
                "Histogram of commit latencies",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(commit_duration.clone()))?;

        let accounts_total =
            IntGauge::with_opts(Opts::new("ledger_accounts_total", "Number of accounts"))?;
        registry.register(Box::new(accounts_total.clone()))?;

        Ok(Self {
            transactions_total,
            transactions_rejected_total,
            reversals_total,
            commit_duration,
            accounts_total,
            registry,
        })
    }

    /// Record a committed transaction
    pub fn record_commit(&self, duration_seconds: f64) {
        self.transactions_total.inc();
        self.commit_duration.observe(duration_seconds);
    }

    /// Record a validation rejection
    pub fn record_rejection(&self) {
        self.transactions_rejected_total.inc();
    }

    /// Record a reversal
    pub fn record_reversal(&self) {
        self.reversals_total.inc();
    }

    /// Update account count
    pub fn update_account_count(&self, count: i64) {
        self.accounts_total.set(count);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
