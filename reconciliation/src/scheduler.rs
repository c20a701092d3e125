//! Reconciliation scheduler
//!
//! Hourly internal runs, daily full runs, both also triggerable on
//! demand. Cadences come from the service config.

use crate::service::ReconciliationService;
use crate::types::{ReconciliationReport, RunType};
use crate::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{info, warn};

/// Interval-driven reconciliation scheduler
pub struct ReconciliationScheduler {
    service: Arc<ReconciliationService>,
    internal_interval_secs: u64,
    full_interval_secs: u64,
    last_run_at: Arc<RwLock<Option<DateTime<Utc>>>>,
    shutdown: watch::Sender<bool>,
}

impl ReconciliationScheduler {
    /// Create new scheduler
    pub fn new(
        service: Arc<ReconciliationService>,
        internal_interval_secs: u64,
        full_interval_secs: u64,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            service,
            internal_interval_secs,
            full_interval_secs,
            last_run_at: Arc::new(RwLock::new(None)),
            shutdown,
        }
    }

    /// Start scheduler loop. Returns after `shutdown` is called.
    pub async fn start(self: Arc<Self>) {
        info!(
            internal_interval_secs = self.internal_interval_secs,
            full_interval_secs = self.full_interval_secs,
            "Starting reconciliation scheduler"
        );

        let mut internal =
            tokio::time::interval(tokio::time::Duration::from_secs(self.internal_interval_secs));
        let mut full =
            tokio::time::interval(tokio::time::Duration::from_secs(self.full_interval_secs));
        let mut shutdown = self.shutdown.subscribe();

        loop {
            let run_type = tokio::select! {
                _ = internal.tick() => RunType::Internal,
                _ = full.tick() => RunType::Full,
                _ = shutdown.changed() => {
                    info!("Reconciliation scheduler stopping");
                    return;
                }
            };

            if let Err(e) = self.run_once(run_type).await {
                warn!(run_type = %run_type, "Reconciliation run failed: {}", e);
            }
        }
    }

    /// Signal the scheduler loop to exit after the current run
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    async fn run_once(&self, run_type: RunType) -> Result<ReconciliationReport> {
        let report = self.service.run(run_type).await?;
        *self.last_run_at.write().await = Some(Utc::now());
        Ok(report)
    }

    /// Trigger an out-of-schedule run (manual)
    pub async fn trigger_adhoc_run(
        &self,
        run_type: RunType,
        requester: &str,
    ) -> Result<ReconciliationReport> {
        info!(run_type = %run_type, "Ad-hoc reconciliation run triggered by {}", requester);
        self.run_once(run_type).await
    }

    /// When the last run finished, if any
    pub async fn last_run_at(&self) -> Option<DateTime<Utc>> {
        *self.last_run_at.read().await
    }
}
