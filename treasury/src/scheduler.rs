//! Treasury monitoring scheduler
//!
//! Runs the engine on a fixed interval and supports ad-hoc cycles for
//! ops (after a large deposit, before market open).

use crate::engine::TreasuryEngine;
use crate::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{info, warn};

/// Interval-driven treasury scheduler
pub struct TreasuryScheduler {
    engine: Arc<TreasuryEngine>,
    interval_secs: u64,
    last_cycle_at: Arc<RwLock<Option<DateTime<Utc>>>>,
    shutdown: watch::Sender<bool>,
}

impl TreasuryScheduler {
    /// Create new scheduler
    pub fn new(engine: Arc<TreasuryEngine>, interval_secs: u64) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            engine,
            interval_secs,
            last_cycle_at: Arc::new(RwLock::new(None)),
            shutdown,
        }
    }

    /// Start scheduler loop. Returns after `shutdown` is called.
    pub async fn start(self: Arc<Self>) {
        info!(
            interval_secs = self.interval_secs,
            "Starting treasury scheduler"
        );

        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(self.interval_secs));
        let mut shutdown = self.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_once().await {
                        warn!("Treasury cycle failed: {}", e);
                    }
                }
                _ = shutdown.changed() => {
                    info!("Treasury scheduler stopping");
                    return;
                }
            }
        }
    }

    /// Signal the scheduler loop to exit after the current cycle
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Run one cycle and record its completion time
    async fn run_once(&self) -> Result<()> {
        self.engine.run_cycle().await?;
        *self.last_cycle_at.write().await = Some(Utc::now());
        Ok(())
    }

    /// Trigger an out-of-schedule cycle (manual)
    pub async fn trigger_adhoc_cycle(&self, requester: &str) -> Result<()> {
        info!("Ad-hoc treasury cycle triggered by {}", requester);
        self.run_once().await
    }

    /// When the last cycle finished, if any
    pub async fn last_cycle_at(&self) -> Option<DateTime<Utc>> {
        *self.last_cycle_at.read().await
    }
}
