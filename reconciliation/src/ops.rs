//! Operational reporting
//!
//! Read-only snapshot for operators: buffer levels with their health
//! classes, open exceptions, and stuck withdrawals awaiting resolution.

use crate::service::ReconciliationService;
use crate::types::ReconciliationException;
use crate::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use treasury::{BufferHealth, BufferKind};

/// One buffer's level and health class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferStatus {
    /// Which buffer
    pub buffer: BufferKind,
    /// Current ledger balance
    pub balance: Decimal,
    /// Health relative to configured thresholds
    pub health: BufferHealth,
}

/// Snapshot of system state for operators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpsReport {
    /// Snapshot timestamp
    pub generated_at: DateTime<Utc>,
    /// All working-capital buffers
    pub buffers: Vec<BufferStatus>,
    /// Exceptions still needing attention
    pub open_exceptions: Vec<ReconciliationException>,
    /// Withdrawals flagged stuck
    pub stuck_withdrawals: usize,
}

impl OpsReport {
    /// Whether any buffer is critically low or any exception is open
    pub fn needs_attention(&self) -> bool {
        self.buffers
            .iter()
            .any(|b| b.health == BufferHealth::CriticalLow)
            || !self.open_exceptions.is_empty()
            || self.stuck_withdrawals > 0
    }
}

impl ReconciliationService {
    /// Build an operational snapshot
    pub async fn ops_report(&self) -> Result<OpsReport> {
        let buffers = self
            .treasury()
            .buffer_report()
            .await?
            .into_iter()
            .map(|(buffer, balance, health)| BufferStatus {
                buffer,
                balance,
                health,
            })
            .collect();

        Ok(OpsReport {
            generated_at: Utc::now(),
            buffers,
            open_exceptions: self.store().open_exceptions()?,
            stuck_withdrawals: self.onchain().store().list_stuck()?.len(),
        })
    }
}
