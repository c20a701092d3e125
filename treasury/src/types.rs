//! Types for buffer monitoring and conversion jobs

use chrono::{DateTime, Utc};
use providers::ConversionDirection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Which working-capital buffer a job replenishes or drains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferKind {
    /// USDC at the wallet provider
    Onchain,
    /// USD at the conversion provider
    Fiat,
    /// USD at the brokerage
    Broker,
}

impl BufferKind {
    /// Snake-case name used in keys and logs
    pub fn name(&self) -> &'static str {
        match self {
            BufferKind::Onchain => "onchain",
            BufferKind::Fiat => "fiat",
            BufferKind::Broker => "broker",
        }
    }

    /// Direction of a conversion that fills this buffer
    pub fn replenish_direction(&self) -> ConversionDirection {
        match self {
            // More USDC onchain means buying USDC with fiat
            BufferKind::Onchain => ConversionDirection::UsdToUsdc,
            // Fiat and broker buffers are fed by selling USDC
            BufferKind::Fiat | BufferKind::Broker => ConversionDirection::UsdcToUsd,
        }
    }
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Health classification of a buffer against its threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferHealth {
    /// Below the minimum; replenishment required
    CriticalLow,
    /// Between minimum and target
    BelowTarget,
    /// Between target and maximum
    Healthy,
    /// Above the maximum; excess can be skimmed
    OverCapitalized,
}

/// Threshold configuration for one buffer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferThreshold {
    /// Replenish when the balance drops below this
    pub minimum: Decimal,

    /// Replenishment aims for this level
    pub target: Decimal,

    /// Excess above this may be skimmed back
    pub maximum: Decimal,

    /// Conversions are placed in multiples of this
    pub batch_size: Decimal,
}

impl BufferThreshold {
    /// Classify a balance against this threshold
    pub fn health(&self, current: Decimal) -> BufferHealth {
        if current < self.minimum {
            BufferHealth::CriticalLow
        } else if current < self.target {
            BufferHealth::BelowTarget
        } else if current <= self.maximum {
            BufferHealth::Healthy
        } else {
            BufferHealth::OverCapitalized
        }
    }

    /// Amount needed to bring `current` back to target, rounded up to a
    /// whole number of batches. Zero when already at or above target.
    pub fn replenishment_amount(&self, current: Decimal) -> Decimal {
        let deficit = self.target - current;
        if deficit <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let batches = (deficit / self.batch_size).ceil();
        batches * self.batch_size
    }

    /// Amount above target to skim when over-capitalized, zero otherwise
    pub fn excess_amount(&self, current: Decimal) -> Decimal {
        if current > self.maximum {
            current - self.target
        } else {
            Decimal::ZERO
        }
    }
}

/// Conversion job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Created, not yet submitted to a provider
    Pending,
    /// Accepted by a provider, awaiting completion
    Submitted,
    /// Settled and posted to the ledger
    Completed,
    /// Last attempt failed; will be retried
    Failed,
    /// Retry budget exhausted; needs operator attention
    Exhausted,
}

impl JobStatus {
    /// Job still occupies its buffer (blocks new jobs for the same buffer)
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Submitted | JobStatus::Failed)
    }
}

/// One automated currency conversion between buffers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionJob {
    /// Job ID
    pub id: Uuid,

    /// Buffer this job replenishes (or drains, for excess skims)
    pub buffer: BufferKind,

    /// Conversion direction
    pub direction: ConversionDirection,

    /// Source-currency amount
    pub amount: Decimal,

    /// Lifecycle status
    pub status: JobStatus,

    /// Provider that accepted the order
    pub provider: Option<String>,

    /// Provider-side reference for polling
    pub external_reference: Option<String>,

    /// Attempts so far
    pub retry_count: u32,

    /// Retry budget
    pub max_retries: u32,

    /// Earliest time the next submit attempt may run
    pub next_attempt_at: Option<DateTime<Utc>>,

    /// Error from the last failed attempt
    pub last_error: Option<String>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl ConversionJob {
    /// Create a fresh pending job
    pub fn new(
        buffer: BufferKind,
        direction: ConversionDirection,
        amount: Decimal,
        max_retries: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            buffer,
            direction,
            amount,
            status: JobStatus::Pending,
            provider: None,
            external_reference: None,
            retry_count: 0,
            max_retries,
            next_attempt_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Idempotency key for the ledger transaction this job settles into
    pub fn idempotency_key(&self) -> String {
        format!("conversion-{}", self.id)
    }

    /// Job finished for good, successfully or not
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Exhausted)
    }

    /// Failed job whose backoff window has elapsed
    pub fn can_retry(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Failed
            && self.retry_count <= self.max_retries
            && self.next_attempt_at.map_or(true, |at| at <= now)
    }
}

/// Events emitted by the treasury engine
#[derive(Debug, Clone, PartialEq)]
pub enum TreasuryEvent {
    /// A monitoring cycle began
    CycleStarted {
        /// When the cycle began
        at: DateTime<Utc>,
    },

    /// A replenishment or skim job was created
    JobCreated {
        /// Job ID
        job_id: Uuid,
        /// Buffer being replenished or drained
        buffer: BufferKind,
        /// Source-currency amount
        amount: Decimal,
    },

    /// A job settled and its ledger transaction was posted
    JobCompleted {
        /// Job ID
        job_id: Uuid,
        /// Buffer involved
        buffer: BufferKind,
    },

    /// A job attempt failed and will be retried
    JobFailed {
        /// Job ID
        job_id: Uuid,
        /// Error from the failed attempt
        error: String,
    },

    /// A job ran out of retries
    JobExhausted {
        /// Job ID
        job_id: Uuid,
        /// Buffer involved
        buffer: BufferKind,
    },

    /// A buffer exceeded its configured maximum
    BufferOverCapitalized {
        /// Buffer involved
        buffer: BufferKind,
        /// Observed ledger balance
        balance: Decimal,
        /// Configured maximum
        maximum: Decimal,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn threshold() -> BufferThreshold {
        BufferThreshold {
            minimum: dec!(10000),
            target: dec!(15000),
            maximum: dec!(25000),
            batch_size: dec!(2500),
        }
    }

    #[test]
    fn test_health_classification() {
        let t = threshold();
        assert_eq!(t.health(dec!(9000)), BufferHealth::CriticalLow);
        assert_eq!(t.health(dec!(12000)), BufferHealth::BelowTarget);
        assert_eq!(t.health(dec!(20000)), BufferHealth::Healthy);
        assert_eq!(t.health(dec!(26000)), BufferHealth::OverCapitalized);
    }

    #[test]
    fn test_replenishment_rounds_up_to_batch() {
        let t = threshold();

        // Deficit 6000, batch 2500 -> 3 batches = 7500
        assert_eq!(t.replenishment_amount(dec!(9000)), dec!(7500));

        // Deficit exactly one batch
        assert_eq!(t.replenishment_amount(dec!(12500)), dec!(2500));

        // At or above target needs nothing
        assert_eq!(t.replenishment_amount(dec!(15000)), Decimal::ZERO);
        assert_eq!(t.replenishment_amount(dec!(20000)), Decimal::ZERO);
    }

    #[test]
    fn test_excess_amount() {
        let t = threshold();
        assert_eq!(t.excess_amount(dec!(20000)), Decimal::ZERO);
        // Over maximum drains back to target
        assert_eq!(t.excess_amount(dec!(30000)), dec!(15000));
    }

    #[test]
    fn test_replenish_directions() {
        assert_eq!(
            BufferKind::Onchain.replenish_direction(),
            ConversionDirection::UsdToUsdc
        );
        assert_eq!(
            BufferKind::Fiat.replenish_direction(),
            ConversionDirection::UsdcToUsd
        );
        assert_eq!(
            BufferKind::Broker.replenish_direction(),
            ConversionDirection::UsdcToUsd
        );
    }

    #[test]
    fn test_job_status_activity() {
        assert!(JobStatus::Pending.is_active());
        assert!(JobStatus::Submitted.is_active());
        assert!(JobStatus::Failed.is_active());
        assert!(!JobStatus::Completed.is_active());
        assert!(!JobStatus::Exhausted.is_active());
    }

    #[test]
    fn test_retry_gated_by_backoff_window() {
        let now = Utc::now();
        let mut job = ConversionJob::new(
            BufferKind::Onchain,
            ConversionDirection::UsdToUsdc,
            dec!(2500),
            3,
        );

        job.status = JobStatus::Failed;
        job.retry_count = 1;

        // No window set: retry immediately
        assert!(job.can_retry(now));

        // Window in the future blocks the retry until it elapses
        job.next_attempt_at = Some(now + chrono::Duration::seconds(60));
        assert!(!job.can_retry(now));
        assert!(job.can_retry(now + chrono::Duration::seconds(61)));

        job.status = JobStatus::Exhausted;
        assert!(!job.can_retry(now + chrono::Duration::seconds(61)));
        assert!(job.is_terminal());
    }
}
