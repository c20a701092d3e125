//! Reconciliation checks, exceptions, and run reports

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Individual consistency check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckKind {
    /// Cached balances match the signed entry sums
    InternalConsistency,
    /// Onchain buffer ledger balance matches the custodial wallet
    WalletBalance,
    /// Users' fiat exposure matches the brokerage buying power
    BrokerageBalance,
    /// Every completed conversion job settled into the ledger
    ConversionCompleteness,
    /// Stuck withdrawals are surfaced as exceptions
    StuckWithdrawals,
}

impl CheckKind {
    /// Stable name for reports and logs
    pub fn name(&self) -> &'static str {
        match self {
            CheckKind::InternalConsistency => "internal_consistency",
            CheckKind::WalletBalance => "wallet_balance",
            CheckKind::BrokerageBalance => "brokerage_balance",
            CheckKind::ConversionCompleteness => "conversion_completeness",
            CheckKind::StuckWithdrawals => "stuck_withdrawals",
        }
    }
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Exception severity, derived from the absolute discrepancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    /// Under $1
    Low,
    /// Under $100
    Medium,
    /// Under $1,000
    High,
    /// $1,000 and above
    Critical,
}

impl Severity {
    /// Classify a discrepancy by magnitude
    pub fn from_discrepancy(discrepancy: Decimal) -> Self {
        let magnitude = discrepancy.abs();
        if magnitude < Decimal::ONE {
            Severity::Low
        } else if magnitude < Decimal::ONE_HUNDRED {
            Severity::Medium
        } else if magnitude < Decimal::ONE_THOUSAND {
            Severity::High
        } else {
            Severity::Critical
        }
    }
}

/// Exception lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExceptionStatus {
    /// Needs investigation
    Open,
    /// An operator has picked it up
    UnderReview,
    /// Manually resolved
    Resolved,
    /// Corrected by a compensating ledger transaction
    AutoCorrected,
}

impl ExceptionStatus {
    /// Whether the exception still needs attention
    pub fn is_open(&self) -> bool {
        matches!(self, ExceptionStatus::Open | ExceptionStatus::UnderReview)
    }
}

/// A detected inconsistency and its resolution state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationException {
    /// Exception ID
    pub id: Uuid,

    /// Check that detected it
    pub check: CheckKind,

    /// Severity class
    pub severity: Severity,

    /// Signed discrepancy (external minus ledger, where applicable)
    pub discrepancy: Decimal,

    /// Human-readable description
    pub description: String,

    /// Account involved, if one
    pub account_id: Option<Uuid>,

    /// Related record (withdrawal, conversion job), if one
    pub reference_id: Option<Uuid>,

    /// Lifecycle status
    pub status: ExceptionStatus,

    /// Compensating ledger transaction, set when auto-corrected
    pub correction_transaction_id: Option<Uuid>,

    /// Who resolved it
    pub resolved_by: Option<String>,

    /// Resolution notes
    pub resolution_notes: Option<String>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl ReconciliationException {
    /// Create an open exception for a detected discrepancy
    pub fn new(check: CheckKind, discrepancy: Decimal, description: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            check,
            severity: Severity::from_discrepancy(discrepancy),
            discrepancy,
            description,
            account_id: None,
            reference_id: None,
            status: ExceptionStatus::Open,
            correction_transaction_id: None,
            resolved_by: None,
            resolution_notes: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Scope of a reconciliation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunType {
    /// Hourly: internal consistency and stuck withdrawals
    Internal,
    /// Daily: all checks including external cross-checks
    Full,
}

impl RunType {
    /// Checks executed for this run type
    pub fn checks(&self) -> &'static [CheckKind] {
        match self {
            RunType::Internal => &[CheckKind::InternalConsistency, CheckKind::StuckWithdrawals],
            RunType::Full => &[
                CheckKind::InternalConsistency,
                CheckKind::WalletBalance,
                CheckKind::BrokerageBalance,
                CheckKind::ConversionCompleteness,
                CheckKind::StuckWithdrawals,
            ],
        }
    }
}

impl std::fmt::Display for RunType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunType::Internal => f.write_str("internal"),
            RunType::Full => f.write_str("full"),
        }
    }
}

/// Summary of one reconciliation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    /// Report ID
    pub id: Uuid,

    /// Run scope
    pub run_type: RunType,

    /// Checks executed
    pub checks_run: usize,

    /// Checks that found nothing
    pub checks_passed: usize,

    /// Exceptions opened by this run
    pub exceptions_created: usize,

    /// Exceptions auto-corrected by this run
    pub auto_corrected: usize,

    /// Start timestamp
    pub started_at: DateTime<Utc>,

    /// Completion timestamp
    pub completed_at: DateTime<Utc>,
}

impl ReconciliationReport {
    /// Whether the run found a fully consistent system
    pub fn is_clean(&self) -> bool {
        self.checks_passed == self.checks_run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_severity_thresholds() {
        assert_eq!(Severity::from_discrepancy(dec!(0.01)), Severity::Low);
        assert_eq!(Severity::from_discrepancy(dec!(-0.99)), Severity::Low);
        assert_eq!(Severity::from_discrepancy(dec!(1)), Severity::Medium);
        assert_eq!(Severity::from_discrepancy(dec!(99.99)), Severity::Medium);
        assert_eq!(Severity::from_discrepancy(dec!(-500)), Severity::High);
        assert_eq!(Severity::from_discrepancy(dec!(1000)), Severity::Critical);
    }

    #[test]
    fn test_run_type_check_sets() {
        assert_eq!(RunType::Internal.checks().len(), 2);
        assert_eq!(RunType::Full.checks().len(), 5);
        assert!(RunType::Full.checks().contains(&CheckKind::WalletBalance));
        assert!(!RunType::Internal.checks().contains(&CheckKind::WalletBalance));
    }

    #[test]
    fn test_exception_starts_open() {
        let e = ReconciliationException::new(
            CheckKind::WalletBalance,
            dec!(500),
            "custodial balance drifted".to_string(),
        );
        assert_eq!(e.status, ExceptionStatus::Open);
        assert_eq!(e.severity, Severity::High);
        assert!(e.status.is_open());
    }
}
