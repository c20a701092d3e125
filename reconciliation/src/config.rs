//! Reconciliation configuration

use crate::error::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Reconciliation service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// RocksDB data directory
    pub data_dir: PathBuf,

    /// Discrepancies at or below this are corrected automatically
    pub auto_correct_threshold: Decimal,

    /// Internal run cadence (checks 1 and 5)
    pub internal_interval_secs: u64,

    /// Full run cadence (all checks)
    pub full_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/reconciliation"),
            // One cent of rounding drift
            auto_correct_threshold: Decimal::new(1, 2),
            internal_interval_secs: 3600,
            full_interval_secs: 86400,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("invalid config file: {}", e)))
    }

    /// Defaults overridden by `RECONCILIATION_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var("RECONCILIATION_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(threshold) = std::env::var("RECONCILIATION_AUTO_CORRECT_THRESHOLD") {
            config.auto_correct_threshold = threshold.parse().map_err(|_| {
                Error::Config("RECONCILIATION_AUTO_CORRECT_THRESHOLD must be a decimal".into())
            })?;
        }
        Ok(config)
    }
}
