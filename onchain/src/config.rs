//! Onchain engine configuration

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Onchain engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// RocksDB data directory
    pub data_dir: PathBuf,

    /// Workers draining the deposit queue
    pub worker_count: usize,

    /// Deposit queue capacity before backpressure
    pub queue_capacity: usize,

    /// Processing withdrawals older than this are flagged Stuck
    pub stuck_after_secs: u64,

    /// Per-attempt payout timeout
    pub payout_timeout_secs: u64,

    /// Payout retry budget
    pub max_retries: u32,

    /// First retry delay; doubles per attempt
    pub retry_initial_delay_ms: u64,

    /// How often the worker pool polls processing withdrawals
    pub payout_poll_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/onchain"),
            worker_count: 4,
            queue_capacity: 1000,
            stuck_after_secs: 3600,
            payout_timeout_secs: 30,
            max_retries: 3,
            retry_initial_delay_ms: 2000,
            payout_poll_interval_secs: 60,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("invalid config file: {}", e)))
    }

    /// Defaults overridden by `ONCHAIN_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var("ONCHAIN_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(workers) = std::env::var("ONCHAIN_WORKER_COUNT") {
            config.worker_count = workers
                .parse()
                .map_err(|_| Error::Config("ONCHAIN_WORKER_COUNT must be a number".into()))?;
        }
        if let Ok(stuck) = std::env::var("ONCHAIN_STUCK_AFTER_SECS") {
            config.stuck_after_secs = stuck
                .parse()
                .map_err(|_| Error::Config("ONCHAIN_STUCK_AFTER_SECS must be a number".into()))?;
        }
        Ok(config)
    }
}
