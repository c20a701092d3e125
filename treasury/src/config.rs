//! Configuration for the treasury engine

use crate::types::BufferThreshold;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Treasury configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for the job store
    pub data_dir: PathBuf,

    /// Seconds between monitoring cycles
    pub cycle_interval_secs: u64,

    /// Retry budget per conversion job
    pub max_retries: u32,

    /// First retry delay after a failed attempt; doubles per attempt
    pub retry_backoff_base_secs: u64,

    /// Upper bound on the retry delay
    pub retry_backoff_cap_secs: u64,

    /// Skim over-capitalized buffers back to target
    pub excess_rule_enabled: bool,

    /// Deadline for a single provider call (seconds)
    pub provider_timeout_secs: u64,

    /// Onchain USDC buffer threshold
    pub onchain: BufferThreshold,

    /// Fiat USD buffer threshold
    pub fiat: BufferThreshold,

    /// Brokerage operational buffer threshold
    pub broker: BufferThreshold,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/treasury"),
            cycle_interval_secs: 300,
            max_retries: 3,
            retry_backoff_base_secs: 60,
            retry_backoff_cap_secs: 3600,
            excess_rule_enabled: true,
            provider_timeout_secs: 30,
            onchain: BufferThreshold {
                minimum: Decimal::from(10_000),
                target: Decimal::from(15_000),
                maximum: Decimal::from(25_000),
                batch_size: Decimal::from(2_500),
            },
            fiat: BufferThreshold {
                minimum: Decimal::from(5_000),
                target: Decimal::from(10_000),
                maximum: Decimal::from(20_000),
                batch_size: Decimal::from(2_500),
            },
            broker: BufferThreshold {
                minimum: Decimal::from(5_000),
                target: Decimal::from(10_000),
                maximum: Decimal::from(20_000),
                batch_size: Decimal::from(2_500),
            },
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("TREASURY_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(interval) = std::env::var("TREASURY_CYCLE_INTERVAL_SECS") {
            config.cycle_interval_secs = interval
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid cycle interval: {}", e)))?;
        }

        Ok(config)
    }
}
