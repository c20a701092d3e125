//! Brokerage client (operational funding and buying power)

use crate::{Error, Result};
use async_trait::async_trait;
use rand::Rng;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Client for the brokerage platform
#[async_trait]
pub trait BrokerageClient: Send + Sync {
    /// Push USD into the platform's operational brokerage account
    async fn fund(&self, amount: Decimal, reference: &str) -> Result<()>;

    /// Sum of buying power across the platform's brokerage accounts
    async fn aggregate_buying_power(&self) -> Result<Decimal>;
}

/// In-memory brokerage for tests and demos
pub struct MockBrokerageClient {
    latency_ms: u64,
    success_rate: f64,
    buying_power: Arc<RwLock<Decimal>>,
}

impl MockBrokerageClient {
    /// Create mock with a starting buying power
    pub fn new(latency_ms: u64, success_rate: f64, buying_power: Decimal) -> Self {
        Self {
            latency_ms,
            success_rate,
            buying_power: Arc::new(RwLock::new(buying_power)),
        }
    }

    /// Adjust buying power (simulating fills and settlements)
    pub async fn set_buying_power(&self, buying_power: Decimal) {
        *self.buying_power.write().await = buying_power;
    }

    fn should_succeed(&self) -> bool {
        let mut rng = rand::thread_rng();
        rng.gen::<f64>() <= self.success_rate
    }
}

#[async_trait]
impl BrokerageClient for MockBrokerageClient {
    async fn fund(&self, amount: Decimal, reference: &str) -> Result<()> {
        info!("Mock brokerage: funding {} USD ({})", amount, reference);

        tokio::time::sleep(Duration::from_millis(self.latency_ms)).await;

        if !self.should_succeed() {
            warn!("Mock brokerage: simulated funding failure");
            return Err(Error::Transient("Simulated brokerage failure".to_string()));
        }

        let mut buying_power = self.buying_power.write().await;
        *buying_power += amount;
        Ok(())
    }

    async fn aggregate_buying_power(&self) -> Result<Decimal> {
        tokio::time::sleep(Duration::from_millis(self.latency_ms / 4)).await;
        Ok(*self.buying_power.read().await)
    }
}
