//! Wallet provider client (custodial USDC wallets)

use crate::types::{PayoutRequest, TransferResult, TransferStatus};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Client for the custodial wallet provider
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Initiate an onchain USDC payout
    async fn send_payout(&self, request: &PayoutRequest) -> Result<TransferResult>;

    /// Poll payout status by provider reference
    async fn payout_status(&self, external_reference: &str) -> Result<TransferStatus>;

    /// Total USDC held custodially for the platform
    async fn custodial_balance(&self) -> Result<Decimal>;
}

/// In-memory wallet provider for tests and demos
pub struct MockWalletProvider {
    latency_ms: u64,
    success_rate: f64,
    balance: Arc<RwLock<Decimal>>,
    transfers: Arc<RwLock<HashMap<String, TransferStatus>>>,
}

impl MockWalletProvider {
    /// Create mock with configurable latency and success rate
    pub fn new(latency_ms: u64, success_rate: f64, balance: Decimal) -> Self {
        Self {
            latency_ms,
            success_rate,
            balance: Arc::new(RwLock::new(balance)),
            transfers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Adjust the mock custodial balance (simulating external movement)
    pub async fn set_balance(&self, balance: Decimal) {
        *self.balance.write().await = balance;
    }

    /// Force an in-flight payout into a terminal status
    pub async fn complete_payout(&self, external_reference: &str, status: TransferStatus) {
        let mut transfers = self.transfers.write().await;
        if let Some(s) = transfers.get_mut(external_reference) {
            *s = status;
        }
    }

    fn should_succeed(&self) -> bool {
        let mut rng = rand::thread_rng();
        rng.gen::<f64>() <= self.success_rate
    }
}

#[async_trait]
impl WalletProvider for MockWalletProvider {
    async fn send_payout(&self, request: &PayoutRequest) -> Result<TransferResult> {
        info!(
            "Mock wallet: payout {} USDC to {} on {}",
            request.amount, request.to_address, request.chain
        );

        // Simulate network latency
        tokio::time::sleep(Duration::from_millis(self.latency_ms)).await;

        // Simulate random failures
        if !self.should_succeed() {
            warn!("Mock wallet: simulated payout failure");
            return Err(Error::Transient("Simulated wallet failure".to_string()));
        }

        let external_reference = format!("WALLET-{}", request.withdrawal_id);
        let now = Utc::now();

        {
            let mut balance = self.balance.write().await;
            *balance -= request.amount;
        }
        self.transfers
            .write()
            .await
            .insert(external_reference.clone(), TransferStatus::Completed);

        Ok(TransferResult {
            external_reference,
            status: TransferStatus::Completed,
            initiated_at: now,
        })
    }

    async fn payout_status(&self, external_reference: &str) -> Result<TransferStatus> {
        tokio::time::sleep(Duration::from_millis(self.latency_ms / 2)).await;

        let transfers = self.transfers.read().await;
        transfers
            .get(external_reference)
            .copied()
            .ok_or_else(|| Error::TransferNotFound(external_reference.to_string()))
    }

    async fn custodial_balance(&self) -> Result<Decimal> {
        tokio::time::sleep(Duration::from_millis(self.latency_ms / 4)).await;
        Ok(*self.balance.read().await)
    }
}
