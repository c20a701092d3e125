//! Conversion provider clients (USDC <-> USD)
//!
//! Multiple providers may be registered; the treasury engine tries them
//! in priority order and fails over when one is down or unsupported.

use crate::types::{ConversionDirection, ConversionRequest, TransferResult, TransferStatus};
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

/// Client for a currency conversion provider
#[async_trait]
pub trait ConversionProvider: Send + Sync {
    /// Provider name (used for circuit breaker keys and logs)
    fn name(&self) -> &str;

    /// Lower value is tried first
    fn priority(&self) -> u32;

    /// Whether this provider handles the given direction
    fn supports(&self, direction: ConversionDirection) -> bool;

    /// Submit a conversion order
    async fn submit(&self, request: &ConversionRequest) -> Result<TransferResult>;

    /// Poll order status by provider reference
    async fn status(&self, external_reference: &str) -> Result<TransferStatus>;
}

/// In-memory conversion provider for tests and demos
pub struct MockConversionProvider {
    name: String,
    priority: u32,
    latency_ms: u64,
    success_rate: f64,
    supported: Vec<ConversionDirection>,
    min_order: Option<Decimal>,
    max_order: Option<Decimal>,
    orders: Arc<RwLock<HashMap<String, TransferStatus>>>,
}

impl MockConversionProvider {
    /// Create mock supporting both directions
    pub fn new(name: impl Into<String>, priority: u32, latency_ms: u64, success_rate: f64) -> Self {
        Self {
            name: name.into(),
            priority,
            latency_ms,
            success_rate,
            supported: vec![ConversionDirection::UsdcToUsd, ConversionDirection::UsdToUsdc],
            min_order: None,
            max_order: None,
            orders: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Restrict the supported directions
    pub fn with_supported(mut self, supported: Vec<ConversionDirection>) -> Self {
        self.supported = supported;
        self
    }

    /// Reject orders outside this size window, like a real desk would
    pub fn with_order_limits(mut self, min: Decimal, max: Decimal) -> Self {
        self.min_order = Some(min);
        self.max_order = Some(max);
        self
    }

    fn should_succeed(&self) -> bool {
        let mut rng = rand::thread_rng();
        rng.gen::<f64>() <= self.success_rate
    }
}

#[async_trait]
impl ConversionProvider for MockConversionProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn supports(&self, direction: ConversionDirection) -> bool {
        self.supported.contains(&direction)
    }

    async fn submit(&self, request: &ConversionRequest) -> Result<TransferResult> {
        info!(
            "Mock conversion ({}): {} {} for job {}",
            self.name, request.amount, request.direction, request.job_id
        );

        tokio::time::sleep(Duration::from_millis(self.latency_ms)).await;

        if !self.supports(request.direction) {
            return Err(Error::Permanent(format!(
                "Direction {} not supported by {}",
                request.direction, self.name
            )));
        }

        let too_small = self.min_order.map_or(false, |min| request.amount < min);
        let too_large = self.max_order.map_or(false, |max| request.amount > max);
        if too_small || too_large {
            return Err(Error::Permanent(format!(
                "Order size {} outside {} limits",
                request.amount, self.name
            )));
        }

        if !self.should_succeed() {
            warn!("Mock conversion ({}): simulated failure", self.name);
            return Err(Error::Transient("Simulated conversion failure".to_string()));
        }

        let external_reference = format!("CONV-{}-{}", self.name, request.job_id);
        self.orders
            .write()
            .await
            .insert(external_reference.clone(), TransferStatus::Completed);

        Ok(TransferResult {
            external_reference,
            status: TransferStatus::Completed,
            initiated_at: Utc::now(),
        })
    }

    async fn status(&self, external_reference: &str) -> Result<TransferStatus> {
        tokio::time::sleep(Duration::from_millis(self.latency_ms / 2)).await;

        let orders = self.orders.read().await;
        orders
            .get(external_reference)
            .copied()
            .ok_or_else(|| Error::TransferNotFound(external_reference.to_string()))
    }
}
