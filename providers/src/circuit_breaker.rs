//! Per-provider circuit breakers
//!
//! Every external rail (wallet, each conversion provider, brokerage) gets
//! its own breaker. A provider that accumulates too many consecutive
//! failures is cut off for a cooldown period; after the cooldown a small
//! probe budget decides whether it comes back. The treasury failover loop
//! consults the manager before each submit, so an open breaker simply
//! moves traffic to the next provider in priority order.

use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Observable breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow normally
    Closed,
    /// Requests are rejected until the cooldown elapses
    Open,
    /// Probing: a few requests are let through to test recovery
    HalfOpen,
}

/// Breaker tuning
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker
    pub failure_threshold: u32,

    /// How long an open breaker rejects before probing
    pub cooldown: Duration,

    /// Probe successes required to close again
    pub probe_budget: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
            probe_budget: 2,
        }
    }
}

/// Internal state machine. Each variant carries exactly the data its
/// transitions need, so stale counters cannot leak across states.
#[derive(Debug)]
enum Gate {
    Closed { strikes: u32 },
    Open { until: Instant },
    HalfOpen { probes_passed: u32 },
}

/// Circuit breaker for one provider
pub struct CircuitBreaker {
    name: String,
    gate: Mutex<Gate>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a closed breaker for the named provider
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            gate: Mutex::new(Gate::Closed { strikes: 0 }),
            config,
        }
    }

    /// Gate a request. An open breaker whose cooldown has elapsed flips
    /// to half-open and lets the request through as a probe.
    pub fn check(&self) -> Result<()> {
        let mut gate = self.gate.lock();
        match *gate {
            Gate::Closed { .. } | Gate::HalfOpen { .. } => Ok(()),
            Gate::Open { until } => {
                let now = Instant::now();
                if now >= until {
                    info!(provider = %self.name, "Circuit half-open, probing");
                    *gate = Gate::HalfOpen { probes_passed: 0 };
                    Ok(())
                } else {
                    Err(Error::CircuitBreakerOpen {
                        provider: self.name.clone(),
                        reason: format!(
                            "cooling down for {}s more",
                            (until - now).as_secs().max(1)
                        ),
                    })
                }
            }
        }
    }

    /// Report a successful call
    pub fn record_success(&self) {
        let mut gate = self.gate.lock();
        match *gate {
            Gate::Closed { .. } => *gate = Gate::Closed { strikes: 0 },
            Gate::HalfOpen { probes_passed } => {
                let passed = probes_passed + 1;
                if passed >= self.config.probe_budget {
                    info!(provider = %self.name, "Circuit closed after successful probes");
                    *gate = Gate::Closed { strikes: 0 };
                } else {
                    *gate = Gate::HalfOpen {
                        probes_passed: passed,
                    };
                }
            }
            Gate::Open { .. } => {}
        }
    }

    /// Report a failed call
    pub fn record_failure(&self) {
        let mut gate = self.gate.lock();
        match *gate {
            Gate::Closed { strikes } => {
                let strikes = strikes + 1;
                if strikes >= self.config.failure_threshold {
                    warn!(
                        provider = %self.name,
                        strikes,
                        "Circuit opened"
                    );
                    *gate = Gate::Open {
                        until: Instant::now() + self.config.cooldown,
                    };
                } else {
                    *gate = Gate::Closed { strikes };
                }
            }
            Gate::HalfOpen { .. } => {
                warn!(provider = %self.name, "Probe failed, circuit re-opened");
                *gate = Gate::Open {
                    until: Instant::now() + self.config.cooldown,
                };
            }
            Gate::Open { .. } => {}
        }
    }

    /// Current state
    pub fn state(&self) -> CircuitState {
        match *self.gate.lock() {
            Gate::Closed { .. } => CircuitState::Closed,
            Gate::Open { .. } => CircuitState::Open,
            Gate::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    /// Force the breaker closed (operator intervention)
    pub fn reset(&self) {
        info!(provider = %self.name, "Circuit manually reset");
        *self.gate.lock() = Gate::Closed { strikes: 0 };
    }
}

/// Breakers for all providers an engine talks to, keyed by provider name
pub struct CircuitBreakerManager {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerManager {
    /// Create manager; breakers materialize lazily on first use
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            config,
        }
    }

    fn breaker(&self, provider: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock();
        breakers
            .entry(provider.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(provider, self.config.clone()))
            })
            .clone()
    }

    /// Gate a request to the named provider
    pub fn is_request_allowed(&self, provider: &str) -> Result<()> {
        self.breaker(provider).check()
    }

    /// Report a successful call
    pub fn record_success(&self, provider: &str) {
        self.breaker(provider).record_success();
    }

    /// Report a failed call
    pub fn record_failure(&self, provider: &str) {
        self.breaker(provider).record_failure();
    }

    /// State of the named provider's breaker; Closed if never used
    pub fn get_state(&self, provider: &str) -> CircuitState {
        self.breakers
            .lock()
            .get(provider)
            .map(|b| b.state())
            .unwrap_or(CircuitState::Closed)
    }

    /// Force the named breaker closed
    pub fn reset(&self, provider: &str) {
        if let Some(breaker) = self.breakers.lock().get(provider) {
            breaker.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32, cooldown_ms: u64, probes: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            cooldown: Duration::from_millis(cooldown_ms),
            probe_budget: probes,
        }
    }

    #[test]
    fn test_trips_after_consecutive_failures() {
        let cb = CircuitBreaker::new("circle", config(3, 60_000, 2));

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.check().is_ok());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.check().is_err());
    }

    #[test]
    fn test_success_clears_strikes() {
        let cb = CircuitBreaker::new("circle", config(2, 60_000, 1));

        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        // Strikes reset in between, so two non-consecutive failures stay closed
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_cooldown_leads_to_probe_then_close() {
        let cb = CircuitBreaker::new("otc-desk", config(1, 10, 2));

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(20));
        assert!(cb.check().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_failed_probe_reopens() {
        let cb = CircuitBreaker::new("otc-desk", config(1, 10, 2));

        cb.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert!(cb.check().is_ok());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.check().is_err());
    }

    #[test]
    fn test_manager_isolates_providers() {
        let manager = CircuitBreakerManager::new(config(2, 60_000, 2));

        manager.record_failure("wallet");
        manager.record_failure("wallet");
        assert_eq!(manager.get_state("wallet"), CircuitState::Open);
        assert!(manager.is_request_allowed("wallet").is_err());

        // Other providers are unaffected
        assert!(manager.is_request_allowed("circle").is_ok());

        manager.reset("wallet");
        assert_eq!(manager.get_state("wallet"), CircuitState::Closed);
    }
}
