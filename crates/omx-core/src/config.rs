//! Executor configuration surface.
//!
//! All durations are expressed in milliseconds or seconds as named; the
//! typed accessors return [`std::time::Duration`]. Configuration is
//! validated before a batch starts; an invalid config is the only error
//! that prevents batch start.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{CoreError, Result};

/// Order execution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecutionStrategy {
    /// Join the top of book immediately; no spread gate.
    #[default]
    #[serde(rename = "fast")]
    Fast,
    /// Wait for an acceptable spread and work deeper book levels early on.
    #[serde(rename = "best-price")]
    BestPrice,
}

/// Reprice policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepriceConfig {
    /// Minimum fractional price change required to reprice
    /// (0.001 = 0.1%). Zero means always reprice on any change.
    #[serde(default)]
    pub min_reprice_threshold_pct: Decimal,
    /// Once elapsed reaches this value, any price change reprices
    /// regardless of the threshold.
    #[serde(default)]
    pub elapsed_override_secs: Option<u64>,
}

impl Default for RepriceConfig {
    fn default() -> Self {
        Self {
            min_reprice_threshold_pct: Decimal::ZERO,
            elapsed_override_secs: None,
        }
    }
}

impl RepriceConfig {
    pub fn elapsed_override(&self) -> Option<Duration> {
        self.elapsed_override_secs.map(Duration::from_secs)
    }
}

/// WebSocket resilience configuration: reconnect backoff, circuit breaker
/// and staleness detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsResilienceConfig {
    /// Base delay for exponential reconnect backoff.
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    /// Cap on the reconnect backoff delay.
    #[serde(default = "default_reconnect_cap_ms")]
    pub reconnect_cap_ms: u64,
    /// Consecutive failures after which the circuit opens for the batch.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Max time with no WS event before a single REST status probe.
    #[serde(default = "default_staleness_window_ms")]
    pub staleness_window_ms: u64,
}

fn default_reconnect_base_delay_ms() -> u64 {
    100
}

fn default_reconnect_cap_ms() -> u64 {
    30_000
}

fn default_max_reconnect_attempts() -> u32 {
    3
}

fn default_staleness_window_ms() -> u64 {
    10_000
}

impl Default for WsResilienceConfig {
    fn default() -> Self {
        Self {
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_cap_ms: default_reconnect_cap_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            staleness_window_ms: default_staleness_window_ms(),
        }
    }
}

impl WsResilienceConfig {
    pub fn staleness_window(&self) -> Duration {
        Duration::from_millis(self.staleness_window_ms)
    }
}

/// Configuration for one executor instance. Immutable after validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Execution strategy.
    #[serde(default)]
    pub strategy: ExecutionStrategy,
    /// Maximum acceptable bid-ask spread as a fraction (0.005 = 0.5%).
    #[serde(default = "default_max_spread_pct")]
    pub max_spread_pct: Decimal,
    /// Maker timeout before falling back to taker.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Poll cadence during the first `fast_poll_window_ms` after submit.
    #[serde(default = "default_fast_poll_interval_ms")]
    pub fast_poll_interval_ms: u64,
    /// Poll cadence after the fast window.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Duration of the fast-poll window.
    #[serde(default = "default_fast_poll_window_ms")]
    pub fast_poll_window_ms: u64,
    /// Blocked-spread observations tolerated before the order fails.
    #[serde(default = "default_spread_retry_budget")]
    pub spread_retry_budget: u32,
    /// Reprice policy.
    #[serde(default)]
    pub reprice: RepriceConfig,
    /// WebSocket resilience parameters.
    #[serde(default)]
    pub ws: WsResilienceConfig,
}

fn default_max_spread_pct() -> Decimal {
    // 0.5%
    Decimal::new(5, 3)
}

fn default_timeout_ms() -> u64 {
    300_000
}

fn default_fast_poll_interval_ms() -> u64 {
    200
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_fast_poll_window_ms() -> u64 {
    10_000
}

fn default_spread_retry_budget() -> u32 {
    10
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            strategy: ExecutionStrategy::default(),
            max_spread_pct: default_max_spread_pct(),
            timeout_ms: default_timeout_ms(),
            fast_poll_interval_ms: default_fast_poll_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            fast_poll_window_ms: default_fast_poll_window_ms(),
            spread_retry_budget: default_spread_retry_budget(),
            reprice: RepriceConfig::default(),
            ws: WsResilienceConfig::default(),
        }
    }
}

impl ExecutorConfig {
    /// Validate the configuration. Must pass before a batch starts.
    pub fn validate(&self) -> Result<()> {
        if self.max_spread_pct.is_sign_negative() || self.max_spread_pct > Decimal::ONE {
            return Err(CoreError::InvalidConfig(format!(
                "max_spread_pct must be in [0, 1], got {}",
                self.max_spread_pct
            )));
        }
        if self.reprice.min_reprice_threshold_pct.is_sign_negative() {
            return Err(CoreError::InvalidConfig(format!(
                "min_reprice_threshold_pct must be >= 0, got {}",
                self.reprice.min_reprice_threshold_pct
            )));
        }
        if self.timeout_ms == 0 {
            return Err(CoreError::InvalidConfig("timeout_ms must be > 0".to_string()));
        }
        if self.poll_interval_ms == 0 || self.fast_poll_interval_ms == 0 {
            return Err(CoreError::InvalidConfig(
                "poll intervals must be > 0".to_string(),
            ));
        }
        if self.ws.max_reconnect_attempts == 0 {
            return Err(CoreError::InvalidConfig(
                "ws.max_reconnect_attempts must be >= 1".to_string(),
            ));
        }
        if self.ws.reconnect_base_delay_ms == 0
            || self.ws.reconnect_cap_ms < self.ws.reconnect_base_delay_ms
        {
            return Err(CoreError::InvalidConfig(
                "ws reconnect delays must satisfy 0 < base <= cap".to_string(),
            ));
        }
        if self.spread_retry_budget == 0 {
            return Err(CoreError::InvalidConfig(
                "spread_retry_budget must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Poll cadence for a given elapsed time since submit.
    pub fn poll_interval(&self, elapsed: Duration) -> Duration {
        if elapsed < Duration::from_millis(self.fast_poll_window_ms) {
            Duration::from_millis(self.fast_poll_interval_ms)
        } else {
            Duration::from_millis(self.poll_interval_ms)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults() {
        let cfg = ExecutorConfig::default();
        assert_eq!(cfg.timeout(), Duration::from_secs(300));
        assert_eq!(cfg.ws.reconnect_base_delay_ms, 100);
        assert_eq!(cfg.ws.reconnect_cap_ms, 30_000);
        assert_eq!(cfg.ws.max_reconnect_attempts, 3);
        assert_eq!(cfg.ws.staleness_window(), Duration::from_secs(10));
        assert_eq!(cfg.reprice.min_reprice_threshold_pct, Decimal::ZERO);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_negative_spread_rejected() {
        let cfg = ExecutorConfig {
            max_spread_pct: dec!(-0.1),
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(CoreError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let cfg = ExecutorConfig {
            timeout_ms: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_cap_below_base_rejected() {
        let cfg = ExecutorConfig {
            ws: WsResilienceConfig {
                reconnect_base_delay_ms: 1_000,
                reconnect_cap_ms: 100,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_adaptive_poll_interval() {
        let cfg = ExecutorConfig::default();
        assert_eq!(
            cfg.poll_interval(Duration::from_secs(2)),
            Duration::from_millis(200)
        );
        assert_eq!(
            cfg.poll_interval(Duration::from_secs(15)),
            Duration::from_millis(1_000)
        );
    }

    #[test]
    fn test_strategy_serde_names() {
        let fast: ExecutionStrategy = serde_json::from_str("\"fast\"").unwrap();
        let best: ExecutionStrategy = serde_json::from_str("\"best-price\"").unwrap();
        assert_eq!(fast, ExecutionStrategy::Fast);
        assert_eq!(best, ExecutionStrategy::BestPrice);
    }
}
