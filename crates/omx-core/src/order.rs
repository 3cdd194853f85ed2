//! Order request model and identifiers.
//!
//! `OrderRequest` is the caller-facing description of a desired order.
//! Requests are validated fail-fast: invalid fields are rejected before
//! any exchange I/O happens.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::decimal::Qty;
use crate::error::{CoreError, Result};

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// How the order should reach the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionKind {
    /// Limit order resting on the book, repriced as the book moves.
    Maker,
    /// Market order crossing the spread.
    Taker,
}

impl fmt::Display for ExecutionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Maker => write!(f, "maker"),
            Self::Taker => write!(f, "taker"),
        }
    }
}

/// Margin mode applied per symbol before submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarginMode {
    #[default]
    Isolated,
    Cross,
}

impl fmt::Display for MarginMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Isolated => write!(f, "isolated"),
            Self::Cross => write!(f, "cross"),
        }
    }
}

/// Venue identifier (e.g. "bybit", "kucoin").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExchangeId(String);

impl ExchangeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ExchangeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ExchangeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Internal order correlation ID.
///
/// Every event and the final report for an order share this key.
/// Format: `omx_{timestamp_ms}_{uuid_short}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(String);

impl OrderId {
    /// Create a new unique order ID.
    pub fn new() -> Self {
        let ts = chrono::Utc::now().timestamp_millis();
        let uuid_short = &Uuid::new_v4().to_string()[..8];
        Self(format!("omx_{ts}_{uuid_short}"))
    }

    /// Create from an exchange-assigned ID (for parsing responses).
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self::from_string(s)
    }
}

/// Request to place an order.
///
/// Immutable once created; `extra_params` are passed verbatim to every
/// exchange call that accepts params.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Trading symbol (e.g. "BTC/USDT").
    pub symbol: String,
    /// Order side (buy or sell).
    pub side: OrderSide,
    /// Amount to trade in base currency. Must be positive.
    pub amount: Qty,
    /// Maker (limit) or taker (market) execution.
    pub kind: ExecutionKind,
    /// Target venue. Must be non-empty.
    pub exchange_id: ExchangeId,
    /// Leverage to apply before submission. Must be >= 1.
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    /// Margin mode to apply before submission.
    #[serde(default)]
    pub margin_mode: MarginMode,
    /// Exchange-specific parameters, forwarded verbatim.
    #[serde(default)]
    pub extra_params: BTreeMap<String, String>,
}

fn default_leverage() -> u32 {
    1
}

impl OrderRequest {
    /// Validate the request before any I/O.
    ///
    /// Checks: non-empty symbol, non-empty exchange_id, amount > 0,
    /// leverage >= 1.
    pub fn validate(&self) -> Result<()> {
        if self.symbol.is_empty() {
            return Err(CoreError::InvalidRequest("empty symbol".to_string()));
        }
        if self.exchange_id.is_empty() {
            return Err(CoreError::InvalidRequest("empty exchange_id".to_string()));
        }
        if !self.amount.is_positive() {
            return Err(CoreError::InvalidRequest(format!(
                "invalid order amount: {}",
                self.amount
            )));
        }
        if self.leverage < 1 {
            return Err(CoreError::InvalidRequest(format!(
                "invalid leverage: {}",
                self.leverage
            )));
        }
        Ok(())
    }
}

/// Non-empty ordered batch of order requests, consumed once per router call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBatch(Vec<OrderRequest>);

impl OrderBatch {
    /// Create a batch. Fails on an empty input.
    pub fn new(orders: Vec<OrderRequest>) -> Result<Self> {
        if orders.is_empty() {
            return Err(CoreError::InvalidRequest("empty order batch".to_string()));
        }
        Ok(Self(orders))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, OrderRequest> {
        self.0.iter()
    }

    pub fn into_inner(self) -> Vec<OrderRequest> {
        self.0
    }
}

impl<'a> IntoIterator for &'a OrderBatch {
    type Item = &'a OrderRequest;
    type IntoIter = std::slice::Iter<'a, OrderRequest>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_request() -> OrderRequest {
        OrderRequest {
            symbol: "BTC/USDT".to_string(),
            side: OrderSide::Buy,
            amount: Qty::new(dec!(0.1)),
            kind: ExecutionKind::Taker,
            exchange_id: ExchangeId::from("bybit"),
            leverage: 1,
            margin_mode: MarginMode::Isolated,
            extra_params: BTreeMap::new(),
        }
    }

    #[test]
    fn test_valid_request() {
        assert!(sample_request().validate().is_ok());
    }

    #[test]
    fn test_zero_amount_rejected() {
        let mut req = sample_request();
        req.amount = Qty::ZERO;
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_negative_amount_rejected() {
        let mut req = sample_request();
        req.amount = Qty::new(dec!(-1));
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_empty_exchange_rejected() {
        let mut req = sample_request();
        req.exchange_id = ExchangeId::from("");
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_zero_leverage_rejected() {
        let mut req = sample_request();
        req.leverage = 0;
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_empty_batch_rejected() {
        assert!(OrderBatch::new(vec![]).is_err());
    }

    #[test]
    fn test_order_id_unique() {
        let id1 = OrderId::new();
        let id2 = OrderId::new();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("omx_"));
    }

    #[test]
    fn test_side_opposite() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.opposite(), OrderSide::Buy);
    }
}
