//! The uniform venue interface.
//!
//! `watch_*` methods follow await-next semantics: each call suspends until
//! the next update arrives on the underlying stream. Monitoring loops call
//! them repeatedly; a network failure surfaces as an `Err` on the awaiting
//! call and the caller decides whether to retry.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use omx_core::{MarginMode, OrderSide, Price, Qty};

use crate::error::AdapterResult;

/// Venue-reported order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Resting on the book (possibly partially filled).
    Open,
    /// Completely filled.
    Closed,
    /// Cancelled.
    Canceled,
    /// Rejected by the venue.
    Rejected,
}

/// Point-in-time order snapshot, as returned by `fetch_order` and pushed
/// by `watch_orders`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    /// Exchange-assigned order ID.
    pub order_id: String,
    /// Trading symbol.
    pub symbol: String,
    /// Current status.
    pub status: OrderStatus,
    /// Original order amount.
    pub amount: Qty,
    /// Amount filled so far.
    pub filled: Qty,
    /// Average fill price, if any quantity filled.
    pub avg_price: Option<Price>,
    /// Venue timestamp of this snapshot (Unix ms).
    pub timestamp_ms: i64,
}

impl OrderSnapshot {
    /// Remaining unfilled amount.
    pub fn remaining(&self) -> Qty {
        self.amount - self.filled
    }
}

/// One price level of an order book side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Price,
    pub qty: Qty,
}

/// Order book snapshot: bids descending, asks ascending.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<Price> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.asks.first().map(|l| l.price)
    }

    /// Bid-ask spread as a fraction of the best bid.
    ///
    /// Returns None when either side is missing or the bid is zero.
    pub fn spread_pct(&self) -> Option<Decimal> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        if !bid.is_positive() {
            return None;
        }
        Some((ask.inner() - bid.inner()) / bid.inner())
    }
}

/// Uniform exchange adapter interface.
///
/// All methods are cancel-safe: dropping the future must not leak venue
/// state beyond an in-flight request.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    /// Venue identifier (e.g. "bybit").
    fn id(&self) -> &str;

    /// Whether the venue exposes WebSocket order-book and order streams.
    fn supports_websocket(&self) -> bool;

    async fn set_margin_mode(&self, symbol: &str, mode: MarginMode) -> AdapterResult<()>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> AdapterResult<()>;

    async fn create_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        amount: Qty,
        price: Price,
        params: &BTreeMap<String, String>,
    ) -> AdapterResult<OrderSnapshot>;

    async fn create_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        amount: Qty,
        params: &BTreeMap<String, String>,
    ) -> AdapterResult<OrderSnapshot>;

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> AdapterResult<()>;

    async fn fetch_order(&self, order_id: &str, symbol: &str) -> AdapterResult<OrderSnapshot>;

    async fn fetch_open_orders(&self, symbol: &str) -> AdapterResult<Vec<OrderSnapshot>>;

    async fn fetch_order_book(&self, symbol: &str) -> AdapterResult<OrderBook>;

    /// Await the next order book update for `symbol`.
    async fn watch_order_book(&self, symbol: &str) -> AdapterResult<OrderBook>;

    /// Await the next batch of order status updates for `symbol`.
    async fn watch_orders(&self, symbol: &str) -> AdapterResult<Vec<OrderSnapshot>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn book(bid: Decimal, ask: Decimal) -> OrderBook {
        OrderBook {
            bids: vec![BookLevel {
                price: Price::new(bid),
                qty: Qty::new(dec!(1)),
            }],
            asks: vec![BookLevel {
                price: Price::new(ask),
                qty: Qty::new(dec!(1)),
            }],
        }
    }

    #[test]
    fn test_spread_pct() {
        let b = book(dec!(100), dec!(101));
        assert_eq!(b.spread_pct().unwrap(), dec!(0.01));
    }

    #[test]
    fn test_spread_missing_side() {
        let b = OrderBook {
            bids: vec![],
            asks: vec![BookLevel {
                price: Price::new(dec!(101)),
                qty: Qty::new(dec!(1)),
            }],
        };
        assert!(b.spread_pct().is_none());
    }

    #[test]
    fn test_snapshot_remaining() {
        let snap = OrderSnapshot {
            order_id: "ord-1".into(),
            symbol: "BTC/USDT".into(),
            status: OrderStatus::Open,
            amount: Qty::new(dec!(1)),
            filled: Qty::new(dec!(0.25)),
            avg_price: Some(Price::new(dec!(43200))),
            timestamp_ms: 0,
        };
        assert_eq!(snap.remaining(), Qty::new(dec!(0.75)));
    }
}
