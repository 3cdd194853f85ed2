//! Canonical event names and the structured event record.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Canonical lifecycle event names.
///
/// This set is exhaustive: the engine emits nothing outside it, and the
/// schema of each event is identical whichever executor variant emits it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventName {
    OrderSubmitted,
    OrderRepriced,
    OrderRepriceSuppressed,
    OrderSpreadBlocked,
    OrderFillPartial,
    OrderFillComplete,
    OrderTimedOut,
    OrderCancelled,
    OrderRejected,
    MakerTimeoutTakerFallback,
    WsReconnectAttempt,
    WsCircuitOpen,
    WsRestFallback,
    WsStalenessFallback,
    ExchangeNotFound,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderSubmitted => "order_submitted",
            Self::OrderRepriced => "order_repriced",
            Self::OrderRepriceSuppressed => "order_reprice_suppressed",
            Self::OrderSpreadBlocked => "order_spread_blocked",
            Self::OrderFillPartial => "order_fill_partial",
            Self::OrderFillComplete => "order_fill_complete",
            Self::OrderTimedOut => "order_timed_out",
            Self::OrderCancelled => "order_cancelled",
            Self::OrderRejected => "order_rejected",
            Self::MakerTimeoutTakerFallback => "maker_timeout_taker_fallback",
            Self::WsReconnectAttempt => "ws_reconnect_attempt",
            Self::WsCircuitOpen => "ws_circuit_open",
            Self::WsRestFallback => "ws_rest_fallback",
            Self::WsStalenessFallback => "ws_staleness_fallback",
            Self::ExchangeNotFound => "exchange_not_found",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One structured lifecycle event.
///
/// Every event carries the four correlation fields; `payload` holds the
/// event-specific extras (reprice prices, backoff attempt numbers, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredEvent {
    pub name: EventName,
    pub order_id: String,
    pub symbol: String,
    pub exchange_id: String,
    pub timestamp_ms: i64,
    pub payload: Value,
}

impl StructuredEvent {
    /// Create an event stamped with the current time and an empty payload.
    pub fn new(
        name: EventName,
        order_id: impl Into<String>,
        symbol: impl Into<String>,
        exchange_id: impl Into<String>,
    ) -> Self {
        Self {
            name,
            order_id: order_id.into(),
            symbol: symbol.into(),
            exchange_id: exchange_id.into(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            payload: Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Read a payload field, if present.
    pub fn payload_field(&self, key: &str) -> Option<&Value> {
        self.payload.as_object().and_then(|m| m.get(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_names_are_snake_case() {
        assert_eq!(EventName::OrderSubmitted.as_str(), "order_submitted");
        assert_eq!(
            EventName::MakerTimeoutTakerFallback.as_str(),
            "maker_timeout_taker_fallback"
        );
        assert_eq!(EventName::WsCircuitOpen.as_str(), "ws_circuit_open");
    }

    #[test]
    fn test_event_carries_correlation_fields() {
        let event = StructuredEvent::new(EventName::OrderSubmitted, "ord-1", "BTC/USDT", "bybit")
            .with_payload(json!({"price": "43200"}));
        assert_eq!(event.order_id, "ord-1");
        assert_eq!(event.symbol, "BTC/USDT");
        assert_eq!(event.exchange_id, "bybit");
        assert!(event.timestamp_ms > 0);
        assert_eq!(event.payload_field("price").unwrap(), "43200");
    }

    #[test]
    fn test_event_serializes_with_snake_case_name() {
        let event = StructuredEvent::new(EventName::WsRestFallback, "ord-1", "BTC/USDT", "bybit");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["name"], "ws_rest_fallback");
    }
}
