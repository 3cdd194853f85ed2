//! Executor error types.
//!
//! Transient conditions (spread wait, WS reconnect, staleness) are
//! recovered locally and never surface here. A terminal `ExecError` is
//! converted into a failed/rejected/timed-out report at the `execute`
//! boundary; it never crosses the router.

use thiserror::Error;

use omx_core::{CoreError, OrderState};
use omx_exchange::AdapterError;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("spread too wide for {symbol}: {spread_pct} > {max_spread_pct}")]
    SpreadTooWide {
        symbol: String,
        spread_pct: String,
        max_spread_pct: String,
    },

    #[error("order rejected: {0}")]
    OrderRejected(String),

    #[error("order cancelled on venue: {0}")]
    OrderCancelled(String),

    #[error("{kind} order for {symbol} timed out after {timeout_ms}ms")]
    OrderTimedOut {
        symbol: String,
        kind: String,
        timeout_ms: u64,
    },

    #[error("taker fallback failed: {0}")]
    TakerFallbackFailed(String),

    #[error("websocket disconnected: {0}")]
    WsDisconnected(String),

    #[error("websocket circuit open for {exchange_id}")]
    WsCircuitOpen { exchange_id: String },

    #[error("websocket not supported by {0}")]
    WsNotSupported(String),

    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ExecError {
    /// Terminal order state this error maps to in the report.
    pub fn final_state(&self) -> OrderState {
        match self {
            Self::OrderRejected(_) => OrderState::Rejected,
            Self::OrderCancelled(_) => OrderState::Cancelled,
            Self::OrderTimedOut { .. } => OrderState::TimedOut,
            _ => OrderState::Failed,
        }
    }
}

pub type ExecResult<T> = Result<T, ExecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_state_mapping() {
        assert_eq!(
            ExecError::OrderRejected("funds".into()).final_state(),
            OrderState::Rejected
        );
        assert_eq!(
            ExecError::OrderCancelled("external".into()).final_state(),
            OrderState::Cancelled
        );
        assert_eq!(
            ExecError::TakerFallbackFailed("rejected".into()).final_state(),
            OrderState::Failed
        );
        assert_eq!(
            ExecError::OrderTimedOut {
                symbol: "BTC/USDT".into(),
                kind: "taker".into(),
                timeout_ms: 300_000
            }
            .final_state(),
            OrderState::TimedOut
        );
        assert_eq!(
            ExecError::WsCircuitOpen {
                exchange_id: "bybit".into()
            }
            .final_state(),
            OrderState::Failed
        );
    }
}
