//! Order lifecycle state machine.
//!
//! Transitions are centralized in [`OrderState::can_transition`]; executors
//! go through [`OpenOrder::transition`] so an illegal move is an error, not
//! a silent overwrite.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::decimal::{Price, Qty};
use crate::error::{CoreError, Result};
use crate::order::{OrderId, OrderSide};

/// State of an order in its lifecycle.
///
/// ```text
/// pending -> submitted -> monitoring <-> partially_filled
///                              |
///        +---------------------+--------------------+
///        v                     v                    v
///      filled            timed_out -> filled|failed
///                         cancelled / rejected / failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    /// Not yet submitted to the exchange.
    #[default]
    Pending,
    /// Accepted by the exchange, not yet monitored.
    Submitted,
    /// Resting on the book, watched for fills and reprices.
    Monitoring,
    /// Some quantity filled, remainder still resting.
    PartiallyFilled,
    /// Completely filled.
    Filled,
    /// Cancelled on the exchange.
    Cancelled,
    /// Maker window expired; taker fallback may still complete the order.
    TimedOut,
    /// Rejected by the exchange.
    Rejected,
    /// Execution failed for any other reason.
    Failed,
}

impl OrderState {
    /// Returns true if no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Cancelled | Self::Rejected | Self::Failed
        )
    }

    /// Whether moving from `self` to `to` follows the lifecycle graph.
    pub fn can_transition(&self, to: OrderState) -> bool {
        use OrderState::*;
        match self {
            Pending => matches!(to, Submitted | Rejected | Failed),
            Submitted => matches!(to, Monitoring | Filled | Cancelled | Rejected | Failed),
            Monitoring => matches!(
                to,
                PartiallyFilled | Filled | TimedOut | Cancelled | Rejected | Failed
            ),
            PartiallyFilled => matches!(
                to,
                Monitoring | PartiallyFilled | Filled | TimedOut | Cancelled | Rejected | Failed
            ),
            // Taker fallback resolves a timeout into a fill or a failure.
            TimedOut => matches!(to, Filled | Failed),
            Filled | Cancelled | Rejected | Failed => false,
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Monitoring => "monitoring",
            Self::PartiallyFilled => "partially_filled",
            Self::Filled => "filled",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A live order tracked by an executor from submission to terminal state.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenOrder {
    /// Exchange-assigned order ID (correlation key).
    pub order_id: OrderId,
    /// Trading symbol.
    pub symbol: String,
    /// Order side.
    pub side: OrderSide,
    /// Current resting limit price (None for market orders).
    pub current_price: Option<Price>,
    /// Original requested amount.
    pub amount: Qty,
    /// Amount filled so far.
    pub filled: Qty,
    /// Current lifecycle state.
    pub state: OrderState,
    /// Submission timestamp (Unix ms).
    pub submit_ts_ms: i64,
    /// Timestamp of the last observed event for this order (Unix ms).
    pub last_event_ts_ms: i64,
}

impl OpenOrder {
    pub fn new(
        order_id: OrderId,
        symbol: impl Into<String>,
        side: OrderSide,
        amount: Qty,
        current_price: Option<Price>,
        submit_ts_ms: i64,
    ) -> Self {
        Self {
            order_id,
            symbol: symbol.into(),
            side,
            current_price,
            amount,
            filled: Qty::ZERO,
            state: OrderState::Submitted,
            submit_ts_ms,
            last_event_ts_ms: submit_ts_ms,
        }
    }

    /// Remaining unfilled amount.
    pub fn remaining(&self) -> Qty {
        self.amount - self.filled
    }

    /// Move to a new state, enforcing the lifecycle graph.
    pub fn transition(&mut self, to: OrderState, ts_ms: i64) -> Result<()> {
        if !self.state.can_transition(to) {
            return Err(CoreError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.last_event_ts_ms = ts_ms;
        Ok(())
    }

    /// Record a fill update, clamping to the order amount.
    pub fn apply_fill(&mut self, filled: Qty, ts_ms: i64) {
        self.filled = filled.min(self.amount);
        self.last_event_ts_ms = ts_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn open_order() -> OpenOrder {
        OpenOrder::new(
            OrderId::from_string("ord-1".to_string()),
            "BTC/USDT",
            OrderSide::Buy,
            Qty::new(dec!(1)),
            Some(Price::new(dec!(43200))),
            1_700_000_000_000,
        )
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut order = open_order();
        assert!(order.transition(OrderState::Monitoring, 1).is_ok());
        assert!(order.transition(OrderState::PartiallyFilled, 2).is_ok());
        assert!(order.transition(OrderState::Monitoring, 3).is_ok());
        assert!(order.transition(OrderState::Filled, 4).is_ok());
        assert!(order.state.is_terminal());
    }

    #[test]
    fn test_timeout_then_fallback_fill() {
        let mut order = open_order();
        order.transition(OrderState::Monitoring, 1).unwrap();
        order.transition(OrderState::TimedOut, 2).unwrap();
        assert!(!order.state.is_terminal());
        order.transition(OrderState::Filled, 3).unwrap();
    }

    #[test]
    fn test_terminal_states_are_sinks() {
        for terminal in [
            OrderState::Filled,
            OrderState::Cancelled,
            OrderState::Rejected,
            OrderState::Failed,
        ] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition(OrderState::Monitoring));
            assert!(!terminal.can_transition(OrderState::Filled));
        }
    }

    #[test]
    fn test_illegal_transition_is_error() {
        let mut order = open_order();
        let err = order.transition(OrderState::TimedOut, 1).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
        // State untouched on failure.
        assert_eq!(order.state, OrderState::Submitted);
    }

    #[test]
    fn test_fill_clamped_to_amount() {
        let mut order = open_order();
        order.apply_fill(Qty::new(dec!(5)), 2);
        assert_eq!(order.filled, Qty::new(dec!(1)));
        assert_eq!(order.remaining(), Qty::ZERO);
    }

    #[test]
    fn test_remaining() {
        let mut order = open_order();
        order.apply_fill(Qty::new(dec!(0.4)), 2);
        assert_eq!(order.remaining(), Qty::new(dec!(0.6)));
    }
}
