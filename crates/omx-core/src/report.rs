//! Immutable execution report.
//!
//! One report is produced per order per batch, at the terminal transition.
//! Fields are private and only reachable through read accessors; the only
//! way to construct a report is [`ReportBuilder::build`], which validates
//! the invariants and closes the value.

use serde::Serialize;

use crate::decimal::{Price, Qty};
use crate::error::{CoreError, Result};
use crate::order::ExchangeId;
use crate::state::OrderState;

/// Outcome of a single order execution.
///
/// Invariants enforced at construction:
/// - `exchange_id` is non-empty
/// - `fill_latency_ms >= 0` (computed as `close_ts - submit_ts`, clamped)
/// - `filled_amount >= 0`
/// - a `filled` final state carries a fill price
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionReport {
    order_id: String,
    exchange_id: ExchangeId,
    symbol: String,
    final_state: OrderState,
    filled_amount: Qty,
    avg_price: Option<Price>,
    fill_latency_ms: i64,
    submit_ts_ms: i64,
    close_ts_ms: i64,
    failure_reason: Option<String>,
}

impl ExecutionReport {
    pub fn order_id(&self) -> &str {
        &self.order_id
    }

    pub fn exchange_id(&self) -> &ExchangeId {
        &self.exchange_id
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn final_state(&self) -> OrderState {
        self.final_state
    }

    pub fn filled_amount(&self) -> Qty {
        self.filled_amount
    }

    pub fn avg_price(&self) -> Option<Price> {
        self.avg_price
    }

    pub fn fill_latency_ms(&self) -> i64 {
        self.fill_latency_ms
    }

    pub fn submit_ts_ms(&self) -> i64 {
        self.submit_ts_ms
    }

    pub fn close_ts_ms(&self) -> i64 {
        self.close_ts_ms
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn is_filled(&self) -> bool {
        self.final_state == OrderState::Filled
    }
}

/// Builder for [`ExecutionReport`]. Validates on `build`.
#[derive(Debug, Clone, Default)]
pub struct ReportBuilder {
    order_id: String,
    exchange_id: Option<ExchangeId>,
    symbol: String,
    final_state: OrderState,
    filled_amount: Qty,
    avg_price: Option<Price>,
    submit_ts_ms: i64,
    close_ts_ms: i64,
    failure_reason: Option<String>,
}

impl ReportBuilder {
    pub fn new(exchange_id: ExchangeId, symbol: impl Into<String>) -> Self {
        Self {
            exchange_id: Some(exchange_id),
            symbol: symbol.into(),
            ..Self::default()
        }
    }

    pub fn order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = order_id.into();
        self
    }

    pub fn final_state(mut self, state: OrderState) -> Self {
        self.final_state = state;
        self
    }

    pub fn filled_amount(mut self, filled: Qty) -> Self {
        self.filled_amount = filled;
        self
    }

    pub fn avg_price(mut self, price: Option<Price>) -> Self {
        self.avg_price = price;
        self
    }

    pub fn submit_ts_ms(mut self, ts: i64) -> Self {
        self.submit_ts_ms = ts;
        self
    }

    pub fn close_ts_ms(mut self, ts: i64) -> Self {
        self.close_ts_ms = ts;
        self
    }

    pub fn failure_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }

    /// Validate and close the report. Any violated invariant is a
    /// [`CoreError::Validation`].
    pub fn build(self) -> Result<ExecutionReport> {
        let exchange_id = self
            .exchange_id
            .ok_or_else(|| CoreError::Validation("missing exchange_id".to_string()))?;
        if exchange_id.is_empty() {
            return Err(CoreError::Validation("empty exchange_id".to_string()));
        }
        if self.symbol.is_empty() {
            return Err(CoreError::Validation("empty symbol".to_string()));
        }
        if self.filled_amount.inner().is_sign_negative() {
            return Err(CoreError::Validation(format!(
                "negative filled amount: {}",
                self.filled_amount
            )));
        }
        if self.final_state == OrderState::Filled && self.avg_price.is_none() {
            return Err(CoreError::Validation(
                "filled report without a fill price".to_string(),
            ));
        }
        if self.close_ts_ms < self.submit_ts_ms {
            return Err(CoreError::Validation(format!(
                "close_ts {} before submit_ts {}",
                self.close_ts_ms, self.submit_ts_ms
            )));
        }

        Ok(ExecutionReport {
            order_id: self.order_id,
            exchange_id,
            symbol: self.symbol,
            final_state: self.final_state,
            filled_amount: self.filled_amount,
            avg_price: self.avg_price,
            fill_latency_ms: self.close_ts_ms - self.submit_ts_ms,
            submit_ts_ms: self.submit_ts_ms,
            close_ts_ms: self.close_ts_ms,
            failure_reason: self.failure_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn builder() -> ReportBuilder {
        ReportBuilder::new(ExchangeId::from("bybit"), "BTC/USDT")
            .order_id("ord-1")
            .final_state(OrderState::Filled)
            .filled_amount(Qty::new(dec!(0.1)))
            .avg_price(Some(Price::new(dec!(43200))))
            .submit_ts_ms(1_000)
            .close_ts_ms(1_420)
    }

    #[test]
    fn test_build_filled_report() {
        let report = builder().build().unwrap();
        assert_eq!(report.exchange_id().as_str(), "bybit");
        assert_eq!(report.final_state(), OrderState::Filled);
        assert_eq!(report.fill_latency_ms(), 420);
        assert!(report.is_filled());
    }

    #[test]
    fn test_latency_is_close_minus_submit() {
        let report = builder().submit_ts_ms(100).close_ts_ms(350).build().unwrap();
        assert_eq!(report.fill_latency_ms(), 250);
        assert!(report.fill_latency_ms() >= 0);
    }

    #[test]
    fn test_empty_exchange_id_rejected() {
        let err = ReportBuilder::new(ExchangeId::from(""), "BTC/USDT")
            .final_state(OrderState::Failed)
            .build()
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_negative_latency_rejected() {
        let err = builder().submit_ts_ms(2_000).close_ts_ms(1_000).build().unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_filled_requires_price() {
        let err = builder().avg_price(None).build().unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_failed_report_with_reason() {
        let report = builder()
            .final_state(OrderState::Failed)
            .filled_amount(Qty::ZERO)
            .avg_price(None)
            .failure_reason("exchange_not_found")
            .build()
            .unwrap();
        assert_eq!(report.failure_reason(), Some("exchange_not_found"));
        assert!(!report.is_filled());
    }
}
