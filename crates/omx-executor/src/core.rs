//! Shared executor core.
//!
//! Both executor variants delegate to [`ExecutorCore`] for request
//! validation, the pre-submit sweep, the spread gate, order submission,
//! REST polling, the taker fallback, and report construction.
//! Event schemas are produced here once, so REST and WS emissions are
//! field-for-field identical.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use omx_core::{
    ExecutionReport, ExecutionStrategy, ExecutorConfig, OpenOrder, OrderId, OrderRequest,
    OrderSide, OrderState, Qty, ReportBuilder,
};
use omx_events::{EventBus, EventName, StructuredEvent};
use omx_exchange::{ExchangeApi, OrderSnapshot, OrderStatus};

use crate::error::{ExecError, ExecResult};
use crate::rejection::RejectionSeverity;
use crate::reprice::{decide, RepriceDecision};

/// Backoff ladder for consecutive `fetch_order` failures.
const FETCH_BACKOFF: [Duration; 4] = [
    Duration::from_millis(500),
    Duration::from_millis(1_000),
    Duration::from_millis(2_000),
    Duration::from_millis(4_000),
];

/// Attempts for `create_market_order` on transient errors.
const TAKER_CREATE_MAX_ATTEMPTS: u32 = 3;

/// Correlation context threaded through every event of one order.
#[derive(Debug, Clone)]
pub(crate) struct OrderCtx {
    pub order_id: String,
    pub symbol: String,
    pub exchange_id: String,
    pub side: OrderSide,
}

impl OrderCtx {
    pub(crate) fn new(request: &OrderRequest) -> Self {
        Self {
            order_id: String::new(),
            symbol: request.symbol.clone(),
            exchange_id: request.exchange_id.as_str().to_string(),
            side: request.side,
        }
    }
}

/// Emit a structured event for an order. Free function so spawned watcher
/// tasks can emit with a cloned bus handle.
pub(crate) fn emit_event(bus: &EventBus, name: EventName, ctx: &OrderCtx, payload: Value) {
    bus.emit(
        StructuredEvent::new(name, ctx.order_id.clone(), ctx.symbol.clone(), ctx.exchange_id.clone())
            .with_payload(payload),
    );
}

fn dec_f64(d: Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

/// Shared core for both executor variants.
pub struct ExecutorCore {
    config: ExecutorConfig,
    bus: Arc<EventBus>,
}

impl ExecutorCore {
    pub fn new(config: ExecutorConfig, bus: Arc<EventBus>) -> Self {
        Self { config, bus }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub(crate) fn emit(&self, name: EventName, ctx: &OrderCtx, payload: Value) {
        emit_event(&self.bus, name, ctx, payload);
    }

    pub(crate) fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Best-effort sweep of lingering open orders for the symbol before a
    /// new submission. Failures are logged and ignored.
    pub(crate) async fn sweep_open_orders(&self, exchange: &dyn ExchangeApi, symbol: &str) {
        match exchange.fetch_open_orders(symbol).await {
            Ok(open_orders) => {
                for order in open_orders {
                    if let Err(e) = exchange.cancel_order(&order.order_id, symbol).await {
                        debug!(symbol, order_id = %order.order_id, error = %e, "sweep cancel failed");
                    }
                }
            }
            Err(e) => debug!(symbol, error = %e, "sweep fetch_open_orders failed"),
        }
    }

    /// Pre-submit spread gate for the BEST_PRICE strategy.
    ///
    /// Waits for the spread to narrow below `max_spread_pct`, emitting
    /// `order_spread_blocked` on each blocked observation. After
    /// `spread_retry_budget` blocked observations the order fails with a
    /// spread reason.
    pub(crate) async fn spread_gate(
        &self,
        exchange: &dyn ExchangeApi,
        ctx: &OrderCtx,
    ) -> ExecResult<()> {
        if self.config.strategy != ExecutionStrategy::BestPrice {
            return Ok(());
        }

        let started = Instant::now();
        let deadline = started + self.config.timeout();
        let mut blocked = 0u32;
        loop {
            if Instant::now() >= deadline {
                return Err(ExecError::OrderTimedOut {
                    symbol: ctx.symbol.clone(),
                    kind: "spread-gate".to_string(),
                    timeout_ms: self.config.timeout_ms,
                });
            }
            let spread = match exchange.fetch_order_book(&ctx.symbol).await {
                Ok(book) => book.spread_pct(),
                Err(e) => {
                    debug!(symbol = %ctx.symbol, error = %e, "spread gate book fetch failed");
                    None
                }
            };

            if let Some(spread) = spread {
                if spread <= self.config.max_spread_pct {
                    return Ok(());
                }
                self.emit(
                    EventName::OrderSpreadBlocked,
                    ctx,
                    json!({
                        "spread_pct": dec_f64(spread),
                        "max_spread_pct": dec_f64(self.config.max_spread_pct),
                        "elapsed_ms": started.elapsed().as_millis() as u64,
                    }),
                );
                blocked += 1;
                if blocked >= self.config.spread_retry_budget {
                    return Err(ExecError::SpreadTooWide {
                        symbol: ctx.symbol.clone(),
                        spread_pct: spread.to_string(),
                        max_spread_pct: self.config.max_spread_pct.to_string(),
                    });
                }
            }

            tokio::time::sleep(self.config.poll_interval(started.elapsed())).await;
        }
    }

    /// Submit a limit order.
    ///
    /// Fatal rejections fail the order immediately with an
    /// `order_rejected` event; transient errors return `Ok(None)` so the
    /// caller can retry on the next book update or poll tick.
    pub(crate) async fn submit_limit(
        &self,
        exchange: &dyn ExchangeApi,
        request: &OrderRequest,
        ctx: &mut OrderCtx,
        price: omx_core::Price,
    ) -> ExecResult<Option<OpenOrder>> {
        match exchange
            .create_limit_order(&ctx.symbol, request.side, request.amount, price, &request.extra_params)
            .await
        {
            Ok(snap) => {
                ctx.order_id = snap.order_id.clone();
                let submit_ts = Self::now_ms();
                info!(symbol = %ctx.symbol, order_id = %ctx.order_id, %price, "limit order created");
                self.emit(
                    EventName::OrderSubmitted,
                    ctx,
                    json!({
                        "kind": "limit",
                        "price": price.to_string(),
                        "amount": request.amount.to_string(),
                    }),
                );
                let mut open = OpenOrder::new(
                    OrderId::from_string(snap.order_id),
                    ctx.symbol.clone(),
                    request.side,
                    request.amount,
                    Some(price),
                    submit_ts,
                );
                open.transition(OrderState::Monitoring, submit_ts)?;
                Ok(Some(open))
            }
            Err(e) => match RejectionSeverity::classify(&e) {
                RejectionSeverity::Fatal => {
                    warn!(symbol = %ctx.symbol, error = %e, "fatal rejection creating limit order");
                    self.emit(EventName::OrderRejected, ctx, json!({ "reason": e.to_string() }));
                    Err(ExecError::OrderRejected(e.to_string()))
                }
                RejectionSeverity::Transient => {
                    debug!(symbol = %ctx.symbol, error = %e, "transient limit order failure, will retry");
                    Ok(None)
                }
            },
        }
    }

    /// Poll `fetch_order` until the order reaches a terminal venue
    /// status.
    ///
    /// Emits partial-fill and completion events, applies the adaptive
    /// poll cadence and the fetch-failure backoff ladder, and enforces
    /// the deadline.
    pub(crate) async fn poll_until_closed(
        &self,
        exchange: &dyn ExchangeApi,
        ctx: &OrderCtx,
        open: &mut OpenOrder,
        deadline: Instant,
        timeout_kind: &str,
    ) -> ExecResult<OrderSnapshot> {
        let started = Instant::now();
        let mut fetch_failures = 0usize;

        loop {
            if Instant::now() >= deadline {
                return Err(ExecError::OrderTimedOut {
                    symbol: ctx.symbol.clone(),
                    kind: timeout_kind.to_string(),
                    timeout_ms: self.config.timeout_ms,
                });
            }

            match exchange.fetch_order(open.order_id.as_str(), &ctx.symbol).await {
                Ok(snap) => {
                    fetch_failures = 0;
                    if let Some(result) = self.apply_snapshot(ctx, open, &snap)? {
                        return Ok(result);
                    }
                }
                Err(e) => {
                    let backoff = FETCH_BACKOFF[fetch_failures.min(FETCH_BACKOFF.len() - 1)];
                    fetch_failures += 1;
                    warn!(
                        symbol = %ctx.symbol,
                        attempt = fetch_failures,
                        error = %e,
                        "fetch_order failed"
                    );
                    if fetch_failures >= FETCH_BACKOFF.len() {
                        return Err(ExecError::Adapter(e));
                    }
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            }

            tokio::time::sleep(self.config.poll_interval(started.elapsed())).await;
        }
    }

    /// Fold a venue snapshot into the open order.
    ///
    /// Returns `Ok(Some(snap))` when the order completed, `Ok(None)` when
    /// monitoring continues, and an error for terminal cancel/reject.
    pub(crate) fn apply_snapshot(
        &self,
        ctx: &OrderCtx,
        open: &mut OpenOrder,
        snap: &OrderSnapshot,
    ) -> ExecResult<Option<OrderSnapshot>> {
        let now = Self::now_ms();
        match snap.status {
            OrderStatus::Closed => {
                open.apply_fill(snap.filled, now);
                open.transition(OrderState::Filled, now)?;
                self.emit(
                    EventName::OrderFillComplete,
                    ctx,
                    json!({
                        "filled": snap.filled.to_string(),
                        "fill_price": snap.avg_price.map(|p| p.to_string()),
                    }),
                );
                Ok(Some(snap.clone()))
            }
            OrderStatus::Canceled => {
                open.transition(OrderState::Cancelled, now)?;
                self.emit(EventName::OrderCancelled, ctx, Value::Null);
                Err(ExecError::OrderCancelled(format!(
                    "order {} cancelled on venue",
                    snap.order_id
                )))
            }
            OrderStatus::Rejected => {
                open.transition(OrderState::Rejected, now)?;
                self.emit(
                    EventName::OrderRejected,
                    ctx,
                    json!({ "reason": "rejected by venue" }),
                );
                Err(ExecError::OrderRejected(format!(
                    "order {} rejected by venue",
                    snap.order_id
                )))
            }
            OrderStatus::Open => {
                if snap.filled > open.filled {
                    open.apply_fill(snap.filled, now);
                    if open.state == OrderState::Monitoring {
                        open.transition(OrderState::PartiallyFilled, now)?;
                    }
                    self.emit(
                        EventName::OrderFillPartial,
                        ctx,
                        json!({
                            "filled": snap.filled.to_string(),
                            "remaining": snap.remaining().to_string(),
                        }),
                    );
                }
                Ok(None)
            }
        }
    }

    /// Evaluate the reprice policy and emit the matching event.
    ///
    /// Returns true when the cancel-and-replace should proceed.
    pub(crate) fn evaluate_reprice(
        &self,
        ctx: &OrderCtx,
        current: omx_core::Price,
        best: omx_core::Price,
        elapsed: Duration,
    ) -> RepriceDecision {
        let decision = decide(current, best, elapsed, &self.config.reprice);
        match decision {
            RepriceDecision::Suppress(change_pct) => {
                self.emit(
                    EventName::OrderRepriceSuppressed,
                    ctx,
                    json!({
                        "actual": dec_f64(change_pct),
                        "threshold": dec_f64(self.config.reprice.min_reprice_threshold_pct),
                        "prev": current.to_string(),
                        "candidate": best.to_string(),
                    }),
                );
            }
            RepriceDecision::Reprice(new_price) | RepriceDecision::ElapsedOverride(new_price) => {
                self.emit(
                    EventName::OrderRepriced,
                    ctx,
                    json!({
                        "prev": current.to_string(),
                        "new": new_price.to_string(),
                        "elapsed_override": matches!(decision, RepriceDecision::ElapsedOverride(_)),
                    }),
                );
            }
        }
        decision
    }

    /// Cancel the resting order and place a new one at the given price.
    ///
    /// A failed cancel keeps the original order under monitoring (it may
    /// have filled while the cancel was in flight). A transient failure
    /// of the replacement leaves `open` empty so the caller re-places on
    /// the next book observation.
    pub(crate) async fn cancel_and_replace(
        &self,
        exchange: &dyn ExchangeApi,
        request: &OrderRequest,
        ctx: &mut OrderCtx,
        open: &mut Option<OpenOrder>,
        new_price: omx_core::Price,
    ) -> ExecResult<()> {
        let Some(order) = open.take() else {
            return Ok(());
        };
        if let Err(e) = exchange.cancel_order(order.order_id.as_str(), &ctx.symbol).await {
            debug!(symbol = %ctx.symbol, order_id = %order.order_id, error = %e, "reprice cancel failed");
            *open = Some(order);
            return Ok(());
        }
        *open = self.submit_limit(exchange, request, ctx, new_price).await?;
        Ok(())
    }

    /// Maker-timeout taker fallback, shared by both variants.
    ///
    /// Cancels the resting limit order, submits a market order for the
    /// remaining amount, and waits for its result. A market fill yields a
    /// filled report plus `maker_timeout_taker_fallback`; a rejection
    /// emits `order_timed_out` and `order_rejected` and fails the order
    /// with the taker rejection cause.
    pub(crate) async fn taker_fallback(
        &self,
        exchange: &dyn ExchangeApi,
        request: &OrderRequest,
        ctx: &mut OrderCtx,
        open: Option<&OpenOrder>,
        submit_ts_ms: i64,
    ) -> ExecResult<ExecutionReport> {
        let maker_open_duration_ms = Self::now_ms().saturating_sub(submit_ts_ms);

        let (remaining, already_filled) = match open {
            Some(open) => {
                if let Err(e) = exchange.cancel_order(open.order_id.as_str(), &ctx.symbol).await {
                    debug!(symbol = %ctx.symbol, order_id = %open.order_id, error = %e, "fallback cancel failed");
                }
                (open.remaining(), open.filled)
            }
            None => (request.amount, Qty::ZERO),
        };

        info!(
            symbol = %ctx.symbol,
            remaining = %remaining,
            maker_open_duration_ms,
            "maker timed out, falling back to taker"
        );

        let result = self
            .fallback_market_fill(exchange, request, ctx, remaining)
            .await;

        match result {
            Ok(snap) => {
                self.emit(
                    EventName::MakerTimeoutTakerFallback,
                    ctx,
                    json!({ "maker_open_duration_ms": maker_open_duration_ms }),
                );
                let total_filled = already_filled + snap.filled;
                let report = ReportBuilder::new(request.exchange_id.clone(), ctx.symbol.clone())
                    .order_id(snap.order_id.clone())
                    .final_state(OrderState::Filled)
                    .filled_amount(total_filled)
                    .avg_price(snap.avg_price)
                    .submit_ts_ms(submit_ts_ms)
                    .close_ts_ms(Self::now_ms().max(submit_ts_ms))
                    .build()?;
                Ok(report)
            }
            Err(ExecError::OrderRejected(reason)) => {
                self.emit(
                    EventName::OrderTimedOut,
                    ctx,
                    json!({ "maker_open_duration_ms": maker_open_duration_ms }),
                );
                // order_rejected already emitted by apply_snapshot.
                Err(ExecError::TakerFallbackFailed(format!(
                    "taker fallback rejected: {reason}"
                )))
            }
            Err(e) => Err(e),
        }
    }

    /// Place the fallback market order and wait for its terminal
    /// snapshot.
    async fn fallback_market_fill(
        &self,
        exchange: &dyn ExchangeApi,
        request: &OrderRequest,
        ctx: &mut OrderCtx,
        amount: Qty,
    ) -> ExecResult<OrderSnapshot> {
        let snap = self
            .create_market_with_retry(exchange, request, ctx, amount)
            .await?;
        if snap.status == OrderStatus::Closed {
            return Ok(snap);
        }
        // Market order resting: poll it to completion on a fresh clock.
        let now = Self::now_ms();
        let mut fallback_open = OpenOrder::new(
            OrderId::from_string(snap.order_id.clone()),
            ctx.symbol.clone(),
            request.side,
            amount,
            None,
            now,
        );
        fallback_open.transition(OrderState::Monitoring, now)?;
        let deadline = Instant::now() + self.config.timeout();
        self.poll_until_closed(exchange, ctx, &mut fallback_open, deadline, "taker-fallback")
            .await
    }

    /// Create a market order, retrying transient errors.
    async fn create_market_with_retry(
        &self,
        exchange: &dyn ExchangeApi,
        request: &OrderRequest,
        ctx: &mut OrderCtx,
        amount: Qty,
    ) -> ExecResult<OrderSnapshot> {
        let mut attempt = 0u32;
        loop {
            match exchange
                .create_market_order(&ctx.symbol, request.side, amount, &request.extra_params)
                .await
            {
                Ok(snap) => {
                    ctx.order_id = snap.order_id.clone();
                    if snap.status == OrderStatus::Rejected {
                        self.emit(
                            EventName::OrderRejected,
                            ctx,
                            json!({ "reason": "market order rejected by venue" }),
                        );
                        return Err(ExecError::OrderRejected(
                            "market order rejected by venue".to_string(),
                        ));
                    }
                    return Ok(snap);
                }
                Err(e) => {
                    attempt += 1;
                    match RejectionSeverity::classify(&e) {
                        RejectionSeverity::Fatal => {
                            self.emit(EventName::OrderRejected, ctx, json!({ "reason": e.to_string() }));
                            return Err(ExecError::OrderRejected(e.to_string()));
                        }
                        RejectionSeverity::Transient if attempt < TAKER_CREATE_MAX_ATTEMPTS => {
                            warn!(symbol = %ctx.symbol, attempt, error = %e, "market order create failed, retrying");
                            tokio::time::sleep(Duration::from_millis(
                                self.config.fast_poll_interval_ms,
                            ))
                            .await;
                        }
                        RejectionSeverity::Transient => return Err(ExecError::Adapter(e)),
                    }
                }
            }
        }
    }

    /// Submit a market (taker) order and emit `order_submitted`.
    pub(crate) async fn submit_market(
        &self,
        exchange: &dyn ExchangeApi,
        request: &OrderRequest,
        ctx: &mut OrderCtx,
    ) -> ExecResult<OrderSnapshot> {
        let snap = self
            .create_market_with_retry(exchange, request, ctx, request.amount)
            .await?;
        self.emit(
            EventName::OrderSubmitted,
            ctx,
            json!({
                "kind": "market",
                "amount": request.amount.to_string(),
            }),
        );
        Ok(snap)
    }

    /// Build the filled report for a completed snapshot.
    pub(crate) fn filled_report(
        &self,
        request: &OrderRequest,
        snap: &OrderSnapshot,
        submit_ts_ms: i64,
    ) -> ExecResult<ExecutionReport> {
        let report = ReportBuilder::new(request.exchange_id.clone(), request.symbol.clone())
            .order_id(snap.order_id.clone())
            .final_state(OrderState::Filled)
            .filled_amount(snap.filled)
            .avg_price(snap.avg_price)
            .submit_ts_ms(submit_ts_ms)
            .close_ts_ms(Self::now_ms().max(submit_ts_ms))
            .build()?;
        Ok(report)
    }

    /// Convert a terminal error into the order's failure report.
    ///
    /// Also emits `order_timed_out` for terminal timeouts (a taker order
    /// with no fallback path left).
    pub(crate) fn failure_report(
        &self,
        request: &OrderRequest,
        ctx: &OrderCtx,
        err: &ExecError,
        submit_ts_ms: i64,
        filled: Qty,
    ) -> ExecutionReport {
        if let ExecError::OrderTimedOut { .. } = err {
            self.emit(
                EventName::OrderTimedOut,
                ctx,
                json!({ "timeout_ms": self.config.timeout_ms }),
            );
        }
        // An invalid request can reach this path with empty identifiers;
        // substitute so the report invariants still hold.
        let exchange_id = if request.exchange_id.is_empty() {
            omx_core::ExchangeId::from("unknown")
        } else {
            request.exchange_id.clone()
        };
        let symbol = if request.symbol.is_empty() {
            "unknown".to_string()
        } else {
            request.symbol.clone()
        };
        let now = Self::now_ms();
        ReportBuilder::new(exchange_id, symbol)
            .order_id(ctx.order_id.clone())
            .final_state(err.final_state())
            .filled_amount(filled)
            .submit_ts_ms(submit_ts_ms)
            .close_ts_ms(now.max(submit_ts_ms))
            .failure_reason(err.to_string())
            .build()
            .expect("sanitized failure report fields are valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omx_core::{ExchangeId, MarginMode, Price, RepriceConfig};
    use omx_exchange::mock::{ladder_book, MockCall, MockExchange};
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn request(kind: omx_core::ExecutionKind) -> OrderRequest {
        OrderRequest {
            symbol: "BTC/USDT".to_string(),
            side: OrderSide::Buy,
            amount: Qty::new(dec!(0.1)),
            kind,
            exchange_id: ExchangeId::from("bybit"),
            leverage: 1,
            margin_mode: MarginMode::Isolated,
            extra_params: BTreeMap::new(),
        }
    }

    fn core_with(config: ExecutorConfig) -> (ExecutorCore, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new());
        (ExecutorCore::new(config, bus.clone()), bus)
    }

    #[tokio::test]
    async fn test_spread_gate_fast_strategy_skips() {
        let (core, _bus) = core_with(ExecutorConfig::default());
        let ex = MockExchange::new("bybit");
        let ctx = OrderCtx::new(&request(omx_core::ExecutionKind::Maker));
        // No book staged: would fail if the gate actually fetched.
        assert!(core.spread_gate(&ex, &ctx).await.is_ok());
    }

    #[tokio::test]
    async fn test_spread_gate_blocks_then_fails() {
        let config = ExecutorConfig {
            strategy: ExecutionStrategy::BestPrice,
            max_spread_pct: dec!(0.001),
            spread_retry_budget: 2,
            fast_poll_interval_ms: 5,
            ..Default::default()
        };
        let (core, bus) = core_with(config);
        let ex = MockExchange::new("bybit");
        // 1% spread, permanently too wide.
        ex.set_book("BTC/USDT", ladder_book(dec!(100), dec!(101)));
        let ctx = OrderCtx::new(&request(omx_core::ExecutionKind::Maker));

        let err = core.spread_gate(&ex, &ctx).await.unwrap_err();
        assert!(matches!(err, ExecError::SpreadTooWide { .. }));
        assert_eq!(bus.events_named(EventName::OrderSpreadBlocked).len(), 2);
    }

    #[tokio::test]
    async fn test_spread_gate_passes_when_narrow() {
        let config = ExecutorConfig {
            strategy: ExecutionStrategy::BestPrice,
            max_spread_pct: dec!(0.05),
            ..Default::default()
        };
        let (core, bus) = core_with(config);
        let ex = MockExchange::new("bybit");
        ex.set_book("BTC/USDT", ladder_book(dec!(100), dec!(100.5)));
        let ctx = OrderCtx::new(&request(omx_core::ExecutionKind::Maker));

        assert!(core.spread_gate(&ex, &ctx).await.is_ok());
        assert!(bus.events_named(EventName::OrderSpreadBlocked).is_empty());
    }

    #[tokio::test]
    async fn test_taker_fallback_places_market_for_remaining() {
        let (core, bus) = core_with(ExecutorConfig::default());
        let ex = MockExchange::new("bybit");
        ex.set_market_fill_price("BTC/USDT", Price::new(dec!(43250)));
        let req = request(omx_core::ExecutionKind::Maker);
        let mut ctx = OrderCtx::new(&req);
        ctx.order_id = "bybit-ord-maker".to_string();

        let submit_ts = ExecutorCore::now_ms() - 1_000;
        let mut open = OpenOrder::new(
            OrderId::from_string("bybit-ord-maker".to_string()),
            "BTC/USDT",
            OrderSide::Buy,
            Qty::new(dec!(0.1)),
            Some(Price::new(dec!(43200))),
            submit_ts,
        );
        open.apply_fill(Qty::new(dec!(0.04)), submit_ts);

        let report = core
            .taker_fallback(&ex, &req, &mut ctx, Some(&open), submit_ts)
            .await
            .unwrap();

        assert_eq!(report.final_state(), OrderState::Filled);
        assert_eq!(report.filled_amount(), Qty::new(dec!(0.1)));

        // Market order sized to the remaining amount.
        let market_amounts: Vec<Qty> = ex
            .calls()
            .iter()
            .filter_map(|c| match c {
                MockCall::CreateMarketOrder { amount, .. } => Some(*amount),
                _ => None,
            })
            .collect();
        assert_eq!(market_amounts, vec![Qty::new(dec!(0.06))]);

        let fallback_events = bus.events_named(EventName::MakerTimeoutTakerFallback);
        assert_eq!(fallback_events.len(), 1);
        assert!(fallback_events[0]
            .payload_field("maker_open_duration_ms")
            .unwrap()
            .as_i64()
            .unwrap()
            >= 1_000);
    }

    #[tokio::test]
    async fn test_taker_fallback_rejection_emits_both_events() {
        let (core, bus) = core_with(ExecutorConfig::default());
        let ex = MockExchange::new("bybit");
        ex.reject_market_orders();
        let req = request(omx_core::ExecutionKind::Maker);
        let mut ctx = OrderCtx::new(&req);

        let submit_ts = ExecutorCore::now_ms();
        let err = core
            .taker_fallback(&ex, &req, &mut ctx, None, submit_ts)
            .await
            .unwrap_err();

        assert!(matches!(err, ExecError::TakerFallbackFailed(_)));
        assert_eq!(bus.events_named(EventName::OrderTimedOut).len(), 1);
        assert_eq!(bus.events_named(EventName::OrderRejected).len(), 1);
        assert!(bus.events_named(EventName::MakerTimeoutTakerFallback).is_empty());
    }

    #[tokio::test]
    async fn test_extra_params_forwarded_to_market_order() {
        let (core, _bus) = core_with(ExecutorConfig::default());
        let ex = MockExchange::new("bybit");
        ex.set_market_fill_price("BTC/USDT", Price::new(dec!(43250)));
        let mut req = request(omx_core::ExecutionKind::Taker);
        req.extra_params.insert("positionIdx".to_string(), "1".to_string());
        let mut ctx = OrderCtx::new(&req);

        core.submit_market(&ex, &req, &mut ctx).await.unwrap();

        let forwarded = ex.calls().iter().any(|c| {
            matches!(c, MockCall::CreateMarketOrder { params, .. }
                if params.get("positionIdx").map(String::as_str) == Some("1"))
        });
        assert!(forwarded);
    }

    #[test]
    fn test_reprice_suppressed_payload_fields() {
        let config = ExecutorConfig {
            reprice: RepriceConfig {
                min_reprice_threshold_pct: dec!(0.001),
                elapsed_override_secs: None,
            },
            ..Default::default()
        };
        let (core, bus) = core_with(config);
        let req = request(omx_core::ExecutionKind::Maker);
        let mut ctx = OrderCtx::new(&req);
        ctx.order_id = "ord-1".to_string();

        let decision = core.evaluate_reprice(
            &ctx,
            Price::new(dec!(43200.00)),
            Price::new(dec!(43200.20)),
            Duration::from_secs(3),
        );
        assert!(!decision.should_reprice());

        let events = bus.events_named(EventName::OrderRepriceSuppressed);
        assert_eq!(events.len(), 1);
        let actual = events[0].payload_field("actual").unwrap().as_f64().unwrap();
        let threshold = events[0].payload_field("threshold").unwrap().as_f64().unwrap();
        assert!((actual - 0.00000463).abs() < 1e-7);
        assert!((threshold - 0.001).abs() < 1e-12);
    }
}
