//! Event-driven WebSocket order executor.
//!
//! Two watcher tasks per order feed the monitoring loop through channels:
//! an order-book watcher (drives reprice) and an order-status watcher
//! (drives fill detection, with reconnect backoff and the circuit
//! breaker). The loop itself is a single `select!` over the two channels,
//! the timeout deadline and the staleness timer. When both streams are
//! quiet it does no work.
//!
//! Resilience:
//! - reconnect delays double from the configured base up to the cap, one
//!   `ws_reconnect_attempt` event per attempt
//! - after the configured number of consecutive failures the session's
//!   circuit opens (`ws_circuit_open`, once per exchange per batch) and
//!   monitoring switches to REST polling (`ws_rest_fallback`)
//! - a quiet order triggers a single REST probe per staleness window
//!   (`ws_staleness_fallback`); the probe never cancels the order
//!
//! All watcher tasks are cancelled on every exit path; nothing outlives
//! `execute`.

use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use omx_core::{
    ExecutionReport, ExecutionStrategy, ExecutorConfig, OpenOrder, OrderRequest, Qty,
    WsResilienceConfig,
};
use omx_events::{EventBus, EventName};
use omx_exchange::{AdapterError, ExchangeApi, OrderBook, OrderSnapshot};

use crate::book::analyze;
use crate::core::{emit_event, ExecutorCore, OrderCtx};
use crate::error::{ExecError, ExecResult};
use crate::rest::RestExecutor;
use crate::session::ExchangeSession;

/// Reconnect delay for a 1-based attempt: `min(base * 2^(n-1), cap)`.
pub(crate) fn backoff_delay_ms(attempt: u32, base_ms: u64, cap_ms: u64) -> u64 {
    let exponent = attempt.saturating_sub(1).min(20);
    base_ms.saturating_mul(1u64 << exponent).min(cap_ms)
}

/// Messages from the order-status watcher to the monitoring loop.
enum OrderStreamMsg {
    Updates(Vec<OrderSnapshot>),
    CircuitOpen,
    Failed(AdapterError),
}

/// Cancels and aborts the watcher tasks on drop, so no background work
/// survives `execute` on any exit path.
struct WatcherGuard {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Drop for WatcherGuard {
    fn drop(&mut self) {
        self.token.cancel();
        for handle in &self.handles {
            handle.abort();
        }
    }
}

/// Order executor using WebSocket streams for monitoring.
pub struct WsExecutor {
    core: ExecutorCore,
}

impl WsExecutor {
    pub fn new(config: ExecutorConfig, bus: Arc<EventBus>) -> Self {
        Self {
            core: ExecutorCore::new(config, bus),
        }
    }

    /// Execute one order to a terminal state.
    ///
    /// Same contract as the REST variant: exactly one immutable report,
    /// errors never propagate past this call.
    pub async fn execute(
        &self,
        request: &OrderRequest,
        session: Arc<ExchangeSession>,
    ) -> ExecutionReport {
        let submit_ts = ExecutorCore::now_ms();
        let mut ctx = OrderCtx::new(request);
        let mut filled = Qty::ZERO;

        match self.run(request, &session, &mut ctx, &mut filled).await {
            Ok(report) => report,
            Err(e) => {
                info!(symbol = %ctx.symbol, error = %e, "order execution failed");
                self.core.failure_report(request, &ctx, &e, submit_ts, filled)
            }
        }
    }

    async fn run(
        &self,
        request: &OrderRequest,
        session: &Arc<ExchangeSession>,
        ctx: &mut OrderCtx,
        filled: &mut Qty,
    ) -> ExecResult<ExecutionReport> {
        request.validate()?;
        let exchange = session.exchange().clone();
        if !exchange.supports_websocket() {
            return Err(ExecError::WsNotSupported(exchange.id().to_string()));
        }

        let config = self.core.config().clone();

        // A sibling order may already have tripped the breaker: this
        // order runs entirely REST-side.
        if session.is_circuit_open() {
            self.core.emit(EventName::WsRestFallback, ctx, json!({}));
            let rest = RestExecutor::new(config, self.core.bus().clone());
            return Ok(rest.execute(request, session.clone()).await);
        }

        self.core.sweep_open_orders(exchange.as_ref(), &ctx.symbol).await;
        self.core.spread_gate(exchange.as_ref(), ctx).await?;

        let started = Instant::now();
        let submit_ts = ExecutorCore::now_ms();
        let deadline_std = started + config.timeout();
        let deadline = tokio::time::Instant::now() + config.timeout();

        let token = CancellationToken::new();
        let (book_tx, mut book_rx) = mpsc::channel::<OrderBook>(64);
        let (order_tx, mut order_rx) = mpsc::channel::<OrderStreamMsg>(64);
        let mut guard = WatcherGuard {
            token: token.clone(),
            handles: Vec::new(),
        };
        guard.handles.push(spawn_book_watcher(
            session.clone(),
            ctx.symbol.clone(),
            config.ws.reconnect_base_delay_ms,
            book_tx,
            token.clone(),
        ));

        let mut open: Option<OpenOrder> = None;
        let mut book_stream_live = true;
        let staleness = tokio::time::sleep(config.ws.staleness_window());
        tokio::pin!(staleness);

        loop {
            let placed = open.is_some();

            tokio::select! {
                biased;

                _ = tokio::time::sleep_until(deadline) => {
                    return self
                        .core
                        .taker_fallback(exchange.as_ref(), request, ctx, open.as_ref(), submit_ts)
                        .await;
                }

                msg = order_rx.recv(), if placed => {
                    match msg {
                        Some(OrderStreamMsg::Updates(updates)) => {
                            staleness
                                .as_mut()
                                .reset(tokio::time::Instant::now() + config.ws.staleness_window());
                            if let Some(order) = open.as_mut() {
                                for snap in updates {
                                    if snap.order_id != order.order_id.as_str() {
                                        continue;
                                    }
                                    if let Some(terminal) =
                                        self.core.apply_snapshot(ctx, order, &snap)?
                                    {
                                        return self.core.filled_report(request, &terminal, submit_ts);
                                    }
                                    *filled = order.filled;
                                }
                            }
                        }
                        Some(OrderStreamMsg::CircuitOpen) => {
                            self.core.emit(EventName::WsRestFallback, ctx, json!({}));
                            if let Some(order) = open.as_mut() {
                                return self
                                    .rest_monitor(exchange.as_ref(), request, ctx, order, submit_ts, deadline_std)
                                    .await;
                            }
                            return Err(ExecError::WsCircuitOpen {
                                exchange_id: ctx.exchange_id.clone(),
                            });
                        }
                        Some(OrderStreamMsg::Failed(e)) => {
                            return Err(ExecError::Adapter(e));
                        }
                        None => {
                            return Err(ExecError::WsDisconnected(
                                "order status stream ended".to_string(),
                            ));
                        }
                    }
                }

                maybe_book = book_rx.recv(), if book_stream_live => {
                    match maybe_book {
                        Some(book) => {
                            let elapsed = started.elapsed();
                            if open.is_none() {
                                if let Some(view) =
                                    analyze(&book, request.side, config.strategy, elapsed, None)
                                {
                                    let spread_ok = config.strategy
                                        != ExecutionStrategy::BestPrice
                                        || view.spread_pct <= config.max_spread_pct;
                                    if spread_ok {
                                        open = self
                                            .core
                                            .submit_limit(exchange.as_ref(), request, ctx, view.target_price)
                                            .await?;
                                        if open.is_some() {
                                            guard.handles.push(spawn_order_watcher(
                                                session.clone(),
                                                ctx.clone(),
                                                self.core.bus().clone(),
                                                config.ws.clone(),
                                                order_tx.clone(),
                                                token.clone(),
                                            ));
                                            staleness.as_mut().reset(
                                                tokio::time::Instant::now()
                                                    + config.ws.staleness_window(),
                                            );
                                        }
                                    } else {
                                        debug!(symbol = %ctx.symbol, spread = %view.spread_pct, "spread too wide, waiting");
                                    }
                                }
                            } else {
                                let current = open.as_ref().and_then(|o| o.current_price);
                                if let Some(current) = current {
                                    if let Some(view) = analyze(
                                        &book,
                                        request.side,
                                        config.strategy,
                                        elapsed,
                                        Some(current),
                                    ) {
                                        let decision = self.core.evaluate_reprice(
                                            ctx,
                                            current,
                                            view.target_price,
                                            elapsed,
                                        );
                                        if decision.should_reprice() {
                                            self.core
                                                .cancel_and_replace(
                                                    exchange.as_ref(),
                                                    request,
                                                    ctx,
                                                    &mut open,
                                                    view.target_price,
                                                )
                                                .await?;
                                        }
                                    }
                                }
                            }
                        }
                        None => {
                            book_stream_live = false;
                            if open.is_none() {
                                // The WS feed died before we could place the
                                // order; finish the whole execution REST-side.
                                self.core.emit(EventName::WsRestFallback, ctx, json!({}));
                                let rest = RestExecutor::new(
                                    self.core.config().clone(),
                                    self.core.bus().clone(),
                                );
                                return Ok(rest.execute(request, session.clone()).await);
                            }
                        }
                    }
                }

                _ = &mut staleness, if placed => {
                    if let Some(order) = open.as_mut() {
                        let elapsed_ms =
                            ExecutorCore::now_ms().saturating_sub(order.last_event_ts_ms);
                        self.core.emit(
                            EventName::WsStalenessFallback,
                            ctx,
                            json!({ "elapsed_ms": elapsed_ms }),
                        );
                        // One REST probe; observe only, never cancel.
                        match exchange.fetch_order(order.order_id.as_str(), &ctx.symbol).await {
                            Ok(snap) => {
                                if let Some(terminal) =
                                    self.core.apply_snapshot(ctx, order, &snap)?
                                {
                                    return self.core.filled_report(request, &terminal, submit_ts);
                                }
                            }
                            Err(e) => {
                                warn!(symbol = %ctx.symbol, error = %e, "staleness probe failed");
                            }
                        }
                    }
                    staleness
                        .as_mut()
                        .reset(tokio::time::Instant::now() + config.ws.staleness_window());
                }
            }
        }
    }

    /// REST monitoring after the circuit opened: poll the open order to
    /// completion, with the usual timeout-to-taker fallback.
    async fn rest_monitor(
        &self,
        exchange: &dyn ExchangeApi,
        request: &OrderRequest,
        ctx: &mut OrderCtx,
        open: &mut OpenOrder,
        submit_ts: i64,
        deadline: Instant,
    ) -> ExecResult<ExecutionReport> {
        match self
            .core
            .poll_until_closed(exchange, ctx, open, deadline, "maker-rest-fallback")
            .await
        {
            Ok(snap) => self.core.filled_report(request, &snap, submit_ts),
            Err(ExecError::OrderTimedOut { .. }) => {
                self.core
                    .taker_fallback(exchange, request, ctx, Some(open), submit_ts)
                    .await
            }
            Err(e) => Err(e),
        }
    }
}

/// Watch the order book and forward updates. Errors retry quietly at the
/// base delay; the task exits when cancelled or when the circuit opens.
fn spawn_book_watcher(
    session: Arc<ExchangeSession>,
    symbol: String,
    retry_delay_ms: u64,
    tx: mpsc::Sender<OrderBook>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let exchange = session.exchange().clone();
        loop {
            if session.is_circuit_open() {
                break;
            }
            tokio::select! {
                _ = token.cancelled() => break,
                result = exchange.watch_order_book(&symbol) => match result {
                    Ok(book) => {
                        if tx.send(book).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(%symbol, error = %e, "WS book stream error, retrying");
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = tokio::time::sleep(Duration::from_millis(retry_delay_ms)) => {}
                        }
                    }
                }
            }
        }
    })
}

/// Watch order status updates with exponential reconnect backoff.
///
/// Opens the session circuit after the configured number of consecutive
/// transient failures and tells the monitoring loop to fall back to REST.
fn spawn_order_watcher(
    session: Arc<ExchangeSession>,
    ctx: OrderCtx,
    bus: Arc<EventBus>,
    ws: WsResilienceConfig,
    tx: mpsc::Sender<OrderStreamMsg>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let exchange = session.exchange().clone();
        let mut attempt = 0u32;
        loop {
            if session.is_circuit_open() {
                let _ = tx.send(OrderStreamMsg::CircuitOpen).await;
                break;
            }
            tokio::select! {
                _ = token.cancelled() => break,
                result = exchange.watch_orders(&ctx.symbol) => match result {
                    Ok(updates) => {
                        attempt = 0;
                        if tx.send(OrderStreamMsg::Updates(updates)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) if e.is_transient() => {
                        attempt += 1;
                        let delay =
                            backoff_delay_ms(attempt, ws.reconnect_base_delay_ms, ws.reconnect_cap_ms);
                        warn!(
                            symbol = %ctx.symbol,
                            attempt,
                            delay_ms = delay,
                            error = %e,
                            "WS order stream error, reconnecting"
                        );
                        emit_event(
                            &bus,
                            EventName::WsReconnectAttempt,
                            &ctx,
                            json!({ "attempt_number": attempt, "delay_ms": delay }),
                        );
                        if attempt >= ws.max_reconnect_attempts {
                            session.trip_circuit(&ctx.order_id, &ctx.symbol);
                            let _ = tx.send(OrderStreamMsg::CircuitOpen).await;
                            break;
                        }
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(OrderStreamMsg::Failed(e)).await;
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use omx_core::{ExchangeId, ExecutionKind, MarginMode, OrderSide, OrderState, Price};
    use omx_exchange::mock::{ladder_book, FetchStep, MockCall, MockExchange};
    use omx_exchange::OrderStatus;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn request(symbol: &str) -> OrderRequest {
        OrderRequest {
            symbol: symbol.to_string(),
            side: OrderSide::Buy,
            amount: Qty::new(dec!(0.1)),
            kind: ExecutionKind::Maker,
            exchange_id: ExchangeId::from("bybit"),
            leverage: 1,
            margin_mode: MarginMode::Isolated,
            extra_params: BTreeMap::new(),
        }
    }

    fn setup(config: ExecutorConfig) -> (WsExecutor, Arc<EventBus>, Arc<MockExchange>) {
        let bus = Arc::new(EventBus::new());
        let ex = Arc::new(MockExchange::new("bybit").with_websocket(true));
        (WsExecutor::new(config, bus.clone()), bus, ex)
    }

    fn session(ex: &Arc<MockExchange>, bus: &Arc<EventBus>) -> Arc<ExchangeSession> {
        Arc::new(ExchangeSession::new(ex.clone(), bus.clone()))
    }

    fn fast_config() -> ExecutorConfig {
        ExecutorConfig {
            fast_poll_interval_ms: 5,
            poll_interval_ms: 5,
            ..Default::default()
        }
    }

    fn closed_snapshot(order_id: &str, symbol: &str, price: Price, amount: Qty) -> OrderSnapshot {
        OrderSnapshot {
            order_id: order_id.to_string(),
            symbol: symbol.to_string(),
            status: OrderStatus::Closed,
            amount,
            filled: amount,
            avg_price: Some(price),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    #[test]
    fn test_backoff_delays_double_and_cap() {
        assert_eq!(backoff_delay_ms(1, 100, 30_000), 100);
        assert_eq!(backoff_delay_ms(2, 100, 30_000), 200);
        assert_eq!(backoff_delay_ms(3, 100, 30_000), 400);
        assert_eq!(backoff_delay_ms(9, 100, 30_000), 25_600);
        assert_eq!(backoff_delay_ms(10, 100, 30_000), 30_000);
        assert_eq!(backoff_delay_ms(30, 100, 30_000), 30_000);
    }

    #[tokio::test]
    async fn test_fill_via_ws_event() {
        let (executor, bus, ex) = setup(fast_config());
        let session = session(&ex, &bus);
        ex.push_book_update("BTC/USDT", ladder_book(dec!(43200), dec!(43201)));

        let driver = {
            let ex = ex.clone();
            async move {
                // Give the executor time to place the order, then push
                // the fill over the order stream.
                tokio::time::sleep(Duration::from_millis(50)).await;
                ex.push_order_update(
                    "BTC/USDT",
                    vec![closed_snapshot(
                        "bybit-ord-1",
                        "BTC/USDT",
                        Price::new(dec!(43200)),
                        Qty::new(dec!(0.1)),
                    )],
                );
            }
        };

        let req = request("BTC/USDT");
        let (report, ()) = tokio::join!(executor.execute(&req, session.clone()), driver);

        assert_eq!(report.final_state(), OrderState::Filled);
        assert_eq!(report.avg_price(), Some(Price::new(dec!(43200))));
        assert_eq!(bus.events_named(EventName::OrderFillComplete).len(), 1);
        // Event-driven: no REST status polling happened.
        assert_eq!(ex.count_calls(|c| matches!(c, MockCall::FetchOrder { .. })), 0);
    }

    #[tokio::test]
    async fn test_circuit_breaker_opens_after_max_attempts() {
        let mut config = fast_config();
        config.ws.reconnect_base_delay_ms = 10;
        config.ws.reconnect_cap_ms = 1_000;
        config.ws.max_reconnect_attempts = 3;
        let (executor, bus, ex) = setup(config);
        let session = session(&ex, &bus);

        ex.push_book_update("BTC/USDT", ladder_book(dec!(43200), dec!(43201)));
        ex.fail_watch_orders(3);
        ex.script_fetch("BTC/USDT", vec![FetchStep::Open, FetchStep::Fill]);

        let req = request("BTC/USDT");
        let report = executor.execute(&req, session.clone()).await;

        assert_eq!(report.final_state(), OrderState::Filled);

        // One reconnect event per attempt, delays doubling from the base.
        let attempts = bus.events_named(EventName::WsReconnectAttempt);
        assert_eq!(attempts.len(), 3);
        let delays: Vec<i64> = attempts
            .iter()
            .map(|e| e.payload_field("delay_ms").unwrap().as_i64().unwrap())
            .collect();
        assert_eq!(delays, vec![10, 20, 40]);

        // Circuit opened exactly once, REST fallback engaged.
        assert_eq!(bus.events_named(EventName::WsCircuitOpen).len(), 1);
        assert_eq!(bus.events_named(EventName::WsRestFallback).len(), 1);
        assert!(session.is_circuit_open());

        // No WS attempts beyond the three failures.
        assert_eq!(ex.watch_orders_count(), 3);
        // Monitoring finished over REST.
        assert!(ex.count_calls(|c| matches!(c, MockCall::FetchOrder { .. })) >= 2);
    }

    #[tokio::test]
    async fn test_staleness_probe_observes_but_never_cancels() {
        let mut config = fast_config();
        config.ws.staleness_window_ms = 40;
        let (executor, bus, ex) = setup(config);
        let session = session(&ex, &bus);

        ex.push_book_update("BTC/USDT", ladder_book(dec!(43200), dec!(43201)));
        // First probe sees the order still open, second sees the fill.
        ex.script_fetch("BTC/USDT", vec![FetchStep::Open, FetchStep::Fill]);

        let req = request("BTC/USDT");
        let report = executor.execute(&req, session).await;

        assert_eq!(report.final_state(), OrderState::Filled);
        let probes = bus.events_named(EventName::WsStalenessFallback);
        assert_eq!(probes.len(), 2);
        assert!(probes[0].payload_field("elapsed_ms").unwrap().as_i64().unwrap() >= 40);
        assert_eq!(ex.cancel_count(), 0);
    }

    #[tokio::test]
    async fn test_circuit_already_open_runs_rest_side() {
        let (executor, bus, ex) = setup(fast_config());
        let session = session(&ex, &bus);
        session.trip_circuit("", "BTC/USDT");

        ex.set_book("BTC/USDT", ladder_book(dec!(43200), dec!(43201)));
        ex.script_fetch("BTC/USDT", vec![FetchStep::Fill]);

        let req = request("BTC/USDT");
        let report = executor.execute(&req, session).await;

        assert_eq!(report.final_state(), OrderState::Filled);
        assert_eq!(bus.events_named(EventName::WsRestFallback).len(), 1);
        // Pure REST path: no WS watch calls for this order.
        assert_eq!(ex.watch_orders_count(), 0);
    }

    #[tokio::test]
    async fn test_ws_timeout_falls_back_to_taker() {
        let mut config = fast_config();
        config.timeout_ms = 80;
        let (executor, bus, ex) = setup(config);
        let session = session(&ex, &bus);

        ex.push_book_update("ETH/USDT", ladder_book(dec!(2300), dec!(2300.5)));
        ex.set_market_fill_price("ETH/USDT", Price::new(dec!(2301)));

        let report = executor.execute(&request("ETH/USDT"), session).await;

        assert_eq!(report.final_state(), OrderState::Filled);
        assert_eq!(report.avg_price(), Some(Price::new(dec!(2301))));
        assert_eq!(bus.events_named(EventName::MakerTimeoutTakerFallback).len(), 1);
        assert!(ex.cancel_count() >= 1);
    }

    #[tokio::test]
    async fn test_reprice_on_ws_book_update() {
        let mut config = fast_config();
        config.reprice.min_reprice_threshold_pct = dec!(0.001);
        let (executor, bus, ex) = setup(config);
        let session = session(&ex, &bus);

        ex.push_book_update("BTC/USDT", ladder_book(dec!(43200.00), dec!(43200.50)));

        let driver = {
            let ex = ex.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                // 0.139% move: must cancel and replace.
                ex.push_book_update("BTC/USDT", ladder_book(dec!(43140.00), dec!(43140.50)));
                tokio::time::sleep(Duration::from_millis(50)).await;
                ex.push_order_update(
                    "BTC/USDT",
                    vec![closed_snapshot(
                        "bybit-ord-2",
                        "BTC/USDT",
                        Price::new(dec!(43140.00)),
                        Qty::new(dec!(0.1)),
                    )],
                );
            }
        };

        let req = request("BTC/USDT");
        let (report, ()) = tokio::join!(executor.execute(&req, session), driver);

        assert_eq!(report.final_state(), OrderState::Filled);
        assert_eq!(ex.cancel_count(), 1);
        let repriced = bus.events_named(EventName::OrderRepriced);
        assert_eq!(repriced.len(), 1);
        assert_eq!(repriced[0].payload_field("prev").unwrap(), "43200.00");
        assert_eq!(repriced[0].payload_field("new").unwrap(), "43140.00");
    }
}
