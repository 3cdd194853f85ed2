//! Per-batch, per-exchange session.
//!
//! Owns the symbol-level margin/leverage initialization caches, pre-warms
//! WebSocket order-book streams before the first submission, and carries
//! the WS circuit breaker for the batch. Sessions are never reused across
//! batches: a new batch repeats all margin/leverage calls.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use omx_core::{ExecutionKind, OrderRequest};
use omx_events::{EventBus, EventName, StructuredEvent};
use omx_exchange::ExchangeApi;

/// Bound on the pre-warm wait for the first book snapshot per stream.
const PREWARM_TIMEOUT: Duration = Duration::from_millis(250);

/// Per-batch coordination context injected into order executors.
///
/// Does not execute orders itself. All cache mutation happens during
/// [`ExchangeSession::init`]; afterwards the sets are read-only. The
/// circuit breaker is the one field mutated during the batch, guarded by
/// a compare-and-swap so it trips exactly once.
pub struct ExchangeSession {
    exchange: Arc<dyn ExchangeApi>,
    bus: Arc<EventBus>,
    margin_set: Mutex<HashSet<String>>,
    leverage_set: Mutex<HashSet<(String, u32)>>,
    active_ws_streams: Mutex<HashSet<String>>,
    circuit_open: AtomicBool,
}

impl ExchangeSession {
    pub fn new(exchange: Arc<dyn ExchangeApi>, bus: Arc<EventBus>) -> Self {
        Self {
            exchange,
            bus,
            margin_set: Mutex::new(HashSet::new()),
            leverage_set: Mutex::new(HashSet::new()),
            active_ws_streams: Mutex::new(HashSet::new()),
            circuit_open: AtomicBool::new(false),
        }
    }

    pub fn exchange(&self) -> &Arc<dyn ExchangeApi> {
        &self.exchange
    }

    pub fn exchange_id(&self) -> &str {
        self.exchange.id()
    }

    /// Initialize the session for the batch's orders on this exchange.
    ///
    /// - `set_margin_mode` at most once per distinct symbol
    /// - `set_leverage` at most once per distinct (symbol, leverage)
    /// - WS-capable venues with maker orders get their order-book streams
    ///   pre-warmed before the first `create_limit_order`
    ///
    /// Margin/leverage failures are best-effort (some venues do not
    /// require them) and logged at debug.
    pub async fn init(&self, orders: &[OrderRequest]) {
        for order in orders {
            let symbol = order.symbol.as_str();

            if self.margin_set.lock().insert(symbol.to_string()) {
                match self.exchange.set_margin_mode(symbol, order.margin_mode).await {
                    Ok(()) => {
                        debug!(exchange = self.exchange_id(), symbol, mode = %order.margin_mode, "margin mode set")
                    }
                    Err(e) => {
                        debug!(exchange = self.exchange_id(), symbol, error = %e, "set_margin_mode failed")
                    }
                }
            }

            if self
                .leverage_set
                .lock()
                .insert((symbol.to_string(), order.leverage))
            {
                match self.exchange.set_leverage(symbol, order.leverage).await {
                    Ok(()) => {
                        debug!(exchange = self.exchange_id(), symbol, leverage = order.leverage, "leverage set")
                    }
                    Err(e) => {
                        debug!(exchange = self.exchange_id(), symbol, error = %e, "set_leverage failed")
                    }
                }
            }
        }

        if self.exchange.supports_websocket() {
            let maker_symbols: HashSet<&str> = orders
                .iter()
                .filter(|o| o.kind == ExecutionKind::Maker)
                .map(|o| o.symbol.as_str())
                .collect();
            for symbol in maker_symbols {
                self.prewarm_book_stream(symbol).await;
            }
        }
    }

    /// Pre-warm the WS order book stream for one symbol. Failure or a
    /// missed deadline is non-fatal.
    async fn prewarm_book_stream(&self, symbol: &str) {
        match tokio::time::timeout(PREWARM_TIMEOUT, self.exchange.watch_order_book(symbol)).await {
            Ok(Ok(_)) => {
                debug!(exchange = self.exchange_id(), symbol, "order book stream pre-warmed");
            }
            Ok(Err(e)) => {
                debug!(exchange = self.exchange_id(), symbol, error = %e, "order book pre-warm failed");
            }
            Err(_) => {
                debug!(exchange = self.exchange_id(), symbol, "order book pre-warm timed out");
            }
        }
        self.active_ws_streams.lock().insert(symbol.to_string());
    }

    /// Whether the WS circuit breaker has opened for this batch.
    pub fn is_circuit_open(&self) -> bool {
        self.circuit_open.load(Ordering::Acquire)
    }

    /// Open the circuit breaker. The first caller wins and emits the
    /// `ws_circuit_open` event; later callers are no-ops.
    pub fn trip_circuit(&self, order_id: &str, symbol: &str) -> bool {
        let first = self
            .circuit_open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            warn!(
                exchange = self.exchange_id(),
                "WS circuit breaker opened; exchange is REST-only for the rest of the batch"
            );
            self.bus.emit(
                StructuredEvent::new(EventName::WsCircuitOpen, order_id, symbol, self.exchange_id())
                    .with_payload(serde_json::json!({
                        "exchange_id": self.exchange_id(),
                    })),
            );
        }
        first
    }

    /// Tracked WS streams (for teardown assertions).
    pub fn active_ws_streams(&self) -> Vec<String> {
        self.active_ws_streams.lock().iter().cloned().collect()
    }

    /// Tear the session down: drop stream registrations and release
    /// resources. Runs on every exit path, including cancellation.
    pub async fn teardown(&self) {
        let streams: Vec<String> = self.active_ws_streams.lock().drain().collect();
        if !streams.is_empty() {
            debug!(
                exchange = self.exchange_id(),
                streams = streams.len(),
                "tearing down session WS streams"
            );
        }
    }
}
