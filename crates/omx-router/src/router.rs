//! Order router: partition, dispatch, collect.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use omx_core::{
    CoreError, ExecutionKind, ExecutionReport, ExecutorConfig, OrderBatch, OrderRequest,
    OrderState, Qty, ReportBuilder,
};
use omx_events::{format_batch_alert, EventBus, EventName, StructuredEvent};
use omx_exchange::ExchangeApi;
use omx_executor::{ExchangeSession, RestExecutor, WsExecutor};

const ORPHAN_REASON: &str = "exchange_not_found";

/// Routes a batch of orders to per-exchange sessions and executors.
///
/// Stateless between `execute_orders` invocations: each call creates
/// fresh [`ExchangeSession`]s, so a new batch repeats all margin and
/// leverage initialization.
pub struct OrderRouter {
    config: ExecutorConfig,
    bus: Arc<EventBus>,
}

impl OrderRouter {
    /// Create a router. An invalid configuration is the only error that
    /// prevents a batch from starting.
    pub fn new(config: ExecutorConfig, bus: Arc<EventBus>) -> Result<Self, CoreError> {
        config.validate()?;
        Ok(Self { config, bus })
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Execute a batch of orders and return one report per order, in
    /// input order.
    ///
    /// Orders for unknown exchanges fail with `exchange_not_found` and
    /// the rest of the batch continues. Errors inside an order's
    /// execution become that order's failed report; they never abort the
    /// batch.
    pub async fn execute_orders(
        &self,
        exchanges: &[Arc<dyn ExchangeApi>],
        batch: OrderBatch,
    ) -> Vec<ExecutionReport> {
        let exchanges_by_id: HashMap<String, Arc<dyn ExchangeApi>> = exchanges
            .iter()
            .map(|e| (e.id().to_string(), e.clone()))
            .collect();

        let orders = batch.into_inner();
        let mut slots: Vec<Option<ExecutionReport>> = Vec::with_capacity(orders.len());
        slots.resize_with(orders.len(), || None);

        // Fail-fast validation and orphan detection, before any I/O.
        let mut valid: Vec<(usize, OrderRequest)> = Vec::new();
        for (idx, order) in orders.into_iter().enumerate() {
            if let Err(e) = order.validate() {
                warn!(symbol = %order.symbol, error = %e, "invalid order request");
                slots[idx] = Some(self.failed_report(&order, &e.to_string()));
                continue;
            }
            if !exchanges_by_id.contains_key(order.exchange_id.as_str()) {
                warn!(
                    symbol = %order.symbol,
                    exchange = %order.exchange_id,
                    "exchange not found for order"
                );
                self.bus.emit(
                    StructuredEvent::new(
                        EventName::ExchangeNotFound,
                        "",
                        order.symbol.clone(),
                        order.exchange_id.as_str(),
                    )
                    .with_payload(serde_json::json!({
                        "exchange_id": order.exchange_id.as_str(),
                    })),
                );
                slots[idx] = Some(self.failed_report(&order, ORPHAN_REASON));
                continue;
            }
            valid.push((idx, order));
        }

        // Group valid orders by exchange.
        let mut by_exchange: HashMap<String, Vec<(usize, OrderRequest)>> = HashMap::new();
        for (idx, order) in valid {
            by_exchange
                .entry(order.exchange_id.as_str().to_string())
                .or_default()
                .push((idx, order));
        }

        // One fresh session per exchange, initialized with the batch's
        // symbols, leverages and margin modes (and WS pre-warm).
        let mut sessions: HashMap<String, Arc<ExchangeSession>> = HashMap::new();
        for (exchange_id, indexed_orders) in &by_exchange {
            // Indexed into by_exchange keys, so the lookup cannot miss.
            let Some(exchange) = exchanges_by_id.get(exchange_id) else {
                continue;
            };
            let session = Arc::new(ExchangeSession::new(exchange.clone(), self.bus.clone()));
            let plain: Vec<OrderRequest> =
                indexed_orders.iter().map(|(_, o)| o.clone()).collect();
            session.init(&plain).await;
            sessions.insert(exchange_id.clone(), session);
        }

        // Fan out execution; each order owns its executor instance. The
        // dispatch index lets an aborted task still yield a report.
        let mut tasks: JoinSet<(usize, ExecutionReport)> = JoinSet::new();
        let mut dispatched: HashMap<tokio::task::Id, (usize, OrderRequest)> = HashMap::new();
        for (exchange_id, indexed_orders) in by_exchange {
            let Some(session) = sessions.get(&exchange_id).cloned() else {
                continue;
            };
            let Some(exchange) = exchanges_by_id.get(&exchange_id).cloned() else {
                continue;
            };
            for (idx, order) in indexed_orders {
                let session = session.clone();
                let config = self.config.clone();
                let bus = self.bus.clone();
                let use_ws = exchange.supports_websocket()
                    && order.kind == ExecutionKind::Maker
                    && !session.is_circuit_open();
                let task_order = order.clone();
                let handle = tasks.spawn(async move {
                    let report = if use_ws {
                        WsExecutor::new(config, bus).execute(&order, session).await
                    } else {
                        RestExecutor::new(config, bus).execute(&order, session).await
                    };
                    (idx, report)
                });
                dispatched.insert(handle.id(), (idx, task_order));
            }
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, report)) => slots[idx] = Some(report),
                Err(e) => {
                    error!(error = %e, "order execution task aborted");
                    // The order still gets exactly one report.
                    if let Some((idx, order)) = dispatched.get(&e.id()) {
                        slots[*idx] = Some(
                            self.failed_report(order, &format!("internal task failure: {e}")),
                        );
                    }
                }
            }
        }

        // Teardown runs whatever happened above.
        for session in sessions.values() {
            session.teardown().await;
        }

        let reports: Vec<ExecutionReport> = slots.into_iter().flatten().collect();
        let filled = reports.iter().filter(|r| r.is_filled()).count();
        info!(
            total = reports.len(),
            filled,
            "order batch complete\n{}",
            format_batch_alert(&reports)
        );
        reports
    }

    /// Build a failed report for an order that never reached an
    /// executor. Empty identifiers are substituted so the report
    /// invariants (non-empty exchange_id and symbol) always hold.
    fn failed_report(&self, order: &OrderRequest, reason: &str) -> ExecutionReport {
        let exchange_id = if order.exchange_id.is_empty() {
            omx_core::ExchangeId::from("unknown")
        } else {
            order.exchange_id.clone()
        };
        let symbol = if order.symbol.is_empty() {
            "unknown".to_string()
        } else {
            order.symbol.clone()
        };
        let now = chrono::Utc::now().timestamp_millis();
        ReportBuilder::new(exchange_id, symbol)
            .final_state(OrderState::Failed)
            .filled_amount(Qty::ZERO)
            .submit_ts_ms(now)
            .close_ts_ms(now)
            .failure_reason(reason)
            .build()
            .expect("sanitized failure report fields are valid")
    }
}
