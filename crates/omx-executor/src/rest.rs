//! Poll-based order executor.
//!
//! Monitors orders with `fetch_order` at an adaptive cadence and drives
//! reprice decisions from `fetch_order_book`. Used for venues without
//! WebSocket support and as the fallback monitoring path when the WS
//! circuit opens.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use omx_core::{
    ExecutionKind, ExecutionReport, ExecutionStrategy, ExecutorConfig, OpenOrder, OrderRequest,
    Qty,
};
use omx_events::EventBus;
use omx_exchange::ExchangeApi;

use crate::book::analyze;
use crate::core::{ExecutorCore, OrderCtx};
use crate::error::ExecResult;
use crate::session::ExchangeSession;

/// Order executor using REST polling for status and reprice monitoring.
pub struct RestExecutor {
    core: ExecutorCore,
}

impl RestExecutor {
    pub fn new(config: ExecutorConfig, bus: Arc<EventBus>) -> Self {
        Self {
            core: ExecutorCore::new(config, bus),
        }
    }

    /// Execute one order to a terminal state.
    ///
    /// Exactly one immutable report is produced; errors become a
    /// failed/rejected/timed-out report and never propagate.
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
        session: &ExchangeSession,
        ctx: &mut OrderCtx,
        filled: &mut Qty,
    ) -> ExecResult<ExecutionReport> {
        request.validate()?;
        let exchange = session.exchange().as_ref();

        self.core.sweep_open_orders(exchange, &ctx.symbol).await;
        self.core.spread_gate(exchange, ctx).await?;

        match request.kind {
            ExecutionKind::Taker => self.run_taker(exchange, request, ctx).await,
            ExecutionKind::Maker => self.run_maker(exchange, request, ctx, filled).await,
        }
    }

    async fn run_taker(
        &self,
        exchange: &dyn ExchangeApi,
        request: &OrderRequest,
        ctx: &mut OrderCtx,
    ) -> ExecResult<ExecutionReport> {
        let submit_ts = ExecutorCore::now_ms();
        let deadline = Instant::now() + self.core.config().timeout();

        let snap = self.core.submit_market(exchange, request, ctx).await?;
        let mut open = OpenOrder::new(
            snap.order_id.clone().into(),
            ctx.symbol.clone(),
            request.side,
            request.amount,
            None,
            submit_ts,
        );
        open.transition(omx_core::OrderState::Monitoring, submit_ts)?;

        // Some venues fill market orders synchronously on create.
        if let Some(terminal) = self.core.apply_snapshot(ctx, &mut open, &snap)? {
            return self.core.filled_report(request, &terminal, submit_ts);
        }

        let terminal = self
            .core
            .poll_until_closed(exchange, ctx, &mut open, deadline, "taker")
            .await?;
        self.core.filled_report(request, &terminal, submit_ts)
    }

    async fn run_maker(
        &self,
        exchange: &dyn ExchangeApi,
        request: &OrderRequest,
        ctx: &mut OrderCtx,
        filled: &mut Qty,
    ) -> ExecResult<ExecutionReport> {
        let config = self.core.config().clone();
        let started = Instant::now();
        let deadline = started + config.timeout();
        let submit_ts = ExecutorCore::now_ms();

        let mut open: Option<OpenOrder> = None;

        loop {
            if Instant::now() >= deadline {
                return self
                    .core
                    .taker_fallback(exchange, request, ctx, open.as_ref(), submit_ts)
                    .await;
            }
            let elapsed = started.elapsed();

            if open.is_none() {
                // Find a price and place the resting order.
                match exchange.fetch_order_book(&ctx.symbol).await {
                    Ok(book) => {
                        if let Some(view) =
                            analyze(&book, request.side, config.strategy, elapsed, None)
                        {
                            let spread_ok = config.strategy != ExecutionStrategy::BestPrice
                                || view.spread_pct <= config.max_spread_pct;
                            if spread_ok {
                                open = self
                                    .core
                                    .submit_limit(exchange, request, ctx, view.target_price)
                                    .await?;
                            } else {
                                debug!(symbol = %ctx.symbol, spread = %view.spread_pct, "spread too wide, waiting");
                            }
                        }
                    }
                    Err(e) => {
                        debug!(symbol = %ctx.symbol, error = %e, "order book fetch failed")
                    }
                }
            } else if let Some(report) = self
                .monitor_tick(exchange, request, ctx, &mut open, elapsed, submit_ts, filled)
                .await?
            {
                return Ok(report);
            }

            tokio::time::sleep(config.poll_interval(elapsed)).await;
        }
    }

    /// One monitoring tick: fill/terminal check on the open order, then
    /// a reprice evaluation against the latest book.
    #[allow(clippy::too_many_arguments)]
    async fn monitor_tick(
        &self,
        exchange: &dyn ExchangeApi,
        request: &OrderRequest,
        ctx: &mut OrderCtx,
        open: &mut Option<OpenOrder>,
        elapsed: std::time::Duration,
        submit_ts: i64,
        filled: &mut Qty,
    ) -> ExecResult<Option<ExecutionReport>> {
        let strategy = self.core.config().strategy;

        let current = {
            let Some(order) = open.as_mut() else {
                return Ok(None);
            };
            match exchange.fetch_order(order.order_id.as_str(), &ctx.symbol).await {
                Ok(snap) => {
                    if let Some(terminal) = self.core.apply_snapshot(ctx, order, &snap)? {
                        return Ok(Some(self.core.filled_report(request, &terminal, submit_ts)?));
                    }
                    *filled = order.filled;
                }
                Err(e) => {
                    debug!(symbol = %ctx.symbol, error = %e, "fetch_order failed, will retry")
                }
            }
            order.current_price
        };

        if let Some(current) = current {
            if let Ok(book) = exchange.fetch_order_book(&ctx.symbol).await {
                if let Some(view) = analyze(&book, request.side, strategy, elapsed, Some(current)) {
                    let decision = self
                        .core
                        .evaluate_reprice(ctx, current, view.target_price, elapsed);
                    if decision.should_reprice() {
                        self.core
                            .cancel_and_replace(exchange, request, ctx, open, view.target_price)
                            .await?;
                    }
                }
            }
        }

        Ok(None)
    }
}
