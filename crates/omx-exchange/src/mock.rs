//! Scriptable in-process exchange used by the engine's test suites.
//!
//! Tests drive the mock by staging order-book updates, scripting the
//! status sequence that `fetch_order` walks through, pushing WebSocket
//! order updates, and injecting network failures into `watch_orders`.
//! Every adapter call is recorded for assertions.

use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as TokioMutex};

use async_trait::async_trait;
use omx_core::{MarginMode, OrderSide, Price, Qty};

use crate::adapter::{BookLevel, ExchangeApi, OrderBook, OrderSnapshot, OrderStatus};
use crate::error::{AdapterError, AdapterResult};

/// A recorded adapter call.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    SetMarginMode {
        symbol: String,
        mode: MarginMode,
    },
    SetLeverage {
        symbol: String,
        leverage: u32,
    },
    CreateLimitOrder {
        symbol: String,
        side: OrderSide,
        amount: Qty,
        price: Price,
        params: BTreeMap<String, String>,
    },
    CreateMarketOrder {
        symbol: String,
        side: OrderSide,
        amount: Qty,
        params: BTreeMap<String, String>,
    },
    CancelOrder {
        order_id: String,
        symbol: String,
    },
    FetchOrder {
        order_id: String,
        symbol: String,
    },
    FetchOpenOrders {
        symbol: String,
    },
    FetchOrderBook {
        symbol: String,
    },
    WatchOrderBook {
        symbol: String,
    },
    WatchOrders {
        symbol: String,
    },
}

/// One step of a scripted `fetch_order` sequence.
#[derive(Debug, Clone)]
pub enum FetchStep {
    /// Order still open, no fill progress.
    Open,
    /// Order partially filled up to the given quantity.
    Partial(Qty),
    /// Order completely filled at its limit (or staged market) price.
    Fill,
    /// Order cancelled on the venue.
    Cancel,
    /// Order rejected by the venue.
    Reject,
}

#[derive(Debug)]
struct MockOrder {
    snap: OrderSnapshot,
    limit_price: Option<Price>,
}

#[derive(Default)]
struct BookState {
    current: Option<OrderBook>,
    fetch_queue: VecDeque<OrderBook>,
}

type BookReceiver = Arc<TokioMutex<mpsc::UnboundedReceiver<OrderBook>>>;
type OrderUpdateReceiver = Arc<TokioMutex<mpsc::UnboundedReceiver<Vec<OrderSnapshot>>>>;

/// Scriptable mock venue implementing [`ExchangeApi`].
pub struct MockExchange {
    id: String,
    supports_ws: bool,

    calls: Mutex<Vec<MockCall>>,
    books: Mutex<HashMap<String, BookState>>,
    orders: DashMap<String, MockOrder>,
    fetch_scripts: Mutex<HashMap<String, VecDeque<FetchStep>>>,
    market_fill_price: Mutex<HashMap<String, Price>>,
    next_order_seq: AtomicU64,

    reject_market_orders: AtomicBool,
    limit_rejections: Mutex<VecDeque<AdapterError>>,
    watch_orders_failures: AtomicU32,

    book_tx: Mutex<HashMap<String, mpsc::UnboundedSender<OrderBook>>>,
    book_rx: Mutex<HashMap<String, BookReceiver>>,
    order_update_tx: Mutex<HashMap<String, mpsc::UnboundedSender<Vec<OrderSnapshot>>>>,
    order_update_rx: Mutex<HashMap<String, OrderUpdateReceiver>>,
}

impl MockExchange {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            supports_ws: false,
            calls: Mutex::new(Vec::new()),
            books: Mutex::new(HashMap::new()),
            orders: DashMap::new(),
            fetch_scripts: Mutex::new(HashMap::new()),
            market_fill_price: Mutex::new(HashMap::new()),
            next_order_seq: AtomicU64::new(1),
            reject_market_orders: AtomicBool::new(false),
            limit_rejections: Mutex::new(VecDeque::new()),
            watch_orders_failures: AtomicU32::new(0),
            book_tx: Mutex::new(HashMap::new()),
            book_rx: Mutex::new(HashMap::new()),
            order_update_tx: Mutex::new(HashMap::new()),
            order_update_rx: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_websocket(mut self, enabled: bool) -> Self {
        self.supports_ws = enabled;
        self
    }

    // --- scripting ------------------------------------------------------

    /// Set the book returned by `fetch_order_book` when the fetch queue
    /// is empty.
    pub fn set_book(&self, symbol: &str, book: OrderBook) {
        self.books.lock().entry(symbol.to_string()).or_default().current = Some(book);
    }

    /// Queue books returned by subsequent `fetch_order_book` calls, in
    /// order. Each dequeued book becomes the new current book.
    pub fn stage_fetch_books(&self, symbol: &str, books: Vec<OrderBook>) {
        self.books
            .lock()
            .entry(symbol.to_string())
            .or_default()
            .fetch_queue
            .extend(books);
    }

    /// Push an order-book update onto the WS stream (also updates the
    /// current book).
    pub fn push_book_update(&self, symbol: &str, book: OrderBook) {
        self.set_book(symbol, book.clone());
        let tx = self.book_sender(symbol);
        let _ = tx.send(book);
    }

    /// Push order status updates onto the WS order stream.
    pub fn push_order_update(&self, symbol: &str, updates: Vec<OrderSnapshot>) {
        for snap in &updates {
            if let Some(mut order) = self.orders.get_mut(&snap.order_id) {
                order.snap = snap.clone();
            }
        }
        let tx = self.order_update_sender(symbol);
        let _ = tx.send(updates);
    }

    /// Script the status sequence `fetch_order` walks through for orders
    /// on this symbol. When the script runs dry the last state persists.
    pub fn script_fetch(&self, symbol: &str, steps: Vec<FetchStep>) {
        self.fetch_scripts
            .lock()
            .entry(symbol.to_string())
            .or_default()
            .extend(steps);
    }

    /// Price used to fill market orders (falls back to the current book).
    pub fn set_market_fill_price(&self, symbol: &str, price: Price) {
        self.market_fill_price.lock().insert(symbol.to_string(), price);
    }

    /// All subsequent market orders come back rejected.
    pub fn reject_market_orders(&self) {
        self.reject_market_orders.store(true, Ordering::Release);
    }

    /// Queue an error returned by the next `create_limit_order` calls.
    pub fn inject_limit_rejection(&self, err: AdapterError) {
        self.limit_rejections.lock().push_back(err);
    }

    /// Make the next `n` `watch_orders` calls fail with a network error.
    pub fn fail_watch_orders(&self, n: u32) {
        self.watch_orders_failures.store(n, Ordering::Release);
    }

    // --- assertions -----------------------------------------------------

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn count_calls(&self, pred: impl Fn(&MockCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    pub fn cancel_count(&self) -> usize {
        self.count_calls(|c| matches!(c, MockCall::CancelOrder { .. }))
    }

    pub fn watch_orders_count(&self) -> usize {
        self.count_calls(|c| matches!(c, MockCall::WatchOrders { .. }))
    }

    // --- internals ------------------------------------------------------

    fn record(&self, call: MockCall) {
        self.calls.lock().push(call);
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn next_order_id(&self) -> String {
        let seq = self.next_order_seq.fetch_add(1, Ordering::AcqRel);
        format!("{}-ord-{}", self.id, seq)
    }

    fn book_sender(&self, symbol: &str) -> mpsc::UnboundedSender<OrderBook> {
        let mut txs = self.book_tx.lock();
        if let Some(tx) = txs.get(symbol) {
            return tx.clone();
        }
        let (tx, rx) = mpsc::unbounded_channel();
        txs.insert(symbol.to_string(), tx.clone());
        self.book_rx
            .lock()
            .insert(symbol.to_string(), Arc::new(TokioMutex::new(rx)));
        tx
    }

    fn order_update_sender(&self, symbol: &str) -> mpsc::UnboundedSender<Vec<OrderSnapshot>> {
        let mut txs = self.order_update_tx.lock();
        if let Some(tx) = txs.get(symbol) {
            return tx.clone();
        }
        let (tx, rx) = mpsc::unbounded_channel();
        txs.insert(symbol.to_string(), tx.clone());
        self.order_update_rx
            .lock()
            .insert(symbol.to_string(), Arc::new(TokioMutex::new(rx)));
        tx
    }

    fn book_receiver(&self, symbol: &str) -> BookReceiver {
        // Creating the sender lazily also registers the receiver.
        self.book_sender(symbol);
        self.book_rx.lock().get(symbol).cloned().unwrap()
    }

    fn order_update_receiver(&self, symbol: &str) -> OrderUpdateReceiver {
        self.order_update_sender(symbol);
        self.order_update_rx.lock().get(symbol).cloned().unwrap()
    }

    fn apply_fetch_step(&self, order_id: &str) {
        let symbol = match self.orders.get(order_id) {
            Some(o) => o.snap.symbol.clone(),
            None => return,
        };
        let step = self.fetch_scripts.lock().get_mut(&symbol).and_then(|q| q.pop_front());
        let Some(step) = step else { return };

        let Some(mut order) = self.orders.get_mut(order_id) else {
            return;
        };
        let fill_price = order
            .limit_price
            .or(order.snap.avg_price)
            .unwrap_or(Price::new(Decimal::ONE));
        match step {
            FetchStep::Open => {}
            FetchStep::Partial(qty) => {
                order.snap.filled = qty.min(order.snap.amount);
                order.snap.avg_price = Some(fill_price);
                order.snap.status = OrderStatus::Open;
            }
            FetchStep::Fill => {
                order.snap.filled = order.snap.amount;
                order.snap.avg_price = Some(fill_price);
                order.snap.status = OrderStatus::Closed;
            }
            FetchStep::Cancel => order.snap.status = OrderStatus::Canceled,
            FetchStep::Reject => order.snap.status = OrderStatus::Rejected,
        }
        order.snap.timestamp_ms = Self::now_ms();
    }
}

#[async_trait]
impl ExchangeApi for MockExchange {
    fn id(&self) -> &str {
        &self.id
    }

    fn supports_websocket(&self) -> bool {
        self.supports_ws
    }

    async fn set_margin_mode(&self, symbol: &str, mode: MarginMode) -> AdapterResult<()> {
        self.record(MockCall::SetMarginMode {
            symbol: symbol.to_string(),
            mode,
        });
        Ok(())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> AdapterResult<()> {
        self.record(MockCall::SetLeverage {
            symbol: symbol.to_string(),
            leverage,
        });
        Ok(())
    }

    async fn create_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        amount: Qty,
        price: Price,
        params: &BTreeMap<String, String>,
    ) -> AdapterResult<OrderSnapshot> {
        self.record(MockCall::CreateLimitOrder {
            symbol: symbol.to_string(),
            side,
            amount,
            price,
            params: params.clone(),
        });
        if let Some(err) = self.limit_rejections.lock().pop_front() {
            return Err(err);
        }
        let snap = OrderSnapshot {
            order_id: self.next_order_id(),
            symbol: symbol.to_string(),
            status: OrderStatus::Open,
            amount,
            filled: Qty::ZERO,
            avg_price: None,
            timestamp_ms: Self::now_ms(),
        };
        self.orders.insert(
            snap.order_id.clone(),
            MockOrder {
                snap: snap.clone(),
                limit_price: Some(price),
            },
        );
        Ok(snap)
    }

    async fn create_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        amount: Qty,
        params: &BTreeMap<String, String>,
    ) -> AdapterResult<OrderSnapshot> {
        self.record(MockCall::CreateMarketOrder {
            symbol: symbol.to_string(),
            side,
            amount,
            params: params.clone(),
        });

        let rejected = self.reject_market_orders.load(Ordering::Acquire);
        let fill_price = self.market_fill_price.lock().get(symbol).copied().or_else(|| {
            let books = self.books.lock();
            let book = books.get(symbol).and_then(|s| s.current.as_ref())?;
            match side {
                OrderSide::Buy => book.best_ask(),
                OrderSide::Sell => book.best_bid(),
            }
        });

        let snap = if rejected {
            OrderSnapshot {
                order_id: self.next_order_id(),
                symbol: symbol.to_string(),
                status: OrderStatus::Rejected,
                amount,
                filled: Qty::ZERO,
                avg_price: None,
                timestamp_ms: Self::now_ms(),
            }
        } else {
            OrderSnapshot {
                order_id: self.next_order_id(),
                symbol: symbol.to_string(),
                status: OrderStatus::Closed,
                amount,
                filled: amount,
                avg_price: Some(fill_price.unwrap_or(Price::new(Decimal::ONE))),
                timestamp_ms: Self::now_ms(),
            }
        };
        self.orders.insert(
            snap.order_id.clone(),
            MockOrder {
                snap: snap.clone(),
                limit_price: fill_price,
            },
        );
        Ok(snap)
    }

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> AdapterResult<()> {
        self.record(MockCall::CancelOrder {
            order_id: order_id.to_string(),
            symbol: symbol.to_string(),
        });
        match self.orders.get_mut(order_id) {
            Some(mut order) => {
                if order.snap.status == OrderStatus::Open {
                    order.snap.status = OrderStatus::Canceled;
                }
                Ok(())
            }
            None => Err(AdapterError::OrderNotFound(order_id.to_string())),
        }
    }

    async fn fetch_order(&self, order_id: &str, symbol: &str) -> AdapterResult<OrderSnapshot> {
        self.record(MockCall::FetchOrder {
            order_id: order_id.to_string(),
            symbol: symbol.to_string(),
        });
        self.apply_fetch_step(order_id);
        self.orders
            .get(order_id)
            .map(|o| o.snap.clone())
            .ok_or_else(|| AdapterError::OrderNotFound(order_id.to_string()))
    }

    async fn fetch_open_orders(&self, symbol: &str) -> AdapterResult<Vec<OrderSnapshot>> {
        self.record(MockCall::FetchOpenOrders {
            symbol: symbol.to_string(),
        });
        Ok(self
            .orders
            .iter()
            .filter(|o| o.snap.symbol == symbol && o.snap.status == OrderStatus::Open)
            .map(|o| o.snap.clone())
            .collect())
    }

    async fn fetch_order_book(&self, symbol: &str) -> AdapterResult<OrderBook> {
        self.record(MockCall::FetchOrderBook {
            symbol: symbol.to_string(),
        });
        let mut books = self.books.lock();
        let state = books
            .get_mut(symbol)
            .ok_or_else(|| AdapterError::BadSymbol(symbol.to_string()))?;
        if let Some(next) = state.fetch_queue.pop_front() {
            state.current = Some(next);
        }
        state
            .current
            .clone()
            .ok_or_else(|| AdapterError::BadSymbol(symbol.to_string()))
    }

    async fn watch_order_book(&self, symbol: &str) -> AdapterResult<OrderBook> {
        self.record(MockCall::WatchOrderBook {
            symbol: symbol.to_string(),
        });
        let rx = self.book_receiver(symbol);
        let mut rx = rx.lock().await;
        rx.recv()
            .await
            .ok_or_else(|| AdapterError::Network("book stream closed".to_string()))
    }

    async fn watch_orders(&self, symbol: &str) -> AdapterResult<Vec<OrderSnapshot>> {
        self.record(MockCall::WatchOrders {
            symbol: symbol.to_string(),
        });
        loop {
            let remaining = self.watch_orders_failures.load(Ordering::Acquire);
            if remaining == 0 {
                break;
            }
            if self
                .watch_orders_failures
                .compare_exchange(remaining, remaining - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Err(AdapterError::Network("connection reset".to_string()));
            }
        }
        let rx = self.order_update_receiver(symbol);
        let mut rx = rx.lock().await;
        rx.recv()
            .await
            .ok_or_else(|| AdapterError::Network("order stream closed".to_string()))
    }
}

/// Build a book with six levels per side stepping away from the touch.
pub fn ladder_book(bid: Decimal, ask: Decimal) -> OrderBook {
    let step = bid * Decimal::new(1, 4); // 0.01% per level
    let qty = Qty::new(Decimal::ONE);
    let bids = (0..6)
        .map(|i| BookLevel {
            price: Price::new(bid - step * Decimal::from(i)),
            qty,
        })
        .collect();
    let asks = (0..6)
        .map(|i| BookLevel {
            price: Price::new(ask + step * Decimal::from(i)),
            qty,
        })
        .collect();
    OrderBook { bids, asks }
}
