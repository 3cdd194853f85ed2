//! Synchronous fan-out event bus.
//!
//! `emit` appends to an ordered in-memory log scoped to the batch and
//! delivers the event to every registered sink in registration order.
//! Sinks must not block: a sink that cannot keep up reports the event as
//! dropped and the bus counts it, the hot path never stalls.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::event::{EventName, StructuredEvent};

/// Synchronous event receiver.
///
/// Returns `true` when the event was accepted, `false` when it had to be
/// dropped (e.g. a full bounded buffer). Implementations must not block.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &StructuredEvent) -> bool;
}

/// Synchronous fan-out event bus with an ordered in-memory log.
#[derive(Default)]
pub struct EventBus {
    log: Mutex<Vec<StructuredEvent>>,
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
    subscriber_dropped: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink to receive future events.
    pub fn register_sink(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().push(sink);
    }

    /// Append the event to the log and fan it out to all sinks.
    pub fn emit(&self, event: StructuredEvent) {
        let sinks = self.sinks.read();
        for sink in sinks.iter() {
            if !sink.on_event(&event) {
                self.subscriber_dropped.fetch_add(1, Ordering::AcqRel);
            }
        }
        drop(sinks);
        self.log.lock().push(event);
    }

    /// Snapshot of the ordered event log.
    pub fn events(&self) -> Vec<StructuredEvent> {
        self.log.lock().clone()
    }

    /// Events with the given canonical name, in emission order.
    pub fn events_named(&self, name: EventName) -> Vec<StructuredEvent> {
        self.log.lock().iter().filter(|e| e.name == name).cloned().collect()
    }

    /// Number of events dropped by slow subscribers.
    pub fn subscriber_dropped(&self) -> u64 {
        self.subscriber_dropped.load(Ordering::Acquire)
    }
}

/// Sink that logs every event as structured tracing fields.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_event(&self, event: &StructuredEvent) -> bool {
        info!(
            event = %event.name,
            order_id = %event.order_id,
            symbol = %event.symbol,
            exchange_id = %event.exchange_id,
            timestamp_ms = event.timestamp_ms,
            payload = %event.payload,
            "order_event"
        );
        true
    }
}

/// Bounded non-blocking sink backed by a tokio channel.
///
/// A full buffer drops the event instead of stalling the executor.
pub struct ChannelSink {
    tx: mpsc::Sender<StructuredEvent>,
}

impl ChannelSink {
    /// Create a sink and its receiving half with the given buffer size.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<StructuredEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn on_event(&self, event: &StructuredEvent) -> bool {
        self.tx.try_send(event.clone()).is_ok()
    }
}

/// Sink that accumulates events in memory. Test support.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<StructuredEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StructuredEvent> {
        self.events.lock().clone()
    }
}

impl EventSink for RecordingSink {
    fn on_event(&self, event: &StructuredEvent) -> bool {
        self.events.lock().push(event.clone());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(name: EventName) -> StructuredEvent {
        StructuredEvent::new(name, "ord-1", "BTC/USDT", "bybit")
    }

    #[test]
    fn test_log_preserves_emission_order() {
        let bus = EventBus::new();
        bus.emit(event(EventName::OrderSubmitted));
        bus.emit(event(EventName::OrderFillPartial));
        bus.emit(event(EventName::OrderFillComplete));

        let names: Vec<EventName> = bus.events().iter().map(|e| e.name).collect();
        assert_eq!(
            names,
            vec![
                EventName::OrderSubmitted,
                EventName::OrderFillPartial,
                EventName::OrderFillComplete
            ]
        );
    }

    #[test]
    fn test_fan_out_to_sinks() {
        let bus = EventBus::new();
        let sink = Arc::new(RecordingSink::new());
        bus.register_sink(sink.clone());

        bus.emit(event(EventName::OrderSubmitted).with_payload(json!({"price": "1"})));

        let received = sink.events();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].name, EventName::OrderSubmitted);
    }

    #[test]
    fn test_slow_subscriber_drops_instead_of_stalling() {
        let bus = EventBus::new();
        let (sink, _rx) = ChannelSink::new(2);
        bus.register_sink(Arc::new(sink));

        for _ in 0..5 {
            bus.emit(event(EventName::OrderSubmitted));
        }

        // Buffer of 2 absorbs two events, the rest are dropped and counted.
        assert_eq!(bus.subscriber_dropped(), 3);
        // The bus log itself is never dropped.
        assert_eq!(bus.events().len(), 5);
    }

    #[test]
    fn test_events_named_filter() {
        let bus = EventBus::new();
        bus.emit(event(EventName::OrderSubmitted));
        bus.emit(event(EventName::WsReconnectAttempt));
        bus.emit(event(EventName::WsReconnectAttempt));

        assert_eq!(bus.events_named(EventName::WsReconnectAttempt).len(), 2);
        assert_eq!(bus.events_named(EventName::WsCircuitOpen).len(), 0);
    }
}
