//! Structured lifecycle events for the omx execution engine.
//!
//! The event bus is the single shared observability surface: executors
//! emit [`StructuredEvent`]s at every state transition, the bus appends
//! them to an ordered in-memory log scoped to the batch and fans them out
//! synchronously to registered sinks.

pub mod alert;
pub mod bus;
pub mod event;

pub use alert::format_batch_alert;
pub use bus::{ChannelSink, EventBus, EventSink, RecordingSink, TracingSink};
pub use event::{EventName, StructuredEvent};
