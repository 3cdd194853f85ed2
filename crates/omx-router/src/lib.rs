//! Batch entry point for the omx execution engine.
//!
//! [`OrderRouter::execute_orders`] is the single public surface: it
//! partitions a batch by exchange, sets up per-exchange sessions,
//! dispatches each order to the right executor variant, and collects one
//! immutable report per order in input order.

pub mod router;

pub use omx_events::format_batch_alert;
pub use router::OrderRouter;
