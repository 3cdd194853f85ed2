//! Core domain types for the omx order execution engine.
//!
//! This crate provides the fundamental types used throughout the engine:
//! - `Price`, `Qty`: precision-safe numeric types
//! - `OrderRequest`, `OrderBatch`: the caller-facing order model
//! - `OrderState`, `OpenOrder`: lifecycle state machine
//! - `ExecutionReport`: the immutable per-order outcome
//! - `ExecutorConfig` and friends: the recognized configuration surface

pub mod config;
pub mod decimal;
pub mod error;
pub mod order;
pub mod report;
pub mod state;

pub use config::{ExecutionStrategy, ExecutorConfig, RepriceConfig, WsResilienceConfig};
pub use decimal::{Price, Qty};
pub use error::{CoreError, Result};
pub use order::{
    ExchangeId, ExecutionKind, MarginMode, OrderBatch, OrderId, OrderRequest, OrderSide,
};
pub use report::{ExecutionReport, ReportBuilder};
pub use state::{OpenOrder, OrderState};
