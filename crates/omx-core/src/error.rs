//! Error types for omx-core.

use thiserror::Error;

use crate::state::OrderState;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid order request: {0}")]
    InvalidRequest(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: OrderState, to: OrderState },

    #[error("Report validation failed: {0}")]
    Validation(String),

    #[error("Decimal parse error: {0}")]
    DecimalParse(#[from] rust_decimal::Error),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
