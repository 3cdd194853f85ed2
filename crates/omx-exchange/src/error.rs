//! Adapter error types.

use thiserror::Error;

/// Error returned by an exchange adapter call.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    #[error("network error: {0}")]
    Network(String),

    #[error("rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("unknown symbol: {0}")]
    BadSymbol(String),

    #[error("order not found: {0}")]
    OrderNotFound(String),

    #[error("exchange error: {0}")]
    Exchange(String),
}

impl AdapterError {
    /// Whether a retry can reasonably be expected to succeed.
    ///
    /// Unknown exchange errors count as transient so a transient glitch
    /// the adapter failed to classify does not permanently fail an order.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::RateLimit(_) | Self::Exchange(_) => true,
            Self::InsufficientFunds(_) | Self::BadSymbol(_) | Self::OrderNotFound(_) => false,
        }
    }
}

pub type AdapterResult<T> = Result<T, AdapterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(AdapterError::Network("reset".into()).is_transient());
        assert!(AdapterError::RateLimit("429".into()).is_transient());
        assert!(AdapterError::Exchange("maintenance".into()).is_transient());
        assert!(!AdapterError::InsufficientFunds("margin".into()).is_transient());
        assert!(!AdapterError::BadSymbol("XXX/YYY".into()).is_transient());
    }
}
