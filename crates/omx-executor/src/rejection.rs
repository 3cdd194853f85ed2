//! Classify adapter errors as fatal or transient.
//!
//! FATAL: permanent business errors (insufficient funds, unknown symbol).
//! The caller fails the order without retrying. TRANSIENT: everything
//! else, including unclassified errors: the caller applies backoff and
//! retries instead of silencing a recoverable glitch.

use omx_exchange::AdapterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionSeverity {
    Fatal,
    Transient,
}

impl RejectionSeverity {
    pub fn classify(err: &AdapterError) -> Self {
        match err {
            AdapterError::InsufficientFunds(_) | AdapterError::BadSymbol(_) => Self::Fatal,
            _ => Self::Transient,
        }
    }
}
