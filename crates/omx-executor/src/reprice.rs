//! Reprice policy.
//!
//! A pure decision function shared by both executor variants: given the
//! current resting price, the latest best price, the elapsed time since
//! submission and the policy config, decide whether a cancel-and-replace
//! should proceed. No I/O, no suspension.

use rust_decimal::Decimal;
use std::time::Duration;

use omx_core::{Price, RepriceConfig};

/// Outcome of a reprice evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepriceDecision {
    /// Cancel-and-replace at the new price.
    Reprice(Price),
    /// Change too small; keep the resting order. Carries the observed
    /// fractional change.
    Suppress(Decimal),
    /// Elapsed-time override: reprice regardless of the threshold.
    ElapsedOverride(Price),
}

impl RepriceDecision {
    /// Whether the cancel-and-replace should proceed.
    pub fn should_reprice(&self) -> bool {
        matches!(self, Self::Reprice(_) | Self::ElapsedOverride(_))
    }
}

/// Decide whether to reprice, evaluating rules in order:
///
/// 1. Equal prices always suppress.
/// 2. An elapsed-time override (when configured and reached) bypasses the
///    threshold.
/// 3. A change below `min_reprice_threshold_pct` suppresses.
/// 4. Otherwise reprice. A zero threshold therefore reprices on any
///    change.
pub fn decide(
    current: Price,
    best: Price,
    elapsed: Duration,
    cfg: &RepriceConfig,
) -> RepriceDecision {
    if current == best {
        return RepriceDecision::Suppress(Decimal::ZERO);
    }

    // A zero current price carries no meaningful change percentage; any
    // move away from it is a reprice.
    let Some(change_pct) = current.change_pct_to(best) else {
        return RepriceDecision::Reprice(best);
    };

    if let Some(window) = cfg.elapsed_override() {
        if elapsed >= window {
            return RepriceDecision::ElapsedOverride(best);
        }
    }

    if change_pct < cfg.min_reprice_threshold_pct {
        return RepriceDecision::Suppress(change_pct);
    }

    RepriceDecision::Reprice(best)
}
