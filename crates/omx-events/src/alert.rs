//! Human-readable batch alert formatting.
//!
//! Renders the per-batch summary handed to the operator channel. Plain
//! text only: no debug formatting of internal types ever reaches the
//! output.

use omx_core::{ExecutionReport, OrderState};

const ORPHAN_REASON: &str = "exchange_not_found";

enum Outcome<'a> {
    Filled,
    Timeout,
    Rejected(&'a str),
    Orphaned,
    Other(&'a str),
}

fn outcome(report: &ExecutionReport) -> Outcome<'_> {
    let reason = report.failure_reason().unwrap_or("");
    match report.final_state() {
        OrderState::Filled => Outcome::Filled,
        OrderState::TimedOut => Outcome::Timeout,
        OrderState::Rejected => Outcome::Rejected(reason),
        _ if reason == ORPHAN_REASON => Outcome::Orphaned,
        _ if reason.contains("timed out") || reason.contains("timeout") => Outcome::Timeout,
        _ => Outcome::Other(reason),
    }
}

/// Format the batch summary alert.
///
/// Contains a `filled/total` header with timeout and rejection counts,
/// one line per filled order (`SYMBOL@EXCHANGE fill_price latency_ms`),
/// one line per failed order with its reason, and one line per orphaned
/// order so the operator can see which position needs attention.
pub fn format_batch_alert(reports: &[ExecutionReport]) -> String {
    let total = reports.len();
    let mut filled = 0usize;
    let mut timeouts = 0usize;
    let mut rejected = 0usize;
    for report in reports {
        match outcome(report) {
            Outcome::Filled => filled += 1,
            Outcome::Timeout => timeouts += 1,
            Outcome::Rejected(_) => rejected += 1,
            _ => {}
        }
    }

    let mut lines = vec![format!(
        "order batch: {filled}/{total} filled (timeouts: {timeouts}, rejected: {rejected})"
    )];

    for report in reports {
        let pair = format!("{}@{}", report.symbol(), report.exchange_id());
        match outcome(report) {
            Outcome::Filled => {
                let price = report
                    .avg_price()
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "-".to_string());
                lines.push(format!("{pair} {price} {}ms", report.fill_latency_ms()));
            }
            Outcome::Timeout => lines.push(format!("failed {pair} timeout")),
            Outcome::Rejected(reason) => {
                if reason.is_empty() {
                    lines.push(format!("failed {pair} rejected"));
                } else {
                    lines.push(format!("failed {pair} rejected: {reason}"));
                }
            }
            Outcome::Orphaned => lines.push(format!("orphaned {pair}")),
            Outcome::Other(reason) => {
                let reason = if reason.is_empty() { "failed" } else { reason };
                lines.push(format!("failed {pair} {reason}"));
            }
        }
    }

    lines.join("\n")
}
