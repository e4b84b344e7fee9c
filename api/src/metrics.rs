//! Counter contributions for the metrics endpoint.
//!
//! The full exposition renderer is an external collaborator; the core only
//! owns monotonic counters and the text lines for them.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

pub static WEBHOOKS_RECEIVED: AtomicU64 = AtomicU64::new(0);
pub static WEBHOOKS_REJECTED: AtomicU64 = AtomicU64::new(0);
pub static WEBHOOKS_VERIFIED: AtomicU64 = AtomicU64::new(0);
pub static REVIEWS_RUN: AtomicU64 = AtomicU64::new(0);

pub fn inc(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Prometheus text exposition of the core's counters.
pub fn render() -> String {
    let mut out = String::new();
    let rows = [
        ("mr_agent_webhooks_received_total", WEBHOOKS_RECEIVED.load(Ordering::Relaxed)),
        ("mr_agent_webhooks_rejected_total", WEBHOOKS_REJECTED.load(Ordering::Relaxed)),
        ("mr_agent_webhooks_verified_total", WEBHOOKS_VERIFIED.load(Ordering::Relaxed)),
        ("mr_agent_reviews_run_total", REVIEWS_RUN.load(Ordering::Relaxed)),
    ];
    for (name, value) in rows {
        let _ = writeln!(out, "# TYPE {name} counter");
        let _ = writeln!(out, "{name} {value}");
    }

    let (calls, fallbacks, failures) = ai_llm_service::telemetry::snapshot();
    for (name, value) in [
        ("mr_agent_provider_calls_total", calls),
        ("mr_agent_provider_fallbacks_total", fallbacks),
        ("mr_agent_provider_failures_total", failures),
    ] {
        let _ = writeln!(out, "# TYPE {name} counter");
        let _ = writeln!(out, "{name} {value}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_emits_type_lines_for_every_counter() {
        inc(&WEBHOOKS_RECEIVED);
        let text = render();
        assert!(text.contains("# TYPE mr_agent_webhooks_received_total counter"));
        assert!(text.contains("mr_agent_provider_calls_total"));
        assert!(text.lines().count() >= 14);
    }
}
