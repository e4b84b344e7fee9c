//! Process-wide counters contributed to the metrics endpoint.
//!
//! The renderer lives outside this crate; these are plain monotonic atomics.

use std::sync::atomic::{AtomicU64, Ordering};

pub static PROVIDER_CALLS: AtomicU64 = AtomicU64::new(0);
pub static PROVIDER_FALLBACKS: AtomicU64 = AtomicU64::new(0);
pub static PROVIDER_FAILURES: AtomicU64 = AtomicU64::new(0);

pub fn record_call() {
    PROVIDER_CALLS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_fallback() {
    PROVIDER_FALLBACKS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_failure() {
    PROVIDER_FAILURES.fetch_add(1, Ordering::Relaxed);
}

pub fn snapshot() -> (u64, u64, u64) {
    (
        PROVIDER_CALLS.load(Ordering::Relaxed),
        PROVIDER_FALLBACKS.load(Ordering::Relaxed),
        PROVIDER_FAILURES.load(Ordering::Relaxed),
    )
}
