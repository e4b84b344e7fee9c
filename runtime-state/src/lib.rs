//! Process-local mutable state: scoped TTL+LRU storage and the gates
//! built on top of it.
//!
//! - [`store::RuntimeState`] — scoped key→value map with per-entry TTL and a
//!   per-scope LRU cap; the single lifecycle entry point for expiring state.
//! - [`cache::ExpiringCache`] — generic `{value, expires_at}` map with a
//!   throttled prune and an LRU trim.
//! - [`dedupe::Dedupe`] — "seen this fingerprint inside T?" with explicit
//!   reservation release.
//! - [`rate_limit::RateLimiter`] — sliding-window counter with canonical keys
//!   and idle-key pruning.
//!
//! Nothing here survives a process restart. Every public operation is atomic
//! with respect to others on the same instance (internal `Mutex`); callers
//! pass `now_ms` explicitly so tests control the clock.

pub mod cache;
pub mod dedupe;
pub mod rate_limit;
pub mod store;

pub use cache::ExpiringCache;
pub use dedupe::Dedupe;
pub use rate_limit::RateLimiter;
pub use store::RuntimeState;

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
