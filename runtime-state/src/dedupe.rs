//! Fingerprint suppression on top of [`RuntimeState`].
//!
//! The first sighting of a key reserves it; repeats inside the TTL are
//! duplicates and refresh the reservation so a rapid retry stays suppressed.
//! A failed downstream call must release its reservation with [`Dedupe::clear`]
//! or the failure window outlives the work it was guarding.

use crate::store::RuntimeState;

const SCOPE: &str = "dedupe";
const MAX_KEYS: usize = 5_000;

pub struct Dedupe {
    state: RuntimeState<()>,
}

impl Default for Dedupe {
    fn default() -> Self {
        Self::new()
    }
}

impl Dedupe {
    pub fn new() -> Self {
        Self {
            state: RuntimeState::new(),
        }
    }

    /// Reports whether `key` was seen within `ttl_ms`, reserving it either way.
    /// Blank keys fail open.
    pub fn is_duplicate(&self, key: &str, ttl_ms: i64, now_ms: i64) -> bool {
        if key.trim().is_empty() {
            return false;
        }
        let seen = self.state.load(SCOPE, key, now_ms).is_some();
        self.state
            .save(SCOPE, key, (), now_ms.saturating_add(ttl_ms), MAX_KEYS);
        seen
    }

    /// Releases a reservation so a retry is possible immediately.
    pub fn clear(&self, key: &str) {
        self.state.delete(SCOPE, key);
    }

    /// Drops every reservation. Test hook.
    pub fn clear_all(&self) {
        self.state.clear(SCOPE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_seen_then_duplicate_then_expired() {
        let d = Dedupe::new();
        assert!(!d.is_duplicate("k", 1_000, 0));
        assert!(d.is_duplicate("k", 1_000, 500));
        // The repeat at t=500 refreshed the reservation to t=1500.
        assert!(d.is_duplicate("k", 1_000, 1_400));
        assert!(!d.is_duplicate("k", 1_000, 3_000));
    }

    #[test]
    fn clear_releases_reservation() {
        let d = Dedupe::new();
        assert!(!d.is_duplicate("k", 60_000, 0));
        d.clear("k");
        assert!(!d.is_duplicate("k", 60_000, 1));
    }

    #[test]
    fn blank_key_fails_open() {
        let d = Dedupe::new();
        assert!(!d.is_duplicate("", 1_000, 0));
        assert!(!d.is_duplicate("   ", 1_000, 0));
        assert!(!d.is_duplicate("", 1_000, 1));
    }
}
