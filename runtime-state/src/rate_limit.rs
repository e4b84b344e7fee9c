//! Sliding-window rate limiter on top of [`RuntimeState`].
//!
//! Each key holds the ordered timestamps of accepted events inside the
//! window. A limited call touches the record (refreshing recency and idle
//! expiry) without appending a sample. Keys idle for a day fall out; the
//! whole table is capped at 5 000 keys with LRU eviction.

use crate::store::RuntimeState;

const SCOPE: &str = "hits";
const MAX_KEYS: usize = 5_000;
const IDLE_TTL_MS: i64 = 24 * 60 * 60 * 1_000;
const MAX_KEY_LEN: usize = 80;
const FALLBACK_KEY: &str = "anonymous";

pub struct RateLimiter {
    state: RuntimeState<Vec<i64>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            state: RuntimeState::new(),
        }
    }

    /// Reports whether `key` exceeded `limit` events inside the sliding
    /// `window_ms`. An accepted call appends `now_ms` to the record.
    pub fn is_limited(&self, key: &str, limit: usize, window_ms: i64, now_ms: i64) -> bool {
        let key = canonical_key(key);
        let floor = now_ms - window_ms;
        let mut samples = self
            .state
            .load(SCOPE, &key, now_ms)
            .unwrap_or_default();
        samples.retain(|&t| t > floor && t <= now_ms);

        let limited = samples.len() >= limit;
        if !limited {
            samples.push(now_ms);
        }
        // Touch in both branches: a limited caller still counts as activity
        // for idle-expiry purposes.
        self.state.save(
            SCOPE,
            &key,
            samples,
            now_ms.saturating_add(IDLE_TTL_MS),
            MAX_KEYS,
        );
        limited
    }

    /// Drops every record. Test hook.
    pub fn clear_all(&self) {
        self.state.clear(SCOPE);
    }
}

/// Canonical form shared by every rate-limit key: lowercase, anything outside
/// `[a-z0-9._-]` becomes `-`, runs of `-` collapse, length capped at 80.
/// An empty result becomes a stable fallback token.
pub fn canonical_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len().min(MAX_KEY_LEN));
    let mut prev_dash = false;
    for ch in raw.chars() {
        let ch = ch.to_ascii_lowercase();
        let mapped = if ch.is_ascii_lowercase() || ch.is_ascii_digit() || matches!(ch, '.' | '_' | '-')
        {
            ch
        } else {
            '-'
        };
        if mapped == '-' {
            if prev_dash {
                continue;
            }
            prev_dash = true;
        } else {
            prev_dash = false;
        }
        out.push(mapped);
        if out.len() >= MAX_KEY_LEN {
            break;
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        FALLBACK_KEY.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_admits_limit_then_blocks() {
        let rl = RateLimiter::new();
        for i in 0..3 {
            assert!(!rl.is_limited("user", 3, 1_000, i));
        }
        assert!(rl.is_limited("user", 3, 1_000, 10));
    }

    #[test]
    fn budget_replenishes_as_oldest_sample_ages_out() {
        let rl = RateLimiter::new();
        assert!(!rl.is_limited("k", 2, 1_000, 0));
        assert!(!rl.is_limited("k", 2, 1_000, 100));
        assert!(rl.is_limited("k", 2, 1_000, 200));
        // Oldest sample (t=0) leaves the window at t=1001; one slot opens.
        assert!(!rl.is_limited("k", 2, 1_000, 1_001));
        assert!(rl.is_limited("k", 2, 1_000, 1_002));
    }

    #[test]
    fn limited_call_does_not_consume_budget() {
        let rl = RateLimiter::new();
        assert!(!rl.is_limited("k", 1, 1_000, 0));
        assert!(rl.is_limited("k", 1, 1_000, 500));
        // Only the t=0 sample exists, so the window clears at t=1001.
        assert!(!rl.is_limited("k", 1, 1_000, 1_001));
    }

    #[test]
    fn keys_are_canonicalised() {
        assert_eq!(canonical_key("GitHub:acme/Demo#12 @Alice"), "github-acme-demo-12-alice");
        assert_eq!(canonical_key("a//b"), "a-b");
        assert_eq!(canonical_key(""), "anonymous");
        assert_eq!(canonical_key("!!!"), "anonymous");
        assert!(canonical_key(&"x".repeat(300)).len() <= 80);
    }

    #[test]
    fn distinct_users_have_distinct_budgets() {
        let rl = RateLimiter::new();
        assert!(!rl.is_limited("alice", 1, 1_000, 0));
        assert!(!rl.is_limited("bob", 1, 1_000, 0));
        assert!(rl.is_limited("alice", 1, 1_000, 1));
    }
}
