//! Generic expiring cache with a throttled prune and an LRU trim.
//!
//! One instance per cache site (policy configs, guideline files, incremental
//! review heads, feedback signals, ask sessions). Reads evict stale entries
//! immediately; the full sweep runs at most once per second per instance.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

/// Minimum gap between two full prune sweeps on one instance.
const PRUNE_INTERVAL_MS: i64 = 1_000;

struct Slot<V> {
    value: V,
    expires_at_ms: i64,
    seq: u64,
}

struct Inner<K, V> {
    slots: HashMap<K, Slot<V>>,
    next_seq: u64,
    last_prune_ms: i64,
}

pub struct ExpiringCache<K, V> {
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> Default for ExpiringCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ExpiringCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: HashMap::new(),
                next_seq: 0,
                last_prune_ms: i64::MIN,
            }),
        }
    }

    /// Returns the value if present and fresh; a stale hit is deleted and
    /// reported as a miss.
    pub fn get_fresh(&self, key: &K, now_ms: i64) -> Option<V> {
        let mut inner = self.inner.lock().expect("expiring-cache poisoned");
        match inner.slots.get(key) {
            Some(s) if s.expires_at_ms > now_ms => Some(s.value.clone()),
            Some(_) => {
                inner.slots.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: K, value: V, ttl_ms: i64, now_ms: i64) {
        let mut inner = self.inner.lock().expect("expiring-cache poisoned");
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.slots.insert(
            key,
            Slot {
                value,
                expires_at_ms: now_ms.saturating_add(ttl_ms),
                seq,
            },
        );
    }

    pub fn remove(&self, key: &K) {
        let mut inner = self.inner.lock().expect("expiring-cache poisoned");
        inner.slots.remove(key);
    }

    /// Sweeps out every stale entry, at most once per second per instance.
    /// Returns the number of entries removed (0 when throttled).
    pub fn prune(&self, now_ms: i64) -> usize {
        let mut inner = self.inner.lock().expect("expiring-cache poisoned");
        if now_ms - inner.last_prune_ms < PRUNE_INTERVAL_MS {
            return 0;
        }
        inner.last_prune_ms = now_ms;
        let before = inner.slots.len();
        inner.slots.retain(|_, s| s.expires_at_ms > now_ms);
        before - inner.slots.len()
    }

    /// Evicts the oldest insertions until at most `max` entries remain.
    pub fn trim(&self, max: usize) {
        let mut inner = self.inner.lock().expect("expiring-cache poisoned");
        while inner.slots.len() > max {
            let oldest = inner
                .slots
                .iter()
                .min_by_key(|(_, s)| s.seq)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    inner.slots.remove(&k);
                }
                None => break,
            }
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("expiring-cache poisoned");
        inner.slots.clear();
        inner.last_prune_ms = i64::MIN;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("expiring-cache poisoned").slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_fresh_deletes_stale_key() {
        let c: ExpiringCache<String, u32> = ExpiringCache::new();
        c.insert("k".into(), 1, 100, 0);
        assert_eq!(c.get_fresh(&"k".into(), 99), Some(1));
        assert_eq!(c.get_fresh(&"k".into(), 100), None);
        assert_eq!(c.len(), 0);
    }

    #[test]
    fn prune_is_throttled_to_once_per_second() {
        let c: ExpiringCache<String, u32> = ExpiringCache::new();
        c.insert("a".into(), 1, 10, 0);
        c.insert("b".into(), 2, 10_000, 0);
        assert_eq!(c.prune(100), 1);
        // Entry expires, but prune at +500ms is a no-op.
        c.insert("c".into(), 3, 10, 100);
        assert_eq!(c.prune(600), 0);
        assert_eq!(c.len(), 2);
        // Per-key read still evicts even while the sweep is throttled.
        assert_eq!(c.get_fresh(&"c".into(), 600), None);
        assert_eq!(c.prune(1_200), 0);
    }

    #[test]
    fn trim_keeps_most_recent_insertions() {
        let c: ExpiringCache<u32, u32> = ExpiringCache::new();
        for i in 0..5 {
            c.insert(i, i, 10_000, i as i64);
        }
        c.trim(2);
        assert_eq!(c.len(), 2);
        assert_eq!(c.get_fresh(&3, 10), Some(3));
        assert_eq!(c.get_fresh(&4, 10), Some(4));
        assert_eq!(c.get_fresh(&0, 10), None);
    }
}
