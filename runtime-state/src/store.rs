//! Scoped key→value map with per-entry TTL and a per-scope LRU cap.
//!
//! `save` is the single lifecycle entry point: expiration and eviction live
//! here so callers never write that logic themselves. Stale entries are
//! dropped at read time; eviction on save keeps the least recently saved
//! entries out once a scope exceeds its cap.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

struct Entry<V> {
    value: V,
    expires_at_ms: i64,
    seq: u64,
}

struct Scope<V> {
    entries: HashMap<String, Entry<V>>,
    next_seq: u64,
}

impl<V> Scope<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_seq: 0,
        }
    }
}

/// In-memory expiring storage shared by dedupe, rate limiting and friends.
pub struct RuntimeState<V> {
    scopes: Mutex<HashMap<String, Scope<V>>>,
}

impl<V: Clone> Default for RuntimeState<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> RuntimeState<V> {
    pub fn new() -> Self {
        Self {
            scopes: Mutex::new(HashMap::new()),
        }
    }

    /// Reads a value; a stale entry is removed and reported as absent.
    pub fn load(&self, scope: &str, key: &str, now_ms: i64) -> Option<V> {
        let mut scopes = self.scopes.lock().expect("runtime-state poisoned");
        let sc = scopes.get_mut(scope)?;
        match sc.entries.get(key) {
            Some(e) if e.expires_at_ms > now_ms => Some(e.value.clone()),
            Some(_) => {
                sc.entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Inserts or refreshes an entry and enforces the per-scope LRU cap.
    ///
    /// Saving an existing key refreshes both its expiry and its recency.
    pub fn save(
        &self,
        scope: &str,
        key: &str,
        value: V,
        expires_at_ms: i64,
        max_entries: usize,
    ) {
        let mut scopes = self.scopes.lock().expect("runtime-state poisoned");
        let sc = scopes.entry(scope.to_string()).or_insert_with(Scope::new);
        let seq = sc.next_seq;
        sc.next_seq += 1;
        sc.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at_ms,
                seq,
            },
        );

        while max_entries > 0 && sc.entries.len() > max_entries {
            let oldest = sc
                .entries
                .iter()
                .min_by_key(|(_, e)| e.seq)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    debug!(scope, key = %k, "runtime-state: evict LRU entry");
                    sc.entries.remove(&k);
                }
                None => break,
            }
        }
    }

    pub fn delete(&self, scope: &str, key: &str) {
        let mut scopes = self.scopes.lock().expect("runtime-state poisoned");
        if let Some(sc) = scopes.get_mut(scope) {
            sc.entries.remove(key);
        }
    }

    /// Drops every entry in a scope. Used by the test hooks.
    pub fn clear(&self, scope: &str) {
        let mut scopes = self.scopes.lock().expect("runtime-state poisoned");
        scopes.remove(scope);
    }

    /// Number of live entries in a scope (stale entries still count until
    /// touched; this is a diagnostic, not a contract).
    pub fn len(&self, scope: &str) -> usize {
        let scopes = self.scopes.lock().expect("runtime-state poisoned");
        scopes.get(scope).map(|s| s.entries.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_drops_stale_entries() {
        let st: RuntimeState<u32> = RuntimeState::new();
        st.save("s", "k", 7, 1_000, 10);
        assert_eq!(st.load("s", "k", 999), Some(7));
        assert_eq!(st.load("s", "k", 1_000), None);
        // The stale entry was deleted on read.
        assert_eq!(st.len("s"), 0);
    }

    #[test]
    fn save_refreshes_expiry() {
        let st: RuntimeState<u32> = RuntimeState::new();
        st.save("s", "k", 1, 1_000, 10);
        st.save("s", "k", 2, 5_000, 10);
        assert_eq!(st.load("s", "k", 4_000), Some(2));
    }

    #[test]
    fn lru_cap_evicts_least_recently_saved() {
        let st: RuntimeState<u32> = RuntimeState::new();
        st.save("s", "a", 1, 10_000, 2);
        st.save("s", "b", 2, 10_000, 2);
        // Refresh "a" so "b" becomes the eviction candidate.
        st.save("s", "a", 1, 10_000, 2);
        st.save("s", "c", 3, 10_000, 2);
        assert_eq!(st.load("s", "a", 0), Some(1));
        assert_eq!(st.load("s", "b", 0), None);
        assert_eq!(st.load("s", "c", 0), Some(3));
    }

    #[test]
    fn scopes_are_independent() {
        let st: RuntimeState<u32> = RuntimeState::new();
        st.save("one", "k", 1, 10_000, 10);
        st.save("two", "k", 2, 10_000, 10);
        st.clear("one");
        assert_eq!(st.load("one", "k", 0), None);
        assert_eq!(st.load("two", "k", 0), Some(2));
    }
}
