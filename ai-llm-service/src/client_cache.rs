//! LRU cache of OpenAI-family service clients.
//!
//! Key: SHA-256 of the API key, plus base URL and HTTP knobs. The raw key
//! material never appears in the cache key. A hit moves the entry to MRU.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::llm_model_config::LlmModelConfig;
use crate::error_handler::AiLlmError;
use crate::services::open_ai_service::OpenAiService;

/// Default cap on cached clients.
pub const DEFAULT_MAX_CLIENTS: usize = 200;

struct Slot {
    client: Arc<OpenAiService>,
    seq: u64,
}

pub struct ClientCache {
    slots: Mutex<(HashMap<String, Slot>, u64)>,
    max_clients: usize,
}

impl ClientCache {
    pub fn new(max_clients: usize) -> Self {
        Self {
            slots: Mutex::new((HashMap::new(), 0)),
            max_clients: max_clients.max(1),
        }
    }

    /// Deterministic cache key; credentials enter only as a digest.
    fn cache_key(cfg: &LlmModelConfig) -> String {
        let mut hasher = Sha256::new();
        hasher.update(cfg.api_key.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        format!(
            "{}:{}:{}:{}",
            digest, cfg.endpoint, cfg.timeout_ms, cfg.retries
        )
    }

    /// Returns the cached client for this config, constructing on miss.
    pub fn get_or_create(&self, cfg: &LlmModelConfig) -> Result<Arc<OpenAiService>, AiLlmError> {
        let key = Self::cache_key(cfg);
        let mut guard = self.slots.lock().expect("client cache poisoned");
        let (slots, next_seq) = &mut *guard;

        if let Some(slot) = slots.get_mut(&key) {
            // MRU touch.
            slot.seq = *next_seq;
            *next_seq += 1;
            return Ok(slot.client.clone());
        }

        let client = Arc::new(OpenAiService::new(cfg.clone())?);
        slots.insert(
            key,
            Slot {
                client: client.clone(),
                seq: *next_seq,
            },
        );
        *next_seq += 1;

        while slots.len() > self.max_clients {
            let oldest = slots
                .iter()
                .min_by_key(|(_, s)| s.seq)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    debug!("client cache: evict LRU entry");
                    slots.remove(&k);
                }
                None => break,
            }
        }

        Ok(client)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().expect("client cache poisoned").0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every cached client. Test hook.
    pub fn clear(&self) {
        let mut guard = self.slots.lock().expect("client cache poisoned");
        guard.0.clear();
    }
}

static CACHE: OnceLock<ClientCache> = OnceLock::new();

/// Process-wide client cache.
pub fn client_cache() -> &'static ClientCache {
    CACHE.get_or_init(|| ClientCache::new(DEFAULT_MAX_CLIENTS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::llm_provider::LlmProvider;

    fn cfg(key: &str, endpoint: &str) -> LlmModelConfig {
        LlmModelConfig {
            provider: LlmProvider::OpenAiCompatible,
            model: "test-model".into(),
            endpoint: endpoint.into(),
            api_key: key.into(),
            timeout_ms: 1_000,
            retries: 0,
            backoff_ms: 100,
            max_tokens: None,
            temperature: None,
        }
    }

    #[test]
    fn hit_reuses_the_same_client() {
        let cache = ClientCache::new(10);
        let a = cache.get_or_create(&cfg("k1", "https://a.example")).unwrap();
        let b = cache.get_or_create(&cfg("k1", "https://a.example")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn distinct_credentials_get_distinct_clients() {
        let cache = ClientCache::new(10);
        let a = cache.get_or_create(&cfg("k1", "https://a.example")).unwrap();
        let b = cache.get_or_create(&cfg("k2", "https://a.example")).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn lru_evicts_oldest_and_touch_protects_hits() {
        let cache = ClientCache::new(2);
        cache.get_or_create(&cfg("k1", "https://a.example")).unwrap();
        cache.get_or_create(&cfg("k2", "https://a.example")).unwrap();
        // Touch k1 so k2 is the eviction candidate.
        cache.get_or_create(&cfg("k1", "https://a.example")).unwrap();
        cache.get_or_create(&cfg("k3", "https://a.example")).unwrap();
        assert_eq!(cache.len(), 2);
        // k1 survived: re-creating it must hit the same Arc.
        let again = cache.get_or_create(&cfg("k1", "https://a.example")).unwrap();
        assert_eq!(Arc::strong_count(&again) >= 2, true);
    }

    #[test]
    fn raw_key_material_never_appears_in_cache_key() {
        let key = ClientCache::cache_key(&cfg("super-secret-token", "https://a.example"));
        assert!(!key.contains("super-secret-token"));
    }
}
