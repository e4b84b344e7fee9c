//! Process-wide mutable state with explicit test hooks.
//!
//! Every cache/limiter instance used across requests lives here as a
//! `lazy_static` singleton. Each is internally synchronized; callers must
//! never hold references across await points longer than one operation.

use lazy_static::lazy_static;
use runtime_state::{Dedupe, ExpiringCache, RateLimiter};

use crate::git_providers::types::ProcessGuideline;
use crate::policy::PolicyConfig;

/// Default TTL for cached guideline files.
pub const DEFAULT_GUIDELINE_TTL_MS: i64 = 10 * 60 * 1_000;
/// Default TTL for remembered review heads.
pub const DEFAULT_INCREMENTAL_HEAD_TTL_MS: i64 = 24 * 60 * 60 * 1_000;
/// Default TTL for developer feedback signals.
pub const DEFAULT_FEEDBACK_TTL_MS: i64 = 24 * 60 * 60 * 1_000;
/// Default TTL for ask-session turns.
pub const DEFAULT_ASK_SESSION_TTL_MS: i64 = 30 * 60 * 1_000;

/// LRU caps for the singleton caches.
pub const GUIDELINE_CACHE_MAX: usize = 200;
pub const INCREMENTAL_HEAD_MAX: usize = 2_000;
pub const FEEDBACK_CACHE_MAX: usize = 2_000;
pub const ASK_SESSION_MAX: usize = 500;
pub const TRUNCATION_FLAG_MAX: usize = 500;

lazy_static! {
    static ref POLICY_CACHE: ExpiringCache<String, PolicyConfig> = ExpiringCache::new();
    static ref GUIDELINE_CACHE: ExpiringCache<String, Vec<ProcessGuideline>> = ExpiringCache::new();
    static ref INCREMENTAL_HEADS: ExpiringCache<String, String> = ExpiringCache::new();
    static ref FEEDBACK_SIGNALS: ExpiringCache<String, Vec<String>> = ExpiringCache::new();
    static ref ASK_SESSIONS: ExpiringCache<String, Vec<(String, String)>> = ExpiringCache::new();
    static ref TRUNCATION_FLAGS: ExpiringCache<String, bool> = ExpiringCache::new();
    static ref RATE_LIMITER: RateLimiter = RateLimiter::new();
    static ref DEDUPE: Dedupe = Dedupe::new();
}

pub fn policy_cache() -> &'static ExpiringCache<String, PolicyConfig> {
    &POLICY_CACHE
}

pub fn guideline_cache() -> &'static ExpiringCache<String, Vec<ProcessGuideline>> {
    &GUIDELINE_CACHE
}

pub fn incremental_heads() -> &'static ExpiringCache<String, String> {
    &INCREMENTAL_HEADS
}

pub fn feedback_signals() -> &'static ExpiringCache<String, Vec<String>> {
    &FEEDBACK_SIGNALS
}

pub fn ask_sessions() -> &'static ExpiringCache<String, Vec<(String, String)>> {
    &ASK_SESSIONS
}

/// Memoised "file listing was truncated" flags, keyed per
/// `(platform, project, number, per_page)`.
pub fn truncation_flags() -> &'static ExpiringCache<String, bool> {
    &TRUNCATION_FLAGS
}

pub fn rate_limiter() -> &'static RateLimiter {
    &RATE_LIMITER
}

pub fn dedupe() -> &'static Dedupe {
    &DEDUPE
}

fn env_ttl(name: &str, default: i64) -> i64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub fn guideline_ttl_ms() -> i64 {
    env_ttl("GUIDELINE_CACHE_TTL_MS", DEFAULT_GUIDELINE_TTL_MS)
}

pub fn incremental_head_ttl_ms() -> i64 {
    env_ttl("INCREMENTAL_HEAD_TTL_MS", DEFAULT_INCREMENTAL_HEAD_TTL_MS)
}

pub fn feedback_ttl_ms() -> i64 {
    env_ttl("FEEDBACK_SIGNALS_TTL_MS", DEFAULT_FEEDBACK_TTL_MS)
}

pub fn ask_session_ttl_ms() -> i64 {
    env_ttl("ASK_SESSION_TTL_MS", DEFAULT_ASK_SESSION_TTL_MS)
}

/// Resets every singleton. Test hook.
pub fn clear_all_for_tests() {
    POLICY_CACHE.clear();
    GUIDELINE_CACHE.clear();
    INCREMENTAL_HEADS.clear();
    FEEDBACK_SIGNALS.clear();
    ASK_SESSIONS.clear();
    TRUNCATION_FLAGS.clear();
    RATE_LIMITER.clear_all();
    DEDUPE.clear_all();
}
