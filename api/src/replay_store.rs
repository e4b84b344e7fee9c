//! Optional NDJSON replay store for received webhook events.
//!
//! Off by default. When enabled, each event is appended as one JSON line
//! with a generated id, normalised headers (sensitive ones stripped unless
//! explicitly kept), and a size-capped body. The file is trimmed to the
//! last `max_entries` lines every `TRIM_EVERY_WRITES` appends using a temp
//! file + rename so a crash never leaves a half-truncated store.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Appends between trims.
pub const TRIM_EVERY_WRITES: u32 = 50;
/// Default cap on stored events.
pub const DEFAULT_MAX_ENTRIES: usize = 2_000;
/// Default cap on a stored body.
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;

const SENSITIVE_HEADERS: [&str; 6] = [
    "authorization",
    "cookie",
    "x-hub-signature-256",
    "x-gitlab-token",
    "x-gitlab-api-token",
    "x-mr-agent-replay-token",
];

/// One stored webhook event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: String,
    pub platform: String,
    pub event_name: String,
    /// ISO-8601 receive time.
    pub received_at: String,
    pub headers: std::collections::BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_body: Option<String>,
}

/// Listing summary (no payload).
#[derive(Debug, Clone, Serialize)]
pub struct StoredEventSummary {
    pub id: String,
    pub platform: String,
    pub event_name: String,
    pub received_at: String,
}

pub struct ReplayStore {
    enabled: bool,
    path: PathBuf,
    max_entries: usize,
    max_body_bytes: usize,
    keep_sensitive: bool,
    counter: Mutex<(u64, u32)>,
}

impl ReplayStore {
    pub fn from_env() -> Self {
        let enabled = env_flag("WEBHOOK_REPLAY_ENABLED");
        let path = std::env::var("WEBHOOK_EVENT_STORE_FILE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("data/webhook-events.ndjson"));
        Self::new(
            enabled,
            path,
            env_usize("WEBHOOK_EVENT_STORE_MAX_ENTRIES", DEFAULT_MAX_ENTRIES),
            env_usize("WEBHOOK_EVENT_STORE_MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES),
            env_flag("WEBHOOK_EVENT_STORE_KEEP_SENSITIVE_HEADERS"),
        )
    }

    pub fn new(
        enabled: bool,
        path: PathBuf,
        max_entries: usize,
        max_body_bytes: usize,
        keep_sensitive: bool,
    ) -> Self {
        Self {
            enabled,
            path,
            max_entries: max_entries.max(1),
            max_body_bytes,
            keep_sensitive,
            counter: Mutex::new((0, 0)),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Records one event; returns the generated id, or `None` when disabled
    /// or the write failed (recording is best-effort).
    pub async fn record(
        &self,
        platform: &str,
        event_name: &str,
        headers: &axum::http::HeaderMap,
        body: &[u8],
    ) -> Option<String> {
        if !self.enabled {
            return None;
        }

        let (id, should_trim) = {
            let mut guard = self.counter.lock().expect("replay counter poisoned");
            guard.0 += 1;
            guard.1 += 1;
            let trim = guard.1 >= TRIM_EVERY_WRITES;
            if trim {
                guard.1 = 0;
            }
            (format!("evt-{}-{}", runtime_state::now_ms(), guard.0), trim)
        };

        let capped = &body[..body.len().min(self.max_body_bytes)];
        let payload = serde_json::from_slice::<serde_json::Value>(capped).ok();
        let raw_body = if payload.is_none() {
            Some(String::from_utf8_lossy(capped).into_owned())
        } else {
            None
        };

        let event = StoredEvent {
            id: id.clone(),
            platform: platform.to_string(),
            event_name: event_name.to_string(),
            received_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            headers: self.normalise_headers(headers),
            payload,
            raw_body,
        };

        if let Err(e) = self.append(&event).await {
            warn!(error = %e, "replay store append failed");
            return None;
        }
        if should_trim {
            if let Err(e) = self.trim().await {
                warn!(error = %e, "replay store trim failed");
            }
        }
        Some(id)
    }

    fn normalise_headers(
        &self,
        headers: &axum::http::HeaderMap,
    ) -> std::collections::BTreeMap<String, String> {
        headers
            .iter()
            .filter_map(|(k, v)| {
                let key = k.as_str().to_lowercase();
                if !self.keep_sensitive && SENSITIVE_HEADERS.contains(&key.as_str()) {
                    return None;
                }
                Some((key, v.to_str().unwrap_or("<binary>").to_string()))
            })
            .collect()
    }

    async fn append(&self, event: &StoredEvent) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        Ok(())
    }

    /// Rewrites the file to its last `max_entries` lines atomically.
    async fn trim(&self) -> std::io::Result<()> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        let lines: Vec<&str> = data.lines().filter(|l| !l.trim().is_empty()).collect();
        if lines.len() <= self.max_entries {
            return Ok(());
        }
        let keep = &lines[lines.len() - self.max_entries..];
        let tmp = self.path.with_extension("ndjson.tmp");
        let mut content = keep.join("\n");
        content.push('\n');
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(kept = keep.len(), "replay store trimmed");
        Ok(())
    }

    /// Newest-first summaries, optionally filtered by platform.
    pub async fn list(&self, platform: Option<&str>, limit: usize) -> Vec<StoredEventSummary> {
        if !self.enabled {
            return Vec::new();
        }
        self.read_all()
            .await
            .into_iter()
            .rev()
            .filter(|e| platform.is_none_or(|p| e.platform == p))
            .take(limit)
            .map(|e| StoredEventSummary {
                id: e.id,
                platform: e.platform,
                event_name: e.event_name,
                received_at: e.received_at,
            })
            .collect()
    }

    pub async fn get(&self, id: &str) -> Option<StoredEvent> {
        if !self.enabled {
            return None;
        }
        self.read_all().await.into_iter().find(|e| e.id == id)
    }

    async fn read_all(&self) -> Vec<StoredEvent> {
        let Ok(data) = tokio::fs::read_to_string(&self.path).await else {
            return Vec::new();
        };
        data.lines()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};

    fn store(dir: &tempfile::TempDir, enabled: bool, max_entries: usize) -> ReplayStore {
        ReplayStore::new(
            enabled,
            dir.path().join("events.ndjson"),
            max_entries,
            DEFAULT_MAX_BODY_BYTES,
            false,
        )
    }

    #[tokio::test]
    async fn disabled_store_records_nothing_and_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir, false, 100);
        assert!(s.record("github", "push", &HeaderMap::new(), b"{}").await.is_none());
        assert!(s.list(None, 10).await.is_empty());
    }

    #[tokio::test]
    async fn records_and_lists_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir, true, 100);
        let a = s
            .record("github", "pull_request", &HeaderMap::new(), br#"{"n":1}"#)
            .await
            .unwrap();
        let b = s
            .record("gitlab", "Note Hook", &HeaderMap::new(), br#"{"n":2}"#)
            .await
            .unwrap();

        let all = s.list(None, 10).await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, b);
        assert_eq!(all[1].id, a);

        let gh = s.list(Some("github"), 10).await;
        assert_eq!(gh.len(), 1);
        assert_eq!(gh[0].id, a);

        let full = s.get(&a).await.unwrap();
        assert_eq!(full.payload.unwrap()["n"], 1);
    }

    #[tokio::test]
    async fn sensitive_headers_are_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir, true, 100);
        let mut headers = HeaderMap::new();
        headers.insert("X-Hub-Signature-256", HeaderValue::from_static("sha256=aa"));
        headers.insert("X-GitHub-Event", HeaderValue::from_static("push"));
        let id = s.record("github", "push", &headers, b"{}").await.unwrap();
        let event = s.get(&id).await.unwrap();
        assert!(event.headers.contains_key("x-github-event"));
        assert!(!event.headers.contains_key("x-hub-signature-256"));
    }

    #[tokio::test]
    async fn non_json_bodies_land_in_raw_body() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir, true, 100);
        let id = s.record("github", "ping", &HeaderMap::new(), b"not json").await.unwrap();
        let event = s.get(&id).await.unwrap();
        assert!(event.payload.is_none());
        assert_eq!(event.raw_body.as_deref(), Some("not json"));
    }

    #[tokio::test]
    async fn trim_keeps_only_the_newest_entries() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir, true, 10);
        for i in 0..(TRIM_EVERY_WRITES as usize + 5) {
            s.record("github", &format!("e{i}"), &HeaderMap::new(), b"{}")
                .await
                .unwrap();
        }
        let all = s.list(None, 1_000).await;
        assert!(all.len() <= 10 + 5);
        // The newest event is still present.
        assert!(all.iter().any(|e| e.event_name == format!("e{}", TRIM_EVERY_WRITES as usize + 4)));
    }
}
