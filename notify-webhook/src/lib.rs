//! Side-channel notifications for review outcomes.
//!
//! Fans a markdown message out to a webhook URL in one of four wire formats
//! (WeCom, Slack, Discord, generic JSON). Delivery is best-effort: failures
//! are logged and swallowed so a broken notification channel can never fail
//! a review.

use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

/// Wire format selected by `NOTIFY_WEBHOOK_FORMAT`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookFormat {
    Wecom,
    Slack,
    Discord,
    #[default]
    Generic,
}

impl WebhookFormat {
    /// Parses the env value; anything unknown falls back to generic.
    pub fn from_env() -> Self {
        match std::env::var("NOTIFY_WEBHOOK_FORMAT")
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str()
        {
            "wecom" => WebhookFormat::Wecom,
            "slack" => WebhookFormat::Slack,
            "discord" => WebhookFormat::Discord,
            _ => WebhookFormat::Generic,
        }
    }
}

/// Context rendered into the outgoing payload.
#[derive(Debug, Clone)]
pub struct Notification<'a> {
    pub author: &'a str,
    pub repo: &'a str,
    pub source_branch: &'a str,
    pub target_branch: &'a str,
    pub content: &'a str,
}

/// Builds the provider-specific JSON body for one notification.
pub fn build_payload(format: WebhookFormat, n: &Notification<'_>) -> serde_json::Value {
    let headline = format!(
        "[{}] {} ({} → {})",
        n.repo, n.author, n.source_branch, n.target_branch
    );
    let text = format!("{}\n{}", headline, n.content);

    match format {
        WebhookFormat::Wecom => json!({
            "msgtype": "markdown",
            "markdown": { "content": text }
        }),
        WebhookFormat::Slack => json!({ "text": text }),
        WebhookFormat::Discord => json!({ "content": text }),
        WebhookFormat::Generic => json!({
            "author": n.author,
            "repo": n.repo,
            "source_branch": n.source_branch,
            "target_branch": n.target_branch,
            "content": n.content,
        }),
    }
}

/// Sends one notification. Never fails; a delivery problem is logged.
pub async fn publish(push_url: &str, format: WebhookFormat, n: &Notification<'_>) {
    if push_url.trim().is_empty() {
        debug!("notify: no push url configured, skipping");
        return;
    }

    let payload = build_payload(format, n);
    let body = match serde_json::to_vec(&payload) {
        Ok(b) => b,
        Err(e) => {
            warn!(error = %e, "notify: failed to encode payload");
            return;
        }
    };

    let client = match http_client::HttpClient::new("mr-agent/0.1") {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "notify: failed to build http client");
            return;
        }
    };

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let policy = http_client::RetryPolicy {
        timeout_ms: 10_000,
        retries: 1,
        backoff_ms: 400,
        retry_on_statuses: http_client::DEFAULT_RETRY_STATUSES.to_vec(),
    };

    match client
        .request(
            Method::POST,
            push_url,
            http_client::RequestOptions {
                headers,
                body: Some(body),
                cancel: None,
            },
            &policy,
        )
        .await
    {
        Ok(resp) if resp.status().is_success() => {
            debug!(?format, "notify: delivered");
        }
        Ok(resp) => {
            warn!(status = resp.status().as_u16(), "notify: endpoint rejected payload");
        }
        Err(e) => {
            warn!(error = %e, "notify: delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample<'a>() -> Notification<'a> {
        Notification {
            author: "alice",
            repo: "acme/demo",
            source_branch: "feat/x",
            target_branch: "main",
            content: "review done",
        }
    }

    #[test]
    fn wecom_payload_is_markdown_typed() {
        let p = build_payload(WebhookFormat::Wecom, &sample());
        assert_eq!(p["msgtype"], "markdown");
        let text = p["markdown"]["content"].as_str().unwrap();
        assert!(text.contains("acme/demo"));
        assert!(text.contains("feat/x → main"));
    }

    #[test]
    fn slack_and_discord_use_their_text_fields() {
        let slack = build_payload(WebhookFormat::Slack, &sample());
        assert!(slack["text"].as_str().unwrap().contains("review done"));

        let discord = build_payload(WebhookFormat::Discord, &sample());
        assert!(discord["content"].as_str().unwrap().contains("review done"));
    }

    #[test]
    fn generic_payload_keeps_structured_fields() {
        let p = build_payload(WebhookFormat::Generic, &sample());
        assert_eq!(p["repo"], "acme/demo");
        assert_eq!(p["source_branch"], "feat/x");
        assert_eq!(p["content"], "review done");
    }
}
