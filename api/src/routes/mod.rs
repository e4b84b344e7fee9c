pub mod events;
pub mod health;
pub mod webhook_github;
pub mod webhook_gitlab;

use serde::Serialize;

/// The `{ok, message}` envelope every webhook sink resolves with.
#[derive(Debug, Serialize)]
pub struct Envelope {
    pub ok: bool,
    pub message: String,
}

impl Envelope {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

impl From<mr_reviewer::RunOutcome> for Envelope {
    fn from(o: mr_reviewer::RunOutcome) -> Self {
        Self {
            ok: o.ok,
            message: o.message,
        }
    }
}

use axum::http::HeaderMap;
use mr_reviewer::git_providers::types::{CheckConclusion, ChangeRequestId};
use mr_reviewer::locale::Locale;
use mr_reviewer::policy::{PolicyMode, SectionPolicy};
use mr_reviewer::{ForgeClient, ReviewOutputMode};

use crate::core::app_state::AppState;

/// Dedupe window for policy reminder comments.
pub(crate) const POLICY_REMINDER_TTL_MS: i64 = 5 * 60 * 1_000;

/// `X-AI-Mode: comment|report` override.
pub(crate) fn mode_override(headers: &HeaderMap) -> Option<ReviewOutputMode> {
    match headers.get("x-ai-mode").and_then(|v| v.to_str().ok()) {
        Some("comment") => Some(ReviewOutputMode::Comment),
        Some("report") => Some(ReviewOutputMode::Report),
        _ => None,
    }
}

/// `X-Push-Url` override, falling back to the configured default.
pub(crate) fn push_url(state: &AppState, headers: &HeaderMap) -> String {
    headers
        .get("x-push-url")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| state.default_push_url.clone())
}

/// Checks a title/body pair against the section policy and publishes one
/// deduplicated reminder comment when it fails. Enforce mode additionally
/// fails the head commit's check.
pub(crate) async fn publish_policy_reminder(
    client: &ForgeClient,
    id: &ChangeRequestId,
    section: &SectionPolicy,
    title: &str,
    body: &str,
    head_sha: Option<&str>,
    on_issue: bool,
) -> bool {
    let locale = Locale::from_env();
    let problems = mr_reviewer::policy::body_check::check_body(section, title, body, locale);
    if problems.is_empty() {
        return false;
    }

    let kind = if on_issue { "issue" } else { "pr" };
    let dedupe_key = format!(
        "{}:{}#{}:policy-reminder:{kind}",
        client.platform().as_str(),
        id.project,
        id.number
    );
    if mr_reviewer::state::dedupe().is_duplicate(
        &dedupe_key,
        POLICY_REMINDER_TTL_MS,
        runtime_state::now_ms(),
    ) {
        return true;
    }

    let mut text = String::from("## Policy check\n\nThis submission needs attention:\n\n");
    for p in &problems {
        text.push_str(&format!("- {p}\n"));
    }

    let marker = mr_reviewer::util::managed_marker("policy-reminder", None);
    let published = if on_issue {
        client
            .create_issue_comment(id, &mr_reviewer::util::with_marker(&text, &marker))
            .await
    } else {
        client.upsert_managed_comment(id, &marker, &text).await
    };
    if let Err(e) = published {
        tracing::warn!(error = %e, "policy reminder publication failed");
    }

    if section.mode == PolicyMode::Enforce {
        if let Some(sha) = head_sha {
            let _ = client
                .create_check_run(
                    id,
                    sha,
                    "mr-agent policy",
                    CheckConclusion::Failure,
                    "Policy check",
                    &problems.join("\n"),
                )
                .await;
        }
    }
    true
}
