//! POST /webhook/github — forge-A webhook sink.
//!
//! Order of gates: size limit (before JSON parse) → HMAC signature →
//! event-name header → replay-store append → per-event schema validation →
//! dispatch. The handler resolves with the `{ok, message}` envelope; schema
//! and auth problems surface as 4xx with a message naming the failing field.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use serde::Deserialize;
use tracing::{info, warn};

use mr_reviewer::git_providers::types::ChangeRequestId;
use mr_reviewer::locale::Locale;
use mr_reviewer::policy::AutoReviewAction;
use mr_reviewer::{
    CommentEvent, ForgeClient, ForgeConfig, ReviewOutputMode, ReviewRequest, ReviewTrigger,
};

use crate::core::app_state::AppState;
use crate::error_handler::{AppError, AppResult};
use crate::metrics;
use crate::routes::{Envelope, mode_override, publish_policy_reminder, push_url};
use crate::signature::verify_github_signature;

pub async fn webhook_github(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Envelope>> {
    metrics::inc(&metrics::WEBHOOKS_RECEIVED);

    if body.len() > state.github_max_body_bytes {
        metrics::inc(&metrics::WEBHOOKS_REJECTED);
        return Err(AppError::BadRequest(format!(
            "payload of {} bytes exceeds GITHUB_WEBHOOK_MAX_BODY_BYTES",
            body.len()
        )));
    }

    if !state.github_skip_signature {
        match &state.github_secret {
            Some(secret) => {
                let header = headers
                    .get("x-hub-signature-256")
                    .and_then(|v| v.to_str().ok());
                if !verify_github_signature(secret, &body, header) {
                    metrics::inc(&metrics::WEBHOOKS_REJECTED);
                    return Err(AppError::WebhookAuth);
                }
            }
            None => warn!("GITHUB_WEBHOOK_SECRET unset; accepting unsigned webhook"),
        }
    }
    metrics::inc(&metrics::WEBHOOKS_VERIFIED);

    let event = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("X-GitHub-Event header is required".into()))?
        .to_string();
    let delivery = headers
        .get("x-github-delivery")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");
    info!(event, delivery, "github webhook received");

    state.replay.record("github", &event, &headers, &body).await;

    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("invalid JSON payload: {e}")))?;

    let envelope = match event.as_str() {
        "ping" => Envelope::ok("pong"),
        "pull_request" => handle_pull_request(&state, &headers, payload).await?,
        "issues" => handle_issue(payload).await?,
        "issue_comment" => handle_issue_comment(&state, &headers, payload).await?,
        "pull_request_review_thread" => handle_review_thread(payload).await?,
        other => Envelope::ok(format!("ignored event {other}")),
    };
    Ok(Json(envelope))
}

fn github_client() -> AppResult<ForgeClient> {
    let cfg = ForgeConfig::github_from_env()
        .map_err(|e| AppError::Internal(mr_reviewer::errors::sanitize_user_message(&e.to_string())))?;
    ForgeClient::from_config(cfg)
        .map_err(|e| AppError::Internal(mr_reviewer::errors::sanitize_user_message(&e.to_string())))
}

/* --- pull_request --- */

#[derive(Debug, Deserialize)]
struct PullRequestEvent {
    action: String,
    number: Option<i64>,
    pull_request: Option<PullRequestPayload>,
    repository: Option<RepositoryPayload>,
}

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    title: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    draft: Option<bool>,
    #[serde(default)]
    merged: Option<bool>,
    head: Option<ShaRef>,
    base: Option<BranchNameRef>,
}

#[derive(Debug, Deserialize)]
struct ShaRef {
    sha: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BranchNameRef {
    #[serde(rename = "ref")]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepositoryPayload {
    full_name: Option<String>,
}

fn require<T>(value: Option<T>, field: &str) -> AppResult<T> {
    value.ok_or_else(|| AppError::BadRequest(format!("{field} is required")))
}

async fn handle_pull_request(
    state: &AppState,
    headers: &HeaderMap,
    payload: serde_json::Value,
) -> AppResult<Envelope> {
    let event: PullRequestEvent = serde_json::from_value(payload)
        .map_err(|e| AppError::BadRequest(format!("malformed pull_request event: {e}")))?;

    let number = require(event.number, "number")?;
    if number <= 0 {
        return Err(AppError::BadRequest(
            "number must be a positive integer".into(),
        ));
    }
    let repo = require(
        event.repository.and_then(|r| r.full_name),
        "repository.full_name",
    )?;
    let pr = require(event.pull_request, "pull_request")?;
    let title = require(pr.title, "pull_request.title")?;
    let head_sha = require(pr.head.and_then(|h| h.sha), "pull_request.head.sha")?;
    let base_ref = pr
        .base
        .and_then(|b| b.name)
        .unwrap_or_else(|| "HEAD".to_string());
    let body_text = pr.body.unwrap_or_default();
    let draft = pr.draft.unwrap_or(false);

    let id = ChangeRequestId::new(repo, number as u64);
    let client = github_client()?;

    let action = match event.action.as_str() {
        "opened" => Some(AutoReviewAction::Opened),
        "edited" => Some(AutoReviewAction::Edited),
        "synchronize" => Some(AutoReviewAction::Synchronize),
        _ => None,
    };

    if let Some(action) = action {
        let cfg =
            mr_reviewer::policy::load_policy(&client, &id, &base_ref, runtime_state::now_ms()).await;

        publish_policy_reminder(
            &client,
            &id,
            &cfg.resolve_pr_section(),
            &title,
            &body_text,
            Some(&head_sha),
            false,
        )
        .await;

        let auto = cfg.resolve_auto_review(action);
        if !auto.enabled {
            return Ok(Envelope::ok("auto review disabled"));
        }
        if draft {
            return Ok(Envelope::ok("draft pull request skipped"));
        }

        let trigger = match action {
            AutoReviewAction::Opened => ReviewTrigger::PrOpened,
            AutoReviewAction::Edited => ReviewTrigger::PrEdited,
            AutoReviewAction::Synchronize => ReviewTrigger::PrSynchronize,
        };
        let mode = mode_override(headers).unwrap_or(auto.mode);
        metrics::inc(&metrics::REVIEWS_RUN);
        let outcome = mr_reviewer::run_review(
            &client,
            &state.adapter,
            ReviewRequest {
                id,
                mode,
                trigger,
                suffix: None,
                policy: auto,
                locale: Locale::from_env(),
                push_url: push_url(state, headers),
            },
        )
        .await;
        return Ok(outcome.into());
    }

    if event.action == "closed" && pr.merged.unwrap_or(false) {
        let cfg =
            mr_reviewer::policy::load_policy(&client, &id, &base_ref, runtime_state::now_ms()).await;
        let auto = cfg.resolve_auto_review(AutoReviewAction::Opened);
        metrics::inc(&metrics::REVIEWS_RUN);
        let outcome = mr_reviewer::run_review(
            &client,
            &state.adapter,
            ReviewRequest {
                id,
                mode: ReviewOutputMode::Report,
                trigger: ReviewTrigger::Merged,
                suffix: None,
                policy: auto,
                locale: Locale::from_env(),
                push_url: push_url(state, headers),
            },
        )
        .await;
        return Ok(outcome.into());
    }

    Ok(Envelope::ok(format!("ignored action {}", event.action)))
}

/* --- issues --- */

#[derive(Debug, Deserialize)]
struct IssuesEvent {
    action: String,
    issue: Option<IssuePayload>,
    repository: Option<RepositoryPayload>,
}

#[derive(Debug, Deserialize)]
struct IssuePayload {
    number: Option<i64>,
    title: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
    #[serde(default)]
    user: Option<UserPayload>,
}

#[derive(Debug, Deserialize)]
struct UserPayload {
    login: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

async fn handle_issue(payload: serde_json::Value) -> AppResult<Envelope> {
    let event: IssuesEvent = serde_json::from_value(payload)
        .map_err(|e| AppError::BadRequest(format!("malformed issues event: {e}")))?;
    if !matches!(event.action.as_str(), "opened" | "edited") {
        return Ok(Envelope::ok(format!("ignored action {}", event.action)));
    }

    let issue = require(event.issue, "issue")?;
    let number = require(issue.number, "issue.number")?;
    if number <= 0 {
        return Err(AppError::BadRequest(
            "issue.number must be a positive integer".into(),
        ));
    }
    let repo = require(
        event.repository.and_then(|r| r.full_name),
        "repository.full_name",
    )?;

    let id = ChangeRequestId::new(repo, number as u64);
    let client = github_client()?;
    let cfg = mr_reviewer::policy::load_policy(&client, &id, "HEAD", runtime_state::now_ms()).await;

    let reminded = publish_policy_reminder(
        &client,
        &id,
        &cfg.resolve_issue_section(),
        issue.title.as_deref().unwrap_or(""),
        issue.body.as_deref().unwrap_or(""),
        None,
        true,
    )
    .await;

    Ok(Envelope::ok(if reminded {
        "issue policy reminder published"
    } else {
        "issue passes policy"
    }))
}

/* --- issue_comment --- */

#[derive(Debug, Deserialize)]
struct IssueCommentEvent {
    action: String,
    issue: Option<IssuePayload>,
    comment: Option<CommentPayload>,
    repository: Option<RepositoryPayload>,
}

#[derive(Debug, Deserialize)]
struct CommentPayload {
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    user: Option<UserPayload>,
}

async fn handle_issue_comment(
    state: &AppState,
    headers: &HeaderMap,
    payload: serde_json::Value,
) -> AppResult<Envelope> {
    let event: IssueCommentEvent = serde_json::from_value(payload)
        .map_err(|e| AppError::BadRequest(format!("malformed issue_comment event: {e}")))?;
    if event.action != "created" {
        return Ok(Envelope::ok(format!("ignored action {}", event.action)));
    }

    let issue = require(event.issue, "issue")?;
    if issue.pull_request.is_none() {
        return Ok(Envelope::ok("comment is not on a pull request"));
    }
    let number = require(issue.number, "issue.number")?;
    let repo = require(
        event.repository.and_then(|r| r.full_name),
        "repository.full_name",
    )?;
    let comment = require(event.comment, "comment")?;
    let commenter = comment.user.as_ref().and_then(|u| u.login.clone());
    let commenter_kind = comment
        .user
        .and_then(|u| u.kind)
        .unwrap_or_default();

    let client = github_client()?;
    let outcome = mr_reviewer::handle_comment(
        &client,
        &state.adapter,
        CommentEvent {
            id: ChangeRequestId::new(repo, number as u64),
            commenter: commenter.unwrap_or_default(),
            commenter_kind,
            body: comment.body.unwrap_or_default(),
            mode_override: mode_override(headers),
            push_url: push_url(state, headers),
        },
    )
    .await;
    Ok(outcome.into())
}

/* --- pull_request_review_thread --- */

#[derive(Debug, Deserialize)]
struct ReviewThreadEvent {
    action: String,
    pull_request: Option<ThreadPullRef>,
    repository: Option<RepositoryPayload>,
}

#[derive(Debug, Deserialize)]
struct ThreadPullRef {
    number: Option<i64>,
}

async fn handle_review_thread(payload: serde_json::Value) -> AppResult<Envelope> {
    let event: ReviewThreadEvent = serde_json::from_value(payload)
        .map_err(|e| AppError::BadRequest(format!("malformed review_thread event: {e}")))?;
    if !matches!(event.action.as_str(), "resolved" | "unresolved") {
        return Ok(Envelope::ok(format!("ignored action {}", event.action)));
    }

    let number = require(
        event.pull_request.and_then(|p| p.number),
        "pull_request.number",
    )?;
    let repo = require(
        event.repository.and_then(|r| r.full_name),
        "repository.full_name",
    )?;

    let id = ChangeRequestId::new(repo, number as u64);
    mr_reviewer::review::record_feedback_signal(
        mr_reviewer::Platform::GitHub,
        &id,
        format!("a review thread was {}", event.action),
    );
    Ok(Envelope::ok("feedback signal recorded"))
}
