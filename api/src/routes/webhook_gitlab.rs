//! POST /webhook/gitlab — forge-B webhook sink.
//!
//! Same gate order as the forge-A sink, with the token header compared in
//! constant time instead of an HMAC. `X-Gitlab-Api-Token` optionally carries
//! a per-request API token for the client.

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
use crate::signature::verify_gitlab_token;

pub async fn webhook_gitlab(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Envelope>> {
    metrics::inc(&metrics::WEBHOOKS_RECEIVED);

    if body.len() > state.gitlab_max_body_bytes {
        metrics::inc(&metrics::WEBHOOKS_REJECTED);
        return Err(AppError::BadRequest(format!(
            "payload of {} bytes exceeds GITLAB_WEBHOOK_MAX_BODY_BYTES",
            body.len()
        )));
    }

    let token_header = headers.get("x-gitlab-token").and_then(|v| v.to_str().ok());
    match &state.gitlab_secret {
        Some(secret) => {
            if !verify_gitlab_token(secret, token_header) {
                metrics::inc(&metrics::WEBHOOKS_REJECTED);
                return Err(AppError::WebhookAuth);
            }
        }
        None if state.gitlab_require_secret => {
            metrics::inc(&metrics::WEBHOOKS_REJECTED);
            return Err(AppError::BadRequest(
                "GITLAB_WEBHOOK_SECRET is required by GITLAB_REQUIRE_WEBHOOK_SECRET".into(),
            ));
        }
        None => warn!("GITLAB_WEBHOOK_SECRET unset; accepting unauthenticated webhook"),
    }
    metrics::inc(&metrics::WEBHOOKS_VERIFIED);

    let event = headers
        .get("x-gitlab-event")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("X-Gitlab-Event header is required".into()))?
        .to_string();
    info!(event, "gitlab webhook received");

    state.replay.record("gitlab", &event, &headers, &body).await;

    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("invalid JSON payload: {e}")))?;

    let api_token = headers
        .get("x-gitlab-api-token")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let envelope = match event.as_str() {
        "Merge Request Hook" => {
            handle_merge_request(&state, &headers, api_token, payload).await?
        }
        "Note Hook" => handle_note(&state, &headers, api_token, payload).await?,
        "Issue Hook" => handle_issue(api_token, payload).await?,
        other => Envelope::ok(format!("ignored event {other}")),
    };
    Ok(Json(envelope))
}

fn gitlab_client(api_token: Option<String>) -> AppResult<ForgeClient> {
    let cfg = ForgeConfig::gitlab_from_env(api_token)
        .map_err(|e| AppError::Internal(mr_reviewer::errors::sanitize_user_message(&e.to_string())))?;
    ForgeClient::from_config(cfg)
        .map_err(|e| AppError::Internal(mr_reviewer::errors::sanitize_user_message(&e.to_string())))
}

fn require<T>(value: Option<T>, field: &str) -> AppResult<T> {
    value.ok_or_else(|| AppError::BadRequest(format!("{field} is required")))
}

/* --- Merge Request Hook --- */

#[derive(Debug, Deserialize)]
struct MergeRequestEvent {
    object_attributes: Option<MrAttributes>,
    project: Option<ProjectPayload>,
}

#[derive(Debug, Deserialize)]
struct MrAttributes {
    iid: Option<i64>,
    action: Option<String>,
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    draft: Option<bool>,
    #[serde(default)]
    work_in_progress: Option<bool>,
    #[serde(default)]
    oldrev: Option<String>,
    target_branch: Option<String>,
    #[serde(default)]
    last_commit: Option<LastCommit>,
}

#[derive(Debug, Deserialize)]
struct LastCommit {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProjectPayload {
    path_with_namespace: Option<String>,
}

async fn handle_merge_request(
    state: &AppState,
    headers: &HeaderMap,
    api_token: Option<String>,
    payload: serde_json::Value,
) -> AppResult<Envelope> {
    let event: MergeRequestEvent = serde_json::from_value(payload)
        .map_err(|e| AppError::BadRequest(format!("malformed merge request event: {e}")))?;

    let attrs = require(event.object_attributes, "object_attributes")?;
    let iid = require(attrs.iid, "object_attributes.iid")?;
    if iid <= 0 {
        return Err(AppError::BadRequest(
            "object_attributes.iid must be a positive integer".into(),
        ));
    }
    let project = require(
        event.project.and_then(|p| p.path_with_namespace),
        "project.path_with_namespace",
    )?;
    let action = attrs.action.clone().unwrap_or_default();
    let draft = attrs.draft.or(attrs.work_in_progress).unwrap_or(false);
    let target_branch = attrs.target_branch.clone().unwrap_or_else(|| "HEAD".into());
    let head_sha = attrs.last_commit.as_ref().and_then(|c| c.id.clone());

    let id = ChangeRequestId::new(project, iid as u64);
    let client = gitlab_client(api_token)?;

    let auto_action = match action.as_str() {
        "open" | "reopen" => Some(AutoReviewAction::Opened),
        // An update that moved the head is a synchronize; a metadata edit is
        // an edit.
        "update" if attrs.oldrev.is_some() => Some(AutoReviewAction::Synchronize),
        "update" => Some(AutoReviewAction::Edited),
        _ => None,
    };

    if let Some(auto_action) = auto_action {
        let cfg = mr_reviewer::policy::load_policy(
            &client,
            &id,
            &target_branch,
            runtime_state::now_ms(),
        )
        .await;

        publish_policy_reminder(
            &client,
            &id,
            &cfg.resolve_pr_section(),
            attrs.title.as_deref().unwrap_or(""),
            attrs.description.as_deref().unwrap_or(""),
            head_sha.as_deref(),
            false,
        )
        .await;

        let auto = cfg.resolve_auto_review(auto_action);
        if !auto.enabled {
            return Ok(Envelope::ok("auto review disabled"));
        }
        if draft {
            return Ok(Envelope::ok("draft merge request skipped"));
        }

        let trigger = match auto_action {
            AutoReviewAction::Opened => ReviewTrigger::PrOpened,
            AutoReviewAction::Edited => ReviewTrigger::PrEdited,
            AutoReviewAction::Synchronize => ReviewTrigger::PrSynchronize,
        };
        metrics::inc(&metrics::REVIEWS_RUN);
        let outcome = mr_reviewer::run_review(
            &client,
            &state.adapter,
            ReviewRequest {
                id,
                mode: mode_override(headers).unwrap_or(auto.mode),
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

    if action == "merge" {
        let cfg = mr_reviewer::policy::load_policy(
            &client,
            &id,
            &target_branch,
            runtime_state::now_ms(),
        )
        .await;
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

    Ok(Envelope::ok(format!("ignored action {action}")))
}

/* --- Note Hook --- */

#[derive(Debug, Deserialize)]
struct NoteEvent {
    object_attributes: Option<NoteAttributes>,
    merge_request: Option<NoteMergeRequest>,
    project: Option<ProjectPayload>,
    user: Option<NoteUser>,
}

#[derive(Debug, Deserialize)]
struct NoteAttributes {
    #[serde(default)]
    note: Option<String>,
    #[serde(default)]
    noteable_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NoteMergeRequest {
    iid: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct NoteUser {
    username: Option<String>,
}

async fn handle_note(
    state: &AppState,
    headers: &HeaderMap,
    api_token: Option<String>,
    payload: serde_json::Value,
) -> AppResult<Envelope> {
    let event: NoteEvent = serde_json::from_value(payload)
        .map_err(|e| AppError::BadRequest(format!("malformed note event: {e}")))?;

    let attrs = require(event.object_attributes, "object_attributes")?;
    if attrs.noteable_type.as_deref() != Some("MergeRequest") {
        return Ok(Envelope::ok("note is not on a merge request"));
    }
    let iid = require(
        event.merge_request.and_then(|m| m.iid),
        "merge_request.iid",
    )?;
    let project = require(
        event.project.and_then(|p| p.path_with_namespace),
        "project.path_with_namespace",
    )?;
    let commenter = event
        .user
        .and_then(|u| u.username)
        .unwrap_or_default();

    let client = gitlab_client(api_token)?;
    let outcome = mr_reviewer::handle_comment(
        &client,
        &state.adapter,
        CommentEvent {
            id: ChangeRequestId::new(project, iid as u64),
            commenter,
            commenter_kind: String::new(),
            body: attrs.note.unwrap_or_default(),
            mode_override: mode_override(headers),
            push_url: push_url(state, headers),
        },
    )
    .await;
    Ok(outcome.into())
}

/* --- Issue Hook --- */

#[derive(Debug, Deserialize)]
struct IssueEvent {
    object_attributes: Option<IssueAttributes>,
    project: Option<ProjectPayload>,
}

#[derive(Debug, Deserialize)]
struct IssueAttributes {
    iid: Option<i64>,
    #[serde(default)]
    action: Option<String>,
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

async fn handle_issue(
    api_token: Option<String>,
    payload: serde_json::Value,
) -> AppResult<Envelope> {
    let event: IssueEvent = serde_json::from_value(payload)
        .map_err(|e| AppError::BadRequest(format!("malformed issue event: {e}")))?;

    let attrs = require(event.object_attributes, "object_attributes")?;
    if !matches!(attrs.action.as_deref(), Some("open") | Some("update")) {
        return Ok(Envelope::ok("ignored issue action"));
    }
    let iid = require(attrs.iid, "object_attributes.iid")?;
    let project = require(
        event.project.and_then(|p| p.path_with_namespace),
        "project.path_with_namespace",
    )?;

    let id = ChangeRequestId::new(project, iid as u64);
    let client = gitlab_client(api_token)?;
    let cfg = mr_reviewer::policy::load_policy(&client, &id, "HEAD", runtime_state::now_ms()).await;

    let reminded = publish_policy_reminder(
        &client,
        &id,
        &cfg.resolve_issue_section(),
        attrs.title.as_deref().unwrap_or(""),
        attrs.description.as_deref().unwrap_or(""),
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
