//! GET /webhook/events — replay-store listing, token-gated.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;

use crate::core::app_state::AppState;
use crate::error_handler::{AppError, AppResult};
use crate::replay_store::{StoredEvent, StoredEventSummary};
use crate::signature::timing_safe_eq;

pub const REPLAY_TOKEN_HEADER: &str = "x-mr-agent-replay-token";
const DEFAULT_LIMIT: usize = 50;

fn authorize(state: &AppState, headers: &HeaderMap) -> AppResult<()> {
    if !state.replay.enabled() {
        return Err(AppError::NotFound);
    }
    let Some(expected) = &state.replay_token else {
        return Err(AppError::Forbidden);
    };
    let received = headers
        .get(REPLAY_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !timing_safe_eq(expected.as_bytes(), received.as_bytes()) {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

pub async fn list_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> AppResult<Json<Vec<StoredEventSummary>>> {
    authorize(&state, &headers)?;
    let platform = params.get("platform").map(String::as_str);
    let limit = params
        .get("limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_LIMIT);
    Ok(Json(state.replay.list(platform, limit).await))
}

pub async fn get_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<Json<StoredEvent>> {
    authorize(&state, &headers)?;
    state
        .replay
        .get(&id)
        .await
        .map(Json)
        .ok_or(AppError::NotFound)
}
