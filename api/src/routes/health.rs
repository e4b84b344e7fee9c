//! GET /health — shallow liveness plus an optional deep provider probe.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use serde::Serialize;

use crate::core::app_state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub name: &'static str,
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checks: Option<HealthChecks>,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub ai: ai_llm_service::HealthReport,
}

/// `?deep=1` issues one minimal provider request; anything else is a cheap
/// in-process check.
pub async fn health(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<HealthResponse> {
    let deep = params.get("deep").is_some_and(|v| v == "1" || v == "true");
    let mode = state.adapter.provider().to_string();

    if !deep {
        return Json(HealthResponse {
            ok: true,
            name: "mr-agent",
            mode,
            checks: None,
        });
    }

    let ai = ai_llm_service::health_service::probe(state.adapter.config()).await;
    Json(HealthResponse {
        ok: ai.ok,
        name: "mr-agent",
        mode,
        checks: Some(HealthChecks { ai }),
    })
}
