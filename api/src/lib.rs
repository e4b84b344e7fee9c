//! HTTP entrypoint: route binding, raw-body capture, graceful shutdown.
//!
//! Routes:
//! - `POST /webhook/github`, `POST /webhook/gitlab` — webhook sinks
//! - `GET /health?deep=1` — liveness + optional provider probe
//! - `GET /metrics` — Prometheus text exposition of the core's counters
//! - `GET /webhook/events[/{id}]` — replay store, token-gated
//!
//! On shutdown (SIGINT/SIGTERM) the HTTP client's process-wide token is
//! cancelled and the AI limiter is drained before the listener closes.

pub mod core;
pub mod error_handler;
pub mod metrics;
pub mod replay_store;
pub mod routes;
pub mod signature;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tracing::{info, warn};

use crate::core::app_state::{AppState, body_limit_bytes, listen_port};
use crate::error_handler::AppError;

/// Default drain budget for in-flight provider calls.
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 15_000;

/// Builds the router; separated from [`start`] so tests can drive it.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health::health))
        .route("/metrics", get(metrics_endpoint))
        .route("/webhook/github", post(routes::webhook_github::webhook_github))
        .route("/webhook/gitlab", post(routes::webhook_gitlab::webhook_gitlab))
        .route("/webhook/events", get(routes::events::list_events))
        .route("/webhook/events/{id}", get(routes::events::get_event))
        .layer(DefaultBodyLimit::max(body_limit_bytes()))
        .with_state(state)
}

async fn metrics_endpoint() -> String {
    metrics::render()
}

/// Boots the service. Returns once the listener has shut down cleanly;
/// bootstrap failures surface as an error (exit code 1 in the binary).
pub async fn start() -> Result<(), AppError> {
    let state = Arc::new(AppState::from_env()?);
    info!(
        provider = %state.adapter.provider(),
        model = state.adapter.model(),
        replay_enabled = state.replay.enabled(),
        "mr-agent configured"
    );

    let app = build_router(state);
    let port = listen_port();
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(AppError::Bind)?;
    info!(port, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(AppError::Server)?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown requested; draining");
    http_client::begin_shutdown();

    let timeout = std::env::var("AI_SHUTDOWN_DRAIN_TIMEOUT_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_DRAIN_TIMEOUT_MS);
    let drained = ai_llm_service::limiter::limiter()
        .drain(Duration::from_millis(timeout))
        .await;
    if !drained {
        warn!("drain timed out with provider calls still active");
    }
}
