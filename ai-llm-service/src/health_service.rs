//! Provider health probes for the deep health endpoint.
//!
//! One minimal request per probe, short timeout, retries disabled. The
//! public `probe` never fails: every error is folded into the report.

use std::time::Instant;

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::llm_model_config::LlmModelConfig;
use crate::config::llm_provider::LlmProvider;
use crate::error_handler::AiLlmError;

/// Probe timeout; deliberately shorter than analysis calls.
const PROBE_TIMEOUT_MS: u64 = 5_000;

/// Serializable health snapshot for one provider config.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub ok: bool,
    pub provider: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    pub latency_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Probes the configured provider with a single cheap request.
pub async fn probe(cfg: &LlmModelConfig) -> HealthReport {
    let started = Instant::now();
    let result = try_probe(cfg).await;
    let latency_ms = started.elapsed().as_millis();

    match result {
        Ok(status) => {
            let ok = (200..300).contains(&status);
            debug!(provider = %cfg.provider, status, latency_ms = latency_ms as u64, "health probe completed");
            HealthReport {
                ok,
                provider: cfg.provider.as_str().to_string(),
                model: cfg.model.clone(),
                http_status: Some(status),
                latency_ms,
                error: (!ok).then(|| format!("provider returned status {status}")),
            }
        }
        Err(e) => {
            warn!(provider = %cfg.provider, error = %e, "health probe failed");
            HealthReport {
                ok: false,
                provider: cfg.provider.as_str().to_string(),
                model: cfg.model.clone(),
                http_status: None,
                latency_ms,
                error: Some(e.to_string()),
            }
        }
    }
}

async fn try_probe(cfg: &LlmModelConfig) -> Result<u16, AiLlmError> {
    let base = cfg.endpoint.trim_end_matches('/');
    let mut headers = HeaderMap::new();
    let url = match cfg.provider {
        LlmProvider::OpenAi | LlmProvider::OpenAiCompatible => {
            headers.insert(
                reqwest::header::AUTHORIZATION,
                header_value(&format!("Bearer {}", cfg.api_key))?,
            );
            format!("{base}/v1/models")
        }
        LlmProvider::Anthropic => {
            headers.insert("x-api-key", header_value(&cfg.api_key)?);
            headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
            format!("{base}/v1/models")
        }
        LlmProvider::Gemini => {
            headers.insert("x-goog-api-key", header_value(&cfg.api_key)?);
            format!("{base}/v1beta/models/{}", cfg.model)
        }
    };

    let http = http_client::HttpClient::new("mr-agent/0.1")?;
    let resp = http
        .request(
            Method::GET,
            &url,
            http_client::RequestOptions {
                headers,
                body: None,
                cancel: None,
            },
            &http_client::RetryPolicy::no_retries(PROBE_TIMEOUT_MS),
        )
        .await?;
    Ok(resp.status().as_u16())
}

fn header_value(v: &str) -> Result<HeaderValue, AiLlmError> {
    HeaderValue::from_str(v)
        .map_err(|e| AiLlmError::HttpTransport(format!("invalid header value: {e}")))
}
