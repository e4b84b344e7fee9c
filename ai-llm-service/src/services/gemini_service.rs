//! Gemini generate-content service.
//!
//! Structured output uses the generation-config `responseSchema` (a reduced
//! OpenAPI-style schema, not full JSON Schema). The fallback rung keeps the
//! JSON mime type but drops the schema; freeform drops both.
//!
//! Endpoint: `POST {endpoint}/v1beta/models/{model}:generateContent` with the
//! `x-goog-api-key` header (never the key-in-query form, which leaks into
//! request logs).

use std::time::Instant;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::config::llm_model_config::LlmModelConfig;
use crate::error_handler::{
    AiLlmError, ConfigError, ProviderError, ProviderErrorKind, make_snippet,
};
use crate::services::StructuredMode;

#[derive(Debug)]
pub struct GeminiService {
    http: http_client::HttpClient,
    cfg: LlmModelConfig,
    url_generate: String,
}

impl GeminiService {
    pub fn new(cfg: LlmModelConfig) -> Result<Self, AiLlmError> {
        if cfg.api_key.trim().is_empty() {
            return Err(ConfigError::MissingVar("GEMINI_API_KEY").into());
        }
        let http = http_client::HttpClient::new("mr-agent/0.1")?;
        let url_generate = format!(
            "{}/v1beta/models/{}:generateContent",
            cfg.endpoint.trim_end_matches('/'),
            cfg.model
        );

        info!(model = %cfg.model, endpoint = %cfg.endpoint, "GeminiService initialized");

        Ok(Self {
            http,
            cfg,
            url_generate,
        })
    }

    fn headers(&self) -> Result<HeaderMap, AiLlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(&self.cfg.api_key).map_err(|e| {
                ProviderError::new(
                    self.cfg.provider,
                    ProviderErrorKind::Decode(format!("invalid API key header: {e}")),
                )
            })?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    pub async fn generate(
        &self,
        system: &str,
        user: &str,
        mode: StructuredMode,
    ) -> Result<String, AiLlmError> {
        let started = Instant::now();

        let mut body = serde_json::json!({
            "systemInstruction": { "parts": [ { "text": system } ] },
            "contents": [ { "role": "user", "parts": [ { "text": user } ] } ],
        });
        match mode {
            StructuredMode::JsonSchema => {
                body["generationConfig"] = serde_json::json!({
                    "responseMimeType": "application/json",
                    "responseSchema": gemini_response_schema(),
                });
            }
            StructuredMode::JsonObject => {
                body["generationConfig"] =
                    serde_json::json!({ "responseMimeType": "application/json" });
            }
            StructuredMode::Freeform => {}
        }
        if let Some(max) = self.cfg.max_tokens {
            body["generationConfig"]["maxOutputTokens"] = serde_json::json!(max);
        }

        let bytes = serde_json::to_vec(&body).map_err(|e| {
            ProviderError::new(self.cfg.provider, ProviderErrorKind::Decode(e.to_string()))
        })?;

        debug!(model = %self.cfg.model, mode = ?mode, "POST {}", self.url_generate);

        let resp = self
            .http
            .request(
                Method::POST,
                &self.url_generate,
                http_client::RequestOptions {
                    headers: self.headers()?,
                    body: Some(bytes),
                    cancel: None,
                },
                &self.cfg.retry_policy(),
            )
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            let snippet = make_snippet(&text);
            error!(
                %status,
                url = %self.url_generate,
                %snippet,
                latency_ms = started.elapsed().as_millis(),
                "generate-content call returned non-success status"
            );
            return Err(ProviderError::new(
                self.cfg.provider,
                ProviderErrorKind::HttpStatus {
                    status,
                    url: self.url_generate.clone(),
                    snippet,
                },
            )
            .into());
        }

        let out: GenerateContentResponse = resp.json().await.map_err(|e| {
            ProviderError::new(
                self.cfg.provider,
                ProviderErrorKind::Decode(format!(
                    "serde error: {e}; expected `candidates[0].content.parts[]`"
                )),
            )
        })?;

        let text: String = out
            .candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(AiLlmError::EmptyOutput);
        }

        info!(
            model = %self.cfg.model,
            latency_ms = started.elapsed().as_millis(),
            "generate-content call completed"
        );

        Ok(text)
    }
}

/// Reduced schema accepted by the generation config (no
/// `additionalProperties`, uppercase type names).
fn gemini_response_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "OBJECT",
        "required": ["summary", "risk_level", "reviews", "positives", "action_items"],
        "properties": {
            "summary": { "type": "STRING" },
            "risk_level": { "type": "STRING", "enum": ["low", "medium", "high"] },
            "reviews": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "required": ["severity", "new_path", "old_path", "type",
                                 "start_line", "end_line", "issue_header", "issue_content"],
                    "properties": {
                        "severity": { "type": "STRING", "enum": ["low", "medium", "high"] },
                        "new_path": { "type": "STRING" },
                        "old_path": { "type": "STRING" },
                        "type": { "type": "STRING", "enum": ["old", "new"] },
                        "start_line": { "type": "INTEGER" },
                        "end_line": { "type": "INTEGER" },
                        "issue_header": { "type": "STRING" },
                        "issue_content": { "type": "STRING" },
                        "suggestion": { "type": "STRING" }
                    }
                }
            },
            "positives": { "type": "ARRAY", "items": { "type": "STRING" } },
            "action_items": { "type": "ARRAY", "items": { "type": "STRING" } }
        }
    })
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}
