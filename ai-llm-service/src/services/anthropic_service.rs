//! Anthropic messages service.
//!
//! Structured output uses forced tool-use: the review schema becomes the
//! single tool's `input_schema` and the model must call it. The fallback
//! rung drops tools entirely and parses the text reply best-effort.
//!
//! Endpoint: `POST {endpoint}/v1/messages` with `x-api-key` +
//! `anthropic-version` headers.

use std::time::Instant;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::config::llm_model_config::LlmModelConfig;
use crate::error_handler::{
    AiLlmError, ConfigError, ProviderError, ProviderErrorKind, make_snippet,
};
use crate::schema::response_schema;
use crate::services::StructuredMode;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const REVIEW_TOOL_NAME: &str = "report_review";
const DEFAULT_MAX_TOKENS: u32 = 4_096;

#[derive(Debug)]
pub struct AnthropicService {
    http: http_client::HttpClient,
    cfg: LlmModelConfig,
    url_messages: String,
}

impl AnthropicService {
    pub fn new(cfg: LlmModelConfig) -> Result<Self, AiLlmError> {
        if cfg.api_key.trim().is_empty() {
            return Err(ConfigError::MissingVar("ANTHROPIC_API_KEY").into());
        }
        let http = http_client::HttpClient::new("mr-agent/0.1")?;
        let url_messages = format!("{}/v1/messages", cfg.endpoint.trim_end_matches('/'));

        info!(model = %cfg.model, endpoint = %cfg.endpoint, "AnthropicService initialized");

        Ok(Self {
            http,
            cfg,
            url_messages,
        })
    }

    fn headers(&self) -> Result<HeaderMap, AiLlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.cfg.api_key).map_err(|e| {
                ProviderError::new(
                    self.cfg.provider,
                    ProviderErrorKind::Decode(format!("invalid API key header: {e}")),
                )
            })?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// One messages call. `JsonSchema`/`JsonObject` force the review tool;
    /// `Freeform` drops tools and returns the text blocks.
    pub async fn generate(
        &self,
        system: &str,
        user: &str,
        mode: StructuredMode,
    ) -> Result<String, AiLlmError> {
        let started = Instant::now();
        let with_tools = mode != StructuredMode::Freeform;

        let mut body = serde_json::json!({
            "model": self.cfg.model,
            "max_tokens": self.cfg.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "system": system,
            "messages": [ { "role": "user", "content": user } ],
        });
        if with_tools {
            body["tools"] = serde_json::json!([{
                "name": REVIEW_TOOL_NAME,
                "description": "Report the structured result of an automated code review.",
                "input_schema": response_schema()
            }]);
            body["tool_choice"] = serde_json::json!({ "type": "tool", "name": REVIEW_TOOL_NAME });
        }

        let bytes = serde_json::to_vec(&body).map_err(|e| {
            ProviderError::new(self.cfg.provider, ProviderErrorKind::Decode(e.to_string()))
        })?;

        debug!(model = %self.cfg.model, with_tools, "POST {}", self.url_messages);

        let resp = self
            .http
            .request(
                Method::POST,
                &self.url_messages,
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
                url = %self.url_messages,
                %snippet,
                latency_ms = started.elapsed().as_millis(),
                "messages call returned non-success status"
            );
            return Err(ProviderError::new(
                self.cfg.provider,
                ProviderErrorKind::HttpStatus {
                    status,
                    url: self.url_messages.clone(),
                    snippet,
                },
            )
            .into());
        }

        let out: MessagesResponse = resp.json().await.map_err(|e| {
            ProviderError::new(
                self.cfg.provider,
                ProviderErrorKind::Decode(format!("serde error: {e}; expected `content[]` blocks")),
            )
        })?;

        // Tool rung: serialize the tool input back to JSON text so the shared
        // extraction path handles both rungs identically.
        let text = if with_tools {
            out.content
                .iter()
                .find(|b| b.kind == "tool_use")
                .and_then(|b| b.input.as_ref())
                .map(|v| v.to_string())
        } else {
            None
        }
        .or_else(|| {
            let joined: String = out
                .content
                .iter()
                .filter(|b| b.kind == "text")
                .filter_map(|b| b.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n");
            if joined.is_empty() { None } else { Some(joined) }
        })
        .ok_or(AiLlmError::EmptyOutput)?;

        if text.trim().is_empty() {
            return Err(AiLlmError::EmptyOutput);
        }

        info!(
            model = %self.cfg.model,
            latency_ms = started.elapsed().as_millis(),
            "messages call completed"
        );

        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    input: Option<serde_json::Value>,
}
