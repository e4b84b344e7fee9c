//! OpenAI (and OpenAI-compatible) chat-completions service.
//!
//! Non-streaming client around `POST {endpoint}/v1/chat/completions` through
//! the retrying HTTP client. The same implementation serves both the hosted
//! API and compatible gateways; only the base URL differs.
//!
//! Constructor validation:
//! - `cfg.api_key` must be non-empty
//! - `cfg.endpoint` must start with http:// or https://
//!
//! Errors are normalized via the unified error types in `error_handler`.

use std::time::Instant;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::llm_model_config::LlmModelConfig;
use crate::error_handler::{
    AiLlmError, ConfigError, ProviderError, ProviderErrorKind, make_snippet,
};
use crate::schema::response_schema;
use crate::services::StructuredMode;

/// Thin client for the OpenAI chat-completions wire format.
#[derive(Debug)]
pub struct OpenAiService {
    http: http_client::HttpClient,
    cfg: LlmModelConfig,
    url_chat: String,
}

impl OpenAiService {
    /// Creates a new service from the given config.
    pub fn new(cfg: LlmModelConfig) -> Result<Self, AiLlmError> {
        if cfg.api_key.trim().is_empty() {
            return Err(ConfigError::MissingVar("OPENAI_API_KEY").into());
        }
        let endpoint = cfg.endpoint.trim();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ConfigError::InvalidFormat {
                var: "OPENAI_BASE_URL",
                reason: "must start with http:// or https://",
            }
            .into());
        }

        let http = http_client::HttpClient::new("mr-agent/0.1")?;
        let url_chat = format!("{}/v1/chat/completions", endpoint.trim_end_matches('/'));

        info!(
            provider = %cfg.provider,
            model = %cfg.model,
            endpoint = %cfg.endpoint,
            "OpenAiService initialized"
        );

        Ok(Self { http, cfg, url_chat })
    }

    fn headers(&self) -> Result<HeaderMap, AiLlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.cfg.api_key)).map_err(|e| {
                ProviderError::new(
                    self.cfg.provider,
                    ProviderErrorKind::Decode(format!("invalid API key header: {e}")),
                )
            })?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// One non-streaming completion attempt under the given structured mode.
    pub async fn generate(
        &self,
        system: &str,
        user: &str,
        mode: StructuredMode,
    ) -> Result<String, AiLlmError> {
        let started = Instant::now();
        let body = ChatCompletionRequest::build(&self.cfg, system, user, mode);
        let bytes = serde_json::to_vec(&body).map_err(|e| {
            ProviderError::new(self.cfg.provider, ProviderErrorKind::Decode(e.to_string()))
        })?;

        debug!(
            model = %self.cfg.model,
            mode = ?mode,
            prompt_len = user.len(),
            "POST {}", self.url_chat
        );

        let resp = self
            .http
            .request(
                Method::POST,
                &self.url_chat,
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
                url = %self.url_chat,
                %snippet,
                model = %self.cfg.model,
                latency_ms = started.elapsed().as_millis(),
                "chat completion returned non-success status"
            );
            return Err(ProviderError::new(
                self.cfg.provider,
                ProviderErrorKind::HttpStatus {
                    status,
                    url: self.url_chat.clone(),
                    snippet,
                },
            )
            .into());
        }

        let out: ChatCompletionResponse = resp.json().await.map_err(|e| {
            ProviderError::new(
                self.cfg.provider,
                ProviderErrorKind::Decode(format!(
                    "serde error: {e}; expected `choices[0].message.content`"
                )),
            )
        })?;

        let content = out
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .ok_or_else(|| {
                ProviderError::new(self.cfg.provider, ProviderErrorKind::EmptyChoices)
            })?;

        if content.trim().is_empty() {
            return Err(AiLlmError::EmptyOutput);
        }

        info!(
            model = %self.cfg.model,
            latency_ms = started.elapsed().as_millis(),
            "chat completion completed"
        );

        Ok(content)
    }
}

/* ===========================================================================
HTTP payloads
======================================================================== */

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

impl<'a> ChatCompletionRequest<'a> {
    fn build(
        cfg: &'a LlmModelConfig,
        system: &'a str,
        user: &'a str,
        mode: StructuredMode,
    ) -> Self {
        let response_format = match mode {
            StructuredMode::JsonSchema => Some(serde_json::json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "review_result",
                    "strict": true,
                    "schema": response_schema()
                }
            })),
            StructuredMode::JsonObject => Some(serde_json::json!({ "type": "json_object" })),
            StructuredMode::Freeform => None,
        };

        Self {
            model: &cfg.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            response_format,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageOut,
}

#[derive(Debug, Deserialize)]
struct ChatMessageOut {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::llm_provider::LlmProvider;

    fn cfg() -> LlmModelConfig {
        LlmModelConfig {
            provider: LlmProvider::OpenAi,
            model: "gpt-4o-mini".into(),
            endpoint: "https://api.openai.com".into(),
            api_key: "sk-test".into(),
            timeout_ms: 1_000,
            retries: 0,
            backoff_ms: 100,
            max_tokens: Some(2_048),
            temperature: None,
        }
    }

    #[test]
    fn request_body_carries_the_selected_response_format() {
        let schema =
            serde_json::to_value(ChatCompletionRequest::build(&cfg(), "s", "u", StructuredMode::JsonSchema))
                .unwrap();
        assert_eq!(schema["response_format"]["type"], "json_schema");
        assert_eq!(
            schema["response_format"]["json_schema"]["name"],
            "review_result"
        );

        let object =
            serde_json::to_value(ChatCompletionRequest::build(&cfg(), "s", "u", StructuredMode::JsonObject))
                .unwrap();
        assert_eq!(object["response_format"]["type"], "json_object");

        let freeform =
            serde_json::to_value(ChatCompletionRequest::build(&cfg(), "s", "u", StructuredMode::Freeform))
                .unwrap();
        assert!(freeform.get("response_format").is_none());
    }

    #[test]
    fn constructor_rejects_blank_key_and_bad_endpoint() {
        let mut c = cfg();
        c.api_key = "  ".into();
        assert!(OpenAiService::new(c).is_err());

        let mut c = cfg();
        c.endpoint = "ftp://api.openai.com".into();
        assert!(OpenAiService::new(c).is_err());
    }
}
