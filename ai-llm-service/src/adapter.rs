//! Provider adapter: one entry point for structured review analysis.
//!
//! Dispatch is enum-based over the provider family. Every call runs under
//! the process-wide concurrency limiter. The fallback ladder:
//!
//! 1. strict schema;
//! 2. on an HTTP 400 naming the structured-output directive, a looser
//!    "JSON object" rung (OpenAI family only; Anthropic and Gemini go
//!    straight to their single fallback rung);
//! 3. freeform with best-effort extraction — a still-unparseable reply
//!    becomes the fallback result instead of an error.
//!
//! Empty or non-JSON replies on a structured rung also advance the ladder;
//! they only surface as errors once the ladder is exhausted.

use std::sync::Arc;

use tracing::{info, warn};

use crate::client_cache::client_cache;
use crate::config::llm_model_config::LlmModelConfig;
use crate::config::llm_provider::LlmProvider;
use crate::error_handler::AiLlmError;
use crate::limiter::limiter;
use crate::schema::{ReviewResult, extract_json, fallback_result, normalize};
use crate::services::anthropic_service::AnthropicService;
use crate::services::gemini_service::GeminiService;
use crate::services::open_ai_service::OpenAiService;
use crate::services::StructuredMode;
use crate::telemetry;

enum ServiceClient {
    OpenAi(Arc<OpenAiService>),
    Anthropic(AnthropicService),
    Gemini(GeminiService),
}

impl ServiceClient {
    async fn generate(
        &self,
        system: &str,
        user: &str,
        mode: StructuredMode,
    ) -> Result<String, AiLlmError> {
        match self {
            ServiceClient::OpenAi(c) => c.generate(system, user, mode).await,
            ServiceClient::Anthropic(c) => c.generate(system, user, mode).await,
            ServiceClient::Gemini(c) => c.generate(system, user, mode).await,
        }
    }
}

pub struct ProviderAdapter {
    cfg: LlmModelConfig,
}

impl ProviderAdapter {
    pub fn new(cfg: LlmModelConfig) -> Self {
        Self { cfg }
    }

    pub fn from_env() -> Result<Self, AiLlmError> {
        Ok(Self::new(LlmModelConfig::from_env()?))
    }

    pub fn provider(&self) -> LlmProvider {
        self.cfg.provider
    }

    pub fn model(&self) -> &str {
        &self.cfg.model
    }

    pub fn config(&self) -> &LlmModelConfig {
        &self.cfg
    }

    fn client(&self) -> Result<ServiceClient, AiLlmError> {
        Ok(match self.cfg.provider {
            LlmProvider::OpenAi | LlmProvider::OpenAiCompatible => {
                // OpenAI-family clients are cached by credential digest.
                ServiceClient::OpenAi(client_cache().get_or_create(&self.cfg)?)
            }
            LlmProvider::Anthropic => ServiceClient::Anthropic(AnthropicService::new(self.cfg.clone())?),
            LlmProvider::Gemini => ServiceClient::Gemini(GeminiService::new(self.cfg.clone())?),
        })
    }

    fn ladder(&self) -> &'static [StructuredMode] {
        match self.cfg.provider {
            LlmProvider::OpenAi | LlmProvider::OpenAiCompatible => &[
                StructuredMode::JsonSchema,
                StructuredMode::JsonObject,
                StructuredMode::Freeform,
            ],
            // Anthropic drops tools on fallback; Gemini drops the response
            // schema but keeps the JSON mime type.
            LlmProvider::Anthropic => &[StructuredMode::JsonSchema, StructuredMode::Freeform],
            LlmProvider::Gemini => &[StructuredMode::JsonSchema, StructuredMode::JsonObject],
        }
    }

    /// Runs the full analysis ladder and returns a normalised result.
    pub async fn analyze(&self, system: &str, user: &str) -> Result<ReviewResult, AiLlmError> {
        let _permit = limiter().acquire().await?;
        telemetry::record_call();

        let client = self.client()?;
        let ladder = self.ladder();

        let mut rung = 0;
        loop {
            let mode = ladder[rung];
            let last = rung + 1 == ladder.len();

            match client.generate(system, user, mode).await {
                Ok(text) => match extract_json(&text) {
                    Some(value) => {
                        info!(provider = %self.cfg.provider, ?mode, "analysis parsed");
                        return Ok(normalize(value));
                    }
                    None if last => {
                        warn!(provider = %self.cfg.provider, "final rung produced non-JSON; using fallback result");
                        telemetry::record_fallback();
                        return Ok(fallback_result(&text));
                    }
                    None => {
                        warn!(provider = %self.cfg.provider, ?mode, "non-JSON reply; descending ladder");
                        telemetry::record_fallback();
                        rung = ladder.len() - 1;
                    }
                },
                Err(e) if !last && e.is_schema_rejection() => {
                    warn!(provider = %self.cfg.provider, ?mode, error = %e, "structured output rejected; descending ladder");
                    telemetry::record_fallback();
                    rung += 1;
                }
                Err(AiLlmError::EmptyOutput) if !last => {
                    warn!(provider = %self.cfg.provider, ?mode, "empty reply; descending ladder");
                    telemetry::record_fallback();
                    rung = ladder.len() - 1;
                }
                Err(e) => {
                    telemetry::record_failure();
                    return Err(e);
                }
            }
        }
    }

    /// Freeform markdown generation for the conversational commands
    /// (ask/describe/changelog). Still limited and shutdown-aware.
    pub async fn generate_text(&self, system: &str, user: &str) -> Result<String, AiLlmError> {
        let _permit = limiter().acquire().await?;
        telemetry::record_call();

        let client = self.client()?;
        match client.generate(system, user, StructuredMode::Freeform).await {
            Err(e) => {
                telemetry::record_failure();
                Err(e)
            }
            ok => ok,
        }
    }
}
