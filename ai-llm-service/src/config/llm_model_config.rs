use std::str::FromStr;

use crate::config::llm_provider::LlmProvider;
use crate::error_handler::{ConfigError, env_opt_u32, env_opt_u64, must_env, validate_http_endpoint};

/// Default OpenAI API base.
const OPENAI_DEFAULT_BASE: &str = "https://api.openai.com";
/// Default Anthropic API base.
const ANTHROPIC_DEFAULT_BASE: &str = "https://api.anthropic.com";
/// Default Gemini API base.
const GEMINI_DEFAULT_BASE: &str = "https://generativelanguage.googleapis.com";

/// Resolved configuration for one provider invocation.
///
/// Built from the environment once per process (or per request when headers
/// override the mode); HTTP knobs map onto the retrying client's policy.
#[derive(Debug, Clone)]
pub struct LlmModelConfig {
    pub provider: LlmProvider,

    /// Model identifier (e.g. `"gpt-4o-mini"`, `"claude-sonnet-4-5"`).
    pub model: String,

    /// API base URL (no trailing slash).
    pub endpoint: String,

    pub api_key: String,

    /// Per-attempt HTTP timeout.
    pub timeout_ms: u64,

    /// Extra attempts after the first.
    pub retries: u32,

    /// Base backoff between attempts.
    pub backoff_ms: u64,

    pub max_tokens: Option<u32>,

    pub temperature: Option<f32>,
}

impl LlmModelConfig {
    /// Reads the full provider configuration from the environment.
    ///
    /// `AI_PROVIDER` selects the family; the matching `*_API_KEY` is
    /// required and its absence is reported as `Missing <VAR>` so the
    /// sanitiser can echo it to repository admins.
    pub fn from_env() -> Result<Self, ConfigError> {
        let provider = LlmProvider::from_str(&must_env("AI_PROVIDER")?)?;

        let (key_var, default_model): (&'static str, &str) = match provider {
            LlmProvider::OpenAi | LlmProvider::OpenAiCompatible => ("OPENAI_API_KEY", "gpt-4o-mini"),
            LlmProvider::Anthropic => ("ANTHROPIC_API_KEY", "claude-sonnet-4-5"),
            LlmProvider::Gemini => ("GEMINI_API_KEY", "gemini-2.0-flash"),
        };

        let api_key = must_env(key_var)?;

        let endpoint = match provider {
            LlmProvider::OpenAi => OPENAI_DEFAULT_BASE.to_string(),
            LlmProvider::OpenAiCompatible => {
                let base = must_env("OPENAI_BASE_URL")?;
                validate_http_endpoint("OPENAI_BASE_URL", &base)?;
                base.trim_end_matches('/').to_string()
            }
            LlmProvider::Anthropic => ANTHROPIC_DEFAULT_BASE.to_string(),
            LlmProvider::Gemini => GEMINI_DEFAULT_BASE.to_string(),
        };

        let model = std::env::var("AI_MODEL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| provider_model_override(provider))
            .unwrap_or_else(|| default_model.to_string());

        Ok(Self {
            provider,
            model,
            endpoint,
            api_key,
            timeout_ms: env_opt_u64("AI_HTTP_TIMEOUT_MS")?.unwrap_or(30_000),
            retries: env_opt_u32("AI_HTTP_RETRIES")?.unwrap_or(2),
            backoff_ms: env_opt_u64("AI_HTTP_RETRY_BACKOFF_MS")?.unwrap_or(400),
            max_tokens: env_opt_u32("AI_MAX_TOKENS")?,
            temperature: None,
        })
    }

    /// Retry policy for analysis calls derived from the HTTP knobs.
    pub fn retry_policy(&self) -> http_client::RetryPolicy {
        http_client::RetryPolicy {
            timeout_ms: self.timeout_ms,
            retries: self.retries,
            backoff_ms: self.backoff_ms,
            retry_on_statuses: http_client::DEFAULT_RETRY_STATUSES.to_vec(),
        }
    }
}

/// Per-provider model override (`OPENAI_MODEL`, `ANTHROPIC_MODEL`, `GEMINI_MODEL`).
fn provider_model_override(provider: LlmProvider) -> Option<String> {
    let var = match provider {
        LlmProvider::OpenAi | LlmProvider::OpenAiCompatible => "OPENAI_MODEL",
        LlmProvider::Anthropic => "ANTHROPIC_MODEL",
        LlmProvider::Gemini => "GEMINI_MODEL",
    };
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}
