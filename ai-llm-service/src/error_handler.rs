//! Error types and env helpers for `ai-llm-service`.
//!
//! Two sentinel messages are part of the public contract and must stay
//! byte-stable because callers branch on them:
//! - `"Model response is not valid JSON"` (final-ladder parse failure)
//! - `"Model returned empty output"` (blank completion)
//!
//! Shutdown propagates the retrying client's own sentinel so that queued
//! limiter waiters and in-flight HTTP calls fail with the same message.

use reqwest::StatusCode;
use thiserror::Error;

use crate::config::llm_provider::LlmProvider;

pub type Result<T> = std::result::Result<T, AiLlmError>;

/// Root error for provider calls.
#[derive(Debug, Error)]
pub enum AiLlmError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Transport-level failure from the retrying client.
    #[error("transport error: {0}")]
    HttpTransport(String),

    /// The model's final-ladder reply could not be parsed as JSON.
    #[error("Model response is not valid JSON")]
    NotJson {
        /// Leading slice of the reply, for the fallback action item.
        preview: String,
    },

    /// The model produced a blank completion.
    #[error("Model returned empty output")]
    EmptyOutput,

    /// Shutdown sentinel, shared with the HTTP client.
    #[error("{}", http_client::SHUTDOWN_SENTINEL)]
    ShuttingDown,
}

impl From<http_client::HttpClientError> for AiLlmError {
    fn from(e: http_client::HttpClientError) -> Self {
        match e {
            http_client::HttpClientError::ShuttingDown => AiLlmError::ShuttingDown,
            other => AiLlmError::HttpTransport(other.to_string()),
        }
    }
}

/// Provider-level failure with enough detail to drive the fallback ladder.
#[derive(Debug, Error)]
#[error("[{provider}] {kind}")]
pub struct ProviderError {
    pub provider: LlmProvider,
    pub kind: ProviderErrorKind,
}

impl ProviderError {
    pub fn new(provider: LlmProvider, kind: ProviderErrorKind) -> Self {
        Self { provider, kind }
    }
}

#[derive(Debug, Error)]
pub enum ProviderErrorKind {
    #[error("non-success status {status} from {url}: {snippet}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        snippet: String,
    },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("empty choices in completion response")]
    EmptyChoices,
}

impl AiLlmError {
    /// True when the provider rejected the structured-output directive with
    /// an HTTP 400 naming `response_format`/`json_schema`/tools (any casing,
    /// common localisations included). Drives the next rung of the ladder.
    pub fn is_schema_rejection(&self) -> bool {
        let AiLlmError::Provider(ProviderError {
            kind: ProviderErrorKind::HttpStatus { status, snippet, .. },
            ..
        }) = self
        else {
            return false;
        };
        if *status != StatusCode::BAD_REQUEST {
            return false;
        }
        let lower = snippet.to_lowercase();
        let names_directive = [
            "response_format",
            "json_schema",
            "json schema",
            "response schema",
            "response_schema",
            "tool",
            "schema",
        ]
        .iter()
        .any(|m| lower.contains(m));
        let complains = ["not supported", "unsupported", "invalid", "unknown", "不支持", "无效"]
            .iter()
            .any(|m| lower.contains(m));
        names_directive && complains
    }
}

/// Config load/validation errors. `MissingVar` renders as `Missing <VAR>` so
/// the user-facing sanitiser allow-list can echo it verbatim.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing {0}")]
    MissingVar(&'static str),

    #[error("invalid number in {var}: {reason}")]
    InvalidNumber {
        var: &'static str,
        reason: &'static str,
    },

    #[error("Unsupported AI_PROVIDER: {0}")]
    UnsupportedProvider(String),

    #[error("invalid format in {var}: {reason}")]
    InvalidFormat {
        var: &'static str,
        reason: &'static str,
    },
}

/* ------------------------ Env helpers ------------------------ */

/// Fetches a required, non-empty environment variable.
pub fn must_env(name: &'static str) -> std::result::Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::MissingVar(name)),
    }
}

/// Parses an optional `u32` from env (`Ok(None)` if unset/empty).
pub fn env_opt_u32(name: &'static str) -> std::result::Result<Option<u32>, ConfigError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => {
            v.trim()
                .parse::<u32>()
                .map(Some)
                .map_err(|_| ConfigError::InvalidNumber {
                    var: name,
                    reason: "expected u32",
                })
        }
        _ => Ok(None),
    }
}

/// Parses an optional `u64` from env (`Ok(None)` if unset/empty).
pub fn env_opt_u64(name: &'static str) -> std::result::Result<Option<u64>, ConfigError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => {
            v.trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|_| ConfigError::InvalidNumber {
                    var: name,
                    reason: "expected u64",
                })
        }
        _ => Ok(None),
    }
}

/// Validates that an endpoint starts with `http://` or `https://`.
pub fn validate_http_endpoint(
    var: &'static str,
    value: &str,
) -> std::result::Result<(), ConfigError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::InvalidFormat {
            var,
            reason: "must start with http:// or https://",
        })
    }
}

/// Bounded snippet of a provider error body for logs and ladder decisions.
pub fn make_snippet(text: &str) -> String {
    const MAX: usize = 400;
    let trimmed = text.trim();
    if trimmed.len() <= MAX {
        trimmed.to_string()
    } else {
        let mut end = MAX;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &trimmed[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_err(status: u16, snippet: &str) -> AiLlmError {
        AiLlmError::Provider(ProviderError::new(
            LlmProvider::OpenAi,
            ProviderErrorKind::HttpStatus {
                status: StatusCode::from_u16(status).unwrap(),
                url: "https://api.example/v1/chat/completions".into(),
                snippet: snippet.into(),
            },
        ))
    }

    #[test]
    fn schema_rejection_needs_400_and_both_hints() {
        assert!(status_err(400, "unsupported response_format=json_schema").is_schema_rejection());
        assert!(status_err(400, "json_schema is invalid here").is_schema_rejection());
        assert!(status_err(400, "response_format 不支持").is_schema_rejection());
        assert!(!status_err(400, "rate limit exceeded").is_schema_rejection());
        assert!(!status_err(500, "unsupported response_format").is_schema_rejection());
    }

    #[test]
    fn sentinel_messages_are_stable() {
        assert_eq!(
            AiLlmError::NotJson { preview: String::new() }.to_string(),
            "Model response is not valid JSON"
        );
        assert_eq!(AiLlmError::EmptyOutput.to_string(), "Model returned empty output");
        assert_eq!(
            AiLlmError::ShuttingDown.to_string(),
            http_client::SHUTDOWN_SENTINEL
        );
    }

    #[test]
    fn snippet_is_bounded() {
        let s = make_snippet(&"x".repeat(1_000));
        assert!(s.chars().count() <= 401);
    }
}
