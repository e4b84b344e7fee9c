use std::fmt;
use std::str::FromStr;

use crate::error_handler::ConfigError;

/// Provider family used for structured review analysis.
///
/// `OpenAiCompatible` speaks the OpenAI chat-completions wire format against
/// an alternative base URL (self-hosted gateways, proxies). Anthropic uses
/// tool-use for structured output; Gemini uses a generation-config response
/// schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LlmProvider {
    OpenAi,
    OpenAiCompatible,
    Anthropic,
    Gemini,
}

impl LlmProvider {
    /// Stable lowercase name, used in logs, health reports and env parsing.
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::OpenAiCompatible => "openai-compatible",
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::Gemini => "gemini",
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(LlmProvider::OpenAi),
            "openai-compatible" | "openai_compatible" => Ok(LlmProvider::OpenAiCompatible),
            "anthropic" => Ok(LlmProvider::Anthropic),
            "gemini" => Ok(LlmProvider::Gemini),
            other => Err(ConfigError::UnsupportedProvider(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_providers() {
        assert_eq!("openai".parse::<LlmProvider>().unwrap(), LlmProvider::OpenAi);
        assert_eq!(
            "OpenAI-Compatible".parse::<LlmProvider>().unwrap(),
            LlmProvider::OpenAiCompatible
        );
        assert_eq!("anthropic".parse::<LlmProvider>().unwrap(), LlmProvider::Anthropic);
        assert_eq!("gemini".parse::<LlmProvider>().unwrap(), LlmProvider::Gemini);
    }

    #[test]
    fn rejects_unknown_provider_with_stable_prefix() {
        let err = "mistral".parse::<LlmProvider>().unwrap_err();
        assert!(err.to_string().starts_with("Unsupported AI_PROVIDER"));
    }
}
