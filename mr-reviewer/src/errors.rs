//! Crate-wide error hierarchy for mr-reviewer.
//!
//! Goals:
//! - Single root `Error` for all public functions.
//! - Provider-aware mapping (401→Unauthorized, 429→RateLimited, 5xx→Server).
//! - No dynamic dispatch, ergonomic `?` via `From` impls.
//! - A sanitiser deciding which error messages may be echoed to end users.

use thiserror::Error;

/// Convenient alias for crate-wide results.
pub type MrResult<T> = Result<T, Error>;

/// Root error type for the mr-reviewer crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Forge (A/B) API failure.
    #[error(transparent)]
    Forge(#[from] ForgeError),

    /// Model provider failure.
    #[error("provider call failed: {0}")]
    Provider(#[from] ai_llm_service::AiLlmError),

    /// Policy/config problems (missing env, bad base URL, etc.).
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Publishing a comment/check/label failed after the analysis succeeded.
    #[error("publish failed: {0}")]
    Publish(String),

    /// Input validation errors (bad IDs, malformed references).
    #[error("validation error: {0}")]
    Validation(String),
}

/// Forge-API-level error used inside the provider clients.
#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("rate limited")]
    RateLimited,

    #[error("server error: status {0}")]
    Server(u16),

    #[error("http status error: {0}")]
    HttpStatus(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Configuration and setup errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing {0}")]
    MissingEnv(&'static str),

    #[error("insecure base url: {0} (set ALLOW_INSECURE_GITLAB_HTTP to permit http)")]
    InsecureBaseUrl(String),
}

// ===== Conversions for `?` ergonomics =====

impl From<reqwest::Error> for ForgeError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            let code = status.as_u16();
            return match code {
                401 => ForgeError::Unauthorized,
                403 => ForgeError::Forbidden,
                404 => ForgeError::NotFound,
                429 => ForgeError::RateLimited,
                500..=599 => ForgeError::Server(code),
                _ => ForgeError::HttpStatus(code),
            };
        }
        ForgeError::Network(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Forge(ForgeError::from(e))
    }
}

impl From<http_client::HttpClientError> for Error {
    fn from(e: http_client::HttpClientError) -> Self {
        Error::Forge(ForgeError::Network(e.to_string()))
    }
}

/// Maps an HTTP status from a forge response to a [`ForgeError`].
pub fn forge_status_error(status: u16, body_snippet: &str) -> ForgeError {
    match status {
        401 => ForgeError::Unauthorized,
        403 => ForgeError::Forbidden,
        404 => ForgeError::NotFound,
        429 => ForgeError::RateLimited,
        500..=599 => ForgeError::Server(status),
        _ => {
            if body_snippet.is_empty() {
                ForgeError::HttpStatus(status)
            } else {
                ForgeError::InvalidResponse(format!("status {status}: {body_snippet}"))
            }
        }
    }
}

/// Reduces an internal error message to something safe for an end-user
/// comment. Only a small allow-list of prefixes is echoed verbatim; every
/// other message collapses to a generic line.
pub fn sanitize_user_message(raw: &str) -> String {
    const GENERIC: &str = "internal execution error";
    let trimmed = raw.trim();

    let allowed = is_missing_env_message(trimmed)
        || trimmed.starts_with("Unsupported AI_PROVIDER")
        || trimmed.starts_with("Model returned empty")
        || trimmed.starts_with("Model response is not valid JSON");

    if allowed {
        trimmed.to_string()
    } else {
        GENERIC.to_string()
    }
}

/// `Missing <UPPER_SNAKE_VAR>` and nothing else.
fn is_missing_env_message(msg: &str) -> bool {
    let Some(rest) = msg.strip_prefix("Missing ") else {
        return false;
    };
    !rest.is_empty()
        && rest
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_listed_messages_pass_through() {
        assert_eq!(sanitize_user_message("Missing OPENAI_API_KEY"), "Missing OPENAI_API_KEY");
        assert_eq!(
            sanitize_user_message("Unsupported AI_PROVIDER: mistral"),
            "Unsupported AI_PROVIDER: mistral"
        );
        assert_eq!(
            sanitize_user_message("Model returned empty output"),
            "Model returned empty output"
        );
        assert_eq!(
            sanitize_user_message("Model response is not valid JSON"),
            "Model response is not valid JSON"
        );
    }

    #[test]
    fn everything_else_collapses() {
        assert_eq!(
            sanitize_user_message("connection refused to 10.1.2.3:443"),
            "internal execution error"
        );
        assert_eq!(
            sanitize_user_message("Missing lowercase_thing"),
            "internal execution error"
        );
        assert_eq!(sanitize_user_message("Missing "), "internal execution error");
    }

    #[test]
    fn status_mapping_covers_the_usual_suspects() {
        assert!(matches!(forge_status_error(401, ""), ForgeError::Unauthorized));
        assert!(matches!(forge_status_error(404, ""), ForgeError::NotFound));
        assert!(matches!(forge_status_error(429, ""), ForgeError::RateLimited));
        assert!(matches!(forge_status_error(503, ""), ForgeError::Server(503)));
        assert!(matches!(forge_status_error(418, ""), ForgeError::HttpStatus(418)));
    }
}
