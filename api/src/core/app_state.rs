//! Application state and bootstrap configuration.

use thiserror::Error;

use ai_llm_service::ProviderAdapter;

use crate::replay_store::ReplayStore;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 3000;
/// Default per-forge webhook body cap (10 MiB).
pub const DEFAULT_WEBHOOK_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Bootstrap-time configuration errors; any of these fails the boot.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("GITHUB_WEBHOOK_SKIP_SIGNATURE is forbidden when MR_AGENT_ENV=production")]
    SkipSignatureInProduction,

    #[error("invalid {var}: {reason}")]
    Invalid {
        var: &'static str,
        reason: String,
    },

    #[error(transparent)]
    Provider(#[from] ai_llm_service::error_handler::ConfigError),
}

/// Shared state behind `Arc` for every route.
pub struct AppState {
    pub adapter: ProviderAdapter,
    pub replay: ReplayStore,

    pub github_secret: Option<String>,
    pub gitlab_secret: Option<String>,
    pub gitlab_require_secret: bool,
    pub github_skip_signature: bool,
    pub github_max_body_bytes: usize,
    pub gitlab_max_body_bytes: usize,

    pub replay_token: Option<String>,
    /// Default notifier endpoint; `X-Push-Url` overrides per request.
    pub default_push_url: String,
}

impl AppState {
    pub fn from_env() -> Result<Self, ConfigError> {
        let production = std::env::var("MR_AGENT_ENV")
            .map(|v| v.eq_ignore_ascii_case("production"))
            .unwrap_or(false);
        let skip_signature = env_flag("GITHUB_WEBHOOK_SKIP_SIGNATURE");
        if skip_signature && production {
            return Err(ConfigError::SkipSignatureInProduction);
        }

        // Provider credentials are validated at boot so a misconfigured
        // deployment exits 1 instead of failing per-request.
        let adapter = ProviderAdapter::from_env().map_err(|e| match e {
            ai_llm_service::AiLlmError::Config(c) => ConfigError::Provider(c),
            other => ConfigError::Invalid {
                var: "AI_PROVIDER",
                reason: other.to_string(),
            },
        })?;

        Ok(Self {
            adapter,
            replay: ReplayStore::from_env(),
            github_secret: env_opt("GITHUB_WEBHOOK_SECRET"),
            gitlab_secret: env_opt("GITLAB_WEBHOOK_SECRET"),
            gitlab_require_secret: env_flag("GITLAB_REQUIRE_WEBHOOK_SECRET"),
            github_skip_signature: skip_signature,
            github_max_body_bytes: env_usize(
                "GITHUB_WEBHOOK_MAX_BODY_BYTES",
                DEFAULT_WEBHOOK_MAX_BODY_BYTES,
            ),
            gitlab_max_body_bytes: env_usize(
                "GITLAB_WEBHOOK_MAX_BODY_BYTES",
                DEFAULT_WEBHOOK_MAX_BODY_BYTES,
            ),
            replay_token: env_opt("WEBHOOK_REPLAY_TOKEN"),
            default_push_url: env_opt("NOTIFY_PUSH_URL").unwrap_or_default(),
        })
    }
}

pub fn listen_port() -> u16 {
    std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

/// Parses the framework body limit (`1mb`, `512kb`, plain bytes).
pub fn body_limit_bytes() -> usize {
    let raw = std::env::var("WEBHOOK_BODY_LIMIT").unwrap_or_else(|_| "1mb".to_string());
    parse_size(&raw).unwrap_or(1024 * 1024)
}

fn parse_size(raw: &str) -> Option<usize> {
    let lower = raw.trim().to_lowercase();
    if let Some(n) = lower.strip_suffix("mb") {
        return n.trim().parse::<usize>().ok().map(|v| v * 1024 * 1024);
    }
    if let Some(n) = lower.strip_suffix("kb") {
        return n.trim().parse::<usize>().ok().map(|v| v * 1024);
    }
    lower.parse().ok()
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_parsing_accepts_common_suffixes() {
        assert_eq!(parse_size("1mb"), Some(1024 * 1024));
        assert_eq!(parse_size("512KB"), Some(512 * 1024));
        assert_eq!(parse_size("2048"), Some(2048));
        assert_eq!(parse_size("oops"), None);
    }
}
