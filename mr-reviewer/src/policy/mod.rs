//! Repository policy: `.mr-agent.yml` parsing, caching, and gates.
//!
//! The file is JSON when the trimmed document starts with `{`, YAML
//! otherwise. The tree is strict: unknown keys are rejected, booleans coerce
//! from `{true,yes,on,1}` / `{false,no,off,0}` in any casing, string lists
//! are deduplicated and capped. Any parse or validation failure falls back
//! to the embedded default config (everything enabled, remind mode).
//!
//! Resolved configs are cached per `owner/repo@ref` with a TTL and an LRU
//! cap; see `state::policy_cache`.

pub mod body_check;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::MrResult;
use crate::git_providers::ForgeClient;
use crate::git_providers::types::ChangeRequestId;
use crate::state;

/// Cap on team custom rules.
pub const MAX_CUSTOM_RULES: usize = 30;
/// Cap on secret-scan custom patterns.
pub const MAX_SECRET_PATTERNS: usize = 20;
/// Cap on one secret-scan pattern's length.
pub const MAX_SECRET_PATTERN_LEN: usize = 240;
/// Policy cache LRU cap.
pub const POLICY_CACHE_MAX: usize = 500;
/// Default policy cache TTL.
pub const DEFAULT_POLICY_TTL_MS: i64 = 5 * 60 * 1_000;

/// File names probed at the target ref, in order.
pub const POLICY_FILES: [&str; 2] = [".mr-agent.yml", ".mr-agent.yaml"];

/// Boolean that also accepts the YAML-ish spellings. Defaults to on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Toggle(pub bool);

impl Default for Toggle {
    fn default() -> Self {
        Toggle(true)
    }
}

impl Toggle {
    pub fn on(&self) -> bool {
        self.0
    }
}

impl<'de> Deserialize<'de> for Toggle {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = serde_json::Value::deserialize(deserializer)?;
        match v {
            serde_json::Value::Bool(b) => Ok(Toggle(b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(0) => Ok(Toggle(false)),
                Some(1) => Ok(Toggle(true)),
                _ => Err(de::Error::custom("expected 0 or 1")),
            },
            serde_json::Value::String(s) => {
                match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "yes" | "on" | "1" => Ok(Toggle(true)),
                    "false" | "no" | "off" | "0" => Ok(Toggle(false)),
                    other => Err(de::Error::custom(format!("invalid boolean: {other}"))),
                }
            }
            other => Err(de::Error::custom(format!("invalid boolean: {other}"))),
        }
    }
}

/// Reminder vs enforcement for body-policy violations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    #[default]
    Remind,
    Enforce,
}

/// Review publication mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewOutputMode {
    #[default]
    Comment,
    Report,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PolicyConfig {
    pub mode: PolicyMode,
    pub issue: IssueSection,
    pub pull_request: PrSection,
    pub review: ReviewSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct IssueSection {
    pub enabled: Toggle,
    pub min_body_length: u32,
    pub required_sections: Vec<String>,
}

impl Default for IssueSection {
    fn default() -> Self {
        Self {
            enabled: Toggle::default(),
            min_body_length: 0,
            required_sections: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PrSection {
    pub enabled: Toggle,
    pub min_body_length: u32,
    pub required_sections: Vec<String>,
    /// When set, PR bodies must match this regex (issue references).
    pub issue_reference_pattern: Option<String>,
}

impl Default for PrSection {
    fn default() -> Self {
        Self {
            enabled: Toggle::default(),
            min_body_length: 0,
            required_sections: Vec::new(),
            issue_reference_pattern: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ReviewSection {
    pub enabled: Toggle,
    #[serde(alias = "onOpened")]
    pub on_opened: Toggle,
    #[serde(alias = "onEdited")]
    pub on_edited: Toggle,
    #[serde(alias = "onSynchronize")]
    pub on_synchronize: Toggle,
    pub mode: ReviewOutputMode,
    pub custom_rules: Vec<String>,
    pub include_ci_checks: Toggle,
    pub secret_scan_enabled: Toggle,
    pub secret_scan_custom_patterns: Vec<String>,
    pub auto_label_enabled: Toggle,

    pub review_command_enabled: Toggle,
    pub ask_command_enabled: Toggle,
    pub describe_command_enabled: Toggle,
    pub checks_command_enabled: Toggle,
    pub generate_tests_command_enabled: Toggle,
    pub changelog_command_enabled: Toggle,
    pub feedback_command_enabled: Toggle,
    pub similar_issue_command_enabled: Toggle,

    pub describe_allow_apply: Toggle,
    pub changelog_allow_apply: Toggle,
}

/// Auto-review trigger kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoReviewAction {
    Opened,
    Edited,
    Synchronize,
}

/// Resolved flags for one auto-review trigger.
#[derive(Debug, Clone)]
pub struct AutoReviewPolicy {
    pub enabled: bool,
    pub mode: ReviewOutputMode,
    pub custom_rules: Vec<String>,
    pub include_ci_checks: bool,
    pub secret_scan_enabled: bool,
    pub secret_scan_custom_patterns: Vec<String>,
    pub auto_label_enabled: bool,
}

/// Resolved command toggles.
#[derive(Debug, Clone, Copy)]
pub struct ReviewBehavior {
    pub review_command_enabled: bool,
    pub ask_command_enabled: bool,
    pub describe_command_enabled: bool,
    pub checks_command_enabled: bool,
    pub generate_tests_command_enabled: bool,
    pub changelog_command_enabled: bool,
    pub feedback_command_enabled: bool,
    pub similar_issue_command_enabled: bool,
    pub describe_allow_apply: bool,
    pub changelog_allow_apply: bool,
}

/// Resolved describe-command flags.
#[derive(Debug, Clone, Copy)]
pub struct DescribePolicy {
    pub enabled: bool,
    pub allow_apply: bool,
}

/// Resolved body-policy for issues or PRs.
#[derive(Debug, Clone)]
pub struct SectionPolicy {
    pub enabled: bool,
    pub mode: PolicyMode,
    pub min_body_length: u32,
    pub required_sections: Vec<String>,
    pub issue_reference_pattern: Option<String>,
}

impl PolicyConfig {
    pub fn resolve_auto_review(&self, action: AutoReviewAction) -> AutoReviewPolicy {
        let trigger_on = match action {
            AutoReviewAction::Opened => self.review.on_opened.on(),
            AutoReviewAction::Edited => self.review.on_edited.on(),
            AutoReviewAction::Synchronize => self.review.on_synchronize.on(),
        };
        AutoReviewPolicy {
            enabled: self.review.enabled.on() && trigger_on,
            mode: self.review.mode,
            custom_rules: self.review.custom_rules.clone(),
            include_ci_checks: self.review.include_ci_checks.on(),
            secret_scan_enabled: self.review.secret_scan_enabled.on(),
            secret_scan_custom_patterns: self.review.secret_scan_custom_patterns.clone(),
            auto_label_enabled: self.review.auto_label_enabled.on(),
        }
    }

    pub fn resolve_review_behavior(&self) -> ReviewBehavior {
        let r = &self.review;
        ReviewBehavior {
            review_command_enabled: r.review_command_enabled.on(),
            ask_command_enabled: r.ask_command_enabled.on(),
            describe_command_enabled: r.describe_command_enabled.on(),
            checks_command_enabled: r.checks_command_enabled.on(),
            generate_tests_command_enabled: r.generate_tests_command_enabled.on(),
            changelog_command_enabled: r.changelog_command_enabled.on(),
            feedback_command_enabled: r.feedback_command_enabled.on(),
            similar_issue_command_enabled: r.similar_issue_command_enabled.on(),
            describe_allow_apply: r.describe_allow_apply.on(),
            changelog_allow_apply: r.changelog_allow_apply.on(),
        }
    }

    pub fn resolve_describe(&self) -> DescribePolicy {
        DescribePolicy {
            enabled: self.review.describe_command_enabled.on(),
            allow_apply: self.review.describe_allow_apply.on(),
        }
    }

    pub fn resolve_issue_section(&self) -> SectionPolicy {
        SectionPolicy {
            enabled: self.issue.enabled.on(),
            mode: self.mode,
            min_body_length: self.issue.min_body_length,
            required_sections: self.issue.required_sections.clone(),
            issue_reference_pattern: None,
        }
    }

    pub fn resolve_pr_section(&self) -> SectionPolicy {
        SectionPolicy {
            enabled: self.pull_request.enabled.on(),
            mode: self.mode,
            min_body_length: self.pull_request.min_body_length,
            required_sections: self.pull_request.required_sections.clone(),
            issue_reference_pattern: self.pull_request.issue_reference_pattern.clone(),
        }
    }
}

/// Parses the policy document (JSON or YAML) and applies list caps.
pub fn parse_policy(text: &str) -> Result<PolicyConfig, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err("empty policy document".into());
    }

    let mut cfg: PolicyConfig = if trimmed.starts_with('{') {
        serde_json::from_str(trimmed).map_err(|e| e.to_string())?
    } else {
        serde_yaml::from_str(trimmed).map_err(|e| e.to_string())?
    };

    cfg.review.custom_rules = dedupe_capped(cfg.review.custom_rules, MAX_CUSTOM_RULES, usize::MAX);
    cfg.review.secret_scan_custom_patterns = dedupe_capped(
        cfg.review.secret_scan_custom_patterns,
        MAX_SECRET_PATTERNS,
        MAX_SECRET_PATTERN_LEN,
    );
    Ok(cfg)
}

fn dedupe_capped(items: Vec<String>, max_items: usize, max_len: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && s.len() <= max_len)
        .filter(|s| seen.insert(s.clone()))
        .take(max_items)
        .collect()
}

/// Loads the policy for `(project, ref)` through the cache.
///
/// File-fetch errors, parse errors and schema violations all log and fall
/// back to the default config; policy loading never fails a review.
pub async fn load_policy(
    client: &ForgeClient,
    id: &ChangeRequestId,
    git_ref: &str,
    now_ms: i64,
) -> PolicyConfig {
    let cache_key = format!("{}@{}", id.project, git_ref);
    if let Some(cfg) = state::policy_cache().get_fresh(&cache_key, now_ms) {
        debug!(key = %cache_key, "policy cache hit");
        return cfg;
    }

    let cfg = fetch_policy(client, id, git_ref).await.unwrap_or_default();

    let ttl = policy_ttl_ms();
    state::policy_cache().insert(cache_key, cfg.clone(), ttl, now_ms);
    state::policy_cache().prune(now_ms);
    state::policy_cache().trim(POLICY_CACHE_MAX);
    cfg
}

async fn fetch_policy(
    client: &ForgeClient,
    id: &ChangeRequestId,
    git_ref: &str,
) -> Option<PolicyConfig> {
    for name in POLICY_FILES {
        let content: MrResult<Option<String>> = client.get_file_content(id, name, git_ref).await;
        match content {
            Ok(Some(text)) => match parse_policy(&text) {
                Ok(cfg) => {
                    debug!(file = name, "policy loaded");
                    return Some(cfg);
                }
                Err(e) => {
                    warn!(file = name, error = %e, "policy parse failed; using defaults");
                    return None;
                }
            },
            Ok(None) => continue,
            Err(e) => {
                warn!(file = name, error = %e, "policy fetch failed; using defaults");
                return None;
            }
        }
    }
    None
}

fn policy_ttl_ms() -> i64 {
    std::env::var("POLICY_CACHE_TTL_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_POLICY_TTL_MS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_everything_on() {
        let cfg = PolicyConfig::default();
        let auto = cfg.resolve_auto_review(AutoReviewAction::Opened);
        assert!(auto.enabled);
        assert!(auto.secret_scan_enabled);
        assert_eq!(auto.mode, ReviewOutputMode::Comment);
        assert!(cfg.resolve_review_behavior().ask_command_enabled);
        assert_eq!(cfg.mode, PolicyMode::Remind);
    }

    #[test]
    fn yaml_with_coerced_booleans_parses() {
        let text = "mode: enforce\nreview:\n  enabled: \"yes\"\n  on_synchronize: off\n  mode: report\n";
        let cfg = parse_policy(text).unwrap();
        assert_eq!(cfg.mode, PolicyMode::Enforce);
        assert!(cfg.review.enabled.on());
        assert!(!cfg.review.on_synchronize.on());
        assert_eq!(cfg.review.mode, ReviewOutputMode::Report);
        // Unset triggers stay on.
        assert!(cfg.resolve_auto_review(AutoReviewAction::Opened).enabled);
        assert!(!cfg.resolve_auto_review(AutoReviewAction::Synchronize).enabled);
    }

    #[test]
    fn json_documents_are_accepted() {
        let text = r#"{ "review": { "ask_command_enabled": 0, "custom_rules": ["no panics"] } }"#;
        let cfg = parse_policy(text).unwrap();
        assert!(!cfg.resolve_review_behavior().ask_command_enabled);
        assert_eq!(cfg.review.custom_rules, vec!["no panics"]);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(parse_policy("reviw:\n  enabled: true\n").is_err());
        assert!(parse_policy(r#"{ "review": { "enbled": true } }"#).is_err());
    }

    #[test]
    fn camel_case_trigger_aliases_are_accepted() {
        let cfg = parse_policy("review:\n  onOpened: false\n").unwrap();
        assert!(!cfg.resolve_auto_review(AutoReviewAction::Opened).enabled);
        assert!(cfg.resolve_auto_review(AutoReviewAction::Edited).enabled);
    }

    #[test]
    fn quoted_hash_inside_list_items_survives() {
        let text = "review:\n  custom_rules:\n    - \"use #[must_use] on builders\"\n";
        let cfg = parse_policy(text).unwrap();
        assert_eq!(cfg.review.custom_rules[0], "use #[must_use] on builders");
    }

    #[test]
    fn list_caps_and_dedupe_apply() {
        let rules: Vec<String> = (0..40).map(|i| format!("rule-{}", i % 35)).collect();
        let mut cfg = PolicyConfig::default();
        cfg.review.custom_rules = rules;
        let text = serde_json::to_string(&cfg).unwrap();
        let parsed = parse_policy(&text).unwrap();
        assert_eq!(parsed.review.custom_rules.len(), MAX_CUSTOM_RULES);

        let long = "x".repeat(MAX_SECRET_PATTERN_LEN + 1);
        let mut cfg = PolicyConfig::default();
        cfg.review.secret_scan_custom_patterns = vec![long, "ok-pattern".into()];
        let parsed = parse_policy(&serde_json::to_string(&cfg).unwrap()).unwrap();
        assert_eq!(parsed.review.secret_scan_custom_patterns, vec!["ok-pattern"]);
    }

    #[test]
    fn invalid_boolean_spelling_is_an_error() {
        assert!(parse_policy("review:\n  enabled: maybe\n").is_err());
    }
}
