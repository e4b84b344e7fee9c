//! Slash-command routing for comment events.
//!
//! Bot authors are dropped first. Commands are tried in a fixed order; the
//! first parser that matches wins. Every matched command passes the rate
//! limiter, then the policy gate, before any change-request context is
//! fetched or any provider call is made. Responses that are themselves
//! markdown comments are upserted by marker so repeated invocations
//! overwrite instead of piling up.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info};

use ai_llm_service::ProviderAdapter;

use crate::errors::{MrResult, sanitize_user_message};
use crate::git_providers::types::*;
use crate::git_providers::ForgeClient;
use crate::locale::{self, Locale};
use crate::policy::{self, ReviewBehavior, ReviewOutputMode};
use crate::prompt;
use crate::review::{self, ReviewRequest, ReviewTrigger, RunOutcome};
use crate::state;
use crate::util;

/// Rate-limit defaults (overridable via env).
pub const DEFAULT_RATE_LIMIT_MAX: usize = 10;
pub const DEFAULT_RATE_LIMIT_WINDOW_MS: i64 = 3_600_000;

/// Ask sessions keep a bounded FIFO of turns.
pub const ASK_SESSION_MAX_TURNS: usize = 6;

/// The fixed parse order.
const COMMANDS: [Command; 8] = [
    Command::Feedback,
    Command::Describe,
    Command::Ask,
    Command::Checks,
    Command::GenerateTests,
    Command::Changelog,
    Command::SimilarIssue,
    Command::AiReview,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Feedback,
    Describe,
    Ask,
    Checks,
    GenerateTests,
    Changelog,
    SimilarIssue,
    AiReview,
}

impl Command {
    fn token(&self) -> &'static str {
        match self {
            Command::Feedback => "/feedback",
            Command::Describe => "/describe",
            Command::Ask => "/ask",
            Command::Checks => "/checks",
            Command::GenerateTests => "/generate_tests",
            Command::Changelog => "/changelog",
            Command::SimilarIssue => "/similar_issue",
            Command::AiReview => "/ai-review",
        }
    }

    fn enabled(&self, behavior: &ReviewBehavior) -> bool {
        match self {
            Command::Feedback => behavior.feedback_command_enabled,
            Command::Describe => behavior.describe_command_enabled,
            Command::Ask => behavior.ask_command_enabled,
            Command::Checks => behavior.checks_command_enabled,
            Command::GenerateTests => behavior.generate_tests_command_enabled,
            Command::Changelog => behavior.changelog_command_enabled,
            Command::SimilarIssue => behavior.similar_issue_command_enabled,
            Command::AiReview => behavior.review_command_enabled,
        }
    }
}

/// A comment event as the webhook layer hands it over.
#[derive(Debug, Clone)]
pub struct CommentEvent {
    pub id: ChangeRequestId,
    pub commenter: String,
    /// Forge A user `type` field ("User", "Bot", ...); empty on forge B.
    pub commenter_kind: String,
    pub body: String,
    /// Mode override from the `X-AI-Mode` header, if any.
    pub mode_override: Option<ReviewOutputMode>,
    pub push_url: String,
}

lazy_static! {
    static ref GITLAB_BOT_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)-bot$").unwrap(),
        Regex::new(r"(?i)^project_\d+_bot").unwrap(),
        Regex::new(r"(?i)^gitlab[_-]ci[_-]bot$").unwrap(),
    ];
}

/// Bot authors never trigger commands.
pub fn is_bot(platform: Platform, login: &str, user_kind: &str) -> bool {
    match platform {
        Platform::GitHub => user_kind.eq_ignore_ascii_case("bot") || login.ends_with("[bot]"),
        Platform::GitLab => GITLAB_BOT_PATTERNS.iter().any(|re| re.is_match(login)),
    }
}

fn parse_command(body: &str) -> Option<(Command, String)> {
    let first_line = body.trim().lines().next()?.trim();
    for cmd in COMMANDS {
        let token = cmd.token();
        if let Some(rest) = first_line.strip_prefix(token) {
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                return Some((cmd, rest.trim().to_string()));
            }
        }
    }
    None
}

fn rate_limit_key(platform: Platform, id: &ChangeRequestId, user: &str, cmd: Command) -> String {
    format!(
        "{}:{}:{}:{}:{}",
        platform.as_str(),
        id.project,
        id.number,
        user,
        cmd.token().trim_start_matches('/')
    )
}

fn rate_limit_settings() -> (usize, i64) {
    let max = std::env::var("COMMAND_RATE_LIMIT_MAX")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_RATE_LIMIT_MAX);
    let window = std::env::var("COMMAND_RATE_LIMIT_WINDOW_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_RATE_LIMIT_WINDOW_MS);
    (max, window)
}

/// Routes one comment event. Resolves with the `{ok, message}` envelope.
pub async fn handle_comment(
    client: &ForgeClient,
    adapter: &ProviderAdapter,
    event: CommentEvent,
) -> RunOutcome {
    let platform = client.platform();
    let locale = Locale::from_env();

    if is_bot(platform, &event.commenter, &event.commenter_kind) {
        debug!(commenter = %event.commenter, "comment from bot ignored");
        return RunOutcome {
            ok: true,
            message: "ignored issue_comment from bot".into(),
        };
    }

    let Some((cmd, args)) = parse_command(&event.body) else {
        return RunOutcome {
            ok: true,
            message: "no command in comment".into(),
        };
    };
    info!(command = cmd.token(), project = %event.id.project, number = event.id.number, "command received");

    let (limit, window) = rate_limit_settings();
    let rl_key = rate_limit_key(platform, &event.id, &event.commenter, cmd);
    if state::rate_limiter().is_limited(&rl_key, limit, window, runtime_state::now_ms()) {
        let _ = client
            .create_comment(&event.id, &locale::command_too_frequent(locale))
            .await;
        return RunOutcome {
            ok: true,
            message: "command rate limited".into(),
        };
    }

    // Policy gate runs before any change-request context is fetched.
    let cfg = policy::load_policy(client, &event.id, "HEAD", runtime_state::now_ms()).await;
    let behavior = cfg.resolve_review_behavior();
    if !cmd.enabled(&behavior) {
        let _ = client
            .create_comment(&event.id, &locale::command_disabled(locale, cmd.token()))
            .await;
        return RunOutcome {
            ok: true,
            message: format!("{} disabled by policy", cmd.token()),
        };
    }

    let result = match cmd {
        Command::Feedback => run_feedback(client, &event, &args, locale).await,
        Command::Describe => run_describe(client, adapter, &event, &behavior, locale).await,
        Command::Ask => run_ask(client, adapter, &event, &args).await,
        Command::Checks => run_checks(client, &event).await,
        Command::GenerateTests => run_generate_tests(client, adapter, &event).await,
        Command::Changelog => run_changelog(client, adapter, &event, &behavior).await,
        Command::SimilarIssue => run_similar_issue(client, adapter, &event).await,
        Command::AiReview => {
            return run_ai_review(client, adapter, &event, &cfg, &args, locale).await;
        }
    };

    match result {
        Ok(message) => RunOutcome { ok: true, message },
        Err(e) => {
            let sanitized = sanitize_user_message(&e.to_string());
            let _ = client
                .create_comment(&event.id, &locale::review_failed(locale, &sanitized))
                .await;
            RunOutcome {
                ok: false,
                message: sanitized,
            }
        }
    }
}

async fn run_ai_review(
    client: &ForgeClient,
    adapter: &ProviderAdapter,
    event: &CommentEvent,
    cfg: &policy::PolicyConfig,
    args: &str,
    locale: Locale,
) -> RunOutcome {
    let mode = match args.split_whitespace().next() {
        Some("report") => ReviewOutputMode::Report,
        Some("comment") => ReviewOutputMode::Comment,
        _ => event.mode_override.unwrap_or(cfg.review.mode),
    };
    let policy = cfg.resolve_auto_review(policy::AutoReviewAction::Opened);
    review::run_review(
        client,
        adapter,
        ReviewRequest {
            id: event.id.clone(),
            mode,
            trigger: ReviewTrigger::Command,
            suffix: None,
            policy,
            locale,
            push_url: event.push_url.clone(),
        },
    )
    .await
}

async fn run_feedback(
    client: &ForgeClient,
    event: &CommentEvent,
    args: &str,
    locale: Locale,
) -> MrResult<String> {
    let signal = if args.is_empty() {
        format!("{} left feedback", event.commenter)
    } else {
        format!("{}: {}", event.commenter, util::truncate_chars(args, 400))
    };
    review::record_feedback_signal(client.platform(), &event.id, signal);
    client
        .create_comment(&event.id, &locale::feedback_recorded(locale))
        .await?;
    Ok("feedback recorded".into())
}

/// Fetches the bounded context (meta + parsed files) used by the
/// conversational commands.
async fn command_input(
    client: &ForgeClient,
    event: &CommentEvent,
) -> MrResult<(ChangeRequest, ReviewInput)> {
    let meta = client.get_meta(&event.id).await?;
    let listing = client.list_files(&event.id).await?;
    let files = review::build_diff_files(listing.files);

    let (total_additions, total_deletions) = files
        .iter()
        .fold((0u32, 0u32), |(a, d), f| (a + f.additions, d + f.deletions));

    let input = ReviewInput {
        platform: client.platform(),
        id: event.id.clone(),
        title: meta.title.clone(),
        body: meta.body.clone(),
        author: meta.author.clone(),
        source_branch: meta.source_branch.clone(),
        target_branch: meta.target_branch.clone(),
        total_additions,
        total_deletions,
        files,
        custom_rules: Vec::new(),
        feedback_signals: Vec::new(),
        ci_checks: Vec::new(),
        process_guidelines: Vec::new(),
    };
    Ok((meta, input))
}

fn ask_session_key(platform: Platform, id: &ChangeRequestId) -> String {
    format!("{}:{}#{}", platform.as_str(), id.project, id.number)
}

async fn run_ask(
    client: &ForgeClient,
    adapter: &ProviderAdapter,
    event: &CommentEvent,
    question: &str,
) -> MrResult<String> {
    let question = question.trim();
    if question.is_empty() {
        client
            .create_comment(&event.id, "Usage: `/ask <question>`")
            .await?;
        return Ok("ask without question".into());
    }

    let (_meta, input) = command_input(client, event).await?;

    let now = runtime_state::now_ms();
    let skey = ask_session_key(client.platform(), &event.id);
    let turns = state::ask_sessions().get_fresh(&skey, now).unwrap_or_default();

    let p = prompt::build_ask_prompt(&input, question, &turns);
    let answer = adapter.generate_text(&p.system, &p.user).await?;

    // Same question → same marker → overwrite instead of pile-up.
    let digest = util::fnv1a64_hex(&question.to_lowercase());
    let marker = util::managed_marker("ask", Some(&digest));
    client
        .upsert_managed_comment(&event.id, &marker, &answer)
        .await?;

    let mut turns = turns;
    turns.push((question.to_string(), answer));
    while turns.len() > ASK_SESSION_MAX_TURNS {
        turns.remove(0);
    }
    state::ask_sessions().insert(skey, turns, state::ask_session_ttl_ms(), now);
    state::ask_sessions().trim(state::ASK_SESSION_MAX);

    Ok("ask answered".into())
}

async fn run_describe(
    client: &ForgeClient,
    adapter: &ProviderAdapter,
    event: &CommentEvent,
    behavior: &ReviewBehavior,
    _locale: Locale,
) -> MrResult<String> {
    let (_meta, input) = command_input(client, event).await?;
    let p = prompt::build_describe_prompt(&input);
    let description = adapter.generate_text(&p.system, &p.user).await?;

    if behavior.describe_allow_apply {
        client.update_description(&event.id, &description).await?;
        return Ok("description applied".into());
    }
    client
        .upsert_managed_comment(&event.id, &util::managed_marker("describe", None), &description)
        .await?;
    Ok("description proposed".into())
}

async fn run_checks(client: &ForgeClient, event: &CommentEvent) -> MrResult<String> {
    let meta = client.get_meta(&event.id).await?;
    let checks = client
        .list_ci_checks(&event.id, &meta.diff_refs.head_sha)
        .await?;

    let mut body = String::from("## CI checks\n\n");
    if checks.is_empty() {
        body.push_str("No CI checks reported for the current head.\n");
    }
    for c in checks.iter().take(30) {
        body.push_str(&format!("- **{}** — {} / {}", c.name, c.status, c.conclusion));
        if let Some(url) = &c.details_url {
            body.push_str(&format!(" ([details]({url}))"));
        }
        body.push('\n');
    }

    client
        .upsert_managed_comment(&event.id, &util::managed_marker("checks", None), &body)
        .await?;
    Ok("checks digest published".into())
}

async fn run_generate_tests(
    client: &ForgeClient,
    adapter: &ProviderAdapter,
    event: &CommentEvent,
) -> MrResult<String> {
    let (_meta, input) = command_input(client, event).await?;
    let p = prompt::build_generate_tests_prompt(&input);
    let tests = adapter.generate_text(&p.system, &p.user).await?;
    client
        .upsert_managed_comment(
            &event.id,
            &util::managed_marker("generate-tests", None),
            &tests,
        )
        .await?;
    Ok("test proposal published".into())
}

async fn run_changelog(
    client: &ForgeClient,
    adapter: &ProviderAdapter,
    event: &CommentEvent,
    behavior: &ReviewBehavior,
) -> MrResult<String> {
    let (meta, input) = command_input(client, event).await?;
    let p = prompt::build_changelog_prompt(&input);
    let entry = adapter.generate_text(&p.system, &p.user).await?;

    if behavior.changelog_allow_apply {
        let existing = client
            .get_file_content(&event.id, "CHANGELOG.md", &meta.source_branch)
            .await
            .unwrap_or(None)
            .unwrap_or_default();
        let updated = format!("{}\n\n{}", entry.trim(), existing.trim_start());
        let wrote = client
            .write_file(
                &event.id,
                "CHANGELOG.md",
                &meta.source_branch,
                &updated,
                "chore: update changelog",
            )
            .await?;
        if wrote {
            return Ok("changelog written".into());
        }
    }

    client
        .upsert_managed_comment(&event.id, &util::managed_marker("changelog", None), &entry)
        .await?;
    Ok("changelog proposed".into())
}

async fn run_similar_issue(
    client: &ForgeClient,
    adapter: &ProviderAdapter,
    event: &CommentEvent,
) -> MrResult<String> {
    let (_meta, input) = command_input(client, event).await?;
    let system = "You identify previously-seen failure patterns.\n\
- Based only on the shown change, list the kinds of existing issues most likely related.\n\
- Output a short markdown list of search keywords and likely issue titles."
        .to_string();
    let p = prompt::build_describe_prompt(&input);
    let answer = adapter.generate_text(&system, &p.user).await?;
    client
        .upsert_managed_comment(
            &event.id,
            &util::managed_marker("similar-issue", None),
            &answer,
        )
        .await?;
    Ok("similar-issue hints published".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bot_detection_per_platform() {
        assert!(is_bot(Platform::GitHub, "mr-agent[bot]", "User"));
        assert!(is_bot(Platform::GitHub, "someone", "Bot"));
        assert!(!is_bot(Platform::GitHub, "alice", "User"));

        assert!(is_bot(Platform::GitLab, "deploy-bot", ""));
        assert!(is_bot(Platform::GitLab, "project_42_bot", ""));
        assert!(is_bot(Platform::GitLab, "gitlab_ci_bot", ""));
        assert!(!is_bot(Platform::GitLab, "alice", ""));
    }

    #[test]
    fn command_parse_order_and_args() {
        let (cmd, args) = parse_command("/ask  what does this do?").unwrap();
        assert_eq!(cmd, Command::Ask);
        assert_eq!(args, "what does this do?");

        let (cmd, args) = parse_command("/ai-review report").unwrap();
        assert_eq!(cmd, Command::AiReview);
        assert_eq!(args, "report");

        let (cmd, _) = parse_command("/generate_tests").unwrap();
        assert_eq!(cmd, Command::GenerateTests);

        // Prefix collisions must not match.
        assert!(parse_command("/askance question").is_none());
        assert!(parse_command("plain comment").is_none());
        // Only the first line is parsed.
        assert!(parse_command("notes\n/ask hidden").is_none());
    }

    #[test]
    fn rate_limit_key_carries_all_dimensions() {
        let key = rate_limit_key(
            Platform::GitHub,
            &ChangeRequestId::new("acme/demo", 12),
            "alice",
            Command::Feedback,
        );
        assert_eq!(key, "github:acme/demo:12:alice:feedback");
    }
}
