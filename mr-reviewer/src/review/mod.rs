//! Review orchestration: one entry point per review run.
//!
//! Pipeline for a single change request:
//! dedupe reservation → draft gate → context fetch (full or incremental) →
//! caps and target filtering → provider analysis under the concurrency
//! limiter → publication (line comments or managed report, secret warning,
//! labels, check run) → head memo → best-effort notification.
//!
//! The dedupe reservation is released on any failure after it was taken so a
//! retry stays possible; the incremental-head memo is written only on
//! success so a failed run keeps its baseline.

pub mod report;

use std::time::Instant;

use tracing::{debug, info, warn};

use ai_llm_service::schema::{ReviewResult, Severity};
use ai_llm_service::ProviderAdapter;

use crate::errors::{MrResult, sanitize_user_message};
use crate::git_providers::types::*;
use crate::git_providers::ForgeClient;
use crate::locale::{self, Locale};
use crate::parser;
use crate::policy::{AutoReviewPolicy, ReviewOutputMode};
use crate::prompt;
use crate::scanner;
use crate::state;
use crate::util;

/// Per-run caps.
pub const MAX_REVIEW_FILES: usize = 40;
pub const PER_FILE_CHAR_CAP: usize = 4_000;
pub const TOTAL_CHAR_CAP: usize = 60_000;

/// Dedupe windows.
pub const DEDUPE_TTL_MS: i64 = 5 * 60 * 1_000;
pub const MERGED_DEDUPE_TTL_MS: i64 = 24 * 60 * 60 * 1_000;

/// Label cap per run.
pub const MAX_LABELS: usize = 8;

/// What started this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewTrigger {
    PrOpened,
    PrEdited,
    PrSynchronize,
    Command,
    Merged,
}

impl ReviewTrigger {
    fn as_str(&self) -> &'static str {
        match self {
            ReviewTrigger::PrOpened => "pr-opened",
            ReviewTrigger::PrEdited => "pr-edited",
            ReviewTrigger::PrSynchronize => "pr-synchronize",
            ReviewTrigger::Command => "command",
            ReviewTrigger::Merged => "merged",
        }
    }

    fn is_auto(&self) -> bool {
        matches!(
            self,
            ReviewTrigger::PrOpened | ReviewTrigger::PrEdited | ReviewTrigger::PrSynchronize
        )
    }
}

/// One review request, fully resolved by the caller (policy + overrides).
#[derive(Debug, Clone)]
pub struct ReviewRequest {
    pub id: ChangeRequestId,
    pub mode: ReviewOutputMode,
    pub trigger: ReviewTrigger,
    /// Extra dedupe-key discriminator (command argument digest etc.).
    pub suffix: Option<String>,
    pub policy: AutoReviewPolicy,
    pub locale: Locale,
    /// Notification endpoint; empty disables the fan-out.
    pub push_url: String,
}

/// The `{ok, message}` envelope every orchestration resolves with.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub ok: bool,
    pub message: String,
}

impl RunOutcome {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

/// Dedupe key: `<platform>:<repo>#<n>:<mode>:<trigger>[:<suffix>]`.
pub fn request_key(platform: Platform, req: &ReviewRequest) -> String {
    let mode = match req.mode {
        ReviewOutputMode::Comment => "comment",
        ReviewOutputMode::Report => "report",
    };
    let mut key = format!(
        "{}:{}#{}:{}:{}",
        platform.as_str(),
        req.id.project,
        req.id.number,
        mode,
        req.trigger.as_str()
    );
    if let Some(suffix) = &req.suffix {
        key.push(':');
        key.push_str(suffix);
    }
    key
}

fn head_key(platform: Platform, id: &ChangeRequestId) -> String {
    format!("{}:{}#{}", platform.as_str(), id.project, id.number)
}

/// Runs one review end to end. Never panics; the envelope reports failure.
pub async fn run_review(
    client: &ForgeClient,
    adapter: &ProviderAdapter,
    req: ReviewRequest,
) -> RunOutcome {
    let t0 = Instant::now();
    let platform = client.platform();
    let key = request_key(platform, &req);
    let now = runtime_state::now_ms();

    let ttl = if req.trigger == ReviewTrigger::Merged {
        MERGED_DEDUPE_TTL_MS
    } else {
        DEDUPE_TTL_MS
    };
    if state::dedupe().is_duplicate(&key, ttl, now) {
        info!(%key, "review suppressed by dedupe");
        if req.trigger == ReviewTrigger::Command {
            let note = locale::already_executed(req.locale);
            let _ = client.create_comment(&req.id, &note).await;
        }
        return RunOutcome::ok("duplicate request suppressed");
    }

    match run_review_inner(client, adapter, &req).await {
        Ok(outcome) => {
            info!(%key, elapsed_ms = t0.elapsed().as_millis() as u64, "review done");
            outcome
        }
        Err(e) => {
            // Release the reservation so a retry is possible.
            state::dedupe().clear(&key);
            let sanitized = sanitize_user_message(&e.to_string());
            warn!(%key, error = %e, "review failed");

            let note = locale::review_failed(req.locale, &sanitized);
            let _ = client
                .upsert_managed_comment(&req.id, &util::managed_marker("review-error", None), &note)
                .await;
            notify(&req, client.platform(), &format!("Review failed: {sanitized}")).await;
            RunOutcome::failed(sanitized)
        }
    }
}

async fn run_review_inner(
    client: &ForgeClient,
    adapter: &ProviderAdapter,
    req: &ReviewRequest,
) -> MrResult<RunOutcome> {
    let platform = client.platform();

    debug!("review: fetch meta");
    let meta = client.get_meta(&req.id).await?;

    if meta.draft && req.trigger.is_auto() {
        info!(project = %req.id.project, number = req.id.number, "draft change; auto review skipped");
        return Ok(RunOutcome::ok("draft change request skipped"));
    }

    // Incremental base: only synchronize/edited reuse the remembered head.
    let now = runtime_state::now_ms();
    let hkey = head_key(platform, &req.id);
    let last_head = state::incremental_heads().get_fresh(&hkey, now);
    let incremental_base = match req.trigger {
        ReviewTrigger::PrSynchronize | ReviewTrigger::PrEdited => last_head
            .as_deref()
            .filter(|last| *last != meta.diff_refs.head_sha)
            .map(str::to_string),
        _ => None,
    };

    debug!(incremental = incremental_base.is_some(), "review: fetch files");
    let listing = match &incremental_base {
        Some(base) => {
            client
                .compare(&req.id, base, &meta.diff_refs.head_sha)
                .await?
        }
        None => client.list_files(&req.id).await?,
    };
    // A pagination wall seen on an earlier listing still taints this run.
    let memo_key = format!(
        "{}:{}#{}:100",
        platform.as_str(),
        req.id.project,
        req.id.number
    );
    let truncated = listing.truncated
        || state::truncation_flags()
            .get_fresh(&memo_key, now)
            .unwrap_or(false);

    let files = build_diff_files(listing.files);
    if files.is_empty() {
        info!("review: empty diff");
        if req.trigger == ReviewTrigger::Command {
            let _ = client
                .create_comment(&req.id, &locale::no_reviewable_changes(req.locale))
                .await;
        }
        remember_head(platform, &req.id, &meta.diff_refs.head_sha);
        return Ok(RunOutcome::ok("no reviewable changes"));
    }

    let input = build_review_input(client, &meta, req, files).await;

    debug!("review: provider analysis");
    let p = prompt::build_review_prompt(&input);
    let result = adapter.analyze(&p.system, &p.user).await?;

    publish_outcome(client, req, &meta, &input, &result, truncated).await?;

    remember_head(platform, &req.id, &meta.diff_refs.head_sha);
    notify(
        req,
        platform,
        &format!(
            "Review of {}#{} finished: {} finding(s), risk {:?}",
            req.id.project,
            req.id.number,
            result.reviews.len(),
            result.risk_level
        ),
    )
    .await;

    Ok(RunOutcome::ok(format!(
        "review published with {} finding(s)",
        result.reviews.len()
    )))
}

/// Applies target filtering and the per-run caps, then parses each patch.
pub fn build_diff_files(raw: Vec<RawFileChange>) -> Vec<DiffFile> {
    let extensions = util::review_code_extensions();
    let mut files = Vec::new();
    let mut total_chars = 0usize;

    for f in raw {
        if files.len() >= MAX_REVIEW_FILES || total_chars >= TOTAL_CHAR_CAP {
            break;
        }
        if !util::is_review_target(&f.new_path, &extensions) {
            continue;
        }
        let Some(patch) = f.patch else { continue };
        if patch.trim().is_empty() || parser::looks_like_binary_patch(&patch) {
            continue;
        }

        let budget = PER_FILE_CHAR_CAP.min(TOTAL_CHAR_CAP - total_chars);
        let patch = parser::prioritize_hunks(&patch, budget);
        total_chars += patch.len();

        let parsed = parser::parse(&patch);
        files.push(DiffFile {
            new_path: f.new_path,
            old_path: f.old_path,
            status: f.status,
            additions: if f.additions > 0 { f.additions } else { parsed.additions },
            deletions: if f.deletions > 0 { f.deletions } else { parsed.deletions },
            patch,
            extended_diff: parsed.extended_diff,
            old_lines_by_number: parsed.old_lines_by_number,
            new_lines_by_number: parsed.new_lines_by_number,
        });
    }
    files
}

/// Assembles the provider input: diff plus rules, feedback, CI and
/// guideline context as the policy allows.
pub async fn build_review_input(
    client: &ForgeClient,
    meta: &ChangeRequest,
    req: &ReviewRequest,
    files: Vec<DiffFile>,
) -> ReviewInput {
    let now = runtime_state::now_ms();
    let platform = client.platform();

    let ci_checks = if req.policy.include_ci_checks {
        client
            .list_ci_checks(&req.id, &meta.diff_refs.head_sha)
            .await
            .unwrap_or_default()
            .into_iter()
            .take(30)
            .collect()
    } else {
        Vec::new()
    };

    let feedback_signals = load_feedback_signals(platform, &req.id, now);
    let process_guidelines = load_guidelines(client, &req.id, &meta.target_branch, now).await;

    let (total_additions, total_deletions) = files
        .iter()
        .fold((0u32, 0u32), |(a, d), f| (a + f.additions, d + f.deletions));

    ReviewInput {
        platform,
        id: req.id.clone(),
        title: meta.title.clone(),
        body: meta.body.clone(),
        author: meta.author.clone(),
        source_branch: meta.source_branch.clone(),
        target_branch: meta.target_branch.clone(),
        total_additions,
        total_deletions,
        files,
        custom_rules: req.policy.custom_rules.iter().take(30).cloned().collect(),
        feedback_signals,
        ci_checks,
        process_guidelines,
    }
}

/// Feedback signals for `(repo, PR)`, falling back to the repo default entry.
pub fn load_feedback_signals(
    platform: Platform,
    id: &ChangeRequestId,
    now: i64,
) -> Vec<String> {
    let pr_key = format!("{}:{}#{}", platform.as_str(), id.project, id.number);
    let repo_key = format!("{}:{}", platform.as_str(), id.project);
    let signals = state::feedback_signals()
        .get_fresh(&pr_key, now)
        .or_else(|| state::feedback_signals().get_fresh(&repo_key, now))
        .unwrap_or_default();
    signals.into_iter().take(80).collect()
}

/// Records one feedback signal under the `(repo, PR)` scope.
pub fn record_feedback_signal(platform: Platform, id: &ChangeRequestId, signal: String) {
    let now = runtime_state::now_ms();
    let key = format!("{}:{}#{}", platform.as_str(), id.project, id.number);
    let mut signals = state::feedback_signals().get_fresh(&key, now).unwrap_or_default();
    signals.push(signal);
    if signals.len() > 80 {
        let drop = signals.len() - 80;
        signals.drain(..drop);
    }
    state::feedback_signals().insert(key, signals, state::feedback_ttl_ms(), now);
    state::feedback_signals().trim(state::FEEDBACK_CACHE_MAX);
}

const GUIDELINE_CANDIDATES: [&str; 4] = [
    "CONTRIBUTING.md",
    ".github/PULL_REQUEST_TEMPLATE.md",
    ".gitlab/merge_request_templates/Default.md",
    "docs/REVIEW_GUIDELINES.md",
];

async fn load_guidelines(
    client: &ForgeClient,
    id: &ChangeRequestId,
    git_ref: &str,
    now: i64,
) -> Vec<ProcessGuideline> {
    let cache_key = format!("{}@{}", id.project, git_ref);
    if let Some(hit) = state::guideline_cache().get_fresh(&cache_key, now) {
        return hit;
    }

    let mut found = Vec::new();
    for path in GUIDELINE_CANDIDATES {
        if found.len() >= 20 {
            break;
        }
        if let Ok(Some(content)) = client.get_file_content(id, path, git_ref).await {
            found.push(ProcessGuideline {
                path: path.to_string(),
                content: util::truncate_chars(&content, 4_000),
            });
        }
    }

    state::guideline_cache().insert(cache_key, found.clone(), state::guideline_ttl_ms(), now);
    state::guideline_cache().prune(now);
    state::guideline_cache().trim(state::GUIDELINE_CACHE_MAX);
    found
}

async fn publish_outcome(
    client: &ForgeClient,
    req: &ReviewRequest,
    meta: &ChangeRequest,
    input: &ReviewInput,
    result: &ReviewResult,
    truncated: bool,
) -> MrResult<()> {
    let mut skipped = 0usize;

    match req.mode {
        ReviewOutputMode::Comment => {
            for issue in &result.reviews {
                let Some(file) = input
                    .files
                    .iter()
                    .find(|f| f.new_path == issue.new_path || f.old_path == issue.old_path)
                else {
                    skipped += 1;
                    continue;
                };
                let Some(line) = parser::resolve_line(file, issue) else {
                    skipped += 1;
                    continue;
                };
                let body = report::render_issue_comment(issue);
                client
                    .create_line_comment(
                        &req.id,
                        &meta.diff_refs,
                        &file.new_path,
                        &file.old_path,
                        issue.side,
                        line,
                        &body,
                    )
                    .await?;
            }
            if skipped > 0 {
                debug!(skipped, "line comments skipped (unresolvable lines)");
            }
            // Summary is still upserted so repeated runs stay idempotent.
            let summary =
                report::render_report(result, truncated, skipped, req.locale);
            client
                .upsert_managed_comment(&req.id, &util::managed_marker("review", None), &summary)
                .await?;
        }
        ReviewOutputMode::Report => {
            let body = report::render_report(result, truncated, 0, req.locale);
            client
                .upsert_managed_comment(&req.id, &util::managed_marker("review", None), &body)
                .await?;
        }
    }

    let findings = scan_secrets(req, input);
    if !findings.is_empty() {
        let body = report::render_secret_warning(&findings);
        client
            .upsert_managed_comment(&req.id, &util::managed_marker("secret-scan", None), &body)
            .await?;
    }

    if req.policy.auto_label_enabled {
        let labels = derive_labels(&input.title, input, &findings, result.risk_level);
        client.add_labels(&req.id, &labels).await?;
    }

    let conclusion = if result.risk_level == Severity::High {
        CheckConclusion::Neutral
    } else {
        CheckConclusion::Success
    };
    if let Err(e) = client
        .create_check_run(
            &req.id,
            &meta.diff_refs.head_sha,
            "mr-agent review",
            conclusion,
            "Automated review",
            &result.summary,
        )
        .await
    {
        // Check publication is decorative; a forge without the API must not
        // fail the run.
        warn!(error = %e, "check run publication failed");
    }

    Ok(())
}

fn scan_secrets(req: &ReviewRequest, input: &ReviewInput) -> Vec<scanner::SecretFinding> {
    if !req.policy.secret_scan_enabled {
        return Vec::new();
    }
    let custom = scanner::compile_custom_patterns(&req.policy.secret_scan_custom_patterns);
    let mut findings = Vec::new();
    for file in &input.files {
        let added = parser::added_lines(&file.patch);
        let added: Vec<(u32, &str)> = added.iter().map(|(n, s)| (*n, s.as_str())).collect();
        findings.extend(scanner::scan_added_lines(&file.new_path, &added, &custom));
        if findings.len() >= scanner::MAX_FINDINGS {
            findings.truncate(scanner::MAX_FINDINGS);
            break;
        }
    }
    findings
}

/// Labels from the title, paths and findings; capped at [`MAX_LABELS`].
pub fn derive_labels(
    title: &str,
    input: &ReviewInput,
    findings: &[scanner::SecretFinding],
    risk: Severity,
) -> Vec<String> {
    let mut labels = Vec::new();
    let lower = title.to_lowercase();

    if word_match(&lower, &["fix", "bug", "hotfix"]) {
        labels.push("bugfix".to_string());
    }
    if word_match(&lower, &["feat", "feature"]) {
        labels.push("feature".to_string());
    }
    if word_match(&lower, &["refactor"]) {
        labels.push("refactor".to_string());
    }
    let all_docs = !input.files.is_empty()
        && input.files.iter().all(|f| {
            let p = f.new_path.to_lowercase();
            p.ends_with(".md") || p.starts_with("docs/")
        });
    if all_docs {
        labels.push("docs".to_string());
    }
    if !findings.is_empty() {
        labels.push("security".to_string());
    }
    if risk == Severity::High {
        labels.push("needs-attention".to_string());
    }
    labels.truncate(MAX_LABELS);
    labels
}

fn word_match(haystack: &str, words: &[&str]) -> bool {
    haystack
        .split(|c: char| !c.is_alphanumeric())
        .any(|w| words.contains(&w))
}

fn remember_head(platform: Platform, id: &ChangeRequestId, head_sha: &str) {
    let now = runtime_state::now_ms();
    state::incremental_heads().insert(
        head_key(platform, id),
        head_sha.to_string(),
        state::incremental_head_ttl_ms(),
        now,
    );
    state::incremental_heads().trim(state::INCREMENTAL_HEAD_MAX);
}

async fn notify(req: &ReviewRequest, platform: Platform, content: &str) {
    if req.push_url.is_empty() {
        return;
    }
    let _ = platform;
    notify_webhook::publish(
        &req.push_url,
        notify_webhook::WebhookFormat::from_env(),
        &notify_webhook::Notification {
            author: "mr-agent",
            repo: &req.id.project,
            source_branch: "",
            target_branch: "",
            content,
        },
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(path: &str, patch: &str) -> RawFileChange {
        RawFileChange {
            old_path: path.to_string(),
            new_path: path.to_string(),
            status: FileStatus::Modified,
            additions: 0,
            deletions: 0,
            patch: Some(patch.to_string()),
        }
    }

    #[test]
    fn request_key_includes_every_discriminator() {
        let req = ReviewRequest {
            id: ChangeRequestId::new("acme/demo", 12),
            mode: ReviewOutputMode::Comment,
            trigger: ReviewTrigger::PrOpened,
            suffix: None,
            policy: crate::policy::PolicyConfig::default()
                .resolve_auto_review(crate::policy::AutoReviewAction::Opened),
            locale: Locale::En,
            push_url: String::new(),
        };
        assert_eq!(
            request_key(Platform::GitHub, &req),
            "github:acme/demo#12:comment:pr-opened"
        );

        let mut with_suffix = req.clone();
        with_suffix.suffix = Some("abc".into());
        with_suffix.trigger = ReviewTrigger::Command;
        assert_eq!(
            request_key(Platform::GitLab, &with_suffix),
            "gitlab:acme/demo#12:comment:command:abc"
        );
    }

    #[test]
    fn build_diff_files_filters_and_caps() {
        let patch = "@@ -1,1 +1,2 @@\n context\n+line";
        let mut raws = vec![raw("README.md", patch), raw("src/a.rs", patch)];
        for i in 0..60 {
            raws.push(raw(&format!("src/gen{i}.rs"), patch));
        }
        let files = build_diff_files(raws);
        // README filtered out (not a code extension), cap applies.
        assert!(files.iter().all(|f| f.new_path.ends_with(".rs")));
        assert!(files.len() <= MAX_REVIEW_FILES);
    }

    #[test]
    fn oversized_patches_are_prioritised_per_file() {
        let big_line = format!("+{}", "x".repeat(200));
        let mut patch = String::from("@@ -1,1 +1,40 @@\n context\n");
        for _ in 0..40 {
            patch.push_str(&big_line);
            patch.push('\n');
        }
        let files = build_diff_files(vec![raw("src/big.rs", &patch)]);
        assert_eq!(files.len(), 1);
        assert!(files[0].patch.len() <= PER_FILE_CHAR_CAP);
    }

    #[test]
    fn labels_derive_from_title_paths_and_risk() {
        let files = build_diff_files(vec![raw(
            "src/a.rs",
            "@@ -1,1 +1,2 @@\n context\n+line",
        )]);
        let input = ReviewInput {
            platform: Platform::GitHub,
            id: ChangeRequestId::new("acme/demo", 1),
            title: String::new(),
            body: String::new(),
            author: String::new(),
            source_branch: String::new(),
            target_branch: String::new(),
            total_additions: 1,
            total_deletions: 0,
            files,
            custom_rules: Vec::new(),
            feedback_signals: Vec::new(),
            ci_checks: Vec::new(),
            process_guidelines: Vec::new(),
        };

        let labels = derive_labels("fix: resolve crash", &input, &[], Severity::High);
        assert!(labels.contains(&"bugfix".to_string()));
        assert!(labels.contains(&"needs-attention".to_string()));

        let labels = derive_labels("feat: new page", &input, &[], Severity::Low);
        assert_eq!(labels, vec!["feature"]);

        // "prefix" must not match "fix".
        let labels = derive_labels("prefix cleanup", &input, &[], Severity::Low);
        assert!(labels.is_empty());
    }

    #[test]
    fn feedback_signals_prefer_pr_scope_with_repo_fallback() {
        state::clear_all_for_tests();
        let id = ChangeRequestId::new("acme/demo", 7);
        let now = runtime_state::now_ms();

        // Repo-level default only.
        state::feedback_signals().insert(
            "github:acme/demo".into(),
            vec!["repo-signal".into()],
            60_000,
            now,
        );
        assert_eq!(
            load_feedback_signals(Platform::GitHub, &id, now),
            vec!["repo-signal"]
        );

        // PR-scoped entry wins.
        record_feedback_signal(Platform::GitHub, &id, "pr-signal".into());
        let signals = load_feedback_signals(Platform::GitHub, &id, runtime_state::now_ms());
        assert_eq!(signals, vec!["pr-signal"]);
        state::clear_all_for_tests();
    }
}
