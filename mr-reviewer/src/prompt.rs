//! Prompt composition for review/ask/describe/changelog calls.
//!
//! Prompts are deterministic: a shared header, then fixed-order sections
//! (process templates, guidelines, custom rules, feedback signals, CI
//! checks, diff). The output contract is spelled out verbatim so structured
//! and freeform rungs produce comparable replies.

use std::fmt::Write as _;

use crate::git_providers::types::ReviewInput;
use crate::util::{is_process_template_file, truncate_chars};

/// Max files embedded into an ask prompt.
pub const ASK_MAX_FILES: usize = 40;
/// Max Q&A turns replayed into an ask prompt.
pub const ASK_MAX_TURNS: usize = 6;
/// Per-guideline content cap (chars).
pub const GUIDELINE_CONTENT_CAP: usize = 2_000;

/// Final system/user pair sent to the provider.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Review prompt: full context plus the strict JSON output contract.
pub fn build_review_prompt(input: &ReviewInput) -> Prompt {
    let system = "You are a senior code reviewer producing structured findings.\n\
- Be concise and actionable. Avoid generic advice.\n\
- Only report issues you can ground in the shown diff.\n\
- Line numbers must come from the (old,new) gutters of the diff.\n\
- If the change looks correct, return an empty review list."
        .to_string();

    let mut user = header(input);

    let templates: Vec<&str> = input
        .files
        .iter()
        .map(|f| f.new_path.as_str())
        .filter(|p| is_process_template_file(p))
        .collect();
    if !templates.is_empty() {
        push_section(&mut user, "Process/template files in this change");
        for t in &templates {
            let _ = writeln!(user, "- {t}");
        }
    }

    push_guidelines(&mut user, input);
    push_custom_rules(&mut user, input);
    push_feedback(&mut user, input);
    push_ci_checks(&mut user, input);
    push_diff(&mut user, input, usize::MAX);

    push_section(&mut user, "Output requirements");
    user.push_str(
        "Respond with JSON only, matching this shape:\n\
{\"summary\": string, \"risk_level\": \"low\"|\"medium\"|\"high\",\n \
\"reviews\": [{\"severity\": \"low\"|\"medium\"|\"high\", \"new_path\": string, \"old_path\": string,\n  \
\"type\": \"old\"|\"new\", \"start_line\": int, \"end_line\": int,\n  \
\"issue_header\": string, \"issue_content\": string, \"suggestion\": string?}],\n \
\"positives\": [string], \"action_items\": [string]}\n\
Rules:\n\
- Line numbers must be taken from the diff gutters shown above.\n\
- An empty \"reviews\" array is a valid answer.\n\
- When process/template files are part of the change, include one action item about the process flow.\n\
- Include \"suggestion\" only when the text can replace the flagged lines verbatim.\n\
- Cover every team custom rule listed above; cite the rule in the finding when it applies.\n\
- For every failing CI check, add an action item naming the check.\n",
    );

    Prompt { system, user }
}

/// Ask prompt: bounded diff context plus the running Q&A session.
pub fn build_ask_prompt(
    input: &ReviewInput,
    question: &str,
    turns: &[(String, String)],
) -> Prompt {
    let system = "You answer questions about a specific change request.\n\
- Ground every statement in the shown diff and metadata.\n\
- Answer in concise markdown; say so when the diff does not contain the answer."
        .to_string();

    let mut user = header(input);
    push_diff(&mut user, input, ASK_MAX_FILES);

    let recent: Vec<&(String, String)> = turns
        .iter()
        .rev()
        .take(ASK_MAX_TURNS)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    if !recent.is_empty() {
        push_section(&mut user, "Previous questions in this session");
        for (q, a) in recent {
            let _ = writeln!(user, "Q: {q}\nA: {}\n", truncate_chars(a, 600));
        }
    }

    push_section(&mut user, "Question");
    user.push_str(question.trim());
    user.push('\n');

    Prompt { system, user }
}

/// Describe prompt: produce a PR/MR description from the diff.
pub fn build_describe_prompt(input: &ReviewInput) -> Prompt {
    let system = "You write clear pull-request descriptions.\n\
- Summarise what changed and why, based only on the shown diff.\n\
- Use markdown with a short summary paragraph and a bullet list of changes."
        .to_string();

    let mut user = header(input);
    push_diff(&mut user, input, ASK_MAX_FILES);
    push_section(&mut user, "Task");
    user.push_str("Write a description for this change request.\n");

    Prompt { system, user }
}

/// Changelog prompt: one markdown entry for this change.
pub fn build_changelog_prompt(input: &ReviewInput) -> Prompt {
    let system = "You maintain a Keep-a-Changelog style file.\n\
- Produce a single changelog entry for the shown change.\n\
- Group under Added/Changed/Fixed as appropriate; one bullet per user-visible change."
        .to_string();

    let mut user = header(input);
    push_diff(&mut user, input, ASK_MAX_FILES);
    push_section(&mut user, "Task");
    user.push_str("Write the changelog entry for this change request.\n");

    Prompt { system, user }
}

/// Test-generation prompt.
pub fn build_generate_tests_prompt(input: &ReviewInput) -> Prompt {
    let system = "You write focused unit tests for changed code.\n\
- Target the behaviour introduced or modified in the shown diff.\n\
- Match the repository's apparent test style; output code blocks per file."
        .to_string();

    let mut user = header(input);
    push_diff(&mut user, input, ASK_MAX_FILES);
    push_section(&mut user, "Task");
    user.push_str("Propose tests covering the changed behaviour.\n");

    Prompt { system, user }
}

fn header(input: &ReviewInput) -> String {
    let mut s = String::new();
    let _ = writeln!(s, "# Change Request");
    let _ = writeln!(s, "Platform: {}", input.platform.as_str());
    let _ = writeln!(s, "Repository: {}", input.id.project);
    let _ = writeln!(s, "Number: #{}", input.id.number);
    let _ = writeln!(s, "Title: {}", input.title);
    let _ = writeln!(s, "Author: {}", input.author);
    let _ = writeln!(s, "Branches: {} → {}", input.source_branch, input.target_branch);
    let _ = writeln!(
        s,
        "Totals: +{} / -{} across {} file(s)",
        input.total_additions,
        input.total_deletions,
        input.files.len()
    );
    if !input.body.trim().is_empty() {
        let _ = writeln!(s, "\n## Description\n{}", truncate_chars(input.body.trim(), 2_000));
    }
    s
}

fn push_section(out: &mut String, title: &str) {
    let _ = writeln!(out, "\n## {title}");
}

fn push_guidelines(out: &mut String, input: &ReviewInput) {
    if input.process_guidelines.is_empty() {
        return;
    }
    push_section(out, "Repository process guidelines");
    for g in &input.process_guidelines {
        let _ = writeln!(
            out,
            "### {}\n{}\n",
            g.path,
            truncate_chars(&g.content, GUIDELINE_CONTENT_CAP)
        );
    }
}

fn push_custom_rules(out: &mut String, input: &ReviewInput) {
    if input.custom_rules.is_empty() {
        return;
    }
    push_section(out, "Team custom rules");
    for (i, rule) in input.custom_rules.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", i + 1, rule);
    }
}

fn push_feedback(out: &mut String, input: &ReviewInput) {
    if input.feedback_signals.is_empty() {
        return;
    }
    push_section(out, "Developer feedback on earlier findings");
    for f in &input.feedback_signals {
        let _ = writeln!(out, "- {f}");
    }
}

fn push_ci_checks(out: &mut String, input: &ReviewInput) {
    if input.ci_checks.is_empty() {
        return;
    }
    push_section(out, "CI check results");
    for c in &input.ci_checks {
        let _ = write!(out, "- {} — {} / {}", c.name, c.status, c.conclusion);
        if let Some(url) = &c.details_url {
            let _ = write!(out, " ({url})");
        }
        if let Some(summary) = &c.summary {
            let _ = write!(out, ": {}", truncate_chars(summary, 200));
        }
        out.push('\n');
    }
}

fn push_diff(out: &mut String, input: &ReviewInput, max_files: usize) {
    push_section(out, "Diff (with (old,new) line-number gutters)");
    let shown = input.files.iter().take(max_files);
    for f in shown {
        let _ = writeln!(
            out,
            "### {} ({:?}, +{}/-{})\n```diff\n{}```",
            f.new_path, f.status, f.additions, f.deletions, f.extended_diff
        );
    }
    if input.files.len() > max_files {
        let _ = writeln!(out, "({} more file(s) omitted)", input.files.len() - max_files);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git_providers::types::{
        ChangeRequestId, CiCheck, DiffFile, FileStatus, Platform, ProcessGuideline,
    };
    use crate::parser;

    fn sample_input() -> ReviewInput {
        let patch = "@@ -1,2 +1,3 @@\n context\n+added\n context2";
        let parsed = parser::parse(patch);
        ReviewInput {
            platform: Platform::GitHub,
            id: ChangeRequestId::new("acme/demo", 12),
            title: "Add feature".into(),
            body: "Fixes #3".into(),
            author: "alice".into(),
            source_branch: "feat/x".into(),
            target_branch: "main".into(),
            total_additions: 1,
            total_deletions: 0,
            files: vec![DiffFile {
                new_path: "src/lib.rs".into(),
                old_path: "src/lib.rs".into(),
                status: FileStatus::Modified,
                additions: parsed.additions,
                deletions: parsed.deletions,
                patch: patch.into(),
                extended_diff: parsed.extended_diff,
                old_lines_by_number: parsed.old_lines_by_number,
                new_lines_by_number: parsed.new_lines_by_number,
            }],
            custom_rules: vec!["Never log credentials".into()],
            feedback_signals: vec!["finding on src/db.rs:40 was resolved".into()],
            ci_checks: vec![CiCheck {
                name: "unit".into(),
                status: "completed".into(),
                conclusion: "failure".into(),
                details_url: None,
                summary: None,
            }],
            process_guidelines: vec![ProcessGuideline {
                path: "CONTRIBUTING.md".into(),
                content: "Keep PRs small.".into(),
            }],
        }
    }

    #[test]
    fn review_prompt_has_sections_in_fixed_order() {
        let p = build_review_prompt(&sample_input());
        let guidelines = p.user.find("Repository process guidelines").unwrap();
        let rules = p.user.find("Team custom rules").unwrap();
        let feedback = p.user.find("Developer feedback").unwrap();
        let ci = p.user.find("CI check results").unwrap();
        let diff = p.user.find("Diff (with").unwrap();
        let output = p.user.find("Output requirements").unwrap();
        assert!(guidelines < rules && rules < feedback && feedback < ci && ci < diff && diff < output);
        assert!(p.user.contains("acme/demo"));
        assert!(p.user.contains("feat/x → main"));
    }

    #[test]
    fn review_prompt_spells_out_the_json_contract() {
        let p = build_review_prompt(&sample_input());
        assert!(p.user.contains("Respond with JSON only"));
        assert!(p.user.contains("empty \"reviews\" array is a valid answer"));
        assert!(p.user.contains("failing CI check"));
    }

    #[test]
    fn ask_prompt_replays_only_recent_turns() {
        let turns: Vec<(String, String)> = (0..10)
            .map(|i| (format!("q{i}"), format!("a{i}")))
            .collect();
        let p = build_ask_prompt(&sample_input(), "what changed?", &turns);
        assert!(!p.user.contains("q3"));
        assert!(p.user.contains("q4"));
        assert!(p.user.contains("q9"));
        assert!(p.user.contains("what changed?"));
    }

    #[test]
    fn empty_sections_are_omitted() {
        let mut input = sample_input();
        input.custom_rules.clear();
        input.ci_checks.clear();
        input.feedback_signals.clear();
        input.process_guidelines.clear();
        let p = build_review_prompt(&input);
        assert!(!p.user.contains("Team custom rules"));
        assert!(!p.user.contains("CI check results"));
        assert!(!p.user.contains("Developer feedback"));
        assert!(!p.user.contains("Repository process guidelines"));
    }

    #[test]
    fn template_files_get_their_own_section() {
        let mut input = sample_input();
        input.files[0].new_path = ".github/workflows/ci.yml".into();
        let p = build_review_prompt(&input);
        assert!(p.user.contains("Process/template files in this change"));
    }
}
