//! Markdown rendering for published review output.

use std::fmt::Write as _;

use ai_llm_service::schema::{ReviewIssue, ReviewResult, Severity};

use crate::locale::{self, Locale};
use crate::scanner::SecretFinding;

fn severity_badge(s: Severity) -> &'static str {
    match s {
        Severity::Low => "🟢 low",
        Severity::Medium => "🟡 medium",
        Severity::High => "🔴 high",
    }
}

/// Inline comment body for one issue.
pub fn render_issue_comment(issue: &ReviewIssue) -> String {
    let mut out = format!(
        "**{}** ({})\n\n{}",
        issue.issue_header,
        severity_badge(issue.severity),
        issue.issue_content
    );
    if let Some(suggestion) = &issue.suggestion {
        let _ = write!(out, "\n\n```suggestion\n{}\n```", suggestion.trim_end());
    }
    out
}

/// The managed report comment.
pub fn render_report(
    result: &ReviewResult,
    truncated: bool,
    skipped_line_comments: usize,
    locale: Locale,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "## Automated review\n");
    let _ = writeln!(out, "{}\n", result.summary);
    let _ = writeln!(out, "**Risk:** {}\n", severity_badge(result.risk_level));

    if !result.reviews.is_empty() {
        let _ = writeln!(out, "### Findings\n");
        for issue in &result.reviews {
            let _ = writeln!(
                out,
                "- {} `{}` L{}–L{} ({}): {}",
                severity_badge(issue.severity),
                issue.new_path,
                issue.start_line,
                issue.end_line,
                match issue.side {
                    ai_llm_service::LineSide::New => "new",
                    ai_llm_service::LineSide::Old => "old",
                },
                issue.issue_header
            );
        }
        out.push('\n');
    }

    if !result.positives.is_empty() {
        let _ = writeln!(out, "### Positives\n");
        for p in &result.positives {
            let _ = writeln!(out, "- {p}");
        }
        out.push('\n');
    }

    if !result.action_items.is_empty() {
        let _ = writeln!(out, "### Action items\n");
        for a in &result.action_items {
            let _ = writeln!(out, "- {a}");
        }
        out.push('\n');
    }

    if skipped_line_comments > 0 {
        let _ = writeln!(
            out,
            "_{skipped_line_comments} finding(s) could not be attached to a diff line and are listed above only._\n"
        );
    }
    if truncated {
        let _ = writeln!(out, "_{}_", locale::files_truncated_warning(locale));
    }

    out.trim_end().to_string()
}

/// The managed secret-scan warning comment.
pub fn render_secret_warning(findings: &[SecretFinding]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "## ⚠️ Possible secrets in this change\n");
    for f in findings {
        let _ = writeln!(out, "- `{}` line {} — {} (`{}`)", f.path, f.line, f.kind, f.sample);
    }
    let _ = writeln!(
        out,
        "\nRotate any real credentials and move them to your secret manager."
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ai_llm_service::schema::LineSide;

    fn issue(suggestion: Option<&str>) -> ReviewIssue {
        ReviewIssue {
            severity: Severity::Medium,
            new_path: "src/a.rs".into(),
            old_path: "src/a.rs".into(),
            side: LineSide::New,
            start_line: 3,
            end_line: 5,
            issue_header: "Unchecked index".into(),
            issue_content: "Indexing may panic.".into(),
            suggestion: suggestion.map(str::to_string),
        }
    }

    #[test]
    fn issue_comment_includes_suggestion_block_only_when_present() {
        let with = render_issue_comment(&issue(Some("let x = v.get(i);")));
        assert!(with.contains("```suggestion"));
        let without = render_issue_comment(&issue(None));
        assert!(!without.contains("```suggestion"));
    }

    #[test]
    fn report_lists_findings_and_truncation_note() {
        let result = ReviewResult {
            summary: "One issue.".into(),
            risk_level: Severity::Medium,
            reviews: vec![issue(None)],
            positives: vec!["good tests".into()],
            action_items: vec!["check CI".into()],
        };
        let body = render_report(&result, true, 2, Locale::En);
        assert!(body.contains("### Findings"));
        assert!(body.contains("src/a.rs"));
        assert!(body.contains("good tests"));
        assert!(body.contains("truncated"));
        assert!(body.contains("2 finding(s) could not be attached"));
    }

    #[test]
    fn secret_warning_lists_redacted_samples() {
        let body = render_secret_warning(&[SecretFinding {
            path: "config.tf".into(),
            line: 9,
            kind: "aws-access-key".into(),
            sample: "AKIA***XPL0".into(),
        }]);
        assert!(body.contains("config.tf"));
        assert!(body.contains("AKIA***XPL0"));
        assert!(!body.contains("AKIAIOSFODNN"));
    }
}
