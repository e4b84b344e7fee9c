//! Issue/PR body policy checks.
//!
//! A body passes when the title is non-empty, the body is long enough,
//! the issue-reference pattern (when configured) matches, and every required
//! template section exists as a heading with non-empty content once HTML
//! comments, checkbox markers and `_No response_` placeholders are stripped.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::warn;

use crate::locale::{self, Locale};
use crate::policy::SectionPolicy;

lazy_static! {
    static ref HTML_COMMENT: Regex = Regex::new(r"(?s)<!--.*?-->").unwrap();
    static ref CHECKBOX_MARKER: Regex = Regex::new(r"(?m)^\s*[-*]\s*\[[ xX]\]\s*").unwrap();
    static ref NO_RESPONSE: Regex = Regex::new(r"(?i)_no response_").unwrap();
    static ref HEADING: Regex = Regex::new(r"(?m)^#{1,6}\s*(.+?)\s*$").unwrap();
}

/// Checks one body against the policy. Returns the localised problem list;
/// empty means the body passes.
pub fn check_body(policy: &SectionPolicy, title: &str, body: &str, locale: Locale) -> Vec<String> {
    let mut problems = Vec::new();
    if !policy.enabled {
        return problems;
    }

    if title.trim().is_empty() {
        problems.push(locale::title_required(locale));
    }

    let effective = strip_noise(body);
    if (effective.chars().count() as u32) < policy.min_body_length {
        problems.push(locale::body_too_short(locale, policy.min_body_length));
    }

    if let Some(pattern) = &policy.issue_reference_pattern {
        match Regex::new(pattern) {
            Ok(re) => {
                if !re.is_match(body) {
                    problems.push(locale::missing_issue_reference(locale));
                }
            }
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "invalid issue-reference pattern ignored");
            }
        }
    }

    for name in &policy.required_sections {
        if !section_present_and_non_empty(body, name) {
            problems.push(locale::missing_section(locale, name));
        }
    }

    problems
}

/// Finds a heading containing `name` (case-insensitive) and verifies the
/// content up to the next heading is non-empty after noise stripping.
fn section_present_and_non_empty(body: &str, name: &str) -> bool {
    let needle = name.to_lowercase();
    let mut headings: Vec<(usize, usize)> = Vec::new();
    for m in HEADING.find_iter(body) {
        headings.push((m.start(), m.end()));
    }

    for (i, (start, end)) in headings.iter().enumerate() {
        let heading_text = body[*start..*end].trim_start_matches('#').trim().to_lowercase();
        if !heading_text.contains(&needle) {
            continue;
        }
        let content_end = headings
            .get(i + 1)
            .map(|(next_start, _)| *next_start)
            .unwrap_or(body.len());
        let content = &body[*end..content_end];
        if !strip_noise(content).trim().is_empty() {
            return true;
        }
    }
    false
}

fn strip_noise(text: &str) -> String {
    let no_comments = HTML_COMMENT.replace_all(text, "");
    let no_boxes = CHECKBOX_MARKER.replace_all(&no_comments, "");
    NO_RESPONSE.replace_all(&no_boxes, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyMode;

    fn policy(sections: &[&str], min_len: u32) -> SectionPolicy {
        SectionPolicy {
            enabled: true,
            mode: PolicyMode::Remind,
            min_body_length: min_len,
            required_sections: sections.iter().map(|s| s.to_string()).collect(),
            issue_reference_pattern: None,
        }
    }

    #[test]
    fn empty_title_is_reported() {
        let problems = check_body(&policy(&[], 0), "  ", "body text", Locale::En);
        assert_eq!(problems, vec!["Issue title is required"]);
    }

    #[test]
    fn template_section_must_exist_and_have_content() {
        let body = "## Summary\n\n<!-- explain here -->\n\n## Testing\nran the suite\n";
        let problems = check_body(&policy(&["Summary", "Testing"], 0), "t", body, Locale::En);
        assert_eq!(problems, vec!["Missing or empty template section: Summary"]);

        let ok_body = "## Summary\nA real summary.\n## Testing\nran the suite\n";
        assert!(check_body(&policy(&["Summary", "Testing"], 0), "t", ok_body, Locale::En).is_empty());
    }

    #[test]
    fn checkbox_markers_and_no_response_do_not_count_as_content() {
        let body = "## Checklist\n- [ ] \n- [x] \n\n## Notes\n_No response_\n";
        let problems = check_body(&policy(&["Checklist", "Notes"], 0), "t", body, Locale::En);
        assert_eq!(
            problems,
            vec![
                "Missing or empty template section: Checklist",
                "Missing or empty template section: Notes"
            ]
        );
    }

    #[test]
    fn min_body_length_counts_effective_characters() {
        let body = "<!-- a very long hidden comment that should not count at all -->hi";
        let problems = check_body(&policy(&[], 10), "t", body, Locale::En);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("at least 10"));
    }

    #[test]
    fn issue_reference_pattern_gates_pr_bodies() {
        let mut p = policy(&[], 0);
        p.issue_reference_pattern = Some(r"#\d+".into());
        assert!(check_body(&p, "t", "Fixes #12", Locale::En).is_empty());
        let problems = check_body(&p, "t", "no reference here", Locale::En);
        assert_eq!(problems, vec!["Pull request description must reference an issue"]);
    }

    #[test]
    fn disabled_policy_reports_nothing() {
        let mut p = policy(&["Summary"], 100);
        p.enabled = false;
        assert!(check_body(&p, "", "", Locale::En).is_empty());
    }
}
