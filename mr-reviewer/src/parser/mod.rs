//! Extended unified-diff parser.
//!
//! Features:
//! - Works even if file headers (---/+++) are missing (hunks-only input).
//! - `\ No newline at end of file` markers render an empty gutter and advance
//!   no cursor.
//! - Produces old/new line-number maps plus a re-rendered "extended diff"
//!   whose fixed-width `(old,new)` gutter shows the model true line numbers.
//! - Hunk prioritisation keeps the riskiest hunks under a byte budget.

use std::collections::BTreeMap;

use crate::git_providers::types::DiffFile;
use ai_llm_service::schema::{LineSide, ReviewIssue};

/// Parsed view of one unified patch.
#[derive(Debug, Clone, Default)]
pub struct ParsedPatch {
    pub extended_diff: String,
    pub old_lines_by_number: BTreeMap<u32, String>,
    pub new_lines_by_number: BTreeMap<u32, String>,
    pub additions: u32,
    pub deletions: u32,
}

/// Marker appended when prioritisation dropped hunks.
pub const HUNKS_PRIORITIZED_MARKER: &str = "[hunks prioritized]";
/// Marker appended when a patch was cut mid-hunk by a byte cap.
pub const PATCH_TRUNCATED_MARKER: &str = "[patch truncated]";

/// Tokens that raise a hunk's risk score when present on added lines.
const FLAGGED_TOKENS: [&str; 8] = [
    "password", "secret", "token", "unsafe", "unwrap", "panic", "exec", "eval",
];

/// Parses a unified diff into line maps and the gutter-rendered form.
/// Only `@@` headers are required; any prelude is skipped.
pub fn parse(patch: &str) -> ParsedPatch {
    let mut out = ParsedPatch::default();
    let mut old_line = 0u32;
    let mut new_line = 0u32;
    let mut in_hunk = false;

    for line in patch.lines() {
        if line.starts_with("@@") {
            if let Some((o_start, n_start)) = parse_hunk_header(line) {
                old_line = o_start;
                new_line = n_start;
                in_hunk = true;
                out.extended_diff.push_str(line);
                out.extended_diff.push('\n');
            }
            continue;
        }

        if !in_hunk {
            continue;
        }

        if line.starts_with('\\') {
            // No-newline marker: empty gutter, no cursor movement.
            out.extended_diff
                .push_str(&format!("({:>5},{:>5}) {}\n", "", "", line));
            continue;
        }

        if let Some(rest) = line.strip_prefix('+') {
            out.new_lines_by_number.insert(new_line, rest.to_string());
            out.extended_diff
                .push_str(&format!("({:>5},{:>5}) +{}\n", "", new_line, rest));
            new_line += 1;
            out.additions += 1;
        } else if let Some(rest) = line.strip_prefix('-') {
            out.old_lines_by_number.insert(old_line, rest.to_string());
            out.extended_diff
                .push_str(&format!("({:>5},{:>5}) -{}\n", old_line, "", rest));
            old_line += 1;
            out.deletions += 1;
        } else {
            let rest = line.strip_prefix(' ').unwrap_or(line);
            out.old_lines_by_number.insert(old_line, rest.to_string());
            out.new_lines_by_number.insert(new_line, rest.to_string());
            out.extended_diff
                .push_str(&format!("({:>5},{:>5})  {}\n", old_line, new_line, rest));
            old_line += 1;
            new_line += 1;
        }
    }

    out
}

/// Splits `@@ -a,b +c,d @@` into the two start cursors.
fn parse_hunk_header(line: &str) -> Option<(u32, u32)> {
    let inner = line.trim_start_matches('@').trim_end_matches(|c| c != '@');
    let inner = inner.trim_matches('@').trim();
    let (left, right) = inner.split_once('+')?;
    let (o_start, _) = split_nums(left.trim().trim_start_matches('-'));
    let (n_start, _) = split_nums(right.trim());
    Some((o_start, n_start))
}

/// Splits "12,7" or "12" into (start, len).
fn split_nums(s: &str) -> (u32, u32) {
    let s = s
        .split_whitespace()
        .next()
        .unwrap_or_default();
    if let Some((a, b)) = s.split_once(',') {
        (a.parse().unwrap_or(0), b.parse().unwrap_or(0))
    } else {
        (s.parse().unwrap_or(0), 0)
    }
}

/// Added (`+`) lines with their new-file line numbers, for the secret scan.
pub fn added_lines(patch: &str) -> Vec<(u32, String)> {
    let mut out = Vec::new();
    let mut new_line = 0u32;
    let mut in_hunk = false;

    for line in patch.lines() {
        if line.starts_with("@@") {
            if let Some((_, n_start)) = parse_hunk_header(line) {
                new_line = n_start;
                in_hunk = true;
            }
            continue;
        }
        if !in_hunk || line.starts_with('\\') {
            continue;
        }
        if let Some(rest) = line.strip_prefix('+') {
            out.push((new_line, rest.to_string()));
            new_line += 1;
        } else if line.strip_prefix('-').is_some() {
            // old side only
        } else {
            new_line += 1;
        }
    }
    out
}

/// Resolves the line an issue should anchor to, on the side its `type`
/// dictates: the end of the range, then the start, then a backwards walk.
/// `None` means the issue cannot be attached and must be skipped.
pub fn resolve_line(file: &DiffFile, issue: &ReviewIssue) -> Option<u32> {
    let map = match issue.side {
        LineSide::Old => &file.old_lines_by_number,
        LineSide::New => &file.new_lines_by_number,
    };
    let start = u32::try_from(issue.start_line.max(1)).ok()?;
    let end = u32::try_from(issue.end_line.max(1)).ok()?;
    let (start, end) = (start.min(end), start.max(end));

    if map.contains_key(&end) {
        return Some(end);
    }
    if map.contains_key(&start) {
        return Some(start);
    }
    (start..end).rev().find(|n| map.contains_key(n))
}

/// Greedily keeps whole hunks by risk score until the budget would overflow.
///
/// Appends [`HUNKS_PRIORITIZED_MARKER`] when hunks were dropped, or falls
/// back to a hard byte cut with [`PATCH_TRUNCATED_MARKER`] when even the top
/// hunk does not fit.
pub fn prioritize_hunks(patch: &str, budget: usize) -> String {
    if patch.len() <= budget {
        return patch.to_string();
    }

    let hunks = split_hunks(patch);
    if hunks.is_empty() {
        let mut cut = truncate_at_boundary(patch, budget.saturating_sub(PATCH_TRUNCATED_MARKER.len() + 1));
        cut.push('\n');
        cut.push_str(PATCH_TRUNCATED_MARKER);
        return cut;
    }

    let mut scored: Vec<(usize, i64)> = hunks
        .iter()
        .enumerate()
        .map(|(i, h)| (i, hunk_risk_score(h)))
        .collect();
    scored.sort_by_key(|(_, score)| std::cmp::Reverse(*score));

    let mut keep = vec![false; hunks.len()];
    let mut used = HUNKS_PRIORITIZED_MARKER.len() + 1;
    for (i, _) in scored {
        let cost = hunks[i].len() + 1;
        if used + cost > budget {
            continue;
        }
        used += cost;
        keep[i] = true;
    }

    if !keep.iter().any(|k| *k) {
        let mut cut = truncate_at_boundary(patch, budget.saturating_sub(PATCH_TRUNCATED_MARKER.len() + 1));
        cut.push('\n');
        cut.push_str(PATCH_TRUNCATED_MARKER);
        return cut;
    }

    // Preserve original hunk order among the kept ones.
    let mut out = String::with_capacity(used);
    for (i, h) in hunks.iter().enumerate() {
        if keep[i] {
            out.push_str(h);
            out.push('\n');
        }
    }
    out.push_str(HUNKS_PRIORITIZED_MARKER);
    out
}

/// Cuts a string on a char boundary at or below `max` bytes.
pub fn truncate_at_boundary(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

fn split_hunks(patch: &str) -> Vec<String> {
    let mut hunks: Vec<String> = Vec::new();
    for line in patch.lines() {
        if line.starts_with("@@") {
            hunks.push(String::new());
        }
        if let Some(cur) = hunks.last_mut() {
            if !cur.is_empty() {
                cur.push('\n');
            }
            cur.push_str(line);
        }
    }
    hunks
}

fn hunk_risk_score(hunk: &str) -> i64 {
    let mut score = 0i64;
    for line in hunk.lines() {
        if let Some(added) = line.strip_prefix('+') {
            score += 1;
            let lower = added.to_lowercase();
            if FLAGGED_TOKENS.iter().any(|t| lower.contains(t)) {
                score += 10;
            }
        }
    }
    score
}

/// Binary patch heuristics (`GIT binary patch`, `Binary files ... differ`).
pub fn looks_like_binary_patch(s: &str) -> bool {
    s.contains("GIT binary patch")
        || s.starts_with("Binary files ")
        || (s.starts_with("Files ") && s.contains(" differ"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git_providers::types::FileStatus;

    const SAMPLE: &str = "@@ -1,4 +1,5 @@\n context-a\n-removed-line\n+added-one\n+added-two\n context-b";

    #[test]
    fn line_maps_follow_the_cursors() {
        let p = parse(SAMPLE);
        // Context lines land in both maps at their respective cursors.
        assert_eq!(p.old_lines_by_number.get(&1).unwrap(), "context-a");
        assert_eq!(p.new_lines_by_number.get(&1).unwrap(), "context-a");
        // Removed advances only the old cursor.
        assert_eq!(p.old_lines_by_number.get(&2).unwrap(), "removed-line");
        // Added lines take new cursor positions 2 and 3.
        assert_eq!(p.new_lines_by_number.get(&2).unwrap(), "added-one");
        assert_eq!(p.new_lines_by_number.get(&3).unwrap(), "added-two");
        // Trailing context: old=3, new=4.
        assert_eq!(p.old_lines_by_number.get(&3).unwrap(), "context-b");
        assert_eq!(p.new_lines_by_number.get(&4).unwrap(), "context-b");
        assert_eq!(p.additions, 2);
        assert_eq!(p.deletions, 1);
    }

    #[test]
    fn no_newline_marker_advances_nothing() {
        let patch = "@@ -1,1 +1,1 @@\n-old\n+new\n\\ No newline at end of file";
        let p = parse(patch);
        assert_eq!(p.old_lines_by_number.len(), 1);
        assert_eq!(p.new_lines_by_number.len(), 1);
        assert!(p.extended_diff.contains("\\ No newline"));
    }

    #[test]
    fn extended_diff_carries_gutters() {
        let p = parse(SAMPLE);
        let lines: Vec<&str> = p.extended_diff.lines().collect();
        assert!(lines[0].starts_with("@@"));
        assert!(lines[1].contains("(    1,    1)"));
        assert!(lines[3].contains(",    2) +added-one"));
    }

    fn file_with(patch: &str) -> DiffFile {
        let p = parse(patch);
        DiffFile {
            new_path: "a.rs".into(),
            old_path: "a.rs".into(),
            status: FileStatus::Modified,
            additions: p.additions,
            deletions: p.deletions,
            patch: patch.to_string(),
            extended_diff: p.extended_diff,
            old_lines_by_number: p.old_lines_by_number,
            new_lines_by_number: p.new_lines_by_number,
        }
    }

    fn issue(side: LineSide, start: i64, end: i64) -> ReviewIssue {
        ReviewIssue {
            severity: ai_llm_service::schema::Severity::Low,
            new_path: "a.rs".into(),
            old_path: "a.rs".into(),
            side,
            start_line: start,
            end_line: end,
            issue_header: "h".into(),
            issue_content: "c".into(),
            suggestion: None,
        }
    }

    #[test]
    fn resolve_prefers_end_then_start_then_walks_back() {
        let f = file_with(SAMPLE);
        // New side has lines 1..=4.
        assert_eq!(resolve_line(&f, &issue(LineSide::New, 2, 3)), Some(3));
        assert_eq!(resolve_line(&f, &issue(LineSide::New, 4, 9)), Some(4));
        // End and start both missing: walk back from end finds 4.
        assert_eq!(resolve_line(&f, &issue(LineSide::New, 3, 9)), Some(3));
        assert_eq!(resolve_line(&f, &issue(LineSide::New, 7, 9)), None);
        // Old side only has 1..=3.
        assert_eq!(resolve_line(&f, &issue(LineSide::Old, 2, 2)), Some(2));
        assert_eq!(resolve_line(&f, &issue(LineSide::Old, 8, 9)), None);
    }

    #[test]
    fn prioritisation_keeps_risky_hunks_inside_budget() {
        let boring = "@@ -1,2 +1,2 @@\n context\n+plain_addition";
        let risky = "@@ -10,2 +10,2 @@\n context\n+let password = load();";
        let patch = format!("{boring}\n{risky}");
        let budget = risky.len() + HUNKS_PRIORITIZED_MARKER.len() + 2;
        let out = prioritize_hunks(&patch, budget);
        assert!(out.contains("password"));
        assert!(!out.contains("plain_addition"));
        assert!(out.ends_with(HUNKS_PRIORITIZED_MARKER));
        assert!(out.len() <= budget);
    }

    #[test]
    fn tiny_budget_falls_back_to_hard_truncation() {
        let patch = "@@ -1,2 +1,2 @@\n context\n+something quite long here";
        let out = prioritize_hunks(patch, 30);
        assert!(out.ends_with(PATCH_TRUNCATED_MARKER));
    }

    #[test]
    fn small_patch_passes_through_untouched() {
        assert_eq!(prioritize_hunks(SAMPLE, 10_000), SAMPLE);
    }

    #[test]
    fn binary_heuristics() {
        assert!(looks_like_binary_patch("Binary files a/x and b/x differ"));
        assert!(looks_like_binary_patch("literal 1234\nGIT binary patch"));
        assert!(!looks_like_binary_patch(SAMPLE));
    }
}
