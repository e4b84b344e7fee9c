//! Review response schema, lenient extraction, and normalisation.
//!
//! Model replies arrive in three shapes: bare JSON, a fenced code block, or
//! prose with an embedded object. Extraction tries each in turn. Whatever
//! parses is then normalised so downstream code never sees an inverted line
//! range, a zero line number, or a missing summary.

use serde::{Deserialize, Serialize};

/// Hard cap on reported issues.
pub const MAX_REVIEWS: usize = 30;
/// Hard cap on positives and action items.
pub const MAX_LIST_ITEMS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Low
    }
}

/// Which side of the diff a line range refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineSide {
    Old,
    New,
}

impl Default for LineSide {
    fn default() -> Self {
        LineSide::New
    }
}

/// One model-reported finding tied to a file and a line range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewIssue {
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub new_path: String,
    #[serde(default)]
    pub old_path: String,
    #[serde(rename = "type", default)]
    pub side: LineSide,
    #[serde(default)]
    pub start_line: i64,
    #[serde(default)]
    pub end_line: i64,
    #[serde(default)]
    pub issue_header: String,
    #[serde(default)]
    pub issue_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Normalised analysis result. `start_line <= end_line >= 1` holds for every
/// issue; `risk_level >= medium` whenever any issue is high severity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResult {
    pub summary: String,
    pub risk_level: Severity,
    #[serde(default)]
    pub reviews: Vec<ReviewIssue>,
    #[serde(default)]
    pub positives: Vec<String>,
    #[serde(default)]
    pub action_items: Vec<String>,
}

/// Lenient mirror of [`ReviewResult`] used for the first parse: everything
/// optional, nothing rejected.
#[derive(Debug, Default, Deserialize)]
struct RawResult {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    risk_level: Option<Severity>,
    #[serde(default)]
    reviews: Vec<RawIssue>,
    #[serde(default)]
    positives: Vec<String>,
    #[serde(default)]
    action_items: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawIssue {
    #[serde(default)]
    severity: Option<Severity>,
    #[serde(default)]
    new_path: Option<String>,
    #[serde(default)]
    old_path: Option<String>,
    #[serde(rename = "type", default)]
    side: Option<LineSide>,
    #[serde(default)]
    start_line: Option<i64>,
    #[serde(default)]
    end_line: Option<i64>,
    #[serde(default)]
    issue_header: Option<String>,
    #[serde(default)]
    issue_content: Option<String>,
    #[serde(default)]
    suggestion: Option<String>,
}

/// Pulls a JSON value out of a model reply.
///
/// Pass 1: direct parse. Pass 2: first fenced block (with or without a
/// language tag). Pass 3: the outermost `{...}` slice.
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(v) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if v.is_object() {
            return Some(v);
        }
    }

    if let Some(fenced) = extract_fenced_block(trimmed) {
        if let Ok(v) = serde_json::from_str::<serde_json::Value>(fenced.trim()) {
            if v.is_object() {
                return Some(v);
            }
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<serde_json::Value>(&trimmed[start..=end])
        .ok()
        .filter(|v| v.is_object())
}

fn extract_fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_open = &text[open + 3..];
    // Skip an optional language tag up to the first newline.
    let body_start = after_open.find('\n')? + 1;
    let body = &after_open[body_start..];
    let close = body.find("```")?;
    Some(&body[..close])
}

/// Normalises a parsed JSON value into a [`ReviewResult`]. Never fails:
/// unusable fields fall back to defaults, unusable issues are repaired.
pub fn normalize(value: serde_json::Value) -> ReviewResult {
    let raw: RawResult = serde_json::from_value(value).unwrap_or_default();

    let mut reviews: Vec<ReviewIssue> = raw
        .reviews
        .into_iter()
        .take(MAX_REVIEWS)
        .map(|r| {
            // Floor-clamp to 1, then order the range.
            let a = r.start_line.unwrap_or(1).max(1);
            let b = r.end_line.unwrap_or(a).max(1);
            ReviewIssue {
                severity: r.severity.unwrap_or_default(),
                new_path: r.new_path.unwrap_or_default(),
                old_path: r.old_path.unwrap_or_default(),
                side: r.side.unwrap_or_default(),
                start_line: a.min(b),
                end_line: a.max(b),
                issue_header: r.issue_header.unwrap_or_else(|| "Review finding".into()),
                issue_content: r.issue_content.unwrap_or_default(),
                suggestion: r.suggestion.filter(|s| !s.trim().is_empty()),
            }
        })
        .collect();
    reviews.retain(|r| !r.issue_content.trim().is_empty() || !r.issue_header.trim().is_empty());

    let inferred_risk = reviews
        .iter()
        .map(|r| r.severity)
        .max()
        .unwrap_or(Severity::Low);

    // A high-severity issue forces at least medium risk even when the model
    // reported otherwise.
    let mut risk_level = raw.risk_level.unwrap_or(inferred_risk);
    if reviews.iter().any(|r| r.severity == Severity::High) && risk_level < Severity::Medium {
        risk_level = Severity::Medium;
    }

    let summary = match raw.summary.filter(|s| !s.trim().is_empty()) {
        Some(s) => s,
        None => match reviews.len() {
            0 => "No issues found in the reviewed changes.".to_string(),
            n => format!("Automated review reported {n} issue(s)."),
        },
    };

    ReviewResult {
        summary,
        risk_level,
        reviews,
        positives: cap_strings(raw.positives),
        action_items: cap_strings(raw.action_items),
    }
}

fn cap_strings(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .filter(|s| !s.trim().is_empty())
        .take(MAX_LIST_ITEMS)
        .collect()
}

/// Fallback result when the final ladder rung still produced non-JSON text.
/// The single action item carries a bounded preview of the raw reply.
pub fn fallback_result(preview: &str) -> ReviewResult {
    let preview: String = preview.chars().take(280).collect();
    ReviewResult {
        summary: "Automated review could not parse the model output.".into(),
        risk_level: Severity::Low,
        reviews: Vec::new(),
        positives: Vec::new(),
        action_items: vec![format!(
            "Model output was not structured JSON; raw preview: {}",
            preview.trim()
        )],
    }
}

/// Strict JSON schema sent to providers that support schema-constrained
/// output. Field names match the serde shapes above.
pub fn response_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["summary", "risk_level", "reviews", "positives", "action_items"],
        "properties": {
            "summary": { "type": "string" },
            "risk_level": { "type": "string", "enum": ["low", "medium", "high"] },
            "reviews": {
                "type": "array",
                "maxItems": MAX_REVIEWS,
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["severity", "new_path", "old_path", "type",
                                 "start_line", "end_line", "issue_header", "issue_content"],
                    "properties": {
                        "severity": { "type": "string", "enum": ["low", "medium", "high"] },
                        "new_path": { "type": "string" },
                        "old_path": { "type": "string" },
                        "type": { "type": "string", "enum": ["old", "new"] },
                        "start_line": { "type": "integer", "minimum": 1 },
                        "end_line": { "type": "integer", "minimum": 1 },
                        "issue_header": { "type": "string" },
                        "issue_content": { "type": "string" },
                        "suggestion": { "type": "string" }
                    }
                }
            },
            "positives": { "type": "array", "items": { "type": "string" }, "maxItems": MAX_LIST_ITEMS },
            "action_items": { "type": "array", "items": { "type": "string" }, "maxItems": MAX_LIST_ITEMS }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bare_fenced_and_embedded_json() {
        let bare = r#"{"summary":"ok"}"#;
        assert!(extract_json(bare).is_some());

        let fenced = "Here you go:\n```json\n{\"summary\":\"ok\"}\n```\nthanks";
        assert!(extract_json(fenced).is_some());

        let embedded = "The result is {\"summary\":\"ok\",\"reviews\":[]} as requested.";
        assert!(extract_json(embedded).is_some());

        assert!(extract_json("no json here").is_none());
        assert!(extract_json("").is_none());
    }

    #[test]
    fn normalize_repairs_lines_and_orders_ranges() {
        let v = serde_json::json!({
            "summary": "s",
            "risk_level": "low",
            "reviews": [{
                "severity": "medium",
                "new_path": "a.rs",
                "old_path": "a.rs",
                "type": "new",
                "start_line": 12,
                "end_line": 4,
                "issue_header": "h",
                "issue_content": "c"
            }, {
                "severity": "low",
                "new_path": "b.rs",
                "old_path": "b.rs",
                "type": "new",
                "start_line": 0,
                "end_line": -3,
                "issue_header": "h2",
                "issue_content": "c2"
            }]
        });
        let r = normalize(v);
        assert_eq!(r.reviews[0].start_line, 4);
        assert_eq!(r.reviews[0].end_line, 12);
        assert_eq!(r.reviews[1].start_line, 1);
        assert_eq!(r.reviews[1].end_line, 1);
        assert!(r.reviews.iter().all(|i| i.start_line <= i.end_line));
    }

    #[test]
    fn high_severity_elevates_risk() {
        let v = serde_json::json!({
            "summary": "s",
            "risk_level": "low",
            "reviews": [{
                "severity": "high",
                "new_path": "a.rs", "old_path": "a.rs", "type": "new",
                "start_line": 1, "end_line": 1,
                "issue_header": "h", "issue_content": "c"
            }]
        });
        assert_eq!(normalize(v).risk_level, Severity::Medium);
    }

    #[test]
    fn missing_fields_become_defaults_without_panicking() {
        let r = normalize(serde_json::json!({}));
        assert!(!r.summary.is_empty());
        assert_eq!(r.risk_level, Severity::Low);
        assert!(r.reviews.is_empty());

        let r = normalize(serde_json::json!({"reviews": [{"issue_content": "x"}]}));
        assert_eq!(r.summary, "Automated review reported 1 issue(s).");
        assert_eq!(r.reviews.len(), 1);
    }

    #[test]
    fn caps_are_enforced() {
        let issues: Vec<_> = (0..50)
            .map(|i| serde_json::json!({"issue_content": format!("i{i}")}))
            .collect();
        let items: Vec<_> = (0..20).map(|i| format!("a{i}")).collect();
        let r = normalize(serde_json::json!({"reviews": issues, "action_items": items}));
        assert_eq!(r.reviews.len(), MAX_REVIEWS);
        assert_eq!(r.action_items.len(), MAX_LIST_ITEMS);
    }

    #[test]
    fn fallback_result_carries_preview_action_item() {
        let r = fallback_result("I'm sorry, I can't produce JSON right now.");
        assert!(r.reviews.is_empty());
        assert_eq!(r.risk_level, Severity::Low);
        assert!(r.action_items[0].starts_with("Model output was not structured JSON"));
    }
}
