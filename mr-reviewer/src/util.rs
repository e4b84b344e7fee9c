//! Small pure helpers shared across the crate.

/// FNV-1a 64-bit hash; cheap stable digests for comment markers and keys.
pub fn fnv1a64(data: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET;
    for b in data {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Hex form of [`fnv1a64`], used as the optional marker digest.
pub fn fnv1a64_hex(data: &str) -> String {
    format!("{:016x}", fnv1a64(data.as_bytes()))
}

/// Builds the managed-comment marker: `<!-- mr-agent:<kind>[:<digest>] -->`.
pub fn managed_marker(kind: &str, digest: Option<&str>) -> String {
    match digest {
        Some(d) => format!("<!-- mr-agent:{kind}:{d} -->"),
        None => format!("<!-- mr-agent:{kind} -->"),
    }
}

/// Appends the marker to a comment body.
pub fn with_marker(body: &str, marker: &str) -> String {
    format!("{}\n\n{}", body.trim_end(), marker)
}

/// Default extensions reviewed when `REVIEW_CODE_EXTENSIONS` is unset.
const DEFAULT_CODE_EXTENSIONS: &str =
    "rs,go,py,js,jsx,ts,tsx,java,kt,swift,c,h,cc,cpp,hpp,cs,rb,php,scala,sql,sh,tf,yaml,yml,toml,json,vue,dart";

/// Extension allow-list from the environment (comma separated), lowercased.
pub fn review_code_extensions() -> Vec<String> {
    let raw = std::env::var("REVIEW_CODE_EXTENSIONS")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CODE_EXTENSIONS.to_string());
    raw.split(',')
        .map(|s| s.trim().trim_start_matches('.').to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Process-template files: repo metadata the reviewer comments on for flow
/// quality rather than code quality.
pub fn is_process_template_file(path: &str) -> bool {
    let lower = path.to_lowercase();
    lower.starts_with(".github/workflows/")
        || lower.contains("pull_request_template")
        || lower.contains("issue_template")
        || lower.contains("merge_request_templates")
        || lower.ends_with("codeowners")
        || lower == ".gitlab-ci.yml"
        || lower.ends_with("/.gitlab-ci.yml")
        || lower.ends_with("contributing.md")
}

/// True when the file should enter the review context.
pub fn is_review_target(path: &str, extensions: &[String]) -> bool {
    if is_process_template_file(path) {
        return true;
    }
    let Some(ext) = path.rsplit('.').next().filter(|e| *e != path) else {
        return false;
    };
    extensions.iter().any(|allowed| allowed == &ext.to_lowercase())
}

/// Char-counted truncation (not bytes), appending an ellipsis when cut.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_matches_known_vectors() {
        // Reference values for the 64-bit FNV-1a parameters.
        assert_eq!(fnv1a64(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a64(b"a"), 0xaf63dc4c8601ec8c);
    }

    #[test]
    fn markers_render_with_and_without_digest() {
        assert_eq!(managed_marker("review", None), "<!-- mr-agent:review -->");
        assert_eq!(
            managed_marker("ask", Some("deadbeef")),
            "<!-- mr-agent:ask:deadbeef -->"
        );
        let body = with_marker("Hello", "<!-- mr-agent:review -->");
        assert!(body.ends_with("<!-- mr-agent:review -->"));
    }

    #[test]
    fn review_targets_cover_code_and_templates() {
        let exts = vec!["rs".to_string(), "ts".to_string()];
        assert!(is_review_target("src/main.rs", &exts));
        assert!(is_review_target("web/app.TS", &exts));
        assert!(!is_review_target("docs/readme.md", &exts));
        assert!(!is_review_target("Makefile", &exts));
        // Templates count regardless of extension list.
        assert!(is_review_target(".github/workflows/ci.yml", &exts));
        assert!(is_review_target(".github/PULL_REQUEST_TEMPLATE.md", &exts));
        assert!(is_review_target("CODEOWNERS", &exts));
        assert!(is_review_target(".gitlab-ci.yml", &exts));
    }

    #[test]
    fn truncation_counts_chars_not_bytes() {
        assert_eq!(truncate_chars("héllo", 10), "héllo");
        let cut = truncate_chars("日本語テキスト", 3);
        assert_eq!(cut, "日本語…");
    }
}
