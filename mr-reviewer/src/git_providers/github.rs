//! Forge A (REST) client: pull-request metadata, paginated file listing,
//! compare, contents, issue comments, review comments, check runs, labels.
//!
//! Endpoints used:
//! - GET  /repos/:owner/:repo/pulls/:n
//! - GET  /repos/:owner/:repo/pulls/:n/files          (paginated, 20×100 wall)
//! - GET  /repos/:owner/:repo/compare/:base...:head
//! - GET  /repos/:owner/:repo/contents/:path?ref=
//! - GET/POST/PATCH issue comments
//! - POST /repos/:owner/:repo/pulls/:n/comments       (line comments)
//! - POST /repos/:owner/:repo/check-runs
//! - POST /repos/:owner/:repo/issues/:n/labels
//! - GET  /repos/:owner/:repo/commits/:sha/check-runs

use reqwest::Method;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::{Error, ForgeError, MrResult, forge_status_error};
use crate::git_providers::types::*;
use crate::state;

/// Pagination wall: at most 20 full pages of 100 files.
pub const MAX_FILE_PAGES: u32 = 20;
/// Page size for every listing call.
pub const PER_PAGE: u32 = 100;

#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: http_client::HttpClient,
    base_api: String,
    token: String,
}

impl GitHubClient {
    pub fn new(base_api: String, token: String) -> MrResult<Self> {
        let http = http_client::HttpClient::new("mr-agent/0.1")?;
        Ok(Self {
            http,
            base_api,
            token,
        })
    }

    fn headers(&self) -> MrResult<HeaderMap> {
        let mut h = HeaderMap::new();
        h.insert(USER_AGENT, HeaderValue::from_static("mr-agent/0.1"));
        h.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        h.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        h.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.token))
                .map_err(|e| Error::Validation(format!("bad token: {e}")))?,
        );
        Ok(h)
    }

    async fn call(
        &self,
        method: Method,
        url: &str,
        body: Option<Vec<u8>>,
    ) -> MrResult<reqwest::Response> {
        let resp = self
            .http
            .request(
                method,
                url,
                http_client::RequestOptions {
                    headers: self.headers()?,
                    body,
                    cancel: None,
                },
                &http_client::RetryPolicy::default(),
            )
            .await?;
        Ok(resp)
    }

    async fn expect_success(resp: reqwest::Response) -> MrResult<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let snippet = resp.text().await.unwrap_or_default();
        let snippet: String = snippet.chars().take(300).collect();
        Err(Error::Forge(forge_status_error(status.as_u16(), &snippet)))
    }

    pub async fn get_meta(&self, id: &ChangeRequestId) -> MrResult<ChangeRequest> {
        let url = format!("{}/repos/{}/pulls/{}", self.base_api, id.project, id.number);
        let resp = Self::expect_success(self.call(Method::GET, &url, None).await?).await?;
        let pr: PullResponse = resp.json().await.map_err(|e| Error::Forge(e.into()))?;

        Ok(ChangeRequest {
            platform: Platform::GitHub,
            id: id.clone(),
            title: pr.title,
            body: pr.body.unwrap_or_default(),
            author: pr.user.map(|u| u.login).unwrap_or_default(),
            source_branch: pr.head.r#ref,
            target_branch: pr.base.r#ref,
            diff_refs: DiffRefs {
                base_sha: pr.base.sha,
                start_sha: None,
                head_sha: pr.head.sha,
            },
            draft: pr.draft.unwrap_or(false),
            state: pr.state,
        })
    }

    /// Paginated file listing. Hitting the 20th full page records a
    /// truncation flag memoised per `(project, number, per_page)`.
    pub async fn list_files(&self, id: &ChangeRequestId) -> MrResult<ChangeListing> {
        let mut files = Vec::new();
        let mut truncated = false;

        for page in 1..=MAX_FILE_PAGES {
            let url = format!(
                "{}/repos/{}/pulls/{}/files?per_page={}&page={}",
                self.base_api, id.project, id.number, PER_PAGE, page
            );
            let resp = Self::expect_success(self.call(Method::GET, &url, None).await?).await?;
            let batch: Vec<PullFile> = resp.json().await.map_err(|e| Error::Forge(e.into()))?;
            let batch_len = batch.len();

            files.extend(batch.into_iter().map(raw_change_from));

            if batch_len < PER_PAGE as usize {
                break;
            }
            if page == MAX_FILE_PAGES {
                truncated = true;
                let key = truncation_key(id, PER_PAGE);
                state::truncation_flags().insert(
                    key,
                    true,
                    state::incremental_head_ttl_ms(),
                    runtime_state::now_ms(),
                );
                state::truncation_flags().trim(state::TRUNCATION_FLAG_MAX);
                warn!(project = %id.project, number = id.number, "file listing hit the pagination wall");
            }
        }

        debug!(project = %id.project, number = id.number, files = files.len(), truncated, "files listed");
        Ok(ChangeListing { files, truncated })
    }

    pub async fn compare(
        &self,
        id: &ChangeRequestId,
        base_sha: &str,
        head_sha: &str,
    ) -> MrResult<ChangeListing> {
        let url = format!(
            "{}/repos/{}/compare/{}...{}",
            self.base_api, id.project, base_sha, head_sha
        );
        let resp = Self::expect_success(self.call(Method::GET, &url, None).await?).await?;
        let cmp: CompareResponse = resp.json().await.map_err(|e| Error::Forge(e.into()))?;
        Ok(ChangeListing {
            files: cmp.files.into_iter().map(raw_change_from).collect(),
            truncated: false,
        })
    }

    pub async fn get_file_content(
        &self,
        id: &ChangeRequestId,
        path: &str,
        git_ref: &str,
    ) -> MrResult<Option<String>> {
        let url = format!(
            "{}/repos/{}/contents/{}?ref={}",
            self.base_api,
            id.project,
            urlencoding::encode(path),
            urlencoding::encode(git_ref)
        );
        let resp = self.call(Method::GET, &url, None).await?;
        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        let resp = Self::expect_success(resp).await?;
        let file: ContentsResponse = resp.json().await.map_err(|e| Error::Forge(e.into()))?;
        Ok(Some(decode_content(&file.content, file.encoding.as_deref())?))
    }

    pub async fn list_comments(
        &self,
        id: &ChangeRequestId,
        page: u32,
    ) -> MrResult<Vec<ExistingComment>> {
        let url = format!(
            "{}/repos/{}/issues/{}/comments?per_page={}&page={}",
            self.base_api, id.project, id.number, PER_PAGE, page
        );
        let resp = Self::expect_success(self.call(Method::GET, &url, None).await?).await?;
        let raw: Vec<IssueComment> = resp.json().await.map_err(|e| Error::Forge(e.into()))?;
        Ok(raw
            .into_iter()
            .map(|c| ExistingComment {
                id: c.id,
                body: c.body.unwrap_or_default(),
            })
            .collect())
    }

    pub async fn create_comment(&self, id: &ChangeRequestId, body: &str) -> MrResult<()> {
        let url = format!(
            "{}/repos/{}/issues/{}/comments",
            self.base_api, id.project, id.number
        );
        let payload = serde_json::to_vec(&serde_json::json!({ "body": body }))
            .map_err(|e| Error::Forge(ForgeError::Serde(e)))?;
        Self::expect_success(self.call(Method::POST, &url, Some(payload)).await?).await?;
        Ok(())
    }

    pub async fn update_comment(
        &self,
        id: &ChangeRequestId,
        comment_id: u64,
        body: &str,
    ) -> MrResult<()> {
        let url = format!(
            "{}/repos/{}/issues/comments/{}",
            self.base_api, id.project, comment_id
        );
        let payload = serde_json::to_vec(&serde_json::json!({ "body": body }))
            .map_err(|e| Error::Forge(ForgeError::Serde(e)))?;
        Self::expect_success(self.call(Method::PATCH, &url, Some(payload)).await?).await?;
        Ok(())
    }

    pub async fn update_description(&self, id: &ChangeRequestId, body: &str) -> MrResult<()> {
        let url = format!("{}/repos/{}/pulls/{}", self.base_api, id.project, id.number);
        let payload = serde_json::to_vec(&serde_json::json!({ "body": body }))
            .map_err(|e| Error::Forge(ForgeError::Serde(e)))?;
        Self::expect_success(self.call(Method::PATCH, &url, Some(payload)).await?).await?;
        Ok(())
    }

    pub async fn create_line_comment(
        &self,
        id: &ChangeRequestId,
        refs: &DiffRefs,
        path: &str,
        side: ai_llm_service::LineSide,
        line: u32,
        body: &str,
    ) -> MrResult<()> {
        let url = format!(
            "{}/repos/{}/pulls/{}/comments",
            self.base_api, id.project, id.number
        );
        let side = match side {
            ai_llm_service::LineSide::New => "RIGHT",
            ai_llm_service::LineSide::Old => "LEFT",
        };
        let payload = serde_json::to_vec(&serde_json::json!({
            "body": body,
            "commit_id": refs.head_sha,
            "path": path,
            "line": line,
            "side": side,
        }))
        .map_err(|e| Error::Forge(ForgeError::Serde(e)))?;
        Self::expect_success(self.call(Method::POST, &url, Some(payload)).await?).await?;
        Ok(())
    }

    pub async fn create_check_run(
        &self,
        id: &ChangeRequestId,
        head_sha: &str,
        name: &str,
        conclusion: CheckConclusion,
        title: &str,
        summary: &str,
    ) -> MrResult<()> {
        let url = format!("{}/repos/{}/check-runs", self.base_api, id.project);
        let payload = serde_json::to_vec(&serde_json::json!({
            "name": name,
            "head_sha": head_sha,
            "status": "completed",
            "conclusion": conclusion,
            "output": { "title": title, "summary": summary },
        }))
        .map_err(|e| Error::Forge(ForgeError::Serde(e)))?;
        Self::expect_success(self.call(Method::POST, &url, Some(payload)).await?).await?;
        Ok(())
    }

    pub async fn add_labels(&self, id: &ChangeRequestId, labels: &[String]) -> MrResult<()> {
        let url = format!(
            "{}/repos/{}/issues/{}/labels",
            self.base_api, id.project, id.number
        );
        let payload = serde_json::to_vec(&serde_json::json!({ "labels": labels }))
            .map_err(|e| Error::Forge(ForgeError::Serde(e)))?;
        Self::expect_success(self.call(Method::POST, &url, Some(payload)).await?).await?;
        Ok(())
    }

    pub async fn list_ci_checks(
        &self,
        id: &ChangeRequestId,
        head_sha: &str,
    ) -> MrResult<Vec<CiCheck>> {
        let url = format!(
            "{}/repos/{}/commits/{}/check-runs?per_page={}",
            self.base_api, id.project, head_sha, PER_PAGE
        );
        let resp = Self::expect_success(self.call(Method::GET, &url, None).await?).await?;
        let out: CheckRunsResponse = resp.json().await.map_err(|e| Error::Forge(e.into()))?;
        Ok(out
            .check_runs
            .into_iter()
            .map(|c| CiCheck {
                name: c.name,
                status: c.status,
                conclusion: c.conclusion.unwrap_or_default(),
                details_url: c.details_url,
                summary: c.output.and_then(|o| o.summary),
            })
            .collect())
    }
}

/// Memo key for the truncation flag.
pub fn truncation_key(id: &ChangeRequestId, per_page: u32) -> String {
    format!("github:{}#{}:{}", id.project, id.number, per_page)
}

fn raw_change_from(f: PullFile) -> RawFileChange {
    let status = match f.status.as_str() {
        "added" => FileStatus::Added,
        "removed" => FileStatus::Removed,
        "renamed" => FileStatus::Renamed,
        _ => FileStatus::Modified,
    };
    RawFileChange {
        old_path: f.previous_filename.unwrap_or_else(|| f.filename.clone()),
        new_path: f.filename,
        status,
        additions: f.additions,
        deletions: f.deletions,
        patch: f.patch,
    }
}

/// Base64 content arrives with embedded newlines; anything else passes
/// through as UTF-8.
fn decode_content(content: &str, encoding: Option<&str>) -> MrResult<String> {
    if encoding == Some("base64") {
        use base64::Engine as _;
        let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(compact)
            .map_err(|e| Error::Forge(ForgeError::InvalidResponse(format!("bad base64: {e}"))))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    } else {
        Ok(content.to_string())
    }
}

/* --- Forge A response shapes (subset of fields we actually use) --- */

#[derive(Debug, Deserialize)]
struct PullResponse {
    title: String,
    body: Option<String>,
    state: String,
    #[serde(default)]
    draft: Option<bool>,
    user: Option<UserRef>,
    base: BranchRef,
    head: BranchRef,
}

#[derive(Debug, Deserialize)]
struct UserRef {
    login: String,
}

#[derive(Debug, Deserialize)]
struct BranchRef {
    r#ref: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PullFile {
    filename: String,
    #[serde(default)]
    previous_filename: Option<String>,
    status: String,
    additions: u32,
    deletions: u32,
    #[serde(default)]
    patch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompareResponse {
    #[serde(default)]
    files: Vec<PullFile>,
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    content: String,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IssueComment {
    id: u64,
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CheckRunsResponse {
    #[serde(default)]
    check_runs: Vec<CheckRun>,
}

#[derive(Debug, Deserialize)]
struct CheckRun {
    name: String,
    status: String,
    #[serde(default)]
    conclusion: Option<String>,
    #[serde(default)]
    details_url: Option<String>,
    #[serde(default)]
    output: Option<CheckOutput>,
}

#[derive(Debug, Deserialize)]
struct CheckOutput {
    #[serde(default)]
    summary: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_with_embedded_newlines_decodes() {
        // "hello world" split across lines the way the contents API does it.
        let content = "aGVsbG8g\nd29ybGQ=\n";
        assert_eq!(decode_content(content, Some("base64")).unwrap(), "hello world");
    }

    #[test]
    fn non_base64_content_passes_through() {
        assert_eq!(decode_content("plain text", None).unwrap(), "plain text");
    }

    #[test]
    fn file_status_mapping_keeps_previous_filename_for_renames() {
        let f = PullFile {
            filename: "new/name.rs".into(),
            previous_filename: Some("old/name.rs".into()),
            status: "renamed".into(),
            additions: 1,
            deletions: 2,
            patch: None,
        };
        let raw = raw_change_from(f);
        assert_eq!(raw.status, FileStatus::Renamed);
        assert_eq!(raw.old_path, "old/name.rs");
        assert_eq!(raw.new_path, "new/name.rs");
    }
}
