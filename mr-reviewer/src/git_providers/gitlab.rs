//! Forge B (REST v4) client: merge-request metadata, diffs with diff refs,
//! discussions (positioned line notes), notes, labels, file read/write,
//! commit statuses, pipeline jobs.
//!
//! Endpoints used:
//! - GET  /projects/:id/merge_requests/:iid
//! - GET  /projects/:id/merge_requests/:iid/diffs
//! - GET  /projects/:id/repository/compare?from=&to=
//! - GET/PUT/POST /projects/:id/repository/files/:path
//! - GET/POST /projects/:id/merge_requests/:iid/notes
//! - POST /projects/:id/merge_requests/:iid/discussions
//! - PUT  /projects/:id/merge_requests/:iid   (add_labels)
//! - POST /projects/:id/statuses/:sha
//! - GET  /projects/:id/merge_requests/:iid/pipelines + /pipelines/:pid/jobs

use reqwest::Method;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tracing::debug;

use crate::errors::{Error, ForgeError, MrResult, forge_status_error};
use crate::git_providers::types::*;

/// Page size for listing calls.
pub const PER_PAGE: u32 = 100;
/// Diff listing page wall.
pub const MAX_DIFF_PAGES: u32 = 20;

#[derive(Debug, Clone)]
pub struct GitLabClient {
    http: http_client::HttpClient,
    base_api: String,
    token: String,
}

impl GitLabClient {
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
        h.insert(ACCEPT, HeaderValue::from_static("application/json"));
        h.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        h.insert(
            "PRIVATE-TOKEN",
            HeaderValue::from_str(&self.token)
                .map_err(|e| Error::Validation(format!("bad token: {e}")))?,
        );
        Ok(h)
    }

    fn project_path(&self, id: &ChangeRequestId) -> String {
        urlencoding::encode(&id.project).into_owned()
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
        let url = format!(
            "{}/projects/{}/merge_requests/{}",
            self.base_api,
            self.project_path(id),
            id.number
        );
        let resp = Self::expect_success(self.call(Method::GET, &url, None).await?).await?;
        let mr: MrResponse = resp.json().await.map_err(|e| Error::Forge(e.into()))?;

        Ok(ChangeRequest {
            platform: Platform::GitLab,
            id: id.clone(),
            title: mr.title,
            body: mr.description.unwrap_or_default(),
            author: mr.author.map(|a| a.username).unwrap_or_default(),
            source_branch: mr.source_branch,
            target_branch: mr.target_branch,
            diff_refs: DiffRefs {
                base_sha: mr.diff_refs.base_sha,
                start_sha: Some(mr.diff_refs.start_sha),
                head_sha: mr.diff_refs.head_sha,
            },
            draft: mr.draft.unwrap_or(false),
            state: mr.state,
        })
    }

    pub async fn list_files(&self, id: &ChangeRequestId) -> MrResult<ChangeListing> {
        let mut files = Vec::new();
        let mut truncated = false;

        for page in 1..=MAX_DIFF_PAGES {
            let url = format!(
                "{}/projects/{}/merge_requests/{}/diffs?per_page={}&page={}",
                self.base_api,
                self.project_path(id),
                id.number,
                PER_PAGE,
                page
            );
            let resp = Self::expect_success(self.call(Method::GET, &url, None).await?).await?;
            let batch: Vec<MrDiffFile> = resp.json().await.map_err(|e| Error::Forge(e.into()))?;
            let batch_len = batch.len();

            for f in &batch {
                if f.too_large.unwrap_or(false) {
                    truncated = true;
                }
            }
            files.extend(batch.into_iter().map(raw_change_from));

            if batch_len < PER_PAGE as usize {
                break;
            }
            if page == MAX_DIFF_PAGES {
                truncated = true;
            }
        }

        debug!(project = %id.project, number = id.number, files = files.len(), truncated, "diffs listed");
        Ok(ChangeListing { files, truncated })
    }

    pub async fn compare(
        &self,
        id: &ChangeRequestId,
        base_sha: &str,
        head_sha: &str,
    ) -> MrResult<ChangeListing> {
        let url = format!(
            "{}/projects/{}/repository/compare?from={}&to={}",
            self.base_api,
            self.project_path(id),
            urlencoding::encode(base_sha),
            urlencoding::encode(head_sha)
        );
        let resp = Self::expect_success(self.call(Method::GET, &url, None).await?).await?;
        let cmp: CompareResponse = resp.json().await.map_err(|e| Error::Forge(e.into()))?;
        Ok(ChangeListing {
            files: cmp.diffs.into_iter().map(raw_change_from).collect(),
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
            "{}/projects/{}/repository/files/{}?ref={}",
            self.base_api,
            self.project_path(id),
            urlencoding::encode(path),
            urlencoding::encode(git_ref)
        );
        let resp = self.call(Method::GET, &url, None).await?;
        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        let resp = Self::expect_success(resp).await?;
        let file: FileResponse = resp.json().await.map_err(|e| Error::Forge(e.into()))?;
        Ok(Some(decode_base64_content(&file.content)?))
    }

    /// Updates the file if it exists at the branch tip, creates it otherwise.
    pub async fn write_file(
        &self,
        id: &ChangeRequestId,
        path: &str,
        branch: &str,
        content: &str,
        message: &str,
    ) -> MrResult<()> {
        let url = format!(
            "{}/projects/{}/repository/files/{}",
            self.base_api,
            self.project_path(id),
            urlencoding::encode(path)
        );
        let payload = serde_json::to_vec(&serde_json::json!({
            "branch": branch,
            "content": content,
            "commit_message": message,
        }))
        .map_err(|e| Error::Forge(ForgeError::Serde(e)))?;

        let exists = self.get_file_content(id, path, branch).await?.is_some();
        let method = if exists { Method::PUT } else { Method::POST };
        Self::expect_success(self.call(method, &url, Some(payload)).await?).await?;
        Ok(())
    }

    pub async fn list_comments(
        &self,
        id: &ChangeRequestId,
        page: u32,
    ) -> MrResult<Vec<ExistingComment>> {
        let url = format!(
            "{}/projects/{}/merge_requests/{}/notes?per_page={}&page={}",
            self.base_api,
            self.project_path(id),
            id.number,
            PER_PAGE,
            page
        );
        let resp = Self::expect_success(self.call(Method::GET, &url, None).await?).await?;
        let raw: Vec<Note> = resp.json().await.map_err(|e| Error::Forge(e.into()))?;
        Ok(raw
            .into_iter()
            .map(|n| ExistingComment {
                id: n.id,
                body: n.body.unwrap_or_default(),
            })
            .collect())
    }

    pub async fn create_comment(&self, id: &ChangeRequestId, body: &str) -> MrResult<()> {
        let url = format!(
            "{}/projects/{}/merge_requests/{}/notes",
            self.base_api,
            self.project_path(id),
            id.number
        );
        let payload = serde_json::to_vec(&serde_json::json!({ "body": body }))
            .map_err(|e| Error::Forge(ForgeError::Serde(e)))?;
        Self::expect_success(self.call(Method::POST, &url, Some(payload)).await?).await?;
        Ok(())
    }

    pub async fn update_comment(
        &self,
        id: &ChangeRequestId,
        note_id: u64,
        body: &str,
    ) -> MrResult<()> {
        let url = format!(
            "{}/projects/{}/merge_requests/{}/notes/{}",
            self.base_api,
            self.project_path(id),
            id.number,
            note_id
        );
        let payload = serde_json::to_vec(&serde_json::json!({ "body": body }))
            .map_err(|e| Error::Forge(ForgeError::Serde(e)))?;
        Self::expect_success(self.call(Method::PUT, &url, Some(payload)).await?).await?;
        Ok(())
    }

    /// Note on an issue (the policy reminder path; MRs use [`Self::create_comment`]).
    pub async fn create_issue_note(&self, id: &ChangeRequestId, body: &str) -> MrResult<()> {
        let url = format!(
            "{}/projects/{}/issues/{}/notes",
            self.base_api,
            self.project_path(id),
            id.number
        );
        let payload = serde_json::to_vec(&serde_json::json!({ "body": body }))
            .map_err(|e| Error::Forge(ForgeError::Serde(e)))?;
        Self::expect_success(self.call(Method::POST, &url, Some(payload)).await?).await?;
        Ok(())
    }

    pub async fn update_description(&self, id: &ChangeRequestId, body: &str) -> MrResult<()> {
        let url = format!(
            "{}/projects/{}/merge_requests/{}",
            self.base_api,
            self.project_path(id),
            id.number
        );
        let payload = serde_json::to_vec(&serde_json::json!({ "description": body }))
            .map_err(|e| Error::Forge(ForgeError::Serde(e)))?;
        Self::expect_success(self.call(Method::PUT, &url, Some(payload)).await?).await?;
        Ok(())
    }

    /// Inline discussion. The position object carries all three SHAs, both
    /// paths, and exactly one of `new_line`/`old_line` matching the side.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_line_comment(
        &self,
        id: &ChangeRequestId,
        refs: &DiffRefs,
        new_path: &str,
        old_path: &str,
        side: ai_llm_service::LineSide,
        line: u32,
        body: &str,
    ) -> MrResult<()> {
        let url = format!(
            "{}/projects/{}/merge_requests/{}/discussions",
            self.base_api,
            self.project_path(id),
            id.number
        );

        let mut position = serde_json::json!({
            "position_type": "text",
            "base_sha": refs.base_sha,
            "head_sha": refs.head_sha,
            "start_sha": refs.start_sha.clone().unwrap_or_else(|| refs.base_sha.clone()),
            "new_path": new_path,
            "old_path": old_path,
        });
        match side {
            ai_llm_service::LineSide::New => position["new_line"] = serde_json::json!(line),
            ai_llm_service::LineSide::Old => position["old_line"] = serde_json::json!(line),
        }

        let payload = serde_json::to_vec(&serde_json::json!({
            "body": body,
            "position": position,
        }))
        .map_err(|e| Error::Forge(ForgeError::Serde(e)))?;
        Self::expect_success(self.call(Method::POST, &url, Some(payload)).await?).await?;
        Ok(())
    }

    pub async fn create_commit_status(
        &self,
        id: &ChangeRequestId,
        head_sha: &str,
        name: &str,
        conclusion: CheckConclusion,
    ) -> MrResult<()> {
        let url = format!(
            "{}/projects/{}/statuses/{}",
            self.base_api,
            self.project_path(id),
            head_sha
        );
        let state = match conclusion {
            CheckConclusion::Success | CheckConclusion::Neutral => "success",
            CheckConclusion::Failure => "failed",
        };
        let payload = serde_json::to_vec(&serde_json::json!({
            "state": state,
            "name": name,
        }))
        .map_err(|e| Error::Forge(ForgeError::Serde(e)))?;
        Self::expect_success(self.call(Method::POST, &url, Some(payload)).await?).await?;
        Ok(())
    }

    pub async fn add_labels(&self, id: &ChangeRequestId, labels: &[String]) -> MrResult<()> {
        let url = format!(
            "{}/projects/{}/merge_requests/{}",
            self.base_api,
            self.project_path(id),
            id.number
        );
        let payload = serde_json::to_vec(&serde_json::json!({
            "add_labels": labels.join(","),
        }))
        .map_err(|e| Error::Forge(ForgeError::Serde(e)))?;
        Self::expect_success(self.call(Method::PUT, &url, Some(payload)).await?).await?;
        Ok(())
    }

    /// Jobs of the latest MR pipeline, rendered as a CI digest.
    pub async fn list_ci_checks(&self, id: &ChangeRequestId) -> MrResult<Vec<CiCheck>> {
        let url = format!(
            "{}/projects/{}/merge_requests/{}/pipelines?per_page=1",
            self.base_api,
            self.project_path(id),
            id.number
        );
        let resp = Self::expect_success(self.call(Method::GET, &url, None).await?).await?;
        let pipelines: Vec<Pipeline> = resp.json().await.map_err(|e| Error::Forge(e.into()))?;
        let Some(latest) = pipelines.into_iter().next() else {
            return Ok(Vec::new());
        };

        let url = format!(
            "{}/projects/{}/pipelines/{}/jobs?per_page={}",
            self.base_api,
            self.project_path(id),
            latest.id,
            PER_PAGE
        );
        let resp = Self::expect_success(self.call(Method::GET, &url, None).await?).await?;
        let jobs: Vec<Job> = resp.json().await.map_err(|e| Error::Forge(e.into()))?;
        Ok(jobs
            .into_iter()
            .map(|j| CiCheck {
                name: j.name,
                status: j.status.clone(),
                conclusion: j.status,
                details_url: j.web_url,
                summary: None,
            })
            .collect())
    }
}

fn raw_change_from(f: MrDiffFile) -> RawFileChange {
    let status = if f.new_file {
        FileStatus::Added
    } else if f.deleted_file {
        FileStatus::Removed
    } else if f.renamed_file {
        FileStatus::Renamed
    } else {
        FileStatus::Modified
    };
    let (additions, deletions) = f
        .diff
        .as_deref()
        .map(count_diff_lines)
        .unwrap_or((0, 0));
    RawFileChange {
        old_path: f.old_path,
        new_path: f.new_path,
        status,
        additions,
        deletions,
        patch: f.diff,
    }
}

/// The diffs API carries no per-file counters; derive them from the patch.
fn count_diff_lines(patch: &str) -> (u32, u32) {
    let mut additions = 0;
    let mut deletions = 0;
    for line in patch.lines() {
        if line.starts_with("+++") || line.starts_with("---") {
            continue;
        }
        if line.starts_with('+') {
            additions += 1;
        } else if line.starts_with('-') {
            deletions += 1;
        }
    }
    (additions, deletions)
}

/// Base64 with embedded newlines, as the repository-files API returns it.
fn decode_base64_content(content: &str) -> MrResult<String> {
    use base64::Engine as _;
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| Error::Forge(ForgeError::InvalidResponse(format!("bad base64: {e}"))))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/* --- Forge B response shapes (subset of fields we actually use) --- */

#[derive(Debug, Deserialize)]
struct MrResponse {
    title: String,
    description: Option<String>,
    state: String,
    source_branch: String,
    target_branch: String,
    #[serde(default)]
    draft: Option<bool>,
    diff_refs: MrDiffRefs,
    author: Option<UserRef>,
}

#[derive(Debug, Deserialize)]
struct MrDiffRefs {
    base_sha: String,
    head_sha: String,
    start_sha: String,
}

#[derive(Debug, Deserialize)]
struct UserRef {
    username: String,
}

#[derive(Debug, Deserialize)]
struct MrDiffFile {
    old_path: String,
    new_path: String,
    new_file: bool,
    renamed_file: bool,
    deleted_file: bool,
    #[serde(default)]
    too_large: Option<bool>,
    #[serde(default)]
    diff: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompareResponse {
    #[serde(default)]
    diffs: Vec<MrDiffFile>,
}

#[derive(Debug, Deserialize)]
struct FileResponse {
    content: String,
}

#[derive(Debug, Deserialize)]
struct Note {
    id: u64,
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Pipeline {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct Job {
    name: String,
    status: String,
    #[serde(default)]
    web_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_line_counting_skips_file_headers() {
        let patch = "--- a/x\n+++ b/x\n@@ -1,2 +1,3 @@\n context\n+one\n+two\n-gone";
        assert_eq!(count_diff_lines(patch), (2, 1));
    }

    #[test]
    fn status_mapping_prefers_new_over_renamed() {
        let f = MrDiffFile {
            old_path: "a".into(),
            new_path: "a".into(),
            new_file: true,
            renamed_file: true,
            deleted_file: false,
            too_large: None,
            diff: None,
        };
        assert_eq!(raw_change_from(f).status, FileStatus::Added);
    }

    #[test]
    fn base64_content_with_newlines_decodes() {
        assert_eq!(
            decode_base64_content("aGVsbG8g\nd29ybGQ=").unwrap(),
            "hello world"
        );
    }
}
