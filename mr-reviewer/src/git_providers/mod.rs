//! Forge facade w/o async-trait or dynamic trait objects.
//!
//! Two concrete clients behind an enum: forge A (pull requests, check runs,
//! review comments) and forge B (merge requests, discussions with position
//! objects). The orchestrator is written once against this surface.

pub mod types;
pub use types::*;

pub mod github;
pub mod gitlab;

use tracing::debug;

use crate::errors::{ConfigError, MrResult};
use crate::util::with_marker;

/// Pages scanned while looking for a managed comment before creating one.
pub const MAX_COMMENT_SCAN_PAGES: u32 = 3;

/// Runtime configuration for any forge client.
#[derive(Debug, Clone)]
pub struct ForgeConfig {
    pub platform: Platform,
    /// API base, e.g. "https://api.github.com" or "https://gitlab.example/api/v4".
    pub base_api: String,
    pub token: String,
}

impl ForgeConfig {
    /// Forge-A config from `GITHUB_API_URL` (default hosted) + `GITHUB_TOKEN`.
    pub fn github_from_env() -> MrResult<Self> {
        let base_api = std::env::var("GITHUB_API_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "https://api.github.com".to_string());
        let token = std::env::var("GITHUB_TOKEN")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::MissingEnv("GITHUB_TOKEN"))?;
        Ok(Self {
            platform: Platform::GitHub,
            base_api: base_api.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Forge-B config from `GITLAB_BASE_URL` + `GITLAB_TOKEN`.
    ///
    /// The base URL must be HTTPS unless `ALLOW_INSECURE_GITLAB_HTTP` is set;
    /// an http base without the override fails fast.
    pub fn gitlab_from_env(token_override: Option<String>) -> MrResult<Self> {
        let base = std::env::var("GITLAB_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "https://gitlab.com".to_string());
        let base = base.trim_end_matches('/').to_string();

        let allow_http = std::env::var("ALLOW_INSECURE_GITLAB_HTTP")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);
        if base.starts_with("http://") && !allow_http {
            return Err(ConfigError::InsecureBaseUrl(base).into());
        }

        let token = token_override
            .filter(|v| !v.trim().is_empty())
            .or_else(|| std::env::var("GITLAB_TOKEN").ok().filter(|v| !v.trim().is_empty()))
            .ok_or(ConfigError::MissingEnv("GITLAB_TOKEN"))?;

        let base_api = if base.ends_with("/api/v4") {
            base
        } else {
            format!("{base}/api/v4")
        };
        Ok(Self {
            platform: Platform::GitLab,
            base_api,
            token,
        })
    }
}

/// Concrete forge client (enum-dispatch).
#[derive(Debug, Clone)]
pub enum ForgeClient {
    GitHub(github::GitHubClient),
    GitLab(gitlab::GitLabClient),
}

impl ForgeClient {
    pub fn from_config(cfg: ForgeConfig) -> MrResult<Self> {
        Ok(match cfg.platform {
            Platform::GitHub => {
                Self::GitHub(github::GitHubClient::new(cfg.base_api, cfg.token)?)
            }
            Platform::GitLab => {
                Self::GitLab(gitlab::GitLabClient::new(cfg.base_api, cfg.token)?)
            }
        })
    }

    pub fn platform(&self) -> Platform {
        match self {
            Self::GitHub(_) => Platform::GitHub,
            Self::GitLab(_) => Platform::GitLab,
        }
    }

    /// Change-request metadata (title, body, branches, SHAs, draft flag).
    pub async fn get_meta(&self, id: &ChangeRequestId) -> MrResult<ChangeRequest> {
        match self {
            Self::GitHub(c) => c.get_meta(id).await,
            Self::GitLab(c) => c.get_meta(id).await,
        }
    }

    /// Full file listing with the forge's truncation flag.
    pub async fn list_files(&self, id: &ChangeRequestId) -> MrResult<ChangeListing> {
        match self {
            Self::GitHub(c) => c.list_files(id).await,
            Self::GitLab(c) => c.list_files(id).await,
        }
    }

    /// Files changed between two SHAs (incremental review).
    pub async fn compare(
        &self,
        id: &ChangeRequestId,
        base_sha: &str,
        head_sha: &str,
    ) -> MrResult<ChangeListing> {
        match self {
            Self::GitHub(c) => c.compare(id, base_sha, head_sha).await,
            Self::GitLab(c) => c.compare(id, base_sha, head_sha).await,
        }
    }

    /// Repository file content at a ref; `Ok(None)` on 404.
    pub async fn get_file_content(
        &self,
        id: &ChangeRequestId,
        path: &str,
        git_ref: &str,
    ) -> MrResult<Option<String>> {
        match self {
            Self::GitHub(c) => c.get_file_content(id, path, git_ref).await,
            Self::GitLab(c) => c.get_file_content(id, path, git_ref).await,
        }
    }

    /// Creates or updates a repository file on a branch (forge B only; forge
    /// A callers publish file-shaped output as comments instead).
    pub async fn write_file(
        &self,
        id: &ChangeRequestId,
        path: &str,
        branch: &str,
        content: &str,
        message: &str,
    ) -> MrResult<bool> {
        match self {
            Self::GitHub(_) => Ok(false),
            Self::GitLab(c) => {
                c.write_file(id, path, branch, content, message).await?;
                Ok(true)
            }
        }
    }

    /// One page of top-level comments/notes (`page` is 1-based, 100 per page).
    pub async fn list_comments(
        &self,
        id: &ChangeRequestId,
        page: u32,
    ) -> MrResult<Vec<ExistingComment>> {
        match self {
            Self::GitHub(c) => c.list_comments(id, page).await,
            Self::GitLab(c) => c.list_comments(id, page).await,
        }
    }

    pub async fn create_comment(&self, id: &ChangeRequestId, body: &str) -> MrResult<()> {
        match self {
            Self::GitHub(c) => c.create_comment(id, body).await,
            Self::GitLab(c) => c.create_comment(id, body).await,
        }
    }

    pub async fn update_comment(
        &self,
        id: &ChangeRequestId,
        comment_id: u64,
        body: &str,
    ) -> MrResult<()> {
        match self {
            Self::GitHub(c) => c.update_comment(id, comment_id, body).await,
            Self::GitLab(c) => c.update_comment(id, comment_id, body).await,
        }
    }

    /// Comment on an issue (not a change request). Forge A shares the issue
    /// comments API; forge B uses the issue notes endpoint.
    pub async fn create_issue_comment(&self, id: &ChangeRequestId, body: &str) -> MrResult<()> {
        match self {
            Self::GitHub(c) => c.create_comment(id, body).await,
            Self::GitLab(c) => c.create_issue_note(id, body).await,
        }
    }

    /// Replaces the change request's description body.
    pub async fn update_description(&self, id: &ChangeRequestId, body: &str) -> MrResult<()> {
        match self {
            Self::GitHub(c) => c.update_description(id, body).await,
            Self::GitLab(c) => c.update_description(id, body).await,
        }
    }

    /// Idempotent upsert by marker: scans a bounded number of comment pages
    /// for the marker, updates the first hit, creates otherwise.
    pub async fn upsert_managed_comment(
        &self,
        id: &ChangeRequestId,
        marker: &str,
        body: &str,
    ) -> MrResult<()> {
        let full = with_marker(body, marker);
        for page in 1..=MAX_COMMENT_SCAN_PAGES {
            let comments = self.list_comments(id, page).await?;
            if let Some(existing) = comments.iter().find(|c| c.body.contains(marker)) {
                debug!(marker, comment_id = existing.id, "managed comment update");
                return self.update_comment(id, existing.id, &full).await;
            }
            if comments.len() < 100 {
                break;
            }
        }
        debug!(marker, "managed comment create");
        self.create_comment(id, &full).await
    }

    /// Inline comment on a diff line, on the side the issue targets.
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
        match self {
            Self::GitHub(c) => {
                c.create_line_comment(id, refs, new_path, side, line, body)
                    .await
            }
            Self::GitLab(c) => {
                c.create_line_comment(id, refs, new_path, old_path, side, line, body)
                    .await
            }
        }
    }

    /// Publishes a check run (forge A) / commit status (forge B).
    pub async fn create_check_run(
        &self,
        id: &ChangeRequestId,
        head_sha: &str,
        name: &str,
        conclusion: CheckConclusion,
        title: &str,
        summary: &str,
    ) -> MrResult<()> {
        match self {
            Self::GitHub(c) => {
                c.create_check_run(id, head_sha, name, conclusion, title, summary)
                    .await
            }
            Self::GitLab(c) => c.create_commit_status(id, head_sha, name, conclusion).await,
        }
    }

    pub async fn add_labels(&self, id: &ChangeRequestId, labels: &[String]) -> MrResult<()> {
        if labels.is_empty() {
            return Ok(());
        }
        match self {
            Self::GitHub(c) => c.add_labels(id, labels).await,
            Self::GitLab(c) => c.add_labels(id, labels).await,
        }
    }

    /// CI digest for the head SHA (check runs on A, pipeline jobs on B).
    pub async fn list_ci_checks(
        &self,
        id: &ChangeRequestId,
        head_sha: &str,
    ) -> MrResult<Vec<CiCheck>> {
        match self {
            Self::GitHub(c) => c.list_ci_checks(id, head_sha).await,
            Self::GitLab(c) => c.list_ci_checks(id).await,
        }
    }
}
