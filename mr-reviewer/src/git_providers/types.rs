//! Forge-agnostic data model for change requests and diffs.
//!
//! These types are the normalized output of the fetch stage and the input of
//! prompt building and publication.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Supported forges. A is the pull-request-shaped platform, B the
/// merge-request-shaped one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Platform {
    GitHub,
    GitLab,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::GitHub => "github",
            Platform::GitLab => "gitlab",
        }
    }
}

/// A unique reference to a change request inside a forge.
///
/// * `project` – forge A: "owner/repo"; forge B: numeric ID or "group/project".
/// * `number`  – PR number / MR IID.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChangeRequestId {
    pub project: String,
    pub number: u64,
}

impl ChangeRequestId {
    pub fn new(project: impl Into<String>, number: u64) -> Self {
        Self {
            project: project.into(),
            number,
        }
    }
}

/// SHAs binding inline comments to a concrete diff version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiffRefs {
    pub base_sha: String,
    /// Forge B exposes a start SHA distinct from base; A does not.
    pub start_sha: Option<String>,
    pub head_sha: String,
}

/// Change-request metadata needed by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub platform: Platform,
    pub id: ChangeRequestId,
    pub title: String,
    pub body: String,
    pub author: String,
    pub source_branch: String,
    pub target_branch: String,
    pub diff_refs: DiffRefs,
    pub draft: bool,
    pub state: String,
}

/// Change status of one file in the diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Added,
    Modified,
    Removed,
    Renamed,
}

/// One changed file with its parsed patch.
///
/// Invariant: every key of `new_lines_by_number` refers to a line that
/// appears unchanged or added in `patch`; `old_lines_by_number` likewise for
/// unchanged or removed lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffFile {
    pub new_path: String,
    pub old_path: String,
    pub status: FileStatus,
    pub additions: u32,
    pub deletions: u32,
    /// Raw unified patch as the forge returned it (possibly truncated by the
    /// per-file cap).
    pub patch: String,
    /// Patch re-rendered with `(old,new)` line-number gutters.
    pub extended_diff: String,
    pub old_lines_by_number: BTreeMap<u32, String>,
    pub new_lines_by_number: BTreeMap<u32, String>,
}

/// CI check digest attached to the prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiCheck {
    pub name: String,
    pub status: String,
    pub conclusion: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Repository process guideline (templates, contribution docs).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessGuideline {
    pub path: String,
    pub content: String,
}

/// Everything the prompt builder needs for one review run.
#[derive(Debug, Clone)]
pub struct ReviewInput {
    pub platform: Platform,
    pub id: ChangeRequestId,
    pub title: String,
    pub body: String,
    pub author: String,
    pub source_branch: String,
    pub target_branch: String,
    pub total_additions: u32,
    pub total_deletions: u32,
    pub files: Vec<DiffFile>,
    pub custom_rules: Vec<String>,
    pub feedback_signals: Vec<String>,
    pub ci_checks: Vec<CiCheck>,
    pub process_guidelines: Vec<ProcessGuideline>,
}

/// A file-level change as the forge reports it, before parsing and caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFileChange {
    pub old_path: String,
    pub new_path: String,
    pub status: FileStatus,
    pub additions: u32,
    pub deletions: u32,
    /// Unified patch; `None` for binary or oversized files.
    pub patch: Option<String>,
}

/// A change listing plus whether the forge truncated it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeListing {
    pub files: Vec<RawFileChange>,
    pub truncated: bool,
}

/// An existing comment on the target, as listed by the forge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExistingComment {
    pub id: u64,
    pub body: String,
}

/// Check run conclusion published back to forge A.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckConclusion {
    Success,
    Neutral,
    Failure,
}
