//! Deployment models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::DeploymentStatus;

/// One attempt to ship a specific commit or image for one application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    /// Unique deployment ID
    pub id: i64,

    /// Owning application
    pub app_id: i64,

    /// Commit hash, or the resolved image tag for database applications
    pub commit_hash: String,

    #[serde(default)]
    pub commit_message: Option<String>,

    #[serde(default)]
    pub commit_author: Option<String>,

    /// Per-application sequence number, starting at 1
    pub deployment_number: i64,

    pub status: DeploymentStatus,

    /// Human readable sub-state, e.g. "cloning repository"
    #[serde(default)]
    pub stage: String,

    /// 0..=100
    #[serde(default)]
    pub progress: u8,

    #[serde(default)]
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,

    /// At most one deployment per application is active
    #[serde(default)]
    pub is_active: bool,

    /// The deployment this one rolls back to
    #[serde(default)]
    pub rollback_from: Option<i64>,
}

/// Longest commit reference accepted from callers
pub const MAX_COMMIT_REF_LEN: usize = 128;

fn is_ref_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')
}

/// Whether `value` can be used as a commit reference.
///
/// Only `[A-Za-z0-9._-]` is allowed, it must not start with `-` or `.`, and
/// it must not contain `..`.
pub fn is_valid_commit_ref(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_COMMIT_REF_LEN
        && value.chars().all(is_ref_char)
        && !value.starts_with(['-', '.'])
        && !value.contains("..")
}

impl Deployment {
    /// Tag used for the application image built by this deployment
    pub fn image_tag(&self) -> String {
        let tag: String = self.commit_hash.chars().filter(|c| is_ref_char(*c)).take(12).collect();
        if tag.is_empty() {
            "latest".to_string()
        } else {
            tag
        }
    }

    /// File name of the on-disk build log: `{commitHash}{deploymentID}_build_logs`
    ///
    /// Characters that could escape the log directory are dropped.
    pub fn build_log_name(&self) -> String {
        let commit: String = self
            .commit_hash
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
            .collect();
        format!("{}{}_build_logs", commit, self.id)
    }
}

/// Request to create a deployment row
#[derive(Debug, Clone, Default)]
pub struct NewDeployment {
    pub app_id: i64,
    pub commit_hash: String,
    pub commit_message: Option<String>,
    pub commit_author: Option<String>,
    pub rollback_from: Option<i64>,
}

/// Non-terminal progress update persisted before each stage starts
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub status: DeploymentStatus,
    pub stage: String,
    pub progress: u8,
}

impl ProgressUpdate {
    pub fn new(status: DeploymentStatus, stage: impl Into<String>, progress: u8) -> Self {
        Self {
            status,
            stage: stage.into(),
            progress,
        }
    }
}

/// Commit metadata returned by the source fetcher
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub url: String,
}
