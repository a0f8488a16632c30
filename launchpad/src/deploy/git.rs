//! Source fetcher

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::deploy::buildlog::BuildLog;
use crate::deploy::process::{run_command, run_simple};
use crate::errors::PlatformError;
use crate::http::client::{redact_url, GitHubClient, GitHubRepo};
use crate::models::deployment::{is_valid_commit_ref, CommitInfo};

const CLONE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const QUERY_TIMEOUT: Duration = Duration::from_secs(60);

/// What to clone and where
#[derive(Debug, Clone)]
pub struct CloneRequest {
    pub url: String,
    pub branch: String,

    /// Pin the checkout to this commit instead of the branch head
    pub commit: Option<String>,

    /// Replaced if it exists
    pub dest: PathBuf,
}

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Shallow clone into `request.dest`, returning the checked out commit
    async fn clone_repository(
        &self,
        request: &CloneRequest,
        log: &BuildLog,
        token: &CancellationToken,
    ) -> Result<CommitInfo, PlatformError>;

    /// Head commit of a branch, without cloning
    async fn latest_commit(&self, repository: &str, branch: &str) -> Result<CommitInfo, PlatformError>;
}

/// [`SourceFetcher`] backed by the git CLI and the GitHub API
pub struct GitFetcher {
    github: GitHubClient,
}

impl GitFetcher {
    pub fn new(github: GitHubClient) -> Self {
        Self { github }
    }

    async fn reset_dest(dest: &Path) -> Result<(), PlatformError> {
        if tokio::fs::try_exists(dest).await? {
            debug!("Removing previous build context {}", dest.display());
            tokio::fs::remove_dir_all(dest).await?;
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl SourceFetcher for GitFetcher {
    async fn clone_repository(
        &self,
        request: &CloneRequest,
        log: &BuildLog,
        token: &CancellationToken,
    ) -> Result<CommitInfo, PlatformError> {
        if request.url.trim().is_empty() {
            return Err(PlatformError::ConfigError("git repository is not configured".to_string()));
        }
        if request.branch.trim().is_empty() {
            return Err(PlatformError::ConfigError("git branch is not configured".to_string()));
        }
        let pinned = request.commit.as_deref().filter(|c| !c.is_empty() && *c != "latest");
        if let Some(commit) = pinned.filter(|c| !is_valid_commit_ref(c)) {
            return Err(PlatformError::ConfigError(format!(
                "invalid commit reference: {:?}",
                commit
            )));
        }

        Self::reset_dest(&request.dest).await?;
        let dest = request.dest.display().to_string();
        info!("Cloning {} ({}) into {}", redact_url(&request.url), request.branch, dest);

        let mut clone = Command::new("git");
        clone
            .env("GIT_TERMINAL_PROMPT", "0")
            .args(["clone", "--depth", "1", "--single-branch", "--branch"])
            .arg(&request.branch)
            .arg(&request.url)
            .arg(&dest);
        run_command(clone, "git clone", CLONE_TIMEOUT, token, Some(log)).await?;

        let head = read_head(&request.dest, token).await?;

        if let Some(commit) = pinned {
            if !head.sha.starts_with(commit) {
                debug!("Checking out pinned commit {}", commit);
                let mut fetch = Command::new("git");
                fetch
                    .current_dir(&request.dest)
                    .env("GIT_TERMINAL_PROMPT", "0")
                    .args(["fetch", "--depth", "1", "origin", commit]);
                run_command(fetch, "git fetch", CLONE_TIMEOUT, token, Some(log)).await?;

                let mut checkout = Command::new("git");
                checkout
                    .current_dir(&request.dest)
                    .args(["checkout", "--detach", "FETCH_HEAD"]);
                run_command(checkout, "git checkout", QUERY_TIMEOUT, token, Some(log)).await?;

                return read_head(&request.dest, token).await;
            }
        }

        Ok(head)
    }

    async fn latest_commit(&self, repository: &str, branch: &str) -> Result<CommitInfo, PlatformError> {
        if let Some(repo) = GitHubRepo::parse(repository) {
            return self.github.latest_commit(&repo, branch).await;
        }

        let mut ls = Command::new("git");
        ls.env("GIT_TERMINAL_PROMPT", "0")
            .args(["ls-remote", repository])
            .arg(format!("refs/heads/{}", branch));
        let out = run_simple(ls, "git ls-remote", QUERY_TIMEOUT).await?;

        let sha = parse_ls_remote(out.stdout_trimmed()).ok_or_else(|| {
            PlatformError::NotFound(format!(
                "branch {} not found in {}",
                branch,
                redact_url(repository)
            ))
        })?;
        Ok(CommitInfo {
            sha,
            url: redact_url(repository),
            ..Default::default()
        })
    }
}

async fn read_head(dir: &Path, token: &CancellationToken) -> Result<CommitInfo, PlatformError> {
    let mut cmd = Command::new("git");
    cmd.current_dir(dir).args(["log", "-1", "--format=%H%n%an%n%s"]);
    let out = run_command(cmd, "git log", QUERY_TIMEOUT, token, None).await?;
    Ok(parse_log(&out.stdout))
}

fn parse_log(output: &str) -> CommitInfo {
    let mut lines = output.lines();
    CommitInfo {
        sha: lines.next().unwrap_or_default().trim().to_string(),
        author: lines.next().unwrap_or_default().trim().to_string(),
        message: lines.next().unwrap_or_default().trim().to_string(),
        url: String::new(),
    }
}

fn parse_ls_remote(output: &str) -> Option<String> {
    output
        .lines()
        .next()
        .and_then(|l| l.split_whitespace().next())
        .filter(|sha| !sha.is_empty())
        .map(str::to_string)
}
