//! HTTP client for git hosting provider APIs

use reqwest::{header, Client};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, error};
use url::Url;

use crate::errors::PlatformError;
use crate::models::deployment::CommitInfo;

const USER_AGENT: &str = concat!("launchpad/", env!("CARGO_PKG_VERSION"));

/// Client for the GitHub REST API
pub struct GitHubClient {
    client: Client,
    base_url: String,
    token: Option<SecretString>,
}

impl GitHubClient {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, PlatformError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()).map(SecretString::from),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, PlatformError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let mut request = self
            .client
            .get(&url)
            .header(header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.header(
                header::AUTHORIZATION,
                format!("Bearer {}", token.expose_secret()),
            );
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("HTTP GET failed: {} - {}", status, body);
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(PlatformError::NotFound(format!("{} ({})", path, status)));
            }
            return Err(PlatformError::CommandFailed(format!(
                "GitHub API request failed: {}: {}",
                status, body
            )));
        }

        let body = response.json().await?;
        Ok(body)
    }

    /// Head commit of a branch
    pub async fn latest_commit(
        &self,
        repo: &GitHubRepo,
        branch: &str,
    ) -> Result<CommitInfo, PlatformError> {
        let path = format!("/repos/{}/{}/commits/{}", repo.owner, repo.name, branch);
        let commit: CommitResponse = self.get(&path).await?;
        Ok(commit.into())
    }
}

/// `owner/name` of a github.com repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubRepo {
    pub owner: String,
    pub name: String,
}

impl GitHubRepo {
    /// Recognize `https://github.com/o/r(.git)`, `git@github.com:o/r.git`
    /// and bare `o/r`
    pub fn parse(repository: &str) -> Option<Self> {
        let repository = repository.trim();

        let path = if let Some(rest) = repository.strip_prefix("git@github.com:") {
            rest.to_string()
        } else if repository.contains("://") {
            let url = Url::parse(repository).ok()?;
            if url.host_str()? != "github.com" {
                return None;
            }
            url.path().trim_start_matches('/').to_string()
        } else {
            repository.to_string()
        };

        let mut parts = path.trim_end_matches('/').splitn(2, '/');
        let owner = parts.next()?.trim();
        let name = parts.next()?.trim().trim_end_matches(".git");
        if owner.is_empty() || name.is_empty() || name.contains('/') || owner.contains(':') {
            return None;
        }
        Some(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    pub fn clone_url(&self) -> String {
        format!("https://github.com/{}/{}.git", self.owner, self.name)
    }
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    sha: String,
    #[serde(default)]
    html_url: String,
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    #[serde(default)]
    message: String,
    author: Option<CommitAuthor>,
}

#[derive(Debug, Deserialize)]
struct CommitAuthor {
    #[serde(default)]
    name: String,
}

impl From<CommitResponse> for CommitInfo {
    fn from(c: CommitResponse) -> Self {
        CommitInfo {
            sha: c.sha,
            message: c.commit.message.lines().next().unwrap_or_default().to_string(),
            author: c.commit.author.map(|a| a.name).unwrap_or_default(),
            url: c.html_url,
        }
    }
}

/// Strip credentials from a remote URL before it is logged
pub fn redact_url(remote: &str) -> String {
    match Url::parse(remote) {
        Ok(mut url) if !url.username().is_empty() || url.password().is_some() => {
            let _ = url.set_username("");
            let _ = url.set_password(None);
            url.to_string()
        }
        _ => remote.to_string(),
    }
}
