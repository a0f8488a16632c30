//! Settings file management

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::PlatformError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Platform settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON formatted logs on stdout
    #[serde(default)]
    pub json_logs: bool,

    /// Also write logs to daily rolling files in the data directory
    #[serde(default = "default_true")]
    pub log_to_file: bool,

    /// Enable local HTTP server
    #[serde(default = "default_true")]
    pub enable_server: bool,

    /// Local HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Deployment queue configuration
    #[serde(default)]
    pub queue: QueueSettings,

    /// Deployment behaviour
    #[serde(default)]
    pub deploy: DeploySettings,

    /// GitHub API access for commit lookups
    #[serde(default)]
    pub github: GitHubSettings,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            json_logs: false,
            log_to_file: true,
            enable_server: true,
            server: ServerSettings::default(),
            queue: QueueSettings::default(),
            deploy: DeploySettings::default(),
            github: GitHubSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings, falling back to defaults when the file does not exist
    pub async fn load(file: &File) -> Result<Self, PlatformError> {
        if !file.exists().await {
            info!(
                "No settings file at {}, using defaults",
                file.path().display()
            );
            return Ok(Self::default());
        }

        let settings: Settings = file.read_json().await?;
        if settings.queue.capacity == 0 {
            warn!("queue.capacity is 0, deployments will always be rejected");
        }
        Ok(settings)
    }
}

/// Local HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// Queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Maximum number of buffered jobs
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,

    /// Number of workers consuming the queue
    #[serde(default = "default_queue_workers")]
    pub workers: usize,
}

fn default_queue_capacity() -> usize {
    100
}

fn default_queue_workers() -> usize {
    1
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
            workers: default_queue_workers(),
        }
    }
}

/// Deployment settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploySettings {
    /// Docker network shared with the reverse proxy
    #[serde(default = "default_proxy_network")]
    pub proxy_network: String,

    /// Traefik certificate resolver used on HTTPS routers
    #[serde(default = "default_cert_resolver")]
    pub cert_resolver: String,

    #[serde(default = "default_http_entrypoint")]
    pub http_entrypoint: String,

    #[serde(default = "default_https_entrypoint")]
    pub https_entrypoint: String,

    /// Images kept per application after a successful deployment
    #[serde(default = "default_image_retention")]
    pub image_retention: usize,
}

fn default_proxy_network() -> String {
    "launchpad-proxy".to_string()
}

fn default_cert_resolver() -> String {
    "letsencrypt".to_string()
}

fn default_http_entrypoint() -> String {
    "web".to_string()
}

fn default_https_entrypoint() -> String {
    "websecure".to_string()
}

fn default_image_retention() -> usize {
    5
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            proxy_network: default_proxy_network(),
            cert_resolver: default_cert_resolver(),
            http_entrypoint: default_http_entrypoint(),
            https_entrypoint: default_https_entrypoint(),
            image_retention: default_image_retention(),
        }
    }
}

/// GitHub API settings
#[derive(Clone, Serialize, Deserialize)]
pub struct GitHubSettings {
    #[serde(default = "default_github_api")]
    pub api_base_url: String,

    /// Token used for private repositories
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
}

fn default_github_api() -> String {
    "https://api.github.com".to_string()
}

impl std::fmt::Debug for GitHubSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubSettings")
            .field("api_base_url", &self.api_base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Default for GitHubSettings {
    fn default() -> Self {
        Self {
            api_base_url: default_github_api(),
            token: None,
        }
    }
}
