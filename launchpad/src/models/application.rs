//! Application models (owned by external collaborators, read by the core)

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppType {
    /// HTTP application routed through the reverse proxy
    #[default]
    Web,

    /// Background service without routing
    Service,

    /// Prebuilt image from a service template
    Database,

    /// Multi-service docker compose stack
    Compose,
}

/// Runtime status of an application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    #[default]
    Stopped,
    Running,
    Error,
    Building,
    Deploying,
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AppStatus::Stopped => "stopped",
            AppStatus::Running => "running",
            AppStatus::Error => "error",
            AppStatus::Building => "building",
            AppStatus::Deploying => "deploying",
        };
        f.write_str(s)
    }
}

/// An application registered on the platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: i64,
    pub project_id: i64,
    pub name: String,

    #[serde(default)]
    pub app_type: AppType,

    /// Service template name for database applications
    #[serde(default)]
    pub template_name: Option<String>,

    #[serde(default)]
    pub git_repository: Option<String>,

    #[serde(default)]
    pub git_branch: Option<String>,

    /// Authenticated clone URL, preferred over `git_repository` when set
    #[serde(default)]
    pub git_clone_url: Option<String>,

    /// Subdirectory of the repository used as build context
    #[serde(default)]
    pub root_directory: Option<String>,

    #[serde(default)]
    pub dockerfile_path: Option<String>,

    /// Internal container port, kept as text the way users enter it
    #[serde(default)]
    pub port: String,

    #[serde(default)]
    pub domains: Vec<String>,

    /// Volume bindings in `host:container[:ro]` form
    #[serde(default)]
    pub volumes: Vec<String>,

    #[serde(default)]
    pub should_expose: bool,

    /// Host port override, optionally `ip:port`
    #[serde(default)]
    pub expose_port: Option<String>,

    #[serde(default)]
    pub cpu_limit: Option<String>,

    #[serde(default)]
    pub memory_limit: Option<String>,

    #[serde(default)]
    pub restart_policy: Option<String>,

    #[serde(default)]
    pub status: AppStatus,
}

impl Application {
    /// Create a web application with defaults for the optional fields
    pub fn new(id: i64, project_id: i64, name: impl Into<String>, app_type: AppType) -> Self {
        Self {
            id,
            project_id,
            name: name.into(),
            app_type,
            template_name: None,
            git_repository: None,
            git_branch: None,
            git_clone_url: None,
            root_directory: None,
            dockerfile_path: None,
            port: String::new(),
            domains: Vec::new(),
            volumes: Vec::new(),
            should_expose: false,
            expose_port: None,
            cpu_limit: None,
            memory_limit: None,
            restart_policy: None,
            status: AppStatus::Stopped,
        }
    }

    /// Stable container name, derivable without a lookup
    pub fn container_name(&self) -> String {
        container_name(self.id)
    }

    /// Image repository for images built for this application
    pub fn image_repository(&self) -> String {
        image_repository(self.id)
    }

    /// URL used to clone the repository
    pub fn clone_url(&self) -> Option<&str> {
        self.git_clone_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .or(self.git_repository.as_deref().filter(|u| !u.is_empty()))
    }
}

pub fn container_name(app_id: i64) -> String {
    format!("app-{}", app_id)
}

pub fn image_repository(app_id: i64) -> String {
    format!("app-{}", app_id)
}

/// A stored environment variable row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub app_id: i64,
    pub key: String,
    pub value: String,

    #[serde(default)]
    pub is_buildtime: bool,

    #[serde(default)]
    pub is_runtime: bool,
}

impl EnvVar {
    pub fn new(app_id: i64, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            app_id,
            key: key.into(),
            value: value.into(),
            is_buildtime: false,
            is_runtime: false,
        }
    }

    pub fn buildtime(mut self) -> Self {
        self.is_buildtime = true;
        self
    }

    pub fn runtime(mut self) -> Self {
        self.is_runtime = true;
        self
    }
}
