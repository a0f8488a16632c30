//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::PlatformError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::deployment::Deployment;

/// Environment variable overriding the default data directory
pub const DATA_DIR_ENV: &str = "LAUNCHPAD_DATA_DIR";

/// Storage layout for the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Persisted state (applications, deployments, update logs)
    pub fn state_file(&self) -> File {
        File::new(self.base_dir.join("state.json"))
    }

    /// Directory of per-deployment build logs
    pub fn build_logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs").join("builds"))
    }

    /// Directory for the platform's own log files
    pub fn service_logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs").join("service"))
    }

    /// Root of all application build contexts
    pub fn build_contexts_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("builds"))
    }

    /// Build context (clone target) of one application
    pub fn build_context(&self, app_id: i64) -> Dir {
        self.build_contexts_dir().subdir(&format!("app-{}", app_id))
    }

    /// Build log file of one deployment: `{logDir}/{commitHash}{deploymentID}_build_logs`
    pub fn build_log_file(&self, deployment: &Deployment) -> File {
        self.build_logs_dir().file(&deployment.build_log_name())
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), PlatformError> {
        Dir::new(&self.base_dir).create().await?;
        self.build_logs_dir().create().await?;
        self.service_logs_dir().create().await?;
        self.build_contexts_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        let base_dir = std::env::var_os(DATA_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/var/lib/launchpad"));
        Self::new(base_dir)
    }
}
