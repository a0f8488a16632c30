//! Application configuration options

use std::time::Duration;

use crate::logstream::TailOptions;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{DeploySettings, GitHubSettings, Settings};
use crate::workers::queue;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Enable local HTTP server
    pub enable_server: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// Deployment queue options
    pub queue: queue::Options,

    /// Deployment behaviour
    pub deploy: DeploySettings,

    /// GitHub API access
    pub github: GitHubSettings,

    /// Build log streaming
    pub tail: TailOptions,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            layout: StorageLayout::default(),
            enable_server: true,
            server: ServerOptions::default(),
            queue: queue::Options::default(),
            deploy: DeploySettings::default(),
            github: GitHubSettings::default(),
            tail: TailOptions::default(),
        }
    }
}

impl AppOptions {
    pub fn from_settings(layout: StorageLayout, settings: &Settings) -> Self {
        Self {
            layout,
            enable_server: settings.enable_server,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            queue: queue::Options {
                capacity: settings.queue.capacity,
                workers: settings.queue.workers,
            },
            deploy: settings.deploy.clone(),
            github: settings.github.clone(),
            ..Default::default()
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown, in-flight deployments included
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(60),
        }
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}
