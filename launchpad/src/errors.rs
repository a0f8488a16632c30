//! Error types for the Launchpad orchestrator

use thiserror::Error;

/// Main error type for Launchpad
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    // Admission errors: rejected before any work starts
    #[error("queue is full")]
    QueueFull,

    #[error("queue is closed")]
    QueueClosed,

    #[error("deployment already in progress for app {0}")]
    AlreadyInProgress(i64),

    // Configuration errors: terminal for the deployment
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    // External call errors
    #[error("{0} timed out after {1:?}")]
    Timeout(String, std::time::Duration),

    #[error("{0} was canceled")]
    Canceled(String),

    #[error("{0}")]
    CommandFailed(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlatformError {
    /// Whether this error came from the deployment's cancellation token firing
    pub fn is_canceled(&self) -> bool {
        matches!(self, PlatformError::Canceled(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, PlatformError::Timeout(..))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PlatformError::NotFound(_))
    }
}
