//! Append-only build log of one deployment

use std::path::Path;

use chrono::Utc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use crate::errors::PlatformError;
use crate::filesys::file::File;

/// Writer for `{logDir}/{commitHash}{deploymentID}_build_logs`.
///
/// Write failures are logged and swallowed: a full disk must not turn a
/// healthy deployment into a failed one.
pub struct BuildLog {
    file: File,
    handle: Mutex<fs::File>,
}

impl BuildLog {
    /// Open the log for appending, creating it when missing
    pub async fn open(file: File) -> Result<Self, PlatformError> {
        let handle = file.open_append().await?;
        Ok(Self {
            file,
            handle: Mutex::new(handle),
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Append raw output of an external command
    pub async fn line(&self, line: &str) {
        let mut handle = self.handle.lock().await;
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line.trim_end_matches(['\r', '\n']));
        buf.push('\n');
        if let Err(e) = handle.write_all(buf.as_bytes()).await {
            warn!("Failed to write build log {}: {}", self.file.path().display(), e);
            return;
        }
        if let Err(e) = handle.flush().await {
            warn!("Failed to flush build log {}: {}", self.file.path().display(), e);
        }
    }

    /// Append a platform step marker
    pub async fn step(&self, message: &str) {
        self.line(&format!("==> [{}] {}", Utc::now().format("%H:%M:%S"), message))
            .await;
    }

    /// Append a platform error marker
    pub async fn error(&self, message: &str) {
        self.line(&format!("ERROR: {}", message)).await;
    }
}
