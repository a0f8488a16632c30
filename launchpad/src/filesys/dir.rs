//! Directory handles used by the storage layout

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::errors::PlatformError;
use crate::filesys::file::File;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True only for an existing directory, not for a file at the same path
    pub async fn exists(&self) -> bool {
        matches!(fs::metadata(&self.path).await, Ok(meta) if meta.is_dir())
    }

    /// `mkdir -p`
    pub async fn create(&self) -> Result<(), PlatformError> {
        fs::create_dir_all(&self.path).await.map_err(|e| {
            PlatformError::StorageError(format!(
                "failed to create directory {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }

    pub fn subdir(&self, name: &str) -> Dir {
        Dir::new(self.path.join(name))
    }
}
