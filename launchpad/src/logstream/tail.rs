//! Build-log tailer and container log follower

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::deploy::docker::ContainerRuntime;
use crate::filesys::file::File;
use crate::logstream::events::StreamEvent;
use crate::storage::layout::StorageLayout;
use crate::store::Store;

/// Tailer options
#[derive(Debug, Clone)]
pub struct TailOptions {
    /// Checks for the build log before giving up
    pub file_wait_attempts: u32,
    pub file_wait_interval: Duration,

    /// Interval between reads of new content
    pub poll_interval: Duration,

    /// Interval between status snapshots
    pub status_interval: Duration,
}

impl Default for TailOptions {
    fn default() -> Self {
        Self {
            file_wait_attempts: 10,
            file_wait_interval: Duration::from_millis(500),
            poll_interval: Duration::from_millis(500),
            status_interval: Duration::from_secs(2),
        }
    }
}

/// Stream the build log of a deployment until it reaches a terminal status
pub fn spawn_build_log_stream(
    store: Arc<dyn Store>,
    layout: StorageLayout,
    deployment_id: i64,
    options: TailOptions,
    token: CancellationToken,
) -> mpsc::Receiver<StreamEvent> {
    let (tx, rx) = mpsc::channel(256);
    tokio::spawn(async move {
        tail_build_log(store.as_ref(), &layout, deployment_id, &options, &tx, &token).await;
        debug!("Build log stream of deployment {} closed", deployment_id);
    });
    rx
}

/// Follow the live output of an application container
pub fn spawn_container_log_stream(
    runtime: Arc<dyn ContainerRuntime>,
    container: String,
    tail: usize,
    token: CancellationToken,
) -> mpsc::Receiver<StreamEvent> {
    let (tx, rx) = mpsc::channel(256);
    tokio::spawn(async move {
        let mut lines = match runtime.follow_container_logs(&container, tail, token.clone()).await {
            Ok(lines) => lines,
            Err(e) => {
                let _ = tx.send(StreamEvent::error(e.to_string())).await;
                return;
            }
        };

        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                line = lines.recv() => match line {
                    Some(line) => {
                        if tx.send(StreamEvent::log(line)).await.is_err() {
                            return;
                        }
                    }
                    None => return,
                },
            }
        }
    });
    rx
}

/// Emit events into `tx`; returns when the deployment is terminal, the
/// receiver is gone or the token fires
pub async fn tail_build_log(
    store: &dyn Store,
    layout: &StorageLayout,
    deployment_id: i64,
    options: &TailOptions,
    tx: &mpsc::Sender<StreamEvent>,
    token: &CancellationToken,
) {
    let mut deployment = match store.get_deployment(deployment_id).await {
        Ok(d) => d,
        Err(e) => {
            let _ = tx.send(StreamEvent::error(e.to_string())).await;
            return;
        }
    };
    let file = layout.build_log_file(&deployment);

    if !wait_for_file(&file, options, token).await {
        if token.is_cancelled() {
            return;
        }
        // refresh: the deployment may have failed before writing anything
        if let Ok(d) = store.get_deployment(deployment_id).await {
            deployment = d;
        }
        if deployment.status.is_terminal() {
            let _ = tx.send(StreamEvent::status(&deployment)).await;
            let _ = tx
                .send(StreamEvent::Done {
                    status: deployment.status,
                })
                .await;
        } else {
            let _ = tx
                .send(StreamEvent::error(format!(
                    "build log of deployment {} is not available",
                    deployment_id
                )))
                .await;
        }
        return;
    }

    if tx.send(StreamEvent::status(&deployment)).await.is_err() {
        return;
    }

    let mut reader = LineReader::default();
    let mut last_status = tokio::time::Instant::now();

    loop {
        let lines = match reader.read(&file).await {
            Ok(lines) => lines,
            Err(e) => {
                warn!("Failed to read build log {}: {}", file.path().display(), e);
                let _ = tx.send(StreamEvent::error(e.to_string())).await;
                return;
            }
        };
        for line in lines {
            if tx.send(StreamEvent::log(line)).await.is_err() {
                return;
            }
        }

        if last_status.elapsed() >= options.status_interval || deployment.status.is_terminal() {
            last_status = tokio::time::Instant::now();
            match store.get_deployment(deployment_id).await {
                Ok(d) => deployment = d,
                Err(e) => {
                    let _ = tx.send(StreamEvent::error(e.to_string())).await;
                    return;
                }
            }

            if deployment.status.is_terminal() {
                // drain what was written before the final status
                if let Ok(lines) = reader.read(&file).await {
                    for line in lines {
                        if tx.send(StreamEvent::log(line)).await.is_err() {
                            return;
                        }
                    }
                }
                if let Some(rest) = reader.flush() {
                    let _ = tx.send(StreamEvent::log(rest)).await;
                }
                let _ = tx.send(StreamEvent::status(&deployment)).await;
                let _ = tx
                    .send(StreamEvent::Done {
                        status: deployment.status,
                    })
                    .await;
                return;
            }

            if tx.send(StreamEvent::status(&deployment)).await.is_err() {
                return;
            }
        }

        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(options.poll_interval) => {}
        }
    }
}

async fn wait_for_file(file: &File, options: &TailOptions, token: &CancellationToken) -> bool {
    for attempt in 0..options.file_wait_attempts.max(1) {
        if file.exists().await {
            return true;
        }
        debug!(
            "Waiting for build log {} (attempt {})",
            file.path().display(),
            attempt + 1
        );
        tokio::select! {
            _ = token.cancelled() => return false,
            _ = tokio::time::sleep(options.file_wait_interval) => {}
        }
    }
    file.exists().await
}

/// Incremental reader that only yields complete lines
#[derive(Debug, Default)]
struct LineReader {
    offset: u64,
    partial: String,
}

impl LineReader {
    async fn read(&mut self, file: &File) -> Result<Vec<String>, crate::errors::PlatformError> {
        let (bytes, offset) = file.read_from(self.offset).await?;
        if offset < self.offset {
            // truncated and rewritten
            self.partial.clear();
        }
        self.offset = offset;
        self.partial.push_str(&String::from_utf8_lossy(&bytes));

        let mut lines = Vec::new();
        while let Some(pos) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=pos).collect();
            lines.push(line.trim_end_matches(['\r', '\n']).to_string());
        }
        Ok(lines)
    }

    fn flush(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.partial))
        }
    }
}
