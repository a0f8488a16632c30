//! Deployment job queue
//!
//! A bounded FIFO of deployment ids consumed by background workers. Admission
//! never blocks: a full or closed queue is reported to the caller at once.
//! Workers share one receiver, so jobs leave the buffer in the order they
//! entered it.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::deploy::cancel::CancellationRegistry;
use crate::deploy::executor::DeploymentExecutor;
use crate::deploy::fsm::DeploymentStatus;
use crate::deploy::lock::AppLocks;
use crate::errors::PlatformError;
use crate::models::application::AppStatus;
use crate::store::Store;

/// Queue options
#[derive(Debug, Clone)]
pub struct Options {
    /// Buffered jobs before `add_job` reports the queue as full
    pub capacity: usize,

    /// Number of background workers
    pub workers: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            capacity: 100,
            workers: 1,
        }
    }
}

/// Admission side of the queue
pub trait JobQueue: Send + Sync {
    /// Enqueue a persisted deployment without blocking
    fn add_job(&self, deployment_id: i64) -> Result<(), PlatformError>;
}

/// Bounded deployment queue with its workers
pub struct Queue {
    sender: Mutex<Option<mpsc::Sender<i64>>>,
    shutdown: CancellationToken,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Queue {
    /// Create the queue and spawn its workers
    pub fn start(options: &Options, runner: Arc<JobRunner>) -> Self {
        let (tx, rx) = mpsc::channel(options.capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(rx));
        let shutdown = CancellationToken::new();

        let worker_count = options.workers.max(1);
        info!(
            "Starting deployment queue (capacity {}, {} worker(s))",
            options.capacity.max(1),
            worker_count
        );

        let workers = (0..worker_count)
            .map(|worker_id| {
                let runner = runner.clone();
                let receiver = receiver.clone();
                let token = shutdown.clone();
                tokio::spawn(async move {
                    run(
                        worker_id,
                        runner.as_ref(),
                        receiver,
                        Box::pin(async move { token.cancelled().await }),
                    )
                    .await;
                })
            })
            .collect();

        Self {
            sender: Mutex::new(Some(tx)),
            shutdown,
            workers: tokio::sync::Mutex::new(workers),
        }
    }

    /// Stop accepting jobs, abandon buffered ones and wait for in-flight jobs
    pub async fn close(&self) {
        {
            let mut sender = self.sender.lock().unwrap_or_else(|e| e.into_inner());
            sender.take();
        }
        self.shutdown.cancel();

        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            if let Err(e) = handle.await {
                error!("Queue worker terminated abnormally: {}", e);
            }
        }
        info!("Deployment queue closed");
    }

    pub fn is_closed(&self) -> bool {
        let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        sender.is_none()
    }
}

impl JobQueue for Queue {
    fn add_job(&self, deployment_id: i64) -> Result<(), PlatformError> {
        let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        let Some(sender) = sender.as_ref() else {
            return Err(PlatformError::QueueClosed);
        };

        match sender.try_send(deployment_id) {
            Ok(()) => {
                debug!("Enqueued deployment {}", deployment_id);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Queue is full, rejecting deployment {}", deployment_id);
                Err(PlatformError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PlatformError::QueueClosed),
        }
    }
}

/// Worker loop: dequeue and run jobs until shutdown
pub async fn run(
    worker_id: usize,
    runner: &JobRunner,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<i64>>>,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    debug!("Queue worker {} starting...", worker_id);

    loop {
        let next = {
            let mut rx = receiver.lock().await;
            tokio::select! {
                biased;
                _ = &mut shutdown_signal => None,
                job = rx.recv() => job,
            }
        };

        let Some(deployment_id) = next else {
            debug!("Queue worker {} shutting down...", worker_id);
            return;
        };

        let outcome = runner.run_job(deployment_id).await;
        debug!("Worker {} finished deployment {}: {:?}", worker_id, deployment_id, outcome);
    }
}

// ================================ JOB RUNNER ================================= //

/// What happened to a dequeued job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The deployment was already terminal (typically stopped before start)
    Skipped(DeploymentStatus),

    /// Another deployment of the application holds the lock
    Rejected,

    /// The executor ran and left the deployment in this status
    Completed(DeploymentStatus),

    /// The executor panicked; the deployment was marked failed
    Panicked,

    /// The store failed; the deployment may not reflect the outcome
    Errored(String),
}

/// Applies the lock, registry and panic boundary around the executor
pub struct JobRunner {
    store: Arc<dyn Store>,
    executor: Arc<DeploymentExecutor>,
    locks: Arc<AppLocks>,
    registry: Arc<CancellationRegistry>,
}

impl JobRunner {
    pub fn new(
        store: Arc<dyn Store>,
        executor: Arc<DeploymentExecutor>,
        locks: Arc<AppLocks>,
        registry: Arc<CancellationRegistry>,
    ) -> Self {
        Self {
            store,
            executor,
            locks,
            registry,
        }
    }

    pub async fn run_job(&self, deployment_id: i64) -> JobOutcome {
        let deployment = match self.store.get_deployment(deployment_id).await {
            Ok(d) => d,
            Err(e) => {
                error!("Failed to load deployment {}: {}", deployment_id, e);
                return JobOutcome::Errored(e.to_string());
            }
        };

        if deployment.status == DeploymentStatus::Stopped {
            debug!("Deployment {} was stopped before it started, skipping", deployment_id);
            return JobOutcome::Skipped(deployment.status);
        }
        if deployment.status.is_terminal() {
            info!(
                "Deployment {} is already {}, skipping",
                deployment_id, deployment.status
            );
            return JobOutcome::Skipped(deployment.status);
        }

        let Some(_lock) = self.locks.try_lock(deployment.app_id) else {
            let err = PlatformError::AlreadyInProgress(deployment.app_id);
            warn!("Rejecting deployment {}: {}", deployment_id, err);
            if let Err(e) = self
                .store
                .finish_deployment(deployment_id, DeploymentStatus::Failed, Some(err.to_string()))
                .await
            {
                error!("Failed to record rejection of deployment {}: {}", deployment_id, e);
            }
            return JobOutcome::Rejected;
        };

        let token = CancellationToken::new();
        let _registration = self.registry.register(deployment_id, token.clone());

        let executor = self.executor.clone();
        let handle = tokio::spawn(async move { executor.execute(deployment_id, &token).await });

        match handle.await {
            Ok(Ok(finished)) => JobOutcome::Completed(finished.status),
            Ok(Err(e)) => {
                error!("Deployment {} aborted: {}", deployment_id, e);
                self.fail_after_fault(deployment_id, deployment.app_id, e.to_string())
                    .await;
                JobOutcome::Errored(e.to_string())
            }
            Err(join_err) if join_err.is_panic() => {
                let message = format!(
                    "deployment panicked: {}",
                    panic_message(join_err.into_panic())
                );
                error!("Deployment {}: {}", deployment_id, message);
                self.fail_after_fault(deployment_id, deployment.app_id, message)
                    .await;
                JobOutcome::Panicked
            }
            Err(join_err) => {
                let message = format!("deployment task was aborted: {}", join_err);
                self.fail_after_fault(deployment_id, deployment.app_id, message.clone())
                    .await;
                JobOutcome::Errored(message)
            }
        }
    }

    async fn fail_after_fault(&self, deployment_id: i64, app_id: i64, message: String) {
        match self.store.get_deployment(deployment_id).await {
            Ok(d) if d.status.is_terminal() => return,
            Ok(_) => {}
            Err(e) => {
                error!("Failed to reload deployment {}: {}", deployment_id, e);
                return;
            }
        }
        if let Err(e) = self
            .store
            .finish_deployment(deployment_id, DeploymentStatus::Failed, Some(message))
            .await
        {
            error!("Failed to mark deployment {} failed: {}", deployment_id, e);
        }
        if let Err(e) = self.store.set_application_status(app_id, AppStatus::Error).await {
            warn!("Failed to update status of app {}: {}", app_id, e);
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
