//! Application state management

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::app::options::AppOptions;
use crate::deploy::cancel::CancellationRegistry;
use crate::deploy::compose::ComposeDriver;
use crate::deploy::control::DeploymentControl;
use crate::deploy::docker::ContainerRuntime;
use crate::deploy::executor::{DeploymentExecutor, ExecutorContext};
use crate::deploy::git::SourceFetcher;
use crate::deploy::lifecycle::AppLifecycle;
use crate::deploy::lock::AppLocks;
use crate::server::state::ServerState;
use crate::store::Store;
use crate::workers::queue::{JobRunner, Queue};

/// External collaborators of the pipeline
#[derive(Clone)]
pub struct Drivers {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub compose: Arc<dyn ComposeDriver>,
    pub fetcher: Arc<dyn SourceFetcher>,
}

/// Main application state
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub drivers: Drivers,

    /// Rebuilt empty on every start
    pub locks: Arc<AppLocks>,
    pub registry: Arc<CancellationRegistry>,

    pub queue: Arc<Queue>,
    pub control: DeploymentControl,
    pub lifecycle: AppLifecycle,

    /// Ends open log streams on shutdown
    pub streams_shutdown: CancellationToken,
}

impl AppState {
    /// Wire the pipeline and start the queue workers
    pub fn init(options: &AppOptions, store: Arc<dyn Store>, drivers: Drivers) -> Self {
        info!("Initializing application state...");

        let locks = Arc::new(AppLocks::new());
        let registry = Arc::new(CancellationRegistry::new());

        let executor = Arc::new(DeploymentExecutor::new(ExecutorContext {
            store: store.clone(),
            runtime: drivers.runtime.clone(),
            compose: drivers.compose.clone(),
            fetcher: drivers.fetcher.clone(),
            layout: options.layout.clone(),
            settings: options.deploy.clone(),
        }));
        let runner = Arc::new(JobRunner::new(
            store.clone(),
            executor,
            locks.clone(),
            registry.clone(),
        ));
        let queue = Arc::new(Queue::start(&options.queue, runner));

        let control = DeploymentControl::new(
            store.clone(),
            queue.clone(),
            registry.clone(),
            drivers.fetcher.clone(),
        );
        let lifecycle = AppLifecycle::new(
            store.clone(),
            drivers.runtime.clone(),
            drivers.compose.clone(),
            options.layout.clone(),
        );

        Self {
            store,
            drivers,
            locks,
            registry,
            queue,
            control,
            lifecycle,
            streams_shutdown: CancellationToken::new(),
        }
    }

    pub fn server_state(&self, options: &AppOptions) -> ServerState {
        ServerState {
            store: self.store.clone(),
            control: self.control.clone(),
            lifecycle: self.lifecycle.clone(),
            runtime: self.drivers.runtime.clone(),
            layout: options.layout.clone(),
            tail_options: options.tail.clone(),
            shutdown: self.streams_shutdown.clone(),
        }
    }

    /// Close log streams and the queue, waiting for in-flight deployments
    pub async fn shutdown(&self) {
        info!("Shutting down application state...");
        self.streams_shutdown.cancel();
        self.queue.close().await;
    }
}
