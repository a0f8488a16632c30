//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::recovery::recover;
use crate::app::state::{AppState, Drivers};
use crate::deploy::compose::DockerCompose;
use crate::deploy::docker::DockerCli;
use crate::deploy::git::GitFetcher;
use crate::errors::PlatformError;
use crate::http::client::GitHubClient;
use crate::server::serve::serve;
use crate::store::{JsonStore, Store};

/// Run the Launchpad orchestrator
pub async fn run(
    version: String,
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), PlatformError> {
    info!("Initializing Launchpad {}...", version);

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&version, &options, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start Launchpad: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    version: &str,
    options: &AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), PlatformError> {
    options.layout.setup().await?;

    let store: Arc<dyn Store> = Arc::new(JsonStore::open(options.layout.state_file()).await?);
    let drivers = init_drivers(options)?;

    let app_state = Arc::new(AppState::init(options, store.clone(), drivers));
    shutdown_manager.with_app_state(app_state.clone())?;

    // must finish before the first request is served
    recover(store.as_ref(), app_state.queue.as_ref(), version).await?;

    if options.enable_server {
        init_server(
            options,
            app_state.clone(),
            shutdown_manager,
            shutdown_tx.subscribe(),
        )
        .await?;
    }

    Ok(())
}

fn init_drivers(options: &AppOptions) -> Result<Drivers, PlatformError> {
    let github = GitHubClient::new(&options.github.api_base_url, options.github.token.clone())?;
    Ok(Drivers {
        runtime: Arc::new(DockerCli::new()),
        compose: Arc::new(DockerCompose::new()),
        fetcher: Arc::new(GitFetcher::new(github)),
    })
}

async fn init_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), PlatformError> {
    info!("Initializing local HTTP server...");

    let server_state = app_state.server_state(options);
    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(server_handle)?;
    Ok(())
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    server_handle: Option<JoinHandle<Result<(), PlatformError>>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            server_handle: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), PlatformError> {
        if self.app_state.is_some() {
            return Err(PlatformError::ShutdownError("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), PlatformError>>,
    ) -> Result<(), PlatformError> {
        if self.server_handle.is_some() {
            return Err(PlatformError::ShutdownError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), PlatformError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                // interrupted deployments are failed by recovery on the next start
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), PlatformError> {
        info!("Shutting down Launchpad...");

        // 1. Log streams and the queue (waits for in-flight deployments)
        if let Some(app_state) = self.app_state.take() {
            app_state.shutdown().await;
        }

        // 2. Server
        if let Some(handle) = self.server_handle.take() {
            handle
                .await
                .map_err(|e| PlatformError::ShutdownError(e.to_string()))??;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
