//! One-click application lifecycle: start, stop, restart and status

use std::sync::Arc;

use tracing::{info, warn};

use crate::deploy::compose::{all_running, ComposeDriver, ComposeService};
use crate::deploy::docker::{ContainerRuntime, ContainerStatus};
use crate::deploy::executor::compose_project;
use crate::errors::PlatformError;
use crate::models::application::{AppStatus, AppType, Application};
use crate::storage::layout::StorageLayout;
use crate::store::Store;

/// Observed runtime state of an application
#[derive(Debug, Clone)]
pub struct AppRuntimeStatus {
    pub app_id: i64,

    /// Status recorded in the store
    pub status: AppStatus,

    /// Container state for single-container applications
    pub container: Option<ContainerStatus>,

    /// Service states for compose applications
    pub services: Vec<ComposeService>,

    pub active_deployment_id: Option<i64>,
}

impl AppRuntimeStatus {
    pub fn running(&self) -> bool {
        match &self.container {
            Some(container) => container.running,
            None => all_running(&self.services),
        }
    }
}

#[derive(Clone)]
pub struct AppLifecycle {
    store: Arc<dyn Store>,
    runtime: Arc<dyn ContainerRuntime>,
    compose: Arc<dyn ComposeDriver>,
    layout: StorageLayout,
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Start,
    Stop,
    Restart,
}

impl AppLifecycle {
    pub fn new(
        store: Arc<dyn Store>,
        runtime: Arc<dyn ContainerRuntime>,
        compose: Arc<dyn ComposeDriver>,
        layout: StorageLayout,
    ) -> Self {
        Self {
            store,
            runtime,
            compose,
            layout,
        }
    }

    pub async fn start(&self, app_id: i64) -> Result<AppStatus, PlatformError> {
        self.apply(app_id, Action::Start).await
    }

    pub async fn stop(&self, app_id: i64) -> Result<AppStatus, PlatformError> {
        self.apply(app_id, Action::Stop).await
    }

    pub async fn restart(&self, app_id: i64) -> Result<AppStatus, PlatformError> {
        self.apply(app_id, Action::Restart).await
    }

    pub async fn status(&self, app_id: i64) -> Result<AppRuntimeStatus, PlatformError> {
        let app = self.store.get_application(app_id).await?;
        let active_deployment_id = self
            .store
            .list_deployments(app_id)
            .await?
            .into_iter()
            .find(|d| d.is_active)
            .map(|d| d.id);

        let (container, services) = if app.app_type == AppType::Compose {
            let project = compose_project(&self.layout, &app);
            let services = match self.compose.ps(&project).await {
                Ok(services) => services,
                Err(e) => {
                    warn!("Failed to list services of app {}: {}", app_id, e);
                    Vec::new()
                }
            };
            (None, services)
        } else {
            let container = self.runtime.container_status(&app.container_name()).await?;
            (Some(container), Vec::new())
        };

        Ok(AppRuntimeStatus {
            app_id,
            status: app.status,
            container,
            services,
            active_deployment_id,
        })
    }

    async fn apply(&self, app_id: i64, action: Action) -> Result<AppStatus, PlatformError> {
        let app = self.store.get_application(app_id).await?;
        info!("{:?} app {} ({})", action, app.id, app.name);

        match self.run_action(&app, action).await {
            Ok(()) => {
                let status = match action {
                    Action::Stop => AppStatus::Stopped,
                    Action::Start | Action::Restart => AppStatus::Running,
                };
                self.store.set_application_status(app_id, status).await?;
                Ok(status)
            }
            Err(e) => {
                // a missing container is not an application fault
                if !matches!(action, Action::Stop) && !e.is_not_found() {
                    if let Err(store_err) =
                        self.store.set_application_status(app_id, AppStatus::Error).await
                    {
                        warn!("Failed to update status of app {}: {}", app_id, store_err);
                    }
                }
                Err(e)
            }
        }
    }

    async fn run_action(&self, app: &Application, action: Action) -> Result<(), PlatformError> {
        if app.app_type == AppType::Compose {
            let project = compose_project(&self.layout, app);
            return match action {
                Action::Start => self.compose.start(&project).await,
                Action::Stop => self.compose.stop(&project).await,
                Action::Restart => self.compose.restart(&project).await,
            };
        }

        let name = app.container_name();
        match action {
            Action::Start => self.runtime.start_container(&name).await,
            Action::Stop => self.runtime.stop_container(&name).await,
            Action::Restart => self.runtime.restart_container(&name).await,
        }
    }
}
