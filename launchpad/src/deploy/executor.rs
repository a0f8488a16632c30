//! Deployment executor
//!
//! Drives one accepted deployment through its stages:
//!
//! - git applications: resolve -> clone -> build -> replace container -> activate
//! - database applications: resolve -> pull template image -> replace container -> activate
//! - compose applications: resolve -> (clone) -> compose up -> activate
//!
//! Every stage persists its status, stage label and progress before the work
//! starts. Outcomes map onto terminal statuses: cancellation becomes
//! `stopped`, any other error becomes `failed` with the application marked
//! `error`, and success marks the application `running`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::deploy::buildlog::BuildLog;
use crate::deploy::compose::{ComposeDriver, ComposeProject};
use crate::deploy::config::{resolve_deployment_config, DeploymentConfig};
use crate::deploy::docker::{build_container_spec, cleanup_old_images, BuildRequest, ContainerRuntime};
use crate::deploy::fsm::DeploymentStatus;
use crate::deploy::git::{CloneRequest, SourceFetcher};
use crate::errors::PlatformError;
use crate::models::application::{AppStatus, AppType, Application};
use crate::models::deployment::{Deployment, ProgressUpdate};
use crate::storage::layout::StorageLayout;
use crate::storage::settings::DeploySettings;
use crate::store::Store;

/// Message persisted when a deployment is stopped through its token
pub const STOPPED_BY_USER: &str = "deployment stopped by user";

pub mod stage {
    pub const RESOLVING: &str = "resolving configuration";
    pub const CLONING: &str = "cloning repository";
    pub const BUILDING: &str = "building image";
    pub const PULLING: &str = "pulling image";
    pub const REPLACING: &str = "replacing container";
    pub const COMPOSE_UP: &str = "starting compose stack";
    pub const ACTIVATING: &str = "activating";
}

/// Collaborators of the executor
#[derive(Clone)]
pub struct ExecutorContext {
    pub store: Arc<dyn Store>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub compose: Arc<dyn ComposeDriver>,
    pub fetcher: Arc<dyn SourceFetcher>,
    pub layout: StorageLayout,
    pub settings: DeploySettings,
}

/// Runs deployments to a terminal status
pub struct DeploymentExecutor {
    ctx: ExecutorContext,
}

/// Image produced or reused by a pipeline; `None` when there is nothing to prune
type PipelineResult = Result<Option<String>, PlatformError>;

impl DeploymentExecutor {
    pub fn new(ctx: ExecutorContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &ExecutorContext {
        &self.ctx
    }

    /// Execute a deployment and return its final row.
    ///
    /// Pipeline failures are recorded on the row, not returned. The error
    /// path is only taken when the store itself fails.
    pub async fn execute(
        &self,
        deployment_id: i64,
        token: &CancellationToken,
    ) -> Result<Deployment, PlatformError> {
        let deployment = self.ctx.store.get_deployment(deployment_id).await?;
        if deployment.status.is_terminal() {
            info!(
                "Deployment {} is already {}, nothing to execute",
                deployment.id, deployment.status
            );
            return Ok(deployment);
        }

        info!(
            "Executing deployment {} (#{} of app {}, commit {})",
            deployment.id, deployment.deployment_number, deployment.app_id, deployment.commit_hash
        );

        let log = match BuildLog::open(self.ctx.layout.build_log_file(&deployment)).await {
            Ok(log) => log,
            Err(e) => {
                error!("Failed to open build log for deployment {}: {}", deployment.id, e);
                return self.record_outcome(&deployment, None, None, token, Err(e)).await;
            }
        };

        let app = match self.ctx.store.get_application(deployment.app_id).await {
            Ok(app) => app,
            Err(e) => {
                return self
                    .record_outcome(&deployment, None, Some(&log), token, Err(e))
                    .await;
            }
        };

        let result = self.run_pipeline(&deployment, &app, &log, token).await;
        self.record_outcome(&deployment, Some(&app), Some(&log), token, result)
            .await
    }

    async fn run_pipeline(
        &self,
        deployment: &Deployment,
        app: &Application,
        log: &BuildLog,
        token: &CancellationToken,
    ) -> PipelineResult {
        self.progress(deployment, DeploymentStatus::Pending, stage::RESOLVING, 5, log)
            .await?;
        let config = resolve_deployment_config(self.ctx.store.as_ref(), app).await?;
        check_canceled(token, stage::RESOLVING)?;

        match app.app_type {
            AppType::Database => self.deploy_database(deployment, app, &config, log, token).await,
            AppType::Compose => self.deploy_compose(deployment, app, &config, log, token).await,
            AppType::Web | AppType::Service => {
                self.deploy_from_source(deployment, app, &config, log, token).await
            }
        }
    }

    async fn deploy_from_source(
        &self,
        deployment: &Deployment,
        app: &Application,
        config: &DeploymentConfig,
        log: &BuildLog,
        token: &CancellationToken,
    ) -> PipelineResult {
        let image = format!("{}:{}", app.image_repository(), deployment.image_tag());

        let reuse = match deployment.rollback_from {
            Some(from) => {
                let exists = self.ctx.runtime.image_exists(&image).await?;
                if exists {
                    log.step(&format!(
                        "Rolling back from deployment {}: reusing image {}",
                        from, image
                    ))
                    .await;
                } else {
                    log.step(&format!("Image {} no longer exists, rebuilding", image))
                        .await;
                }
                exists
            }
            None => false,
        };

        if !reuse {
            self.ctx
                .store
                .set_application_status(app.id, AppStatus::Building)
                .await?;

            // clone
            self.progress(deployment, DeploymentStatus::Cloning, stage::CLONING, 10, log)
                .await?;
            let checkout = self.checkout(deployment, app, log, token).await?;
            check_canceled(token, stage::CLONING)?;

            // build
            self.progress(deployment, DeploymentStatus::Building, stage::BUILDING, 30, log)
                .await?;
            let request = BuildRequest {
                context_dir: subdirectory(&checkout, app.root_directory.as_deref()),
                dockerfile: app
                    .dockerfile_path
                    .as_deref()
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from),
                tag: image.clone(),
                build_args: config.env.build.clone(),
            };
            self.ctx.runtime.build_image(&request, log, token).await?;
            check_canceled(token, stage::BUILDING)?;
        }

        self.replace_container(deployment, app, config, &image, log, token)
            .await?;
        self.activate(deployment, log).await?;
        Ok(Some(image))
    }

    async fn deploy_database(
        &self,
        deployment: &Deployment,
        app: &Application,
        config: &DeploymentConfig,
        log: &BuildLog,
        token: &CancellationToken,
    ) -> PipelineResult {
        let template = config.template.as_ref().ok_or_else(|| {
            PlatformError::ConfigError(format!("database application {} has no service template", app.name))
        })?;
        let image = template.image();

        self.ctx
            .store
            .set_application_status(app.id, AppStatus::Deploying)
            .await?;
        self.progress(deployment, DeploymentStatus::Pulling, stage::PULLING, 30, log)
            .await?;
        self.ctx.runtime.pull_image(&image, log, token).await?;
        check_canceled(token, stage::PULLING)?;

        self.replace_container(deployment, app, config, &image, log, token)
            .await?;
        self.activate(deployment, log).await?;

        // template images are shared, never pruned
        Ok(None)
    }

    async fn deploy_compose(
        &self,
        deployment: &Deployment,
        app: &Application,
        config: &DeploymentConfig,
        log: &BuildLog,
        token: &CancellationToken,
    ) -> PipelineResult {
        self.ctx
            .store
            .set_application_status(app.id, AppStatus::Deploying)
            .await?;

        // without a repository the stack is expected in the build context already
        if app.clone_url().is_some() {
            self.progress(deployment, DeploymentStatus::Cloning, stage::CLONING, 10, log)
                .await?;
            self.checkout(deployment, app, log, token).await?;
            check_canceled(token, stage::CLONING)?;
        }
        let project = compose_project(&self.ctx.layout, app);

        self.progress(deployment, DeploymentStatus::Deploying, stage::COMPOSE_UP, 70, log)
            .await?;
        self.ctx
            .compose
            .up(&project, &config.env.merged(), log, token)
            .await?;
        check_canceled(token, stage::COMPOSE_UP)?;

        self.activate(deployment, log).await?;
        Ok(None)
    }

    /// Clone the application source into its build context
    async fn checkout(
        &self,
        deployment: &Deployment,
        app: &Application,
        log: &BuildLog,
        token: &CancellationToken,
    ) -> Result<PathBuf, PlatformError> {
        let url = app.clone_url().ok_or_else(|| {
            PlatformError::ConfigError(format!("application {} has no git repository", app.name))
        })?;
        let branch = app
            .git_branch
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .ok_or_else(|| {
                PlatformError::ConfigError(format!("application {} has no git branch", app.name))
            })?;

        let dest = self.ctx.layout.build_context(app.id).path().to_path_buf();
        let request = CloneRequest {
            url: url.to_string(),
            branch: branch.to_string(),
            commit: Some(deployment.commit_hash.clone()).filter(|c| !c.is_empty()),
            dest: dest.clone(),
        };
        let commit = self.ctx.fetcher.clone_repository(&request, log, token).await?;
        log.line(&format!("Checked out {} ({})", commit.sha, commit.message))
            .await;

        if deployment.commit_message.is_none() && !commit.message.is_empty() {
            self.ctx
                .store
                .set_commit_info(
                    deployment.id,
                    Some(commit.message.clone()),
                    Some(commit.author.clone()).filter(|a| !a.is_empty()),
                )
                .await?;
        }
        Ok(dest)
    }

    async fn replace_container(
        &self,
        deployment: &Deployment,
        app: &Application,
        config: &DeploymentConfig,
        image: &str,
        log: &BuildLog,
        token: &CancellationToken,
    ) -> Result<(), PlatformError> {
        let spec = build_container_spec(app, config, image, &self.ctx.settings)?;

        self.ctx
            .store
            .set_application_status(app.id, AppStatus::Deploying)
            .await?;
        self.progress(deployment, DeploymentStatus::Deploying, stage::REPLACING, 70, log)
            .await?;

        self.ctx
            .runtime
            .stop_and_remove_container(&spec.name, token)
            .await?;
        check_canceled(token, stage::REPLACING)?;

        let id = self
            .ctx
            .runtime
            .create_and_start_container(&spec, token)
            .await?;
        log.line(&format!("Container {} started from {} ({})", spec.name, image, id))
            .await;
        Ok(())
    }

    async fn activate(&self, deployment: &Deployment, log: &BuildLog) -> Result<(), PlatformError> {
        self.progress(deployment, DeploymentStatus::Deploying, stage::ACTIVATING, 90, log)
            .await?;
        self.ctx
            .store
            .set_active_deployment(deployment.app_id, deployment.id)
            .await
    }

    async fn progress(
        &self,
        deployment: &Deployment,
        status: DeploymentStatus,
        stage: &str,
        progress: u8,
        log: &BuildLog,
    ) -> Result<(), PlatformError> {
        debug!("Deployment {}: {} ({}%)", deployment.id, stage, progress);
        log.step(stage).await;
        self.ctx
            .store
            .update_progress(deployment.id, ProgressUpdate::new(status, stage, progress))
            .await?;
        Ok(())
    }

    // ------------------------------- outcomes -------------------------------- //

    async fn record_outcome(
        &self,
        deployment: &Deployment,
        app: Option<&Application>,
        log: Option<&BuildLog>,
        token: &CancellationToken,
        result: PipelineResult,
    ) -> Result<Deployment, PlatformError> {
        match result {
            Ok(image) => {
                let finished = self
                    .finish_once(deployment.id, DeploymentStatus::Success, None)
                    .await?;
                if finished.status != DeploymentStatus::Success {
                    return Ok(finished);
                }
                info!("Deployment {} succeeded", deployment.id);
                if let Some(log) = log {
                    log.step("Deployment succeeded").await;
                }
                self.ctx
                    .store
                    .set_application_status(deployment.app_id, AppStatus::Running)
                    .await?;

                if let Some(image) = image {
                    if let Err(e) = cleanup_old_images(
                        self.ctx.runtime.as_ref(),
                        deployment.app_id,
                        self.ctx.settings.image_retention,
                        &image,
                    )
                    .await
                    {
                        warn!("Failed to clean up old images of app {}: {}", deployment.app_id, e);
                    }
                }
                Ok(finished)
            }
            Err(e) if e.is_canceled() || token.is_cancelled() => {
                info!("Deployment {} stopped: {}", deployment.id, e);
                let finished = self
                    .finish_once(
                        deployment.id,
                        DeploymentStatus::Stopped,
                        Some(STOPPED_BY_USER.to_string()),
                    )
                    .await?;
                self.record_stop(app, log).await;
                Ok(finished)
            }
            Err(e) => {
                // a stop persists the row before it cancels the token
                let current = self.ctx.store.get_deployment(deployment.id).await?;
                if current.status == DeploymentStatus::Stopped {
                    info!("Deployment {} stopped: {}", deployment.id, e);
                    self.record_stop(app, log).await;
                    return Ok(current);
                }

                let message = e.to_string();
                error!("Deployment {} failed: {}", deployment.id, message);
                if let Some(log) = log {
                    log.error(&message).await;
                }
                let finished = self
                    .finish_once(deployment.id, DeploymentStatus::Failed, Some(message))
                    .await?;
                if finished.status != DeploymentStatus::Failed {
                    return Ok(finished);
                }
                if app.is_some() {
                    self.ctx
                        .store
                        .set_application_status(deployment.app_id, AppStatus::Error)
                        .await?;
                }
                Ok(finished)
            }
        }
    }

    /// Move to a terminal status unless something else (a stop request)
    /// already did
    async fn finish_once(
        &self,
        deployment_id: i64,
        status: DeploymentStatus,
        message: Option<String>,
    ) -> Result<Deployment, PlatformError> {
        let current = self.ctx.store.get_deployment(deployment_id).await?;
        if current.status.is_terminal() {
            debug!(
                "Deployment {} already {}, not recording {}",
                deployment_id, current.status, status
            );
            return Ok(current);
        }

        match self
            .ctx
            .store
            .finish_deployment(deployment_id, status, message)
            .await
        {
            Err(PlatformError::InvalidTransition(_)) => {
                self.ctx.store.get_deployment(deployment_id).await
            }
            other => other,
        }
    }

    /// Best-effort sync of the application status with its container after a stop
    async fn record_stop(&self, app: Option<&Application>, log: Option<&BuildLog>) {
        if let Some(log) = log {
            log.step(STOPPED_BY_USER).await;
        }
        if let Some(app) = app {
            self.refresh_app_status(app).await;
        }
    }

    async fn refresh_app_status(&self, app: &Application) {
        let status = if app.app_type == AppType::Compose {
            AppStatus::Stopped
        } else {
            match self.ctx.runtime.container_status(&app.container_name()).await {
                Ok(s) if s.running => AppStatus::Running,
                Ok(_) => AppStatus::Stopped,
                Err(e) => {
                    warn!("Failed to inspect container of app {}: {}", app.id, e);
                    return;
                }
            }
        };
        if let Err(e) = self.ctx.store.set_application_status(app.id, status).await {
            warn!("Failed to update status of app {}: {}", app.id, e);
        }
    }
}

fn check_canceled(token: &CancellationToken, stage: &str) -> Result<(), PlatformError> {
    if token.is_cancelled() {
        return Err(PlatformError::Canceled(stage.to_string()));
    }
    Ok(())
}

/// Compose project of an application: its build context plus root directory
pub fn compose_project(layout: &StorageLayout, app: &Application) -> ComposeProject {
    let root = layout.build_context(app.id).path().to_path_buf();
    ComposeProject::new(
        subdirectory(&root, app.root_directory.as_deref()),
        app.container_name(),
    )
}

/// Resolve a configured root directory inside a checkout
fn subdirectory(root: &Path, sub: Option<&str>) -> PathBuf {
    match sub.map(|s| s.trim().trim_matches('/')) {
        Some(s) if !s.is_empty() && s != "." => root.join(s),
        _ => root.to_path_buf(),
    }
}
