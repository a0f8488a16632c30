//! Deployment control operations
//!
//! Entry points used by request handlers and webhooks: trigger a new
//! deployment, stop one, roll back to an earlier one.

use std::sync::Arc;

use tracing::{info, warn};

use crate::deploy::cancel::CancellationRegistry;
use crate::deploy::config::resolve_template;
use crate::deploy::executor::STOPPED_BY_USER;
use crate::deploy::fsm::DeploymentStatus;
use crate::deploy::git::SourceFetcher;
use crate::errors::PlatformError;
use crate::models::application::AppType;
use crate::models::deployment::{is_valid_commit_ref, Deployment, NewDeployment};
use crate::store::Store;
use crate::workers::queue::JobQueue;

/// Commit hash used when nothing better can be resolved
pub const FALLBACK_COMMIT: &str = "latest";

/// Result of a stop request
#[derive(Debug, Clone)]
pub struct StopResult {
    pub deployment: Deployment,

    /// Whether a running execution was interrupted, as opposed to a queued
    /// job that will be skipped when dequeued
    pub interrupted: bool,
}

/// Control surface over the deployment pipeline
#[derive(Clone)]
pub struct DeploymentControl {
    store: Arc<dyn Store>,
    queue: Arc<dyn JobQueue>,
    registry: Arc<CancellationRegistry>,
    fetcher: Arc<dyn SourceFetcher>,
}

impl DeploymentControl {
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<dyn JobQueue>,
        registry: Arc<CancellationRegistry>,
        fetcher: Arc<dyn SourceFetcher>,
    ) -> Self {
        Self {
            store,
            queue,
            registry,
            fetcher,
        }
    }

    /// Create a pending deployment of an application and enqueue it.
    ///
    /// Without an explicit commit the latest commit of the configured branch
    /// is used (the template image tag for database applications).
    pub async fn create_deployment(
        &self,
        app_id: i64,
        commit: Option<String>,
    ) -> Result<Deployment, PlatformError> {
        let app = self.store.get_application(app_id).await?;

        let mut new = NewDeployment {
            app_id,
            ..Default::default()
        };

        match (app.app_type, commit.filter(|c| !c.trim().is_empty())) {
            (AppType::Database, _) => {
                let template = resolve_template(self.store.as_ref(), &app).await?;
                new.commit_hash = template.image_tag();
                new.commit_message = Some(format!("Deploy {}", template.image()));
            }
            (_, Some(commit)) => {
                let commit = commit.trim();
                if !is_valid_commit_ref(commit) {
                    return Err(PlatformError::ConfigError(format!(
                        "invalid commit reference: {:?}",
                        commit
                    )));
                }
                new.commit_hash = commit.to_string();
            }
            (_, None) => match (app.git_repository.as_deref(), app.git_branch.as_deref()) {
                (Some(repo), Some(branch)) if !repo.is_empty() && !branch.is_empty() => {
                    match self.fetcher.latest_commit(repo, branch).await {
                        Ok(info) => {
                            new.commit_hash = info.sha;
                            new.commit_message = Some(info.message).filter(|m| !m.is_empty());
                            new.commit_author = Some(info.author).filter(|a| !a.is_empty());
                        }
                        Err(e) => {
                            warn!("Failed to resolve latest commit of {}: {}", repo, e);
                            new.commit_hash = FALLBACK_COMMIT.to_string();
                        }
                    }
                }
                _ => new.commit_hash = FALLBACK_COMMIT.to_string(),
            },
        }

        if new.commit_hash.is_empty() {
            new.commit_hash = FALLBACK_COMMIT.to_string();
        }

        let deployment = self.store.create_deployment(new).await?;
        self.enqueue(deployment).await
    }

    /// Redeploy what a successful deployment shipped
    pub async fn rollback_deployment(&self, deployment_id: i64) -> Result<Deployment, PlatformError> {
        let target = self.store.get_deployment(deployment_id).await?;
        if target.status != DeploymentStatus::Success {
            return Err(PlatformError::ConfigError(format!(
                "deployment {} is {}, only successful deployments can be rolled back to",
                target.id, target.status
            )));
        }

        info!(
            "Rolling back app {} to deployment {} ({})",
            target.app_id, target.id, target.commit_hash
        );
        let deployment = self
            .store
            .create_deployment(NewDeployment {
                app_id: target.app_id,
                commit_hash: target.commit_hash.clone(),
                commit_message: target.commit_message.clone(),
                commit_author: target.commit_author.clone(),
                rollback_from: Some(target.id),
            })
            .await?;
        self.enqueue(deployment).await
    }

    /// Persist `stopped` and interrupt the execution if one is running.
    ///
    /// The status is written first so a queued job observes it when dequeued.
    pub async fn stop_deployment(&self, deployment_id: i64) -> Result<StopResult, PlatformError> {
        let current = self.store.get_deployment(deployment_id).await?;
        if current.status.is_terminal() {
            return Err(PlatformError::InvalidTransition(format!(
                "deployment {} is already {}",
                deployment_id, current.status
            )));
        }

        let deployment = self
            .store
            .finish_deployment(
                deployment_id,
                DeploymentStatus::Stopped,
                Some(STOPPED_BY_USER.to_string()),
            )
            .await?;
        let interrupted = self.registry.cancel(deployment_id);

        info!(
            "Stopped deployment {} ({})",
            deployment_id,
            if interrupted { "interrupted" } else { "not running yet" }
        );
        Ok(StopResult {
            deployment,
            interrupted,
        })
    }

    async fn enqueue(&self, deployment: Deployment) -> Result<Deployment, PlatformError> {
        if let Err(e) = self.queue.add_job(deployment.id) {
            // admission failed: the row must not stay pending forever
            if let Err(store_err) = self
                .store
                .finish_deployment(deployment.id, DeploymentStatus::Failed, Some(e.to_string()))
                .await
            {
                warn!("Failed to mark deployment {} failed: {}", deployment.id, store_err);
            }
            return Err(e);
        }
        info!(
            "Queued deployment {} (#{} of app {})",
            deployment.id, deployment.deployment_number, deployment.app_id
        );
        Ok(deployment)
    }
}
