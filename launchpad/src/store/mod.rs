//! Deployment state store
//!
//! The store is the single source of truth that survives process restarts.
//! The orchestration core only talks to it through the [`Store`] trait; the
//! rest of the platform (HTTP handlers, webhooks) owns the application CRUD
//! and reaches the same data through the concrete implementation.

pub mod json;

use async_trait::async_trait;

use crate::deploy::fsm::DeploymentStatus;
use crate::errors::PlatformError;
use crate::models::application::{AppStatus, Application, EnvVar};
use crate::models::deployment::{Deployment, NewDeployment, ProgressUpdate};
use crate::models::template::ServiceTemplate;
use crate::models::update_log::{UpdateLog, UpdateStatus};

pub use json::JsonStore;

/// Data access operations consumed by the deployment pipeline
#[async_trait]
pub trait Store: Send + Sync {
    // ------------------------------ applications ------------------------------ //

    async fn get_application(&self, app_id: i64) -> Result<Application, PlatformError>;

    /// Update the application status field (the only application field the core writes)
    async fn set_application_status(
        &self,
        app_id: i64,
        status: AppStatus,
    ) -> Result<(), PlatformError>;

    async fn list_env_vars(&self, app_id: i64) -> Result<Vec<EnvVar>, PlatformError>;

    async fn get_template(&self, name: &str) -> Result<ServiceTemplate, PlatformError>;

    // ------------------------------- deployments ------------------------------ //

    /// Create a pending deployment with the next per-application sequence number
    async fn create_deployment(&self, new: NewDeployment) -> Result<Deployment, PlatformError>;

    async fn get_deployment(&self, deployment_id: i64) -> Result<Deployment, PlatformError>;

    /// Latest deployment of an application for a commit
    async fn find_deployment_by_commit(
        &self,
        app_id: i64,
        commit_hash: &str,
    ) -> Result<Option<Deployment>, PlatformError>;

    /// Deployments of an application, newest first
    async fn list_deployments(&self, app_id: i64) -> Result<Vec<Deployment>, PlatformError>;

    /// Deployments in any of the given statuses, oldest first
    async fn list_deployments_by_status(
        &self,
        statuses: &[DeploymentStatus],
    ) -> Result<Vec<Deployment>, PlatformError>;

    /// Persist a non-terminal status/stage/progress change
    async fn update_progress(
        &self,
        deployment_id: i64,
        update: ProgressUpdate,
    ) -> Result<Deployment, PlatformError>;

    /// Move a deployment into a terminal status and stamp `finished_at`
    async fn finish_deployment(
        &self,
        deployment_id: i64,
        status: DeploymentStatus,
        error_message: Option<String>,
    ) -> Result<Deployment, PlatformError>;

    /// Mark one deployment active and clear the flag on every sibling, atomically
    async fn set_active_deployment(
        &self,
        app_id: i64,
        deployment_id: i64,
    ) -> Result<(), PlatformError>;

    async fn set_commit_info(
        &self,
        deployment_id: i64,
        message: Option<String>,
        author: Option<String>,
    ) -> Result<(), PlatformError>;

    // ------------------------------- update logs ------------------------------ //

    async fn latest_update_log(&self) -> Result<Option<UpdateLog>, PlatformError>;

    async fn finish_update_log(
        &self,
        update_id: i64,
        status: UpdateStatus,
        message: Option<String>,
    ) -> Result<(), PlatformError>;
}

/// Statuses of deployments that were accepted but have not reached a terminal state
pub fn incomplete_statuses() -> Vec<DeploymentStatus> {
    let mut statuses = vec![DeploymentStatus::Pending];
    statuses.extend(DeploymentStatus::IN_FLIGHT);
    statuses
}
