//! Startup recovery
//!
//! The lock set and cancellation registry are rebuilt empty on every start,
//! so rows that claim to be mid-flight belong to a process that is gone.
//! Recovery runs once, before the platform serves traffic.

use tracing::{error, info, warn};

use crate::deploy::fsm::DeploymentStatus;
use crate::errors::PlatformError;
use crate::models::application::AppStatus;
use crate::models::update_log::UpdateStatus;
use crate::store::Store;
use crate::utils::same_version;
use crate::workers::queue::JobQueue;

/// Message recorded on deployments interrupted by a process exit
pub const INTERRUPTED_MESSAGE: &str = "system died before deployment could complete";

/// Counters of one recovery run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// In-flight deployments marked failed
    pub failed: usize,

    /// Pending deployments handed back to the queue
    pub requeued: usize,

    /// Pending deployments the queue refused
    pub requeue_errors: usize,

    /// Outcome recorded for an interrupted self-update, if any
    pub update: Option<UpdateStatus>,
}

/// Run both recovery passes.
///
/// Store errors in the deployment pass abort startup; the update-log pass
/// only warns.
pub async fn recover(
    store: &dyn Store,
    queue: &dyn JobQueue,
    running_version: &str,
) -> Result<RecoveryReport, PlatformError> {
    let mut report = recover_deployments(store, queue).await?;

    match reconcile_update_log(store, running_version).await {
        Ok(update) => report.update = update,
        Err(e) => warn!("Failed to reconcile update log: {}", e),
    }

    info!(
        "Recovery complete: {} failed, {} re-queued, {} re-queue errors",
        report.failed, report.requeued, report.requeue_errors
    );
    Ok(report)
}

/// Fail interrupted deployments and re-enqueue pending ones
pub async fn recover_deployments(
    store: &dyn Store,
    queue: &dyn JobQueue,
) -> Result<RecoveryReport, PlatformError> {
    let mut report = RecoveryReport::default();

    let interrupted = store
        .list_deployments_by_status(&DeploymentStatus::IN_FLIGHT)
        .await?;
    for deployment in interrupted {
        warn!(
            "Deployment {} was {} when the process stopped, marking failed",
            deployment.id, deployment.status
        );
        store
            .finish_deployment(
                deployment.id,
                DeploymentStatus::Failed,
                Some(INTERRUPTED_MESSAGE.to_string()),
            )
            .await?;
        store
            .set_application_status(deployment.app_id, AppStatus::Error)
            .await?;
        report.failed += 1;
    }

    let pending = store
        .list_deployments_by_status(&[DeploymentStatus::Pending])
        .await?;
    for deployment in pending {
        match queue.add_job(deployment.id) {
            Ok(()) => {
                info!("Re-queued pending deployment {}", deployment.id);
                report.requeued += 1;
            }
            Err(e) => {
                error!("Failed to re-queue deployment {}: {}", deployment.id, e);
                report.requeue_errors += 1;
            }
        }
    }

    Ok(report)
}

/// Settle an update log left `in_progress` by the restart it caused
pub async fn reconcile_update_log(
    store: &dyn Store,
    running_version: &str,
) -> Result<Option<UpdateStatus>, PlatformError> {
    let Some(update) = store.latest_update_log().await? else {
        return Ok(None);
    };
    if update.status != UpdateStatus::InProgress {
        return Ok(None);
    }

    if same_version(&update.target_version, running_version) {
        info!("Update to {} completed", update.target_version);
        store
            .finish_update_log(
                update.id,
                UpdateStatus::Success,
                Some(format!("updated to {}", running_version)),
            )
            .await?;
        Ok(Some(UpdateStatus::Success))
    } else {
        warn!(
            "Update to {} did not complete, running {}",
            update.target_version, running_version
        );
        store
            .finish_update_log(
                update.id,
                UpdateStatus::Failed,
                Some(format!(
                    "version mismatch: expected {}, running {}",
                    update.target_version, running_version
                )),
            )
            .await?;
        Ok(Some(UpdateStatus::Failed))
    }
}
