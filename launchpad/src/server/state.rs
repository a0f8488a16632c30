//! Server state

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::deploy::control::DeploymentControl;
use crate::deploy::docker::ContainerRuntime;
use crate::deploy::lifecycle::AppLifecycle;
use crate::logstream::TailOptions;
use crate::storage::layout::StorageLayout;
use crate::store::Store;

/// Server state shared across handlers
pub struct ServerState {
    pub store: Arc<dyn Store>,
    pub control: DeploymentControl,
    pub lifecycle: AppLifecycle,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub layout: StorageLayout,
    pub tail_options: TailOptions,

    /// Fired on shutdown so open log streams end
    pub shutdown: CancellationToken,
}
