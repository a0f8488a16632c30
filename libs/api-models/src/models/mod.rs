//! Request and response bodies of the local HTTP API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Error body returned with every non-2xx response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Trigger a deployment. Without a commit the latest commit of the
/// application's branch is deployed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateDeploymentRequest {
    #[serde(default)]
    pub commit_hash: Option<String>,
}

/// A deployment as exposed over the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentResponse {
    pub id: i64,
    pub app_id: i64,
    pub deployment_number: i64,
    pub commit_hash: String,
    #[serde(default)]
    pub commit_message: Option<String>,
    #[serde(default)]
    pub commit_author: Option<String>,
    pub status: String,
    pub stage: String,
    pub progress: u8,
    #[serde(default)]
    pub error_message: Option<String>,
    pub is_active: bool,
    #[serde(default)]
    pub rollback_from: Option<i64>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Deployments of one application, newest first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentListResponse {
    pub deployments: Vec<DeploymentResponse>,
    pub total: usize,
}

/// Result of a stop request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopDeploymentResponse {
    pub deployment: DeploymentResponse,

    /// A running execution was interrupted (false for queued deployments)
    pub interrupted: bool,
}

/// Full build log of a deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildLogResponse {
    pub deployment_id: i64,
    pub content: String,
}

/// Container state of a single-container application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub name: String,
    pub exists: bool,
    pub running: bool,
    pub state: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
}

/// State of one service of a compose application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub service: String,
    pub state: String,
}

/// Runtime status of an application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppStatusResponse {
    pub app_id: i64,
    pub status: String,
    pub running: bool,
    #[serde(default)]
    pub container: Option<ContainerInfo>,
    #[serde(default)]
    pub services: Vec<ServiceInfo>,
    #[serde(default)]
    pub active_deployment_id: Option<i64>,
}

/// Result of a start/stop/restart action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppActionResponse {
    pub app_id: i64,
    pub action: String,
    pub status: String,
}
