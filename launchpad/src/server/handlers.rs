//! HTTP request handlers

use std::sync::Arc;

use api_models::{
    AppActionResponse, AppStatusResponse, BuildLogResponse, ContainerInfo,
    CreateDeploymentRequest, DeploymentListResponse, DeploymentResponse, HealthResponse,
    ServiceInfo, StopDeploymentResponse, VersionResponse,
};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::deploy::lifecycle::AppRuntimeStatus;
use crate::errors::PlatformError;
use crate::models::application::AppStatus;
use crate::models::deployment::Deployment;
use crate::server::error::ApiError;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "launchpad".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

// ------------------------------- deployments ------------------------------ //

pub async fn create_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(app_id): Path<i64>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let request: CreateDeploymentRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CreateDeploymentRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| PlatformError::ConfigError(format!("invalid request body: {}", e)))?
    };
    let commit = request.commit_hash.filter(|c| !c.trim().is_empty());
    let deployment = state.control.create_deployment(app_id, commit).await?;
    Ok((StatusCode::ACCEPTED, Json(deployment_response(&deployment))))
}

pub async fn list_deployments_handler(
    State(state): State<Arc<ServerState>>,
    Path(app_id): Path<i64>,
) -> Result<Json<DeploymentListResponse>, ApiError> {
    // 404 for unknown applications rather than an empty list
    state.store.get_application(app_id).await?;
    let deployments: Vec<DeploymentResponse> = state
        .store
        .list_deployments(app_id)
        .await?
        .iter()
        .map(deployment_response)
        .collect();
    Ok(Json(DeploymentListResponse {
        total: deployments.len(),
        deployments,
    }))
}

pub async fn get_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(deployment_id): Path<i64>,
) -> Result<Json<DeploymentResponse>, ApiError> {
    let deployment = state.store.get_deployment(deployment_id).await?;
    Ok(Json(deployment_response(&deployment)))
}

pub async fn stop_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(deployment_id): Path<i64>,
) -> Result<Json<StopDeploymentResponse>, ApiError> {
    let result = state.control.stop_deployment(deployment_id).await?;
    Ok(Json(StopDeploymentResponse {
        deployment: deployment_response(&result.deployment),
        interrupted: result.interrupted,
    }))
}

pub async fn rollback_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(deployment_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let deployment = state.control.rollback_deployment(deployment_id).await?;
    Ok((StatusCode::ACCEPTED, Json(deployment_response(&deployment))))
}

pub async fn build_log_handler(
    State(state): State<Arc<ServerState>>,
    Path(deployment_id): Path<i64>,
) -> Result<Json<BuildLogResponse>, ApiError> {
    let deployment = state.store.get_deployment(deployment_id).await?;
    let file = state.layout.build_log_file(&deployment);
    if !file.exists().await {
        return Err(PlatformError::NotFound(format!(
            "build log of deployment {}",
            deployment_id
        ))
        .into());
    }
    let content = file.read_string().await?;
    Ok(Json(BuildLogResponse {
        deployment_id,
        content,
    }))
}

// ------------------------------- applications ----------------------------- //

pub async fn start_app_handler(
    State(state): State<Arc<ServerState>>,
    Path(app_id): Path<i64>,
) -> Result<Json<AppActionResponse>, ApiError> {
    let status = state.lifecycle.start(app_id).await?;
    Ok(Json(action_response(app_id, "start", status)))
}

pub async fn stop_app_handler(
    State(state): State<Arc<ServerState>>,
    Path(app_id): Path<i64>,
) -> Result<Json<AppActionResponse>, ApiError> {
    let status = state.lifecycle.stop(app_id).await?;
    Ok(Json(action_response(app_id, "stop", status)))
}

pub async fn restart_app_handler(
    State(state): State<Arc<ServerState>>,
    Path(app_id): Path<i64>,
) -> Result<Json<AppActionResponse>, ApiError> {
    let status = state.lifecycle.restart(app_id).await?;
    Ok(Json(action_response(app_id, "restart", status)))
}

pub async fn app_status_handler(
    State(state): State<Arc<ServerState>>,
    Path(app_id): Path<i64>,
) -> Result<Json<AppStatusResponse>, ApiError> {
    let status = state.lifecycle.status(app_id).await?;
    Ok(Json(app_status_response(&status)))
}

// -------------------------------- conversions ----------------------------- //

pub fn deployment_response(deployment: &Deployment) -> DeploymentResponse {
    DeploymentResponse {
        id: deployment.id,
        app_id: deployment.app_id,
        deployment_number: deployment.deployment_number,
        commit_hash: deployment.commit_hash.clone(),
        commit_message: deployment.commit_message.clone(),
        commit_author: deployment.commit_author.clone(),
        status: deployment.status.to_string(),
        stage: deployment.stage.clone(),
        progress: deployment.progress,
        error_message: deployment.error_message.clone(),
        is_active: deployment.is_active,
        rollback_from: deployment.rollback_from,
        created_at: deployment.created_at,
        started_at: deployment.started_at,
        finished_at: deployment.finished_at,
    }
}

fn action_response(app_id: i64, action: &str, status: AppStatus) -> AppActionResponse {
    AppActionResponse {
        app_id,
        action: action.to_string(),
        status: status.to_string(),
    }
}

fn app_status_response(status: &AppRuntimeStatus) -> AppStatusResponse {
    AppStatusResponse {
        app_id: status.app_id,
        status: status.status.to_string(),
        running: status.running(),
        container: status.container.as_ref().map(|c| ContainerInfo {
            name: c.name.clone(),
            exists: c.exists,
            running: c.running,
            state: c.state.clone(),
            image: c.image.clone(),
            started_at: c.started_at.clone(),
        }),
        services: status
            .services
            .iter()
            .map(|s| ServiceInfo {
                service: s.service.clone(),
                state: s.state.clone(),
            })
            .collect(),
        active_deployment_id: status.active_deployment_id,
    }
}
