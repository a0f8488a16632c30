//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::PlatformError;
use crate::server::handlers::{
    app_status_handler, build_log_handler, create_deployment_handler, get_deployment_handler,
    health_handler, list_deployments_handler, restart_app_handler, rollback_deployment_handler,
    start_app_handler, stop_app_handler, stop_deployment_handler, version_handler,
};
use crate::server::state::ServerState;
use crate::server::ws::{build_log_ws, container_logs_ws};

/// Build the router over the given state
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Applications
        .route(
            "/apps/{app_id}/deployments",
            get(list_deployments_handler).post(create_deployment_handler),
        )
        .route("/apps/{app_id}/start", post(start_app_handler))
        .route("/apps/{app_id}/stop", post(stop_app_handler))
        .route("/apps/{app_id}/restart", post(restart_app_handler))
        .route("/apps/{app_id}/status", get(app_status_handler))
        .route("/apps/{app_id}/logs/ws", get(container_logs_ws))
        // Deployments
        .route("/deployments/{deployment_id}", get(get_deployment_handler))
        .route("/deployments/{deployment_id}/stop", post(stop_deployment_handler))
        .route(
            "/deployments/{deployment_id}/rollback",
            post(rollback_deployment_handler),
        )
        .route("/deployments/{deployment_id}/logs", get(build_log_handler))
        .route("/deployments/{deployment_id}/logs/ws", get(build_log_ws))
        // State and middleware
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), PlatformError>>, PlatformError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| PlatformError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| PlatformError::ServerError(e.to_string()))
    });

    Ok(handle)
}
