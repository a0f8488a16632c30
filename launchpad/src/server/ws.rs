//! WebSocket log bridges

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::PlatformError;
use crate::logstream::{spawn_build_log_stream, spawn_container_log_stream, StreamEvent};
use crate::models::application::AppType;
use crate::server::error::ApiError;
use crate::server::state::ServerState;

const DEFAULT_TAIL: usize = 200;

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    tail: Option<usize>,
}

/// Stream the build log of a deployment
pub async fn build_log_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
    Path(deployment_id): Path<i64>,
) -> Result<Response, ApiError> {
    // reject unknown deployments before upgrading
    state.store.get_deployment(deployment_id).await?;

    info!("Opening build log stream of deployment {}", deployment_id);
    Ok(ws.on_upgrade(move |socket| async move {
        let token = state.shutdown.child_token();
        let events = spawn_build_log_stream(
            state.store.clone(),
            state.layout.clone(),
            deployment_id,
            state.tail_options.clone(),
            token.clone(),
        );
        forward_events(socket, events, token).await;
    }))
}

/// Follow the live output of an application container
pub async fn container_logs_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
    Path(app_id): Path<i64>,
    Query(query): Query<LogsQuery>,
) -> Result<Response, ApiError> {
    let app = state.store.get_application(app_id).await?;
    if app.app_type == AppType::Compose {
        return Err(PlatformError::ConfigError(format!(
            "app {} is a compose stack, live logs follow single containers only",
            app_id
        ))
        .into());
    }

    let container = app.container_name();
    let tail = query.tail.unwrap_or(DEFAULT_TAIL);
    info!("Opening container log stream of {}", container);
    Ok(ws.on_upgrade(move |socket| async move {
        let token = state.shutdown.child_token();
        let events = spawn_container_log_stream(state.runtime.clone(), container, tail, token.clone());
        forward_events(socket, events, token).await;
    }))
}

/// Pump events into the socket until either side ends; the token is
/// canceled on return so the producer stops too
async fn forward_events(
    socket: WebSocket,
    mut events: mpsc::Receiver<StreamEvent>,
    token: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Failed to serialize stream event: {}", e);
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(payload.into())).await.is_err() {
                    debug!("Log viewer went away");
                    break;
                }
            }
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
            _ = token.cancelled() => break,
        }
    }

    token.cancel();
    let _ = ws_tx.send(Message::Close(None)).await;
}
