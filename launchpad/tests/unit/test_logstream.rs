//! Build log streaming tests

mod common;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::{web_app, Harness};
use launchpad::deploy::fsm::DeploymentStatus;
use launchpad::logstream::{spawn_build_log_stream, LineKind, StreamEvent, TailOptions};
use launchpad::store::Store;

fn fast_options() -> TailOptions {
    TailOptions {
        file_wait_attempts: 3,
        file_wait_interval: Duration::from_millis(10),
        poll_interval: Duration::from_millis(10),
        status_interval: Duration::from_millis(20),
    }
}

async fn collect(mut rx: tokio::sync::mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_finished_deployment_streams_log_then_done() {
    let h = Harness::new().await;
    h.store.upsert_application(web_app(1)).await.unwrap();
    let deployment = h.pending(1).await;
    h.layout
        .build_log_file(&deployment)
        .write_string("==> cloning\nStep 1/3 : FROM node\nERROR: build failed\n")
        .await
        .unwrap();
    h.store
        .finish_deployment(deployment.id, DeploymentStatus::Failed, Some("build failed".into()))
        .await
        .unwrap();

    let rx = spawn_build_log_stream(
        h.store(),
        h.layout.clone(),
        deployment.id,
        fast_options(),
        CancellationToken::new(),
    );
    let events = collect(rx).await;

    let kinds: Vec<LineKind> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Log { stream, .. } => Some(*stream),
            _ => None,
        })
        .collect();
    assert_eq!(kinds, vec![LineKind::Plain, LineKind::Stdout, LineKind::Stderr]);

    assert!(matches!(events.first(), Some(StreamEvent::Status { .. })));
    assert_eq!(
        events.last(),
        Some(&StreamEvent::Done {
            status: DeploymentStatus::Failed
        })
    );
}

#[tokio::test]
async fn test_missing_log_of_running_deployment_is_a_stream_error() {
    let h = Harness::new().await;
    h.store.upsert_application(web_app(2)).await.unwrap();
    let deployment = h.pending(2).await;

    let rx = spawn_build_log_stream(
        h.store(),
        h.layout.clone(),
        deployment.id,
        fast_options(),
        CancellationToken::new(),
    );
    let events = collect(rx).await;

    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], StreamEvent::Error { .. }));
}

#[tokio::test]
async fn test_missing_log_of_finished_deployment_is_done() {
    let h = Harness::new().await;
    h.store.upsert_application(web_app(3)).await.unwrap();
    let deployment = h.pending(3).await;
    h.store
        .finish_deployment(deployment.id, DeploymentStatus::Stopped, None)
        .await
        .unwrap();

    let rx = spawn_build_log_stream(
        h.store(),
        h.layout.clone(),
        deployment.id,
        fast_options(),
        CancellationToken::new(),
    );
    let events = collect(rx).await;

    assert_eq!(
        events.last(),
        Some(&StreamEvent::Done {
            status: DeploymentStatus::Stopped
        })
    );
    assert!(!events.iter().any(|e| matches!(e, StreamEvent::Error { .. })));
}
