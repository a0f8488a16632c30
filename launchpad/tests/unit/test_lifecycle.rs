//! Application lifecycle tests

mod common;

use tokio_util::sync::CancellationToken;

use common::{web_app, Harness};
use launchpad::deploy::lifecycle::AppLifecycle;
use launchpad::models::application::{AppStatus, AppType, Application};
use launchpad::store::Store;

fn lifecycle(h: &Harness) -> AppLifecycle {
    AppLifecycle::new(
        h.store(),
        h.runtime.clone(),
        h.compose.clone(),
        h.layout.clone(),
    )
}

#[tokio::test]
async fn test_stop_and_start_container_app() {
    let h = Harness::new().await;
    h.store.upsert_application(web_app(1)).await.unwrap();
    let deployment = h.pending(1).await;
    h.executor()
        .execute(deployment.id, &CancellationToken::new())
        .await
        .unwrap();

    let lifecycle = lifecycle(&h);
    let status = lifecycle.status(1).await.unwrap();
    assert!(status.running());
    assert_eq!(status.active_deployment_id, Some(deployment.id));

    assert_eq!(lifecycle.stop(1).await.unwrap(), AppStatus::Stopped);
    let status = lifecycle.status(1).await.unwrap();
    assert!(!status.running());
    assert_eq!(status.status, AppStatus::Stopped);

    assert_eq!(lifecycle.restart(1).await.unwrap(), AppStatus::Running);
    assert!(lifecycle.status(1).await.unwrap().running());
    assert_eq!(
        h.store.get_application(1).await.unwrap().status,
        AppStatus::Running
    );
}

#[tokio::test]
async fn test_compose_app_uses_stack_commands() {
    let h = Harness::new().await;
    let app = Application::new(2, 1, "stack", AppType::Compose);
    h.store.upsert_application(app).await.unwrap();

    let lifecycle = lifecycle(&h);
    assert_eq!(lifecycle.stop(2).await.unwrap(), AppStatus::Stopped);
    assert_eq!(lifecycle.start(2).await.unwrap(), AppStatus::Running);

    assert_eq!(
        h.compose.actions.lock().unwrap().clone(),
        vec!["stop app-2".to_string(), "start app-2".to_string()]
    );
    let status = lifecycle.status(2).await.unwrap();
    assert!(status.container.is_none());
    assert!(h.runtime.created_specs().is_empty());
}

#[tokio::test]
async fn test_unknown_app_is_not_found() {
    let h = Harness::new().await;
    let err = lifecycle(&h).start(42).await.unwrap_err();
    assert!(err.is_not_found());
}
