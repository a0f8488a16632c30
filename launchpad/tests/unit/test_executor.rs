//! Deployment executor tests

mod common;

use tokio_util::sync::CancellationToken;

use common::{database_app, web_app, Harness, HEAD_COMMIT};
use launchpad::deploy::cancel::CancellationRegistry;
use launchpad::deploy::control::DeploymentControl;
use launchpad::deploy::executor::STOPPED_BY_USER;
use launchpad::deploy::fsm::DeploymentStatus;
use launchpad::models::application::{AppStatus, AppType, Application, EnvVar};
use launchpad::models::deployment::NewDeployment;
use launchpad::store::Store;

#[tokio::test]
async fn test_web_app_without_domains() {
    let h = Harness::new().await;
    h.store.upsert_application(web_app(1)).await.unwrap();
    let deployment = h.pending(1).await;

    let finished = h
        .executor()
        .execute(deployment.id, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(finished.status, DeploymentStatus::Success);
    assert_eq!(finished.progress, 100);
    assert!(finished.finished_at.is_some());
    assert!(finished.is_active);
    assert_eq!(h.fetcher.clone_count(), 1);
    assert_eq!(h.runtime.build_count(), 1);

    let specs = h.runtime.created_specs();
    assert_eq!(specs.len(), 1);
    let spec = &specs[0];
    assert_eq!(spec.name, "app-1");
    assert_eq!(spec.network, "launchpad-proxy");
    assert!(spec.ports.is_empty());
    assert!(!spec.labels.keys().any(|k| k.starts_with("traefik.")));
    assert_eq!(spec.image, format!("app-1:{}", &HEAD_COMMIT[..12]));

    let app = h.store.get_application(1).await.unwrap();
    assert_eq!(app.status, AppStatus::Running);

    // the pinned commit is checked out
    let clones = h.fetcher.clones.lock().unwrap().clone();
    assert_eq!(clones[0].commit.as_deref(), Some(HEAD_COMMIT));
    assert_eq!(clones[0].branch, "main");
}

#[tokio::test]
async fn test_exposed_web_app_binds_host_port() {
    let h = Harness::new().await;
    let mut app = web_app(2);
    app.should_expose = true;
    app.domains = vec!["Shop.Example.com.".to_string()];
    h.store.upsert_application(app).await.unwrap();
    let deployment = h.pending(2).await;

    let finished = h
        .executor()
        .execute(deployment.id, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(finished.status, DeploymentStatus::Success);

    let spec = h.runtime.created_specs().remove(0);
    assert_eq!(spec.ports.len(), 1);
    assert_eq!(spec.ports[0].container_port, 3000);
    assert!(spec
        .labels
        .values()
        .any(|v| v.contains("shop.example.com")));
}

#[tokio::test]
async fn test_database_app_pulls_template_image() {
    let h = Harness::new().await;
    h.store
        .upsert_application(database_app(3, "redis"))
        .await
        .unwrap();
    let deployment = h.pending(3).await;

    let finished = h
        .executor()
        .execute(deployment.id, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(finished.status, DeploymentStatus::Success);
    assert_eq!(h.runtime.pulls.lock().unwrap().clone(), vec!["redis:7-alpine"]);
    assert_eq!(h.fetcher.clone_count(), 0);
    assert_eq!(h.runtime.build_count(), 0);
    assert_eq!(h.runtime.created_specs()[0].image, "redis:7-alpine");
}

#[tokio::test]
async fn test_database_env_overrides_template_defaults() {
    let h = Harness::new().await;
    h.store
        .upsert_application(database_app(4, "postgres"))
        .await
        .unwrap();
    h.store
        .set_env_var(EnvVar::new(4, "POSTGRES_PASSWORD", "s3cret"))
        .await
        .unwrap();
    let deployment = h.pending(4).await;

    h.executor()
        .execute(deployment.id, &CancellationToken::new())
        .await
        .unwrap();

    let spec = h.runtime.created_specs().remove(0);
    assert_eq!(spec.env.get("POSTGRES_PASSWORD").map(String::as_str), Some("s3cret"));
    assert_eq!(spec.env.get("POSTGRES_USER").map(String::as_str), Some("postgres"));
}

#[tokio::test]
async fn test_build_failure_marks_failed() {
    let h = Harness::new().await;
    h.store.upsert_application(web_app(5)).await.unwrap();
    *h.runtime.build_error.lock().unwrap() = Some("docker build failed: exit status 1".to_string());
    let deployment = h.pending(5).await;

    let finished = h
        .executor()
        .execute(deployment.id, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(finished.status, DeploymentStatus::Failed);
    assert_eq!(
        finished.error_message.as_deref(),
        Some("docker build failed: exit status 1")
    );
    assert!(finished.finished_at.is_some());
    assert!(!finished.is_active);
    assert!(h.runtime.created_specs().is_empty());
    assert_eq!(
        h.store.get_application(5).await.unwrap().status,
        AppStatus::Error
    );

    // the failure is in the build log
    let log = h.layout.build_log_file(&finished).read_string().await.unwrap();
    assert!(log.contains("docker build failed"));
}

#[tokio::test]
async fn test_missing_port_is_a_config_error() {
    let h = Harness::new().await;
    let mut app = web_app(6);
    app.port = String::new();
    h.store.upsert_application(app).await.unwrap();
    let deployment = h.pending(6).await;

    let finished = h
        .executor()
        .execute(deployment.id, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(finished.status, DeploymentStatus::Failed);
    assert_eq!(h.fetcher.clone_count(), 0);
}

#[tokio::test]
async fn test_compose_app_runs_stack() {
    let h = Harness::new().await;
    let mut app = Application::new(7, 1, "stack", AppType::Compose);
    app.git_repository = Some("https://github.com/acme/stack.git".to_string());
    app.git_branch = Some("main".to_string());
    h.store.upsert_application(app).await.unwrap();
    h.store
        .set_env_var(EnvVar::new(7, "API_KEY", "k").runtime())
        .await
        .unwrap();
    let deployment = h.pending(7).await;

    let finished = h
        .executor()
        .execute(deployment.id, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(finished.status, DeploymentStatus::Success);
    let ups = h.compose.ups.lock().unwrap().clone();
    assert_eq!(ups.len(), 1);
    assert_eq!(ups[0].0.name, "app-7");
    assert_eq!(ups[0].1.get("API_KEY").map(String::as_str), Some("k"));
    assert!(h.runtime.created_specs().is_empty());
}

#[tokio::test]
async fn test_rollback_reuses_existing_image() {
    let h = Harness::new().await;
    h.store.upsert_application(web_app(8)).await.unwrap();
    let first = h.pending(8).await;
    h.executor()
        .execute(first.id, &CancellationToken::new())
        .await
        .unwrap();

    let second = h.pending(8).await;
    h.executor()
        .execute(second.id, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(h.runtime.build_count(), 2);

    let rollback = h
        .store
        .create_deployment(NewDeployment {
            app_id: 8,
            commit_hash: first.commit_hash.clone(),
            rollback_from: Some(first.id),
            ..Default::default()
        })
        .await
        .unwrap();
    let finished = h
        .executor()
        .execute(rollback.id, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(finished.status, DeploymentStatus::Success);
    assert_eq!(h.runtime.build_count(), 2);

    // exactly one active deployment
    let active: Vec<_> = h
        .store
        .list_deployments(8)
        .await
        .unwrap()
        .into_iter()
        .filter(|d| d.is_active)
        .collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, rollback.id);
}

#[tokio::test]
async fn test_stop_interrupts_running_build() {
    let h = Harness::with_runtime(common::FakeRuntime::holding_builds()).await;
    h.store.upsert_application(web_app(9)).await.unwrap();
    let deployment = h.pending(9).await;

    let registry = std::sync::Arc::new(CancellationRegistry::new());
    let token = CancellationToken::new();
    let _registration = registry.register(deployment.id, token.clone());

    let executor = h.executor();
    let id = deployment.id;
    let handle = tokio::spawn(async move { executor.execute(id, &token).await });
    h.runtime.build_started.notified().await;

    let control = DeploymentControl::new(
        h.store(),
        common::RecordingQueue::new(),
        registry.clone(),
        h.fetcher.clone(),
    );
    let result = control.stop_deployment(id).await.unwrap();
    assert!(result.interrupted);

    let finished = handle.await.unwrap().unwrap();
    assert_eq!(finished.status, DeploymentStatus::Stopped);
    assert_eq!(finished.error_message.as_deref(), Some(STOPPED_BY_USER));
    assert!(h.runtime.created_specs().is_empty());
}

#[tokio::test]
async fn test_terminal_deployment_is_not_executed() {
    let h = Harness::new().await;
    h.store.upsert_application(web_app(10)).await.unwrap();
    let deployment = h.pending(10).await;
    h.store
        .finish_deployment(deployment.id, DeploymentStatus::Stopped, None)
        .await
        .unwrap();

    let finished = h
        .executor()
        .execute(deployment.id, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(finished.status, DeploymentStatus::Stopped);
    assert_eq!(h.fetcher.clone_count(), 0);
}

#[tokio::test]
async fn test_stop_persisted_before_cancel_is_not_a_failure() {
    let h = Harness::with_runtime(common::FakeRuntime::holding_builds()).await;
    h.store.upsert_application(web_app(11)).await.unwrap();
    let deployment = h.pending(11).await;

    let executor = h.executor();
    let token = CancellationToken::new();
    let id = deployment.id;
    let handle = {
        let token = token.clone();
        tokio::spawn(async move { executor.execute(id, &token).await })
    };
    h.runtime.build_started.notified().await;

    // the row is stopped but the token has not fired yet
    h.store
        .finish_deployment(id, DeploymentStatus::Stopped, Some(STOPPED_BY_USER.to_string()))
        .await
        .unwrap();
    h.runtime.release_build.notify_one();

    let finished = handle.await.unwrap().unwrap();
    assert!(!token.is_cancelled());
    assert_eq!(finished.status, DeploymentStatus::Stopped);
    assert_eq!(finished.error_message.as_deref(), Some(STOPPED_BY_USER));
    assert!(h.runtime.created_specs().is_empty());
    assert_eq!(
        h.store.get_application(11).await.unwrap().status,
        AppStatus::Stopped
    );

    let log = h.layout.build_log_file(&finished).read_string().await.unwrap();
    assert!(!log.contains("ERROR:"));
    assert!(log.contains(STOPPED_BY_USER));
}

#[tokio::test]
async fn test_success_prunes_images_beyond_retention() {
    let h = Harness::new().await;
    h.store.upsert_application(web_app(20)).await.unwrap();
    for i in 0..6 {
        h.runtime.seed_image(
            &format!("sha256:old{}", i),
            &format!("app-20:v{}", i),
            chrono::Duration::hours(i + 1),
        );
    }
    h.runtime
        .seed_image("sha256:other", "app-21:v0", chrono::Duration::days(30));
    *h.runtime.remove_error.lock().unwrap() = Some("sha256:old4".to_string());
    let deployment = h.pending(20).await;

    let finished = h
        .executor()
        .execute(deployment.id, &CancellationToken::new())
        .await
        .unwrap();

    // the new image plus the four newest old ones are kept (retention 5),
    // and a failed removal does not stop the next one
    assert_eq!(finished.status, DeploymentStatus::Success);
    assert_eq!(h.runtime.image_removals(), vec!["sha256:old4", "sha256:old5"]);
    let listed: Vec<String> = h
        .runtime
        .listed
        .lock()
        .unwrap()
        .iter()
        .map(|img| img.id.clone())
        .collect();
    assert!(listed.contains(&"sha256:old4".to_string()));
    assert!(!listed.contains(&"sha256:old5".to_string()));
    assert!(listed.contains(&"sha256:other".to_string()));
    assert!(listed.contains(&format!("sha256:app-20:{}", &HEAD_COMMIT[..12])));
}

#[tokio::test]
async fn test_pruning_never_removes_the_image_in_use() {
    let h = Harness::new().await;
    h.store.upsert_application(web_app(22)).await.unwrap();
    h.runtime
        .seed_image("sha256:inuse", "app-22:0ld1mage", chrono::Duration::hours(10));
    for i in 0..5 {
        h.runtime.seed_image(
            &format!("sha256:new{}", i),
            &format!("app-22:n{}", i),
            chrono::Duration::minutes(i + 1),
        );
    }
    let rollback = h
        .store
        .create_deployment(NewDeployment {
            app_id: 22,
            commit_hash: "0ld1mage".to_string(),
            rollback_from: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();

    let finished = h
        .executor()
        .execute(rollback.id, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(finished.status, DeploymentStatus::Success);
    assert_eq!(h.runtime.build_count(), 0);
    assert_eq!(h.runtime.created_specs()[0].image, "app-22:0ld1mage");
    assert!(h.runtime.image_removals().is_empty());
}
