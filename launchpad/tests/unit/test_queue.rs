//! Queue and job runner tests

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{web_app, FakeRuntime, Harness, RecordingQueue};
use launchpad::deploy::cancel::CancellationRegistry;
use launchpad::deploy::control::DeploymentControl;
use launchpad::deploy::fsm::DeploymentStatus;
use launchpad::deploy::lock::AppLocks;
use launchpad::errors::PlatformError;
use launchpad::models::application::AppStatus;
use launchpad::store::Store;
use launchpad::workers::queue::{JobOutcome, JobQueue, JobRunner, Options, Queue};

struct Pipeline {
    runner: Arc<JobRunner>,
    locks: Arc<AppLocks>,
    registry: Arc<CancellationRegistry>,
}

fn pipeline(h: &Harness) -> Pipeline {
    let locks = Arc::new(AppLocks::new());
    let registry = Arc::new(CancellationRegistry::new());
    let runner = Arc::new(JobRunner::new(
        h.store(),
        h.executor(),
        locks.clone(),
        registry.clone(),
    ));
    Pipeline {
        runner,
        locks,
        registry,
    }
}

#[tokio::test]
async fn test_second_deployment_of_same_app_is_rejected() {
    let h = Harness::with_runtime(FakeRuntime::holding_builds()).await;
    h.store.upsert_application(web_app(1)).await.unwrap();
    let p = pipeline(&h);
    let queue = Queue::start(
        &Options {
            capacity: 10,
            workers: 2,
        },
        p.runner.clone(),
    );

    let first = h.pending(1).await;
    let second = h.pending(1).await;

    queue.add_job(first.id).unwrap();
    h.runtime.build_started.notified().await;
    queue.add_job(second.id).unwrap();

    let rejected = h.wait_terminal(second.id).await;
    assert_eq!(rejected.status, DeploymentStatus::Failed);
    assert_eq!(
        rejected.error_message.as_deref(),
        Some("deployment already in progress for app 1")
    );

    // the first one is untouched and still running
    let running = h.reload(first.id).await;
    assert_eq!(running.status, DeploymentStatus::Building);
    assert!(running.finished_at.is_none());

    h.runtime.release_build.notify_one();
    let done = h.wait_terminal(first.id).await;
    assert_eq!(done.status, DeploymentStatus::Success);
    assert_eq!(h.runtime.build_count(), 1);

    queue.close().await;
    assert!(!p.locks.is_locked(1));
}

#[tokio::test]
async fn test_run_job_while_locked_fails_fast() {
    let h = Harness::new().await;
    h.store.upsert_application(web_app(2)).await.unwrap();
    let p = pipeline(&h);
    let deployment = h.pending(2).await;

    let guard = p.locks.try_lock(2).unwrap();
    assert_eq!(p.runner.run_job(deployment.id).await, JobOutcome::Rejected);
    drop(guard);

    assert_eq!(h.reload(deployment.id).await.status, DeploymentStatus::Failed);
    assert_eq!(h.runtime.build_count(), 0);
}

#[tokio::test]
async fn test_stopped_before_dequeue_is_skipped() {
    let h = Harness::new().await;
    h.store.upsert_application(web_app(3)).await.unwrap();
    let p = pipeline(&h);
    let queue = RecordingQueue::new();
    let control = DeploymentControl::new(
        h.store(),
        queue.clone(),
        p.registry.clone(),
        h.fetcher.clone(),
    );

    let deployment = control.create_deployment(3, None).await.unwrap();
    assert_eq!(queue.jobs(), vec![deployment.id]);

    let stopped = control.stop_deployment(deployment.id).await.unwrap();
    assert!(!stopped.interrupted);
    assert_eq!(stopped.deployment.status, DeploymentStatus::Stopped);

    let outcome = p.runner.run_job(deployment.id).await;
    assert_eq!(outcome, JobOutcome::Skipped(DeploymentStatus::Stopped));

    let row = h.reload(deployment.id).await;
    assert_eq!(row.status, DeploymentStatus::Stopped);
    assert!(row.finished_at.is_some());
    assert_eq!(h.fetcher.clone_count(), 0);
    assert_eq!(h.runtime.build_count(), 0);
}

#[tokio::test]
async fn test_stop_of_finished_deployment_is_rejected() {
    let h = Harness::new().await;
    h.store.upsert_application(web_app(4)).await.unwrap();
    let p = pipeline(&h);
    let deployment = h.pending(4).await;
    assert_eq!(
        p.runner.run_job(deployment.id).await,
        JobOutcome::Completed(DeploymentStatus::Success)
    );

    let control = DeploymentControl::new(
        h.store(),
        RecordingQueue::new(),
        p.registry.clone(),
        h.fetcher.clone(),
    );
    let err = control.stop_deployment(deployment.id).await.unwrap_err();
    assert!(matches!(err, PlatformError::InvalidTransition(_)));
    assert_eq!(h.reload(deployment.id).await.status, DeploymentStatus::Success);
}

#[tokio::test]
async fn test_panic_fails_deployment_and_releases_lock() {
    let h = Harness::new().await;
    h.store.upsert_application(web_app(5)).await.unwrap();
    let p = pipeline(&h);

    h.runtime.panic_on_build.store(true, Ordering::SeqCst);
    let deployment = h.pending(5).await;
    assert_eq!(p.runner.run_job(deployment.id).await, JobOutcome::Panicked);

    let row = h.reload(deployment.id).await;
    assert_eq!(row.status, DeploymentStatus::Failed);
    assert_eq!(
        row.error_message.as_deref(),
        Some("deployment panicked: builder exploded")
    );
    assert_eq!(h.store.get_application(5).await.unwrap().status, AppStatus::Error);
    assert!(!p.locks.is_locked(5));
    assert!(!p.registry.is_registered(deployment.id));

    h.runtime.panic_on_build.store(false, Ordering::SeqCst);
    let retry = h.pending(5).await;
    assert_eq!(
        p.runner.run_job(retry.id).await,
        JobOutcome::Completed(DeploymentStatus::Success)
    );
}

#[tokio::test]
async fn test_full_queue_rejects_without_blocking() {
    let h = Harness::with_runtime(FakeRuntime::holding_builds()).await;
    for app_id in 10..13 {
        h.store.upsert_application(web_app(app_id)).await.unwrap();
    }
    let p = pipeline(&h);
    let queue = Queue::start(
        &Options {
            capacity: 1,
            workers: 1,
        },
        p.runner.clone(),
    );

    let a = h.pending(10).await;
    let b = h.pending(11).await;
    let c = h.pending(12).await;

    queue.add_job(a.id).unwrap();
    h.runtime.build_started.notified().await;
    queue.add_job(b.id).unwrap();
    assert!(matches!(queue.add_job(c.id), Err(PlatformError::QueueFull)));

    h.runtime.hold_builds.store(false, Ordering::SeqCst);
    h.runtime.release_build.notify_one();
    assert_eq!(h.wait_terminal(a.id).await.status, DeploymentStatus::Success);
    assert_eq!(h.wait_terminal(b.id).await.status, DeploymentStatus::Success);

    queue.close().await;
    assert!(queue.is_closed());
    assert!(matches!(queue.add_job(c.id), Err(PlatformError::QueueClosed)));
}

#[tokio::test]
async fn test_rejected_admission_fails_the_row() {
    let h = Harness::new().await;
    h.store.upsert_application(web_app(6)).await.unwrap();
    let queue = RecordingQueue::new();
    queue.reject.store(true, Ordering::SeqCst);
    let control = DeploymentControl::new(
        h.store(),
        queue.clone(),
        Arc::new(CancellationRegistry::new()),
        h.fetcher.clone(),
    );

    let err = control.create_deployment(6, None).await.unwrap_err();
    assert!(matches!(err, PlatformError::QueueFull));

    let rows = h.store.list_deployments(6).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, DeploymentStatus::Failed);
    assert_eq!(rows[0].error_message.as_deref(), Some("queue is full"));
}

#[tokio::test]
async fn test_explicit_commit_must_be_a_plain_ref() {
    let h = Harness::new().await;
    h.store.upsert_application(web_app(7)).await.unwrap();
    let queue = RecordingQueue::new();
    let control = DeploymentControl::new(
        h.store(),
        queue.clone(),
        Arc::new(CancellationRegistry::new()),
        h.fetcher.clone(),
    );

    for commit in ["../../../tmp/pwn", "feature/x", "--upload-pack=touch"] {
        let err = control
            .create_deployment(7, Some(commit.to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::ConfigError(_)), "{commit}");
    }
    assert!(h.store.list_deployments(7).await.unwrap().is_empty());
    assert!(queue.jobs().is_empty());

    let accepted = control
        .create_deployment(7, Some(" 0a1b2c3d4e5f ".to_string()))
        .await
        .unwrap();
    assert_eq!(accepted.commit_hash, "0a1b2c3d4e5f");
    assert_eq!(queue.jobs(), vec![accepted.id]);
    assert!(h
        .layout
        .build_log_file(&accepted)
        .path()
        .starts_with(h.layout.build_logs_dir().path()));
}
