//! JSON store tests

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::web_app;
use tokio_test::{assert_err, assert_ok};
use launchpad::deploy::fsm::DeploymentStatus;
use launchpad::errors::PlatformError;
use launchpad::filesys::file::File;
use launchpad::models::deployment::{NewDeployment, ProgressUpdate};
use launchpad::store::{incomplete_statuses, JsonStore, Store};

fn new_deployment(app_id: i64, commit: &str) -> NewDeployment {
    NewDeployment {
        app_id,
        commit_hash: commit.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_deployment_numbers_are_sequential_per_app() {
    let store = JsonStore::in_memory();
    store.upsert_application(web_app(1)).await.unwrap();
    store.upsert_application(web_app(2)).await.unwrap();

    let mut numbers = Vec::new();
    for i in 0..3 {
        let d = store
            .create_deployment(new_deployment(1, &format!("c{}", i)))
            .await
            .unwrap();
        numbers.push(d.deployment_number);
    }
    let other = store.create_deployment(new_deployment(2, "x")).await.unwrap();

    assert_eq!(numbers, vec![1, 2, 3]);
    assert_eq!(other.deployment_number, 1);
}

#[tokio::test]
async fn test_concurrent_creation_yields_unique_numbers() {
    let store = Arc::new(JsonStore::in_memory());
    store.upsert_application(web_app(1)).await.unwrap();

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .create_deployment(new_deployment(1, &format!("c{}", i)))
                    .await
                    .unwrap()
                    .deployment_number
            })
        })
        .collect();

    let mut numbers = HashSet::new();
    for handle in handles {
        assert!(numbers.insert(handle.await.unwrap()));
    }
    assert_eq!(numbers.len(), 16);
    assert_eq!(numbers.iter().max(), Some(&16));
}

#[tokio::test]
async fn test_finished_at_tracks_terminal_status() {
    let store = JsonStore::in_memory();
    store.upsert_application(web_app(1)).await.unwrap();
    let d = store.create_deployment(new_deployment(1, "abc")).await.unwrap();
    assert!(d.finished_at.is_none());

    let d = store
        .update_progress(d.id, ProgressUpdate::new(DeploymentStatus::Cloning, "cloning", 10))
        .await
        .unwrap();
    assert!(d.finished_at.is_none());
    assert!(d.started_at.is_some());

    let d = store
        .finish_deployment(d.id, DeploymentStatus::Failed, Some("boom".to_string()))
        .await
        .unwrap();
    assert!(d.finished_at.is_some());
    assert_eq!(d.error_message.as_deref(), Some("boom"));

    // terminal rows stay terminal
    let err = store
        .update_progress(d.id, ProgressUpdate::new(DeploymentStatus::Building, "building", 30))
        .await
        .unwrap_err();
    assert!(matches!(err, PlatformError::InvalidTransition(_)));
    let err = store
        .finish_deployment(d.id, DeploymentStatus::Success, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PlatformError::InvalidTransition(_)));
}

#[tokio::test]
async fn test_only_one_active_deployment() {
    let store = JsonStore::in_memory();
    store.upsert_application(web_app(1)).await.unwrap();
    store.upsert_application(web_app(2)).await.unwrap();
    let a = store.create_deployment(new_deployment(1, "a")).await.unwrap();
    let b = store.create_deployment(new_deployment(1, "b")).await.unwrap();
    let other = store.create_deployment(new_deployment(2, "c")).await.unwrap();

    assert_ok!(store.set_active_deployment(1, a.id).await);
    assert_ok!(store.set_active_deployment(2, other.id).await);
    assert_ok!(store.set_active_deployment(1, b.id).await);

    let active: Vec<i64> = store
        .list_deployments(1)
        .await
        .unwrap()
        .into_iter()
        .filter(|d| d.is_active)
        .map(|d| d.id)
        .collect();
    assert_eq!(active, vec![b.id]);
    assert!(store.get_deployment(other.id).await.unwrap().is_active);

    let err = store.set_active_deployment(2, a.id).await.unwrap_err();
    assert!(matches!(err, PlatformError::ConfigError(_)));
}

#[tokio::test]
async fn test_incomplete_status_listing() {
    let store = JsonStore::in_memory();
    store.upsert_application(web_app(1)).await.unwrap();
    let pending = store.create_deployment(new_deployment(1, "a")).await.unwrap();
    let building = store.create_deployment(new_deployment(1, "b")).await.unwrap();
    let done = store.create_deployment(new_deployment(1, "c")).await.unwrap();
    store
        .update_progress(building.id, ProgressUpdate::new(DeploymentStatus::Building, "building", 30))
        .await
        .unwrap();
    store
        .finish_deployment(done.id, DeploymentStatus::Stopped, None)
        .await
        .unwrap();

    let ids: Vec<i64> = store
        .list_deployments_by_status(&incomplete_statuses())
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.id)
        .collect();
    assert_eq!(ids, vec![pending.id, building.id]);
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    let id = {
        let store = JsonStore::open(File::new(&path)).await.unwrap();
        store.upsert_application(web_app(1)).await.unwrap();
        store.create_deployment(new_deployment(1, "abc")).await.unwrap().id
    };

    let store = JsonStore::open(File::new(&path)).await.unwrap();
    let d = store.get_deployment(id).await.unwrap();
    assert_eq!(d.commit_hash, "abc");
    assert_eq!(d.status, DeploymentStatus::Pending);
    assert!(store.get_template("redis").await.is_ok());

    let next = store.create_deployment(new_deployment(1, "def")).await.unwrap();
    assert!(next.id > id);
    assert_eq!(next.deployment_number, 2);
}

#[tokio::test]
async fn test_unknown_rows_are_not_found() {
    let store = JsonStore::in_memory();
    assert_err!(store.get_template("cockroach").await);
    assert!(store.get_application(9).await.unwrap_err().is_not_found());
    assert!(store.get_deployment(9).await.unwrap_err().is_not_found());
    assert!(store
        .create_deployment(new_deployment(9, "a"))
        .await
        .unwrap_err()
        .is_not_found());
}
