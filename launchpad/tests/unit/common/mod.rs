//! Test doubles shared by the integration tests

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use launchpad::deploy::buildlog::BuildLog;
use launchpad::deploy::compose::{ComposeDriver, ComposeProject, ComposeService};
use launchpad::deploy::docker::{
    BuildRequest, ContainerRuntime, ContainerSpec, ContainerStatus, ImageSummary,
};
use launchpad::deploy::executor::{DeploymentExecutor, ExecutorContext};
use launchpad::deploy::fsm::DeploymentStatus;
use launchpad::deploy::git::{CloneRequest, SourceFetcher};
use launchpad::errors::PlatformError;
use launchpad::models::application::{AppType, Application};
use launchpad::models::deployment::{CommitInfo, Deployment, NewDeployment};
use launchpad::storage::layout::StorageLayout;
use launchpad::storage::settings::DeploySettings;
use launchpad::store::{JsonStore, Store};
use launchpad::workers::queue::JobQueue;

// ================================= RUNTIME =================================== //

#[derive(Default)]
pub struct FakeRuntime {
    pub builds: Mutex<Vec<BuildRequest>>,
    pub pulls: Mutex<Vec<String>>,
    pub created: Mutex<Vec<ContainerSpec>>,
    pub removed: Mutex<Vec<String>>,
    pub images: Mutex<HashSet<String>>,
    pub running: Mutex<HashSet<String>>,

    /// Images reported by `list_images`; builds add theirs
    pub listed: Mutex<Vec<ImageSummary>>,
    /// Every `remove_image` call, failed ones included
    pub image_removals: Mutex<Vec<String>>,
    /// Image id whose removal fails
    pub remove_error: Mutex<Option<String>>,

    /// Error returned by the next builds
    pub build_error: Mutex<Option<String>>,

    /// Builds wait for `release_build` (or cancellation) while set
    pub hold_builds: AtomicBool,
    pub panic_on_build: AtomicBool,
    pub build_started: Notify,
    pub release_build: Notify,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn holding_builds() -> Arc<Self> {
        let runtime = Self::default();
        runtime.hold_builds.store(true, Ordering::SeqCst);
        Arc::new(runtime)
    }

    pub fn build_count(&self) -> usize {
        self.builds.lock().unwrap().len()
    }

    pub fn created_specs(&self) -> Vec<ContainerSpec> {
        self.created.lock().unwrap().clone()
    }

    /// Register a local image of `reference`, created `age` ago
    pub fn seed_image(&self, id: &str, reference: &str, age: chrono::Duration) {
        self.images.lock().unwrap().insert(reference.to_string());
        self.listed.lock().unwrap().push(ImageSummary {
            id: id.to_string(),
            reference: reference.to_string(),
            created_at: Utc::now() - age,
        });
    }

    pub fn image_removals(&self) -> Vec<String> {
        self.image_removals.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn build_image(
        &self,
        request: &BuildRequest,
        log: &BuildLog,
        token: &CancellationToken,
    ) -> Result<(), PlatformError> {
        self.builds.lock().unwrap().push(request.clone());
        log.line(&format!("building {}", request.tag)).await;
        self.build_started.notify_one();

        if self.panic_on_build.load(Ordering::SeqCst) {
            panic!("builder exploded");
        }
        if self.hold_builds.load(Ordering::SeqCst) {
            tokio::select! {
                _ = token.cancelled() => {
                    return Err(PlatformError::Canceled("docker build".to_string()));
                }
                _ = self.release_build.notified() => {}
            }
        }
        if let Some(message) = self.build_error.lock().unwrap().clone() {
            return Err(PlatformError::CommandFailed(message));
        }

        self.images.lock().unwrap().insert(request.tag.clone());
        self.listed.lock().unwrap().push(ImageSummary {
            id: format!("sha256:{}", request.tag),
            reference: request.tag.clone(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn pull_image(
        &self,
        image: &str,
        _log: &BuildLog,
        _token: &CancellationToken,
    ) -> Result<(), PlatformError> {
        self.pulls.lock().unwrap().push(image.to_string());
        self.images.lock().unwrap().insert(image.to_string());
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool, PlatformError> {
        Ok(self.images.lock().unwrap().contains(image))
    }

    async fn container_exists(&self, name: &str) -> Result<bool, PlatformError> {
        Ok(self.running.lock().unwrap().contains(name))
    }

    async fn create_and_start_container(
        &self,
        spec: &ContainerSpec,
        _token: &CancellationToken,
    ) -> Result<String, PlatformError> {
        self.created.lock().unwrap().push(spec.clone());
        self.running.lock().unwrap().insert(spec.name.clone());
        Ok(format!("id-{}", spec.name))
    }

    async fn start_container(&self, name: &str) -> Result<(), PlatformError> {
        self.running.lock().unwrap().insert(name.to_string());
        Ok(())
    }

    async fn stop_container(&self, name: &str) -> Result<(), PlatformError> {
        self.running.lock().unwrap().remove(name);
        Ok(())
    }

    async fn restart_container(&self, name: &str) -> Result<(), PlatformError> {
        self.running.lock().unwrap().insert(name.to_string());
        Ok(())
    }

    async fn stop_and_remove_container(
        &self,
        name: &str,
        _token: &CancellationToken,
    ) -> Result<(), PlatformError> {
        self.removed.lock().unwrap().push(name.to_string());
        self.running.lock().unwrap().remove(name);
        Ok(())
    }

    async fn container_status(&self, name: &str) -> Result<ContainerStatus, PlatformError> {
        if self.running.lock().unwrap().contains(name) {
            Ok(ContainerStatus {
                name: name.to_string(),
                exists: true,
                running: true,
                state: "running".to_string(),
                image: None,
                started_at: None,
            })
        } else {
            Ok(ContainerStatus::not_found(name))
        }
    }

    async fn container_logs(&self, _name: &str, _tail: usize) -> Result<Vec<String>, PlatformError> {
        Ok(Vec::new())
    }

    async fn follow_container_logs(
        &self,
        _name: &str,
        _tail: usize,
        _token: CancellationToken,
    ) -> Result<mpsc::Receiver<String>, PlatformError> {
        let (tx, rx) = mpsc::channel(4);
        let _ = tx.send("listening on :3000".to_string()).await;
        Ok(rx)
    }

    async fn list_images(&self, repository: &str) -> Result<Vec<ImageSummary>, PlatformError> {
        let prefix = format!("{}:", repository);
        Ok(self
            .listed
            .lock()
            .unwrap()
            .iter()
            .filter(|img| img.reference.starts_with(&prefix))
            .cloned()
            .collect())
    }

    async fn remove_image(&self, image_id: &str, _force: bool) -> Result<(), PlatformError> {
        self.image_removals.lock().unwrap().push(image_id.to_string());
        if self.remove_error.lock().unwrap().as_deref() == Some(image_id) {
            return Err(PlatformError::CommandFailed(format!(
                "image {} is referenced by a stopped container",
                image_id
            )));
        }
        self.listed.lock().unwrap().retain(|img| img.id != image_id);
        Ok(())
    }
}

// ================================= COMPOSE =================================== //

#[derive(Default)]
pub struct FakeCompose {
    pub ups: Mutex<Vec<(ComposeProject, BTreeMap<String, String>)>>,
    pub actions: Mutex<Vec<String>>,
}

impl FakeCompose {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl ComposeDriver for FakeCompose {
    async fn up(
        &self,
        project: &ComposeProject,
        env: &BTreeMap<String, String>,
        _log: &BuildLog,
        _token: &CancellationToken,
    ) -> Result<(), PlatformError> {
        self.ups.lock().unwrap().push((project.clone(), env.clone()));
        Ok(())
    }

    async fn start(&self, project: &ComposeProject) -> Result<(), PlatformError> {
        self.actions.lock().unwrap().push(format!("start {}", project.name));
        Ok(())
    }

    async fn stop(&self, project: &ComposeProject) -> Result<(), PlatformError> {
        self.actions.lock().unwrap().push(format!("stop {}", project.name));
        Ok(())
    }

    async fn restart(&self, project: &ComposeProject) -> Result<(), PlatformError> {
        self.actions.lock().unwrap().push(format!("restart {}", project.name));
        Ok(())
    }

    async fn ps(&self, _project: &ComposeProject) -> Result<Vec<ComposeService>, PlatformError> {
        Ok(Vec::new())
    }

    async fn logs(&self, _project: &ComposeProject, _tail: usize) -> Result<Vec<String>, PlatformError> {
        Ok(Vec::new())
    }
}

// ================================= FETCHER =================================== //

pub const HEAD_COMMIT: &str = "0a1b2c3d4e5f60718293a4b5c6d7e8f901234567";

#[derive(Default)]
pub struct FakeFetcher {
    pub clones: Mutex<Vec<CloneRequest>>,
}

impl FakeFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn clone_count(&self) -> usize {
        self.clones.lock().unwrap().len()
    }
}

#[async_trait]
impl SourceFetcher for FakeFetcher {
    async fn clone_repository(
        &self,
        request: &CloneRequest,
        _log: &BuildLog,
        _token: &CancellationToken,
    ) -> Result<CommitInfo, PlatformError> {
        self.clones.lock().unwrap().push(request.clone());
        tokio::fs::create_dir_all(&request.dest).await?;
        Ok(CommitInfo {
            sha: request.commit.clone().unwrap_or_else(|| HEAD_COMMIT.to_string()),
            message: "initial commit".to_string(),
            author: "dev".to_string(),
            url: String::new(),
        })
    }

    async fn latest_commit(&self, _repository: &str, _branch: &str) -> Result<CommitInfo, PlatformError> {
        Ok(CommitInfo {
            sha: HEAD_COMMIT.to_string(),
            message: "head".to_string(),
            author: "dev".to_string(),
            url: String::new(),
        })
    }
}

// ================================== QUEUE ==================================== //

/// Records admissions instead of running them
#[derive(Default)]
pub struct RecordingQueue {
    pub jobs: Mutex<Vec<i64>>,
    pub reject: AtomicBool,
}

impl RecordingQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn jobs(&self) -> Vec<i64> {
        self.jobs.lock().unwrap().clone()
    }
}

impl JobQueue for RecordingQueue {
    fn add_job(&self, deployment_id: i64) -> Result<(), PlatformError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(PlatformError::QueueFull);
        }
        self.jobs.lock().unwrap().push(deployment_id);
        Ok(())
    }
}

// ================================= FIXTURES ================================== //

pub struct Harness {
    pub _dir: tempfile::TempDir,
    pub layout: StorageLayout,
    pub store: Arc<JsonStore>,
    pub runtime: Arc<FakeRuntime>,
    pub compose: Arc<FakeCompose>,
    pub fetcher: Arc<FakeFetcher>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_runtime(FakeRuntime::new()).await
    }

    pub async fn with_runtime(runtime: Arc<FakeRuntime>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        layout.setup().await.unwrap();
        Self {
            _dir: dir,
            layout,
            store: Arc::new(JsonStore::in_memory()),
            runtime,
            compose: FakeCompose::new(),
            fetcher: FakeFetcher::new(),
        }
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    pub fn executor(&self) -> Arc<DeploymentExecutor> {
        Arc::new(DeploymentExecutor::new(ExecutorContext {
            store: self.store.clone(),
            runtime: self.runtime.clone(),
            compose: self.compose.clone(),
            fetcher: self.fetcher.clone(),
            layout: self.layout.clone(),
            settings: DeploySettings::default(),
        }))
    }

    pub async fn pending(&self, app_id: i64) -> Deployment {
        self.store
            .create_deployment(NewDeployment {
                app_id,
                commit_hash: HEAD_COMMIT.to_string(),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    pub async fn reload(&self, deployment_id: i64) -> Deployment {
        self.store.get_deployment(deployment_id).await.unwrap()
    }

    /// Poll until the deployment is terminal
    pub async fn wait_terminal(&self, deployment_id: i64) -> Deployment {
        for _ in 0..200 {
            let d = self.reload(deployment_id).await;
            if d.status.is_terminal() {
                return d;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("deployment {} did not finish", deployment_id);
    }

    pub async fn wait_status(&self, deployment_id: i64, status: DeploymentStatus) {
        for _ in 0..200 {
            if self.reload(deployment_id).await.status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("deployment {} never reached {}", deployment_id, status);
    }
}

pub fn web_app(id: i64) -> Application {
    let mut app = Application::new(id, 1, format!("web-{}", id), AppType::Web);
    app.git_repository = Some("https://github.com/acme/shop.git".to_string());
    app.git_branch = Some("main".to_string());
    app.port = "3000".to_string();
    app
}

pub fn database_app(id: i64, template: &str) -> Application {
    let mut app = Application::new(id, 1, format!("db-{}", id), AppType::Database);
    app.template_name = Some(template.to_string());
    app
}
