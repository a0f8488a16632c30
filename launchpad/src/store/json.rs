//! JSON document store
//!
//! Keeps the whole state in memory and rewrites the backing file atomically
//! after every mutation. Mutations are applied to a copy and only swapped in
//! once persisted, so a failed write never leaves half-applied state behind.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::deploy::fsm::DeploymentStatus;
use crate::errors::PlatformError;
use crate::filesys::file::File;
use crate::models::application::{AppStatus, Application, EnvVar};
use crate::models::deployment::{Deployment, NewDeployment, ProgressUpdate};
use crate::models::template::{builtin_templates, ServiceTemplate};
use crate::models::update_log::{UpdateLog, UpdateStatus};
use crate::store::Store;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    next_deployment_id: i64,

    #[serde(default)]
    next_update_id: i64,

    #[serde(default)]
    applications: BTreeMap<i64, Application>,

    #[serde(default)]
    env_vars: Vec<EnvVar>,

    #[serde(default)]
    templates: BTreeMap<String, ServiceTemplate>,

    #[serde(default)]
    deployments: BTreeMap<i64, Deployment>,

    #[serde(default)]
    update_logs: Vec<UpdateLog>,
}

impl StoreData {
    fn seed_templates(&mut self) {
        for template in builtin_templates() {
            self.templates
                .entry(template.name.clone())
                .or_insert(template);
        }
    }

    fn deployment_mut(&mut self, deployment_id: i64) -> Result<&mut Deployment, PlatformError> {
        self.deployments
            .get_mut(&deployment_id)
            .ok_or_else(|| PlatformError::NotFound(format!("deployment {}", deployment_id)))
    }
}

/// File-backed (or purely in-memory) implementation of [`Store`]
pub struct JsonStore {
    data: Mutex<StoreData>,
    file: Option<File>,
}

impl JsonStore {
    /// A store that is never written to disk
    pub fn in_memory() -> Self {
        let mut data = StoreData::default();
        data.seed_templates();
        Self {
            data: Mutex::new(data),
            file: None,
        }
    }

    /// Open (or create) a store persisted at `file`
    pub async fn open(file: File) -> Result<Self, PlatformError> {
        let mut data = if file.exists().await {
            let data: StoreData = file.read_json().await.map_err(|e| {
                PlatformError::StorageError(format!(
                    "failed to read state file {}: {}",
                    file.path().display(),
                    e
                ))
            })?;
            info!(
                "Loaded state: {} applications, {} deployments",
                data.applications.len(),
                data.deployments.len()
            );
            data
        } else {
            info!("Creating new state file at {}", file.path().display());
            StoreData::default()
        };
        data.seed_templates();

        file.write_json(&data).await?;
        Ok(Self {
            data: Mutex::new(data),
            file: Some(file),
        })
    }

    async fn read<T>(&self, f: impl FnOnce(&StoreData) -> Result<T, PlatformError>) -> Result<T, PlatformError> {
        let data = self.data.lock().await;
        f(&data)
    }

    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut StoreData) -> Result<T, PlatformError>,
    ) -> Result<T, PlatformError> {
        let mut data = self.data.lock().await;
        let mut next = data.clone();
        let out = f(&mut next)?;

        if let Some(file) = &self.file {
            file.write_json(&next)
                .await
                .map_err(|e| PlatformError::StorageError(format!("failed to persist state: {}", e)))?;
        }

        *data = next;
        Ok(out)
    }

    // ------------------------ external collaborator CRUD ---------------------- //

    /// Insert or replace an application
    pub async fn upsert_application(&self, app: Application) -> Result<(), PlatformError> {
        self.mutate(|data| {
            data.applications.insert(app.id, app);
            Ok(())
        })
        .await
    }

    /// Delete an application together with its deployments and env vars
    pub async fn delete_application(&self, app_id: i64) -> Result<(), PlatformError> {
        self.mutate(|data| {
            if data.applications.remove(&app_id).is_none() {
                return Err(PlatformError::NotFound(format!("application {}", app_id)));
            }
            data.deployments.retain(|_, d| d.app_id != app_id);
            data.env_vars.retain(|v| v.app_id != app_id);
            Ok(())
        })
        .await
    }

    /// Insert an env var row, replacing any existing row with the same key
    pub async fn set_env_var(&self, var: EnvVar) -> Result<(), PlatformError> {
        self.mutate(|data| {
            data.env_vars
                .retain(|v| !(v.app_id == var.app_id && v.key == var.key));
            data.env_vars.push(var);
            Ok(())
        })
        .await
    }

    pub async fn upsert_template(&self, template: ServiceTemplate) -> Result<(), PlatformError> {
        self.mutate(|data| {
            data.templates.insert(template.name.clone(), template);
            Ok(())
        })
        .await
    }

    /// Record the start of a self-update
    pub async fn create_update_log(
        &self,
        from_version: &str,
        target_version: &str,
    ) -> Result<UpdateLog, PlatformError> {
        self.mutate(|data| {
            data.next_update_id += 1;
            let log = UpdateLog {
                id: data.next_update_id,
                from_version: from_version.to_string(),
                target_version: target_version.to_string(),
                status: UpdateStatus::InProgress,
                message: None,
                started_at: Utc::now(),
                finished_at: None,
            };
            data.update_logs.push(log.clone());
            Ok(log)
        })
        .await
    }

    pub async fn get_update_log(&self, update_id: i64) -> Result<UpdateLog, PlatformError> {
        self.read(|data| {
            data.update_logs
                .iter()
                .find(|l| l.id == update_id)
                .cloned()
                .ok_or_else(|| PlatformError::NotFound(format!("update log {}", update_id)))
        })
        .await
    }
}

#[async_trait]
impl Store for JsonStore {
    async fn get_application(&self, app_id: i64) -> Result<Application, PlatformError> {
        self.read(|data| {
            data.applications
                .get(&app_id)
                .cloned()
                .ok_or_else(|| PlatformError::NotFound(format!("application {}", app_id)))
        })
        .await
    }

    async fn set_application_status(
        &self,
        app_id: i64,
        status: AppStatus,
    ) -> Result<(), PlatformError> {
        self.mutate(|data| {
            let app = data
                .applications
                .get_mut(&app_id)
                .ok_or_else(|| PlatformError::NotFound(format!("application {}", app_id)))?;
            app.status = status;
            Ok(())
        })
        .await
    }

    async fn list_env_vars(&self, app_id: i64) -> Result<Vec<EnvVar>, PlatformError> {
        self.read(|data| {
            Ok(data
                .env_vars
                .iter()
                .filter(|v| v.app_id == app_id)
                .cloned()
                .collect())
        })
        .await
    }

    async fn get_template(&self, name: &str) -> Result<ServiceTemplate, PlatformError> {
        self.read(|data| {
            data.templates
                .get(name)
                .cloned()
                .ok_or_else(|| PlatformError::NotFound(format!("service template {}", name)))
        })
        .await
    }

    async fn create_deployment(&self, new: NewDeployment) -> Result<Deployment, PlatformError> {
        self.mutate(|data| {
            if !data.applications.contains_key(&new.app_id) {
                return Err(PlatformError::NotFound(format!("application {}", new.app_id)));
            }

            let deployment_number = data
                .deployments
                .values()
                .filter(|d| d.app_id == new.app_id)
                .map(|d| d.deployment_number)
                .max()
                .unwrap_or(0)
                + 1;

            data.next_deployment_id += 1;
            let deployment = Deployment {
                id: data.next_deployment_id,
                app_id: new.app_id,
                commit_hash: new.commit_hash,
                commit_message: new.commit_message,
                commit_author: new.commit_author,
                deployment_number,
                status: DeploymentStatus::Pending,
                stage: "queued".to_string(),
                progress: 0,
                error_message: None,
                created_at: Utc::now(),
                started_at: None,
                finished_at: None,
                is_active: false,
                rollback_from: new.rollback_from,
            };
            data.deployments.insert(deployment.id, deployment.clone());
            debug!(
                "Created deployment {} (#{} for app {})",
                deployment.id, deployment.deployment_number, deployment.app_id
            );
            Ok(deployment)
        })
        .await
    }

    async fn get_deployment(&self, deployment_id: i64) -> Result<Deployment, PlatformError> {
        self.read(|data| {
            data.deployments
                .get(&deployment_id)
                .cloned()
                .ok_or_else(|| PlatformError::NotFound(format!("deployment {}", deployment_id)))
        })
        .await
    }

    async fn find_deployment_by_commit(
        &self,
        app_id: i64,
        commit_hash: &str,
    ) -> Result<Option<Deployment>, PlatformError> {
        self.read(|data| {
            Ok(data
                .deployments
                .values()
                .filter(|d| d.app_id == app_id && d.commit_hash == commit_hash)
                .max_by_key(|d| d.id)
                .cloned())
        })
        .await
    }

    async fn list_deployments(&self, app_id: i64) -> Result<Vec<Deployment>, PlatformError> {
        self.read(|data| {
            let mut deployments: Vec<Deployment> = data
                .deployments
                .values()
                .filter(|d| d.app_id == app_id)
                .cloned()
                .collect();
            deployments.sort_by(|a, b| b.deployment_number.cmp(&a.deployment_number));
            Ok(deployments)
        })
        .await
    }

    async fn list_deployments_by_status(
        &self,
        statuses: &[DeploymentStatus],
    ) -> Result<Vec<Deployment>, PlatformError> {
        self.read(|data| {
            // BTreeMap iteration is ordered by id, i.e. creation order
            Ok(data
                .deployments
                .values()
                .filter(|d| statuses.contains(&d.status))
                .cloned()
                .collect())
        })
        .await
    }

    async fn update_progress(
        &self,
        deployment_id: i64,
        update: ProgressUpdate,
    ) -> Result<Deployment, PlatformError> {
        self.mutate(|data| {
            let deployment = data.deployment_mut(deployment_id)?;
            if update.status.is_terminal() {
                return Err(PlatformError::InvalidTransition(format!(
                    "{} is terminal, use finish_deployment",
                    update.status
                )));
            }

            deployment.status = deployment.status.transition(update.status)?;
            if deployment.started_at.is_none() && update.status != DeploymentStatus::Pending {
                deployment.started_at = Some(Utc::now());
            }
            deployment.stage = update.stage;
            deployment.progress = deployment.progress.max(update.progress.min(100));
            deployment.error_message = None;
            Ok(deployment.clone())
        })
        .await
    }

    async fn finish_deployment(
        &self,
        deployment_id: i64,
        status: DeploymentStatus,
        error_message: Option<String>,
    ) -> Result<Deployment, PlatformError> {
        self.mutate(|data| {
            let deployment = data.deployment_mut(deployment_id)?;
            if !status.is_terminal() {
                return Err(PlatformError::InvalidTransition(format!(
                    "{} is not a terminal status",
                    status
                )));
            }

            deployment.status = deployment.status.transition(status)?;
            deployment.finished_at = Some(Utc::now());
            deployment.error_message = error_message;
            match status {
                DeploymentStatus::Success => {
                    deployment.progress = 100;
                    deployment.stage = "completed".to_string();
                }
                DeploymentStatus::Failed => {
                    deployment.progress = 0;
                    deployment.stage = "failed".to_string();
                }
                _ => {
                    deployment.stage = "stopped".to_string();
                }
            }
            Ok(deployment.clone())
        })
        .await
    }

    async fn set_active_deployment(
        &self,
        app_id: i64,
        deployment_id: i64,
    ) -> Result<(), PlatformError> {
        self.mutate(|data| {
            match data.deployments.get(&deployment_id) {
                Some(d) if d.app_id == app_id => {}
                Some(_) => {
                    return Err(PlatformError::ConfigError(format!(
                        "deployment {} does not belong to app {}",
                        deployment_id, app_id
                    )))
                }
                None => {
                    return Err(PlatformError::NotFound(format!("deployment {}", deployment_id)))
                }
            }

            for deployment in data.deployments.values_mut().filter(|d| d.app_id == app_id) {
                deployment.is_active = deployment.id == deployment_id;
            }
            Ok(())
        })
        .await
    }

    async fn set_commit_info(
        &self,
        deployment_id: i64,
        message: Option<String>,
        author: Option<String>,
    ) -> Result<(), PlatformError> {
        self.mutate(|data| {
            let deployment = data.deployment_mut(deployment_id)?;
            if message.is_some() {
                deployment.commit_message = message;
            }
            if author.is_some() {
                deployment.commit_author = author;
            }
            Ok(())
        })
        .await
    }

    async fn latest_update_log(&self) -> Result<Option<UpdateLog>, PlatformError> {
        self.read(|data| Ok(data.update_logs.iter().max_by_key(|l| l.id).cloned()))
            .await
    }

    async fn finish_update_log(
        &self,
        update_id: i64,
        status: UpdateStatus,
        message: Option<String>,
    ) -> Result<(), PlatformError> {
        self.mutate(|data| {
            let log = data
                .update_logs
                .iter_mut()
                .find(|l| l.id == update_id)
                .ok_or_else(|| PlatformError::NotFound(format!("update log {}", update_id)))?;
            log.status = status;
            log.message = message;
            log.finished_at = Some(Utc::now());
            Ok(())
        })
        .await
    }
}
