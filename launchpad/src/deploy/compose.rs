//! Docker Compose driver

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::deploy::buildlog::BuildLog;
use crate::deploy::process::{run_command, run_simple};
use crate::errors::PlatformError;

/// A compose stack on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeProject {
    /// Directory holding the compose file
    pub dir: PathBuf,

    /// Project name passed with `-p`
    pub name: String,
}

impl ComposeProject {
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
        }
    }
}

/// One service of a running stack
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ComposeService {
    #[serde(rename = "Service", default)]
    pub service: String,

    #[serde(rename = "State", default)]
    pub state: String,
}

#[async_trait]
pub trait ComposeDriver: Send + Sync {
    /// `up -d` with `env` in the process environment, output into `log`
    async fn up(
        &self,
        project: &ComposeProject,
        env: &BTreeMap<String, String>,
        log: &BuildLog,
        token: &CancellationToken,
    ) -> Result<(), PlatformError>;

    /// Start the existing containers of the stack
    async fn start(&self, project: &ComposeProject) -> Result<(), PlatformError>;

    /// Stop the stack without removing its containers
    async fn stop(&self, project: &ComposeProject) -> Result<(), PlatformError>;

    async fn restart(&self, project: &ComposeProject) -> Result<(), PlatformError>;

    async fn ps(&self, project: &ComposeProject) -> Result<Vec<ComposeService>, PlatformError>;

    async fn logs(&self, project: &ComposeProject, tail: usize) -> Result<Vec<String>, PlatformError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    /// `docker compose`
    Plugin,
    /// `docker-compose`
    Standalone,
}

/// [`ComposeDriver`] backed by the compose CLI
#[derive(Debug, Default)]
pub struct DockerCompose {
    flavor: OnceCell<Flavor>,
}

const UP_TIMEOUT: Duration = Duration::from_secs(15 * 60);
const CONTROL_TIMEOUT: Duration = Duration::from_secs(180);
const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

impl DockerCompose {
    pub fn new() -> Self {
        Self::default()
    }

    async fn flavor(&self) -> Result<Flavor, PlatformError> {
        self.flavor
            .get_or_try_init(|| async {
                let mut plugin = Command::new("docker");
                plugin.args(["compose", "version"]);
                if run_simple(plugin, "docker compose version", QUERY_TIMEOUT).await.is_ok() {
                    return Ok(Flavor::Plugin);
                }

                let mut standalone = Command::new("docker-compose");
                standalone.arg("version");
                match run_simple(standalone, "docker-compose version", QUERY_TIMEOUT).await {
                    Ok(_) => {
                        debug!("Using standalone docker-compose");
                        Ok(Flavor::Standalone)
                    }
                    Err(_) => Err(PlatformError::CommandFailed(
                        "neither 'docker compose' nor 'docker-compose' is available".to_string(),
                    )),
                }
            })
            .await
            .copied()
    }

    async fn command(&self, project: &ComposeProject, args: &[&str]) -> Result<Command, PlatformError> {
        check_dir(&project.dir)?;
        let mut cmd = match self.flavor().await? {
            Flavor::Plugin => {
                let mut cmd = Command::new("docker");
                cmd.arg("compose");
                cmd
            }
            Flavor::Standalone => Command::new("docker-compose"),
        };
        cmd.current_dir(&project.dir)
            .args(["-p", project.name.as_str()])
            .args(args);
        Ok(cmd)
    }
}

#[async_trait]
impl ComposeDriver for DockerCompose {
    async fn up(
        &self,
        project: &ComposeProject,
        env: &BTreeMap<String, String>,
        log: &BuildLog,
        token: &CancellationToken,
    ) -> Result<(), PlatformError> {
        info!("Starting compose project {} in {}", project.name, project.dir.display());
        let mut cmd = self.command(project, &["up", "-d", "--build", "--remove-orphans"]).await?;
        cmd.envs(env);
        run_command(cmd, "compose up", UP_TIMEOUT, token, Some(log)).await?;
        Ok(())
    }

    async fn start(&self, project: &ComposeProject) -> Result<(), PlatformError> {
        let cmd = self.command(project, &["start"]).await?;
        run_simple(cmd, "compose start", CONTROL_TIMEOUT).await?;
        Ok(())
    }

    async fn stop(&self, project: &ComposeProject) -> Result<(), PlatformError> {
        let cmd = self.command(project, &["stop"]).await?;
        run_simple(cmd, "compose stop", CONTROL_TIMEOUT).await?;
        Ok(())
    }

    async fn restart(&self, project: &ComposeProject) -> Result<(), PlatformError> {
        let cmd = self.command(project, &["restart"]).await?;
        run_simple(cmd, "compose restart", CONTROL_TIMEOUT).await?;
        Ok(())
    }

    async fn ps(&self, project: &ComposeProject) -> Result<Vec<ComposeService>, PlatformError> {
        let cmd = self.command(project, &["ps", "--all", "--format", "json"]).await?;
        let out = run_simple(cmd, "compose ps", QUERY_TIMEOUT).await?;
        parse_ps(out.stdout_trimmed())
    }

    async fn logs(&self, project: &ComposeProject, tail: usize) -> Result<Vec<String>, PlatformError> {
        let tail = tail.to_string();
        let cmd = self
            .command(project, &["logs", "--no-color", "--tail", tail.as_str()])
            .await?;
        let out = run_simple(cmd, "compose logs", QUERY_TIMEOUT).await?;
        Ok(out.stdout.lines().map(str::to_string).collect())
    }
}

fn check_dir(dir: &Path) -> Result<(), PlatformError> {
    if !dir.is_dir() {
        return Err(PlatformError::ConfigError(format!(
            "compose project directory does not exist: {}",
            dir.display()
        )));
    }
    Ok(())
}

/// `ps --format json` prints an array on older releases and one object per
/// line on newer ones
fn parse_ps(output: &str) -> Result<Vec<ComposeService>, PlatformError> {
    if output.is_empty() {
        return Ok(Vec::new());
    }
    if output.starts_with('[') {
        return Ok(serde_json::from_str(output)?);
    }
    output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(PlatformError::from))
        .collect()
}

/// Whether every service of the stack is running
pub fn all_running(services: &[ComposeService]) -> bool {
    !services.is_empty() && services.iter().all(|s| s.state == "running")
}
