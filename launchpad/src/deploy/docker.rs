//! Container and image driver
//!
//! [`ContainerRuntime`] is what the deployment pipeline needs from the local
//! container runtime. [`DockerCli`] implements it by shelling out to the
//! `docker` binary, the same way the rest of the platform drives git and
//! compose. The driver knows nothing about deployments.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::deploy::buildlog::BuildLog;
use crate::deploy::config::DeploymentConfig;
use crate::deploy::process::{next_line_lossy, run_command, run_simple};
use crate::errors::PlatformError;
use crate::models::application::{image_repository, AppType, Application};
use crate::storage::settings::DeploySettings;

/// Synthetic state reported for containers that do not exist
pub const STATE_NOT_FOUND: &str = "not_found";

// ================================== TYPES ==================================== //

/// Restart policy handed to the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartPolicy {
    No,
    Always,
    OnFailure,
    #[default]
    UnlessStopped,
}

impl RestartPolicy {
    /// Map an application setting, falling back to `unless-stopped`
    pub fn from_setting(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("no") => RestartPolicy::No,
            Some("always") => RestartPolicy::Always,
            Some("on-failure") => RestartPolicy::OnFailure,
            _ => RestartPolicy::UnlessStopped,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RestartPolicy::No => "no",
            RestartPolicy::Always => "always",
            RestartPolicy::OnFailure => "on-failure",
            RestartPolicy::UnlessStopped => "unless-stopped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub host: String,
    pub container: String,
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    pub host_ip: IpAddr,
    pub host_port: u16,
    pub container_port: u16,
}

/// Everything needed to create one application container
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub network: String,
    pub ports: Vec<PortBinding>,
    pub volumes: Vec<VolumeMount>,
    pub labels: BTreeMap<String, String>,
    pub restart_policy: RestartPolicy,
    pub cpus: Option<String>,
    pub memory: Option<String>,
}

/// Image build input
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub context_dir: PathBuf,

    /// Relative to the context directory; `Dockerfile` when absent
    pub dockerfile: Option<PathBuf>,

    pub tag: String,
    pub build_args: BTreeMap<String, String>,
}

/// Observed state of a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerStatus {
    pub name: String,
    pub exists: bool,
    pub running: bool,

    /// Runtime state (`running`, `exited`, ...) or [`STATE_NOT_FOUND`]
    pub state: String,

    pub image: Option<String>,
    pub started_at: Option<String>,
}

impl ContainerStatus {
    pub fn not_found(name: &str) -> Self {
        Self {
            name: name.to_string(),
            exists: false,
            running: false,
            state: STATE_NOT_FOUND.to_string(),
            image: None,
            started_at: None,
        }
    }
}

/// Locally stored image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSummary {
    pub id: String,
    pub reference: String,
    pub created_at: DateTime<Utc>,
}

// ================================== TRAIT ==================================== //

/// Operations on the local container runtime
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn build_image(
        &self,
        request: &BuildRequest,
        log: &BuildLog,
        token: &CancellationToken,
    ) -> Result<(), PlatformError>;

    async fn pull_image(
        &self,
        image: &str,
        log: &BuildLog,
        token: &CancellationToken,
    ) -> Result<(), PlatformError>;

    async fn image_exists(&self, image: &str) -> Result<bool, PlatformError>;

    async fn container_exists(&self, name: &str) -> Result<bool, PlatformError>;

    /// Create and start a container, returning its id
    async fn create_and_start_container(
        &self,
        spec: &ContainerSpec,
        token: &CancellationToken,
    ) -> Result<String, PlatformError>;

    async fn start_container(&self, name: &str) -> Result<(), PlatformError>;

    async fn stop_container(&self, name: &str) -> Result<(), PlatformError>;

    /// Restart and wait until the container reports `running`
    async fn restart_container(&self, name: &str) -> Result<(), PlatformError>;

    /// Stop and remove; succeeds when the container does not exist
    async fn stop_and_remove_container(
        &self,
        name: &str,
        token: &CancellationToken,
    ) -> Result<(), PlatformError>;

    async fn container_status(&self, name: &str) -> Result<ContainerStatus, PlatformError>;

    /// Last `tail` lines of output; empty when the container does not exist
    async fn container_logs(&self, name: &str, tail: usize) -> Result<Vec<String>, PlatformError>;

    /// Stream output lines until the container exits or the token fires
    async fn follow_container_logs(
        &self,
        name: &str,
        tail: usize,
        token: CancellationToken,
    ) -> Result<mpsc::Receiver<String>, PlatformError>;

    /// Images of a repository (e.g. `app-7`)
    async fn list_images(&self, repository: &str) -> Result<Vec<ImageSummary>, PlatformError>;

    async fn remove_image(&self, image_id: &str, force: bool) -> Result<(), PlatformError>;
}

// ================================ DOCKER CLI ================================= //

/// Per-call deadlines of the driver
#[derive(Debug, Clone)]
pub struct DriverTimeouts {
    pub stop: Duration,
    pub start: Duration,
    pub restart: Duration,
    pub restart_poll_interval: Duration,
    pub restart_wait: Duration,
    pub remove: Duration,
    pub build: Duration,
    pub pull: Duration,
    pub inspect: Duration,
}

impl Default for DriverTimeouts {
    fn default() -> Self {
        Self {
            stop: Duration::from_secs(120),
            start: Duration::from_secs(60),
            restart: Duration::from_secs(180),
            restart_poll_interval: Duration::from_millis(500),
            restart_wait: Duration::from_secs(60),
            remove: Duration::from_secs(120),
            build: Duration::from_secs(15 * 60),
            pull: Duration::from_secs(15 * 60),
            inspect: Duration::from_secs(30),
        }
    }
}

/// [`ContainerRuntime`] backed by the `docker` CLI
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    timeouts: DriverTimeouts,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerCli {
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
            timeouts: DriverTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: DriverTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    fn docker<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        cmd
    }

    async fn require_container(&self, name: &str) -> Result<(), PlatformError> {
        if !self.container_exists(name).await? {
            return Err(PlatformError::NotFound(format!(
                "container {} does not exist",
                name
            )));
        }
        Ok(())
    }

    async fn ensure_network(&self, network: &str) -> Result<(), PlatformError> {
        let inspect = run_simple(
            self.docker(["network", "inspect", network]),
            "inspect network",
            self.timeouts.inspect,
        )
        .await;
        match inspect {
            Ok(_) => Ok(()),
            Err(e) if is_missing(&e) => {
                info!("Creating network {}", network);
                run_simple(
                    self.docker(["network", "create", network]),
                    &format!("create network {}", network),
                    self.timeouts.inspect,
                )
                .await
                .map(|_| ())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn build_image(
        &self,
        request: &BuildRequest,
        log: &BuildLog,
        token: &CancellationToken,
    ) -> Result<(), PlatformError> {
        info!("Building image {}", request.tag);
        let cmd = self.docker(build_args(request));
        run_command(cmd, "image build", self.timeouts.build, token, Some(log)).await?;
        Ok(())
    }

    async fn pull_image(
        &self,
        image: &str,
        log: &BuildLog,
        token: &CancellationToken,
    ) -> Result<(), PlatformError> {
        info!("Pulling image {}", image);
        let cmd = self.docker(["pull", image]);
        run_command(
            cmd,
            &format!("pull of {}", image),
            self.timeouts.pull,
            token,
            Some(log),
        )
        .await?;
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool, PlatformError> {
        let res = run_simple(
            self.docker(["image", "inspect", "--format", "{{.Id}}", image]),
            "inspect image",
            self.timeouts.inspect,
        )
        .await;
        match res {
            Ok(_) => Ok(true),
            Err(e) if is_missing(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn container_exists(&self, name: &str) -> Result<bool, PlatformError> {
        let res = run_simple(
            self.docker(["container", "inspect", "--format", "{{.Id}}", name]),
            "inspect container",
            self.timeouts.inspect,
        )
        .await;
        match res {
            Ok(_) => Ok(true),
            Err(e) if is_missing(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create_and_start_container(
        &self,
        spec: &ContainerSpec,
        token: &CancellationToken,
    ) -> Result<String, PlatformError> {
        self.ensure_network(&spec.network).await?;

        debug!("Creating container {} from {}", spec.name, spec.image);
        let created = run_command(
            self.docker(create_args(spec)),
            &format!("create container {}", spec.name),
            self.timeouts.start,
            token,
            None,
        )
        .await?;
        let id = created.stdout_trimmed().to_string();

        // a failed start leaves a stopped container behind; the next
        // deployment removes it by name
        run_command(
            self.docker(["start", spec.name.as_str()]),
            &format!("start container {}", spec.name),
            self.timeouts.start,
            token,
            None,
        )
        .await?;

        info!("Started container {} ({})", spec.name, short_id(&id));
        Ok(id)
    }

    async fn start_container(&self, name: &str) -> Result<(), PlatformError> {
        self.require_container(name).await?;
        run_simple(
            self.docker(["start", name]),
            &format!("start container {}", name),
            self.timeouts.start,
        )
        .await?;
        Ok(())
    }

    async fn stop_container(&self, name: &str) -> Result<(), PlatformError> {
        self.require_container(name).await?;
        run_simple(
            self.docker(["stop", name]),
            &format!("stop container {}", name),
            self.timeouts.stop,
        )
        .await?;
        Ok(())
    }

    async fn restart_container(&self, name: &str) -> Result<(), PlatformError> {
        self.require_container(name).await?;
        run_simple(
            self.docker(["restart", name]),
            &format!("restart container {}", name),
            self.timeouts.restart,
        )
        .await?;

        // restart can return before the container is actually up
        let deadline = Instant::now() + self.timeouts.restart_wait;
        loop {
            if self.container_status(name).await?.running {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(PlatformError::Timeout(
                    format!("waiting for container {} to run", name),
                    self.timeouts.restart_wait,
                ));
            }
            tokio::time::sleep(self.timeouts.restart_poll_interval).await;
        }
    }

    async fn stop_and_remove_container(
        &self,
        name: &str,
        token: &CancellationToken,
    ) -> Result<(), PlatformError> {
        if !self.container_exists(name).await? {
            debug!("Container {} does not exist, nothing to remove", name);
            return Ok(());
        }

        let started = Instant::now();
        run_command(
            self.docker(["stop", name]),
            &format!("stop container {}", name),
            self.timeouts.remove,
            token,
            None,
        )
        .await?;

        // both calls share one budget
        let remaining = self.timeouts.remove.saturating_sub(started.elapsed());
        run_command(
            self.docker(["rm", "--force", name]),
            &format!("remove container {}", name),
            remaining.max(Duration::from_secs(1)),
            token,
            None,
        )
        .await?;
        info!("Removed container {}", name);
        Ok(())
    }

    async fn container_status(&self, name: &str) -> Result<ContainerStatus, PlatformError> {
        let res = run_simple(
            self.docker([
                "container",
                "inspect",
                "--format",
                "{{.State.Status}}|{{.State.Running}}|{{.Config.Image}}|{{.State.StartedAt}}",
                name,
            ]),
            "inspect container",
            self.timeouts.inspect,
        )
        .await;

        match res {
            Ok(out) => Ok(parse_status_line(name, out.stdout_trimmed())),
            Err(e) if is_missing(&e) => Ok(ContainerStatus::not_found(name)),
            Err(e) => Err(e),
        }
    }

    async fn container_logs(&self, name: &str, tail: usize) -> Result<Vec<String>, PlatformError> {
        let tail = tail.to_string();
        let res = run_simple(
            self.docker(["logs", "--tail", tail.as_str(), name]),
            "container logs",
            self.timeouts.inspect,
        )
        .await;

        match res {
            Ok(out) => Ok(out
                .stdout
                .lines()
                .chain(out.stderr.lines())
                .map(str::to_string)
                .collect()),
            Err(e) if is_missing(&e) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn follow_container_logs(
        &self,
        name: &str,
        tail: usize,
        token: CancellationToken,
    ) -> Result<mpsc::Receiver<String>, PlatformError> {
        self.require_container(name).await?;

        let tail = tail.to_string();
        let mut child = self
            .docker(["logs", "--follow", "--tail", tail.as_str(), name])
            .kill_on_drop(true)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PlatformError::CommandFailed(format!("failed to follow logs: {}", e)))?;

        let (tx, rx) = mpsc::channel(256);
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let name = name.to_string();

        tokio::spawn(async move {
            let forward = async {
                tokio::join!(
                    forward_lines(stdout, tx.clone()),
                    forward_lines(stderr, tx.clone())
                );
            };
            tokio::select! {
                _ = token.cancelled() => {}
                _ = forward => {}
            }
            if let Err(e) = child.kill().await {
                debug!("Log follower for {} already exited: {}", name, e);
            }
        });

        Ok(rx)
    }

    async fn list_images(&self, repository: &str) -> Result<Vec<ImageSummary>, PlatformError> {
        let out = run_simple(
            self.docker([
                "images",
                "--no-trunc",
                "--format",
                "{{.ID}}|{{.Repository}}:{{.Tag}}|{{.CreatedAt}}",
                repository,
            ]),
            "list images",
            self.timeouts.inspect,
        )
        .await?;
        Ok(out.stdout.lines().filter_map(parse_image_line).collect())
    }

    async fn remove_image(&self, image_id: &str, force: bool) -> Result<(), PlatformError> {
        let mut args = vec!["rmi"];
        if force {
            args.push("--force");
        }
        args.push(image_id);
        run_simple(
            self.docker(args),
            &format!("remove image {}", short_id(image_id)),
            self.timeouts.remove,
        )
        .await?;
        Ok(())
    }
}

async fn forward_lines<R>(reader: Option<R>, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    while let Ok(Some(line)) = next_line_lossy(&mut reader, &mut buf).await {
        if tx.send(line).await.is_err() {
            break;
        }
    }
}

fn is_missing(err: &PlatformError) -> bool {
    match err {
        PlatformError::CommandFailed(msg) => msg.to_ascii_lowercase().contains("no such"),
        _ => false,
    }
}

fn short_id(id: &str) -> &str {
    let id = id.strip_prefix("sha256:").unwrap_or(id);
    &id[..id.len().min(12)]
}

// ============================== ARGUMENT BUILDING ============================ //

fn build_args(request: &BuildRequest) -> Vec<String> {
    let mut args = vec!["build".to_string(), "--tag".to_string(), request.tag.clone()];
    if let Some(dockerfile) = &request.dockerfile {
        args.push("--file".to_string());
        args.push(request.context_dir.join(dockerfile).display().to_string());
    }
    for (key, value) in &request.build_args {
        args.push("--build-arg".to_string());
        args.push(format!("{}={}", key, value));
    }
    args.push(request.context_dir.display().to_string());
    args
}

fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        "--name".to_string(),
        spec.name.clone(),
        "--network".to_string(),
        spec.network.clone(),
        "--restart".to_string(),
        spec.restart_policy.as_str().to_string(),
    ];
    for (key, value) in &spec.env {
        args.push("--env".to_string());
        args.push(format!("{}={}", key, value));
    }
    for port in &spec.ports {
        args.push("--publish".to_string());
        args.push(format!(
            "{}:{}:{}",
            format_ip(&port.host_ip),
            port.host_port,
            port.container_port
        ));
    }
    for volume in &spec.volumes {
        args.push("--volume".to_string());
        let mut mount = format!("{}:{}", volume.host, volume.container);
        if volume.read_only {
            mount.push_str(":ro");
        }
        args.push(mount);
    }
    for (key, value) in &spec.labels {
        args.push("--label".to_string());
        args.push(format!("{}={}", key, value));
    }
    if let Some(cpus) = &spec.cpus {
        args.push("--cpus".to_string());
        args.push(cpus.clone());
    }
    if let Some(memory) = &spec.memory {
        args.push("--memory".to_string());
        args.push(memory.clone());
    }
    args.push(spec.image.clone());
    args
}

fn format_ip(ip: &IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{}]", v6),
    }
}

fn parse_status_line(name: &str, line: &str) -> ContainerStatus {
    let mut parts = line.splitn(4, '|');
    let state = parts.next().unwrap_or_default().trim().to_string();
    let running = parts.next().map(|r| r.trim() == "true").unwrap_or(false);
    let image = parts.next().map(str::to_string).filter(|s| !s.is_empty());
    let started_at = parts.next().map(str::to_string).filter(|s| !s.is_empty());
    ContainerStatus {
        name: name.to_string(),
        exists: true,
        running,
        state,
        image,
        started_at,
    }
}

fn parse_image_line(line: &str) -> Option<ImageSummary> {
    let mut parts = line.trim().splitn(3, '|');
    let id = parts.next()?.trim();
    let reference = parts.next()?.trim();
    let created = parts.next()?.trim();
    if id.is_empty() {
        return None;
    }

    // "2024-05-01 10:00:00 +0000 UTC": the zone name is not parseable
    let stamp: Vec<&str> = created.split_whitespace().take(3).collect();
    let created_at = DateTime::parse_from_str(&stamp.join(" "), "%Y-%m-%d %H:%M:%S %z")
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default();

    Some(ImageSummary {
        id: id.to_string(),
        reference: reference.to_string(),
        created_at,
    })
}

// =============================== CONTAINER SPEC ============================== //

/// Derive the container of an application deployment
pub fn build_container_spec(
    app: &Application,
    config: &DeploymentConfig,
    image: &str,
    settings: &DeploySettings,
) -> Result<ContainerSpec, PlatformError> {
    let name = app.container_name();

    let volumes = app
        .volumes
        .iter()
        .filter(|v| !v.trim().is_empty())
        .map(|v| parse_volume(v))
        .collect::<Result<Vec<_>, _>>()?;

    let mut ports = Vec::new();
    if app.should_expose {
        let container_port = config.require_port()?;
        ports.push(parse_port_binding(app.expose_port.as_deref(), container_port)?);
    }

    let mut labels = BTreeMap::new();
    labels.insert("launchpad.managed".to_string(), "true".to_string());
    labels.insert("launchpad.app-id".to_string(), app.id.to_string());
    if app.app_type == AppType::Web && !config.domains.is_empty() {
        let port = config.require_port()?;
        labels.extend(traefik_labels(&name, &config.domains, port, settings));
    }

    let template = config.template.as_ref();
    let cpus = non_empty(app.cpu_limit.as_deref())
        .or_else(|| template.and_then(|t| non_empty(t.recommended_cpu.as_deref())));
    let memory = non_empty(app.memory_limit.as_deref())
        .or_else(|| template.and_then(|t| non_empty(t.recommended_memory.as_deref())));

    Ok(ContainerSpec {
        name,
        image: image.to_string(),
        env: config.env.runtime.clone(),
        network: settings.proxy_network.clone(),
        ports,
        volumes,
        labels,
        restart_policy: RestartPolicy::from_setting(app.restart_policy.as_deref()),
        cpus,
        memory,
    })
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Parse `host:container[:ro]`
pub fn parse_volume(value: &str) -> Result<VolumeMount, PlatformError> {
    let invalid = || {
        PlatformError::ConfigError(format!(
            "invalid volume \"{}\": expected host:container[:ro]",
            value
        ))
    };

    let parts: Vec<&str> = value.trim().split(':').collect();
    let (host, container, read_only) = match parts.as_slice() {
        [host, container] => (*host, *container, false),
        [host, container, "ro"] => (*host, *container, true),
        [host, container, "rw"] => (*host, *container, false),
        _ => return Err(invalid()),
    };
    if host.is_empty() || container.is_empty() {
        return Err(invalid());
    }

    Ok(VolumeMount {
        host: host.to_string(),
        container: container.to_string(),
        read_only,
    })
}

/// Host side of an exposed port: `port`, `ip:port`, or nothing (internal port)
pub fn parse_port_binding(
    expose: Option<&str>,
    container_port: u16,
) -> Result<PortBinding, PlatformError> {
    let any = IpAddr::from([0, 0, 0, 0]);
    let expose = expose.map(str::trim).unwrap_or_default();
    if expose.is_empty() {
        return Ok(PortBinding {
            host_ip: any,
            host_port: container_port,
            container_port,
        });
    }

    let (ip, port) = match expose.rsplit_once(':') {
        Some((ip, port)) => {
            let ip = ip.trim_start_matches('[').trim_end_matches(']');
            let ip = ip.parse::<IpAddr>().map_err(|_| {
                PlatformError::ConfigError(format!("invalid host IP \"{}\" in \"{}\"", ip, expose))
            })?;
            (ip, port)
        }
        None => (any, expose),
    };

    let host_port = match port.parse::<u16>() {
        Ok(p) if p > 0 => p,
        _ => {
            return Err(PlatformError::ConfigError(format!(
                "invalid host port \"{}\" in \"{}\"",
                port, expose
            )))
        }
    };

    Ok(PortBinding {
        host_ip: ip,
        host_port,
        container_port,
    })
}

/// Reverse-proxy routing labels for a web container
pub fn traefik_labels(
    name: &str,
    domains: &[String],
    port: u16,
    settings: &DeploySettings,
) -> BTreeMap<String, String> {
    let rule = domains
        .iter()
        .map(|d| format!("Host(`{}`)", d))
        .collect::<Vec<_>>()
        .join(" || ");
    let router = format!("traefik.http.routers.{}", name);
    let secure = format!("traefik.http.routers.{}-secure", name);
    let redirect = format!("{}-redirect", name);

    let mut labels = BTreeMap::new();
    let mut put = |k: String, v: String| {
        labels.insert(k, v);
    };
    put("traefik.enable".into(), "true".into());
    put("traefik.docker.network".into(), settings.proxy_network.clone());

    put(format!("{}.rule", router), rule.clone());
    put(format!("{}.entrypoints", router), settings.http_entrypoint.clone());
    put(format!("{}.middlewares", router), redirect.clone());
    put(format!("{}.service", router), name.to_string());

    put(format!("{}.rule", secure), rule);
    put(format!("{}.entrypoints", secure), settings.https_entrypoint.clone());
    put(format!("{}.tls", secure), "true".into());
    put(format!("{}.tls.certresolver", secure), settings.cert_resolver.clone());
    put(format!("{}.service", secure), name.to_string());

    put(
        format!("traefik.http.middlewares.{}.redirectscheme.scheme", redirect),
        "https".into(),
    );
    put(
        format!("traefik.http.middlewares.{}.redirectscheme.permanent", redirect),
        "true".into(),
    );
    put(
        format!("traefik.http.services.{}.loadbalancer.server.port", name),
        port.to_string(),
    );
    labels
}

// ================================== CLEANUP ================================== //

/// Remove all but the `keep` newest images of an application.
///
/// `in_use` is never removed. Per-image failures are logged and skipped.
/// Returns the number of images removed.
pub async fn cleanup_old_images(
    runtime: &dyn ContainerRuntime,
    app_id: i64,
    keep: usize,
    in_use: &str,
) -> Result<usize, PlatformError> {
    let mut images = runtime.list_images(&image_repository(app_id)).await?;
    images.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let mut seen = std::collections::HashSet::new();
    images.retain(|img| seen.insert(img.id.clone()));

    let mut removed = 0;
    for image in images.into_iter().skip(keep) {
        if image.reference == in_use {
            continue;
        }
        match runtime.remove_image(&image.id, true).await {
            Ok(()) => {
                debug!("Removed old image {}", image.reference);
                removed += 1;
            }
            Err(e) => warn!("Failed to remove old image {}: {}", image.reference, e),
        }
    }

    if removed > 0 {
        info!("Removed {} old image(s) of app {}", removed, app_id);
    }
    Ok(removed)
}
