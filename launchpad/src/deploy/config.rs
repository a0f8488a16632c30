//! Configuration resolver
//!
//! Assembles the effective port, domains and environment of a deployment
//! from the application, its env var rows and (for database applications)
//! its service template.

use std::collections::BTreeMap;

use crate::errors::PlatformError;
use crate::models::application::{AppType, Application, EnvVar};
use crate::models::template::ServiceTemplate;
use crate::store::Store;

/// Environment split into build-time and runtime sets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentVariableSet {
    /// Passed as image build arguments
    pub build: BTreeMap<String, String>,

    /// Passed to the running container
    pub runtime: BTreeMap<String, String>,
}

impl EnvironmentVariableSet {
    /// Union of both sets, runtime values winning on conflicts
    pub fn merged(&self) -> BTreeMap<String, String> {
        let mut merged = self.build.clone();
        merged.extend(self.runtime.clone());
        merged
    }
}

/// Classify env var rows by their flags.
///
/// A row flagged neither build-time nor runtime goes into both sets, which
/// keeps rows created before the flags existed working.
pub fn categorize_environment_variables(vars: &[EnvVar]) -> EnvironmentVariableSet {
    let mut set = EnvironmentVariableSet::default();
    for var in vars {
        let unflagged = !var.is_buildtime && !var.is_runtime;
        if var.is_buildtime || unflagged {
            set.build.insert(var.key.clone(), var.value.clone());
        }
        if var.is_runtime || unflagged {
            set.runtime.insert(var.key.clone(), var.value.clone());
        }
    }
    set
}

/// Effective configuration of one deployment
#[derive(Debug, Clone)]
pub struct DeploymentConfig {
    /// Internal container port; optional only for compose applications
    pub port: Option<u16>,

    pub domains: Vec<String>,

    pub env: EnvironmentVariableSet,

    /// Present for database applications
    pub template: Option<ServiceTemplate>,
}

impl DeploymentConfig {
    /// Port required by single-container deployments
    pub fn require_port(&self) -> Result<u16, PlatformError> {
        self.port
            .ok_or_else(|| PlatformError::ConfigError("application has no port configured".to_string()))
    }
}

/// Resolve the configuration of a deployment of `app`
pub async fn resolve_deployment_config(
    store: &dyn Store,
    app: &Application,
) -> Result<DeploymentConfig, PlatformError> {
    let vars = store.list_env_vars(app.id).await?;
    let mut env = categorize_environment_variables(&vars);
    let domains = normalize_domains(&app.domains);

    match app.app_type {
        AppType::Database => {
            let template = resolve_template(store, app).await?;

            // template defaults sit underneath explicit values
            let mut runtime = template.default_env_map()?;
            runtime.extend(env.runtime);
            env.runtime = runtime;

            let port = if app.port.trim().is_empty() {
                template.default_port
            } else {
                parse_port(&app.port)?
            };

            Ok(DeploymentConfig {
                port: Some(port),
                domains,
                env,
                template: Some(template),
            })
        }
        AppType::Compose => {
            let port = if app.port.trim().is_empty() {
                None
            } else {
                Some(parse_port(&app.port)?)
            };
            Ok(DeploymentConfig {
                port,
                domains,
                env,
                template: None,
            })
        }
        AppType::Web | AppType::Service => {
            if app.port.trim().is_empty() {
                return Err(PlatformError::ConfigError(format!(
                    "application {} has no port configured",
                    app.name
                )));
            }
            Ok(DeploymentConfig {
                port: Some(parse_port(&app.port)?),
                domains,
                env,
                template: None,
            })
        }
    }
}

/// Look up the service template of a database application
pub async fn resolve_template(
    store: &dyn Store,
    app: &Application,
) -> Result<ServiceTemplate, PlatformError> {
    let name = app
        .template_name
        .as_deref()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            PlatformError::ConfigError(format!(
                "database application {} has no service template",
                app.name
            ))
        })?;

    store.get_template(name).await.map_err(|e| match e {
        PlatformError::NotFound(_) => {
            PlatformError::ConfigError(format!("service template {} not found", name))
        }
        other => other,
    })
}

/// Parse a container port
pub fn parse_port(value: &str) -> Result<u16, PlatformError> {
    match value.trim().parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(PlatformError::ConfigError(format!(
            "invalid port \"{}\"",
            value
        ))),
    }
}

fn normalize_domains(domains: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for domain in domains {
        let domain = domain.trim().trim_end_matches('.').to_lowercase();
        if !domain.is_empty() && !out.contains(&domain) {
            out.push(domain);
        }
    }
    out
}
