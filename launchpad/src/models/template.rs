//! Service templates for database-type applications

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::PlatformError;

/// A predefined database/cache/queue image profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceTemplate {
    pub name: String,

    /// Image name without tag, e.g. "redis"
    pub docker_image: String,

    /// Image tag, e.g. "7-alpine"
    #[serde(default)]
    pub image_version: String,

    pub default_port: u16,

    /// JSON object of default environment variables
    #[serde(default)]
    pub default_env: String,

    #[serde(default)]
    pub recommended_cpu: Option<String>,

    #[serde(default)]
    pub recommended_memory: Option<String>,
}

impl ServiceTemplate {
    /// Fully qualified image reference
    pub fn image(&self) -> String {
        if self.image_version.is_empty() {
            format!("{}:latest", self.docker_image)
        } else {
            format!("{}:{}", self.docker_image, self.image_version)
        }
    }

    /// Tag recorded as the deployment's "commit" for template images
    pub fn image_tag(&self) -> String {
        if self.image_version.is_empty() {
            "latest".to_string()
        } else {
            self.image_version.clone()
        }
    }

    /// Parse `default_env` into a map; non-string JSON values are stringified
    pub fn default_env_map(&self) -> Result<BTreeMap<String, String>, PlatformError> {
        if self.default_env.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        let value: serde_json::Value = serde_json::from_str(&self.default_env).map_err(|e| {
            PlatformError::ConfigError(format!(
                "template {} has malformed default env: {}",
                self.name, e
            ))
        })?;

        let object = value.as_object().ok_or_else(|| {
            PlatformError::ConfigError(format!(
                "template {} default env must be a JSON object",
                self.name
            ))
        })?;

        Ok(object
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), value)
            })
            .collect())
    }
}

fn template(
    name: &str,
    image: &str,
    version: &str,
    port: u16,
    env: serde_json::Value,
    cpu: &str,
    memory: &str,
) -> ServiceTemplate {
    ServiceTemplate {
        name: name.to_string(),
        docker_image: image.to_string(),
        image_version: version.to_string(),
        default_port: port,
        default_env: env.to_string(),
        recommended_cpu: Some(cpu.to_string()),
        recommended_memory: Some(memory.to_string()),
    }
}

/// Templates seeded into a fresh store
pub fn builtin_templates() -> Vec<ServiceTemplate> {
    use serde_json::json;

    vec![
        template("redis", "redis", "7-alpine", 6379, json!({}), "0.5", "256m"),
        template(
            "postgres",
            "postgres",
            "16-alpine",
            5432,
            json!({
                "POSTGRES_USER": "postgres",
                "POSTGRES_PASSWORD": "postgres",
                "POSTGRES_DB": "app"
            }),
            "1",
            "512m",
        ),
        template(
            "mysql",
            "mysql",
            "8.4",
            3306,
            json!({
                "MYSQL_ROOT_PASSWORD": "mysql",
                "MYSQL_DATABASE": "app"
            }),
            "1",
            "512m",
        ),
        template(
            "mariadb",
            "mariadb",
            "11",
            3306,
            json!({
                "MARIADB_ROOT_PASSWORD": "mariadb",
                "MARIADB_DATABASE": "app"
            }),
            "1",
            "512m",
        ),
        template(
            "mongodb",
            "mongo",
            "7",
            27017,
            json!({
                "MONGO_INITDB_ROOT_USERNAME": "mongo",
                "MONGO_INITDB_ROOT_PASSWORD": "mongo"
            }),
            "1",
            "512m",
        ),
        template(
            "rabbitmq",
            "rabbitmq",
            "3-management-alpine",
            5672,
            json!({
                "RABBITMQ_DEFAULT_USER": "guest",
                "RABBITMQ_DEFAULT_PASS": "guest"
            }),
            "0.5",
            "512m",
        ),
    ]
}
