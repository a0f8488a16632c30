//! Events pushed to log viewers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::DeploymentStatus;
use crate::models::deployment::Deployment;

/// Origin of a log line, guessed from its content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    Stdout,
    Stderr,
    /// Platform markers and blank lines
    Plain,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Log {
        line: String,
        stream: LineKind,
        timestamp: DateTime<Utc>,
    },
    Status {
        status: DeploymentStatus,
        stage: String,
        progress: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
    /// Fault of the stream itself, not of the deployment
    Error { message: String },
    Done { status: DeploymentStatus },
}

impl StreamEvent {
    pub fn log(line: impl Into<String>) -> Self {
        let line = line.into();
        StreamEvent::Log {
            stream: classify_line(&line),
            line,
            timestamp: Utc::now(),
        }
    }

    pub fn status(deployment: &Deployment) -> Self {
        StreamEvent::Status {
            status: deployment.status,
            stage: deployment.stage.clone(),
            progress: deployment.progress,
            error_message: deployment.error_message.clone(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error {
            message: message.into(),
        }
    }
}

const ERROR_MARKERS: [&str; 6] = ["error", "fatal", "failed", "panic", "exception", "denied"];

/// Classify a line as stdout, stderr or plain
pub fn classify_line(line: &str) -> LineKind {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with("==>") {
        return LineKind::Plain;
    }

    let lower = trimmed.to_ascii_lowercase();
    let looks_bad = ERROR_MARKERS.iter().any(|m| {
        lower.starts_with(m)
            || lower.contains(&format!("{}:", m))
            || lower.contains(&format!("[{}]", m))
    }) || lower.starts_with("warn")
        || lower.contains(" err!");

    if looks_bad {
        LineKind::Stderr
    } else {
        LineKind::Stdout
    }
}
