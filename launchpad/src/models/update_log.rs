//! Self-update log records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    InProgress,
    Success,
    Failed,
}

/// One attempt of the platform to update itself.
///
/// The update restarts the very process that records it, so an entry may be
/// left `in_progress` and is reconciled on the next start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateLog {
    pub id: i64,
    pub from_version: String,
    pub target_version: String,
    pub status: UpdateStatus,

    #[serde(default)]
    pub message: Option<String>,

    pub started_at: DateTime<Utc>,

    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}
