//! Finite state machine for deployment status

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::PlatformError;

/// Persisted deployment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    /// Accepted, waiting in the queue
    Pending,

    /// Fetching source into the build context
    Cloning,

    /// Building the application image
    Building,

    /// Pulling a prebuilt image (database applications)
    Pulling,

    /// Replacing the running container or compose stack
    Deploying,

    Success,
    Failed,
    Stopped,
}

impl DeploymentStatus {
    pub const TERMINAL: [DeploymentStatus; 3] = [
        DeploymentStatus::Success,
        DeploymentStatus::Failed,
        DeploymentStatus::Stopped,
    ];

    /// Statuses that can only be observed while an executor is running
    pub const IN_FLIGHT: [DeploymentStatus; 4] = [
        DeploymentStatus::Cloning,
        DeploymentStatus::Building,
        DeploymentStatus::Pulling,
        DeploymentStatus::Deploying,
    ];

    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }

    pub fn is_in_flight(&self) -> bool {
        Self::IN_FLIGHT.contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Cloning => "cloning",
            DeploymentStatus::Building => "building",
            DeploymentStatus::Pulling => "pulling",
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Stopped => "stopped",
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Re-entering the same non-terminal status is allowed so that a stage
    /// label or progress can change without a status change.
    pub fn can_transition_to(&self, next: DeploymentStatus) -> bool {
        use DeploymentStatus::*;

        if self.is_terminal() {
            return false;
        }
        if *self == next {
            return true;
        }

        match (self, next) {
            (_, Failed) | (_, Stopped) => true,
            (Pending, Cloning) | (Pending, Building) | (Pending, Pulling) | (Pending, Deploying) => true,
            (Cloning, Building) | (Cloning, Deploying) => true,
            (Building, Deploying) => true,
            (Pulling, Deploying) => true,
            (Deploying, Success) => true,
            _ => false,
        }
    }

    /// Validate a transition, producing a descriptive error when rejected
    pub fn transition(&self, next: DeploymentStatus) -> Result<DeploymentStatus, PlatformError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(PlatformError::InvalidTransition(format!("{} -> {}", self, next)))
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(DeploymentStatus::Pending),
            "cloning" => Ok(DeploymentStatus::Cloning),
            "building" => Ok(DeploymentStatus::Building),
            "pulling" => Ok(DeploymentStatus::Pulling),
            "deploying" => Ok(DeploymentStatus::Deploying),
            "success" => Ok(DeploymentStatus::Success),
            "failed" => Ok(DeploymentStatus::Failed),
            "stopped" => Ok(DeploymentStatus::Stopped),
            other => Err(PlatformError::ConfigError(format!(
                "Invalid deployment status: {}",
                other
            ))),
        }
    }
}
