//! Cancellation registry for in-flight deployments

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Process-wide map from deployment id to its cancellation token
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    tokens: Mutex<HashMap<i64, CancellationToken>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the token of a running deployment.
    ///
    /// The entry is removed when the returned guard is dropped.
    pub fn register(self: &Arc<Self>, deployment_id: i64, token: CancellationToken) -> RegistrationGuard {
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.insert(deployment_id, token);
        debug!("Registered cancellation handle for deployment {}", deployment_id);
        RegistrationGuard {
            registry: Arc::clone(self),
            deployment_id,
        }
    }

    pub fn unregister(&self, deployment_id: i64) {
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.remove(&deployment_id);
    }

    /// Trigger cancellation of a running deployment.
    ///
    /// Returns whether a running deployment was found and interrupted.
    pub fn cancel(&self, deployment_id: i64) -> bool {
        let token = {
            let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
            tokens.remove(&deployment_id)
        };

        match token {
            Some(token) => {
                info!("Canceling running deployment {}", deployment_id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, deployment_id: i64) -> bool {
        let tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.contains_key(&deployment_id)
    }
}

/// Removes the registry entry on drop
#[derive(Debug)]
pub struct RegistrationGuard {
    registry: Arc<CancellationRegistry>,
    deployment_id: i64,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.unregister(self.deployment_id);
    }
}
