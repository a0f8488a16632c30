//! Utility functions

use serde::{Deserialize, Serialize};

/// Version information of the running binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Compare version strings, ignoring a leading `v` and surrounding whitespace
pub fn same_version(a: &str, b: &str) -> bool {
    let normalize = |s: &str| s.trim().trim_start_matches(['v', 'V']).to_string();
    normalize(a) == normalize(b)
}
