//! Dashboard configuration

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    pub sync: SyncConfig,
    pub push: PushConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Upper bound on concurrently in-flight per-poll vote checks
    pub vote_check_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// Re-fetch everything after the push receiver reports lost updates
    pub resync_on_lag: bool,
}

impl DashboardConfig {
    /// Load configuration from file if it exists, otherwise use defaults
    pub fn load(path: &Path) -> Result<Self, String> {
        if path.exists() {
            let content = fs::read_to_string(path)
                .map_err(|e| format!("Failed to read config file: {}", e))?;

            let config: DashboardConfig = toml::from_str(&content)
                .map_err(|e| format!("Failed to parse config: {}", e))?;

            Ok(config)
        } else {
            Ok(DashboardConfig::default())
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            sync: SyncConfig {
                vote_check_concurrency: 8,
            },
            push: PushConfig { resync_on_lag: true },
        }
    }
}
