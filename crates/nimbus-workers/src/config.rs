//! Coordinator-pushed configuration.
//!
//! Config updates arrive as versioned JSON over the command ring; each
//! worker applies the update and acknowledges the version it now runs.

use serde::{Deserialize, Serialize};
use tracing::warn;

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub guest_memory_mib: u32,
    #[serde(default)]
    pub enable_workers: Vec<String>,
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default)]
    pub active_disk_image: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl WorkerConfig {
    /// Maps the configured level to `tracing`. Unknown values fall back
    /// to `info` with a warning rather than failing the update.
    pub fn tracing_level(&self) -> tracing::Level {
        match self.log_level.as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "info" => tracing::Level::INFO,
            "warn" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            other => {
                warn!(level = other, "unknown log level, falling back to info");
                tracing::Level::INFO
            }
        }
    }
}

/// The worker-local view of the config exchange.
#[derive(Default)]
pub struct ConfigState {
    version: u32,
    config: Option<WorkerConfig>,
}

impl ConfigState {
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn config(&self) -> Option<&WorkerConfig> {
        self.config.as_ref()
    }

    /// Applies a `config.update`. Returns the version to acknowledge, or
    /// the parse error message for the coordinator.
    pub fn apply_update(&mut self, version: u32, json: &[u8]) -> Result<u32, String> {
        let config: WorkerConfig = serde_json::from_slice(json)
            .map_err(|e| format!("config.update v{version} rejected: {e}"))?;
        self.version = version;
        self.config = Some(config);
        Ok(version)
    }
}
