use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Default configuration file name, looked up in the working directory by the CLI.
pub const CONFIG_FILE: &str = "dirmon.toml";

/// Monitoring configuration, usually loaded from `dirmon.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    /// Coalescing latency: rapid changes within this window are delivered as one batch.
    pub latency_ms: u64,
    /// How long `start` waits for the watch stream to come up.
    pub start_timeout_ms: u64,
    /// Name given to the watcher thread.
    pub thread_name: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            latency_ms: 1000,
            start_timeout_ms: 5000,
            thread_name: "dirmon-watcher".to_string(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from the TOML file at `path`.
    ///
    /// Returns a default configuration if the file does not exist or cannot be parsed.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Self>(&contents) {
                Ok(config) => config,
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config, using defaults"
                    );
                    Self::default()
                }
            },
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config, using defaults"
                );
                Self::default()
            }
        }
    }

    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }
}
