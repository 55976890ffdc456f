//! Application configuration
//!
//! Loaded from `config/config.yaml` (or the user config dir) by the CLI; every field has a default
//! so a partial file is enough.

use std::path::PathBuf;

use action_flow::EngineLimits;
use cdp_adapter::LaunchConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    /// Directory scanned for flow definitions exposed as HTTP routes
    pub flows_dir: PathBuf,
    /// Root of the execution store (`<data_dir>/executions/<id>.json`)
    pub data_dir: PathBuf,
    /// Finished executions are evicted from memory after this many seconds
    pub retention_secs: u64,
    pub engine: EngineLimits,
    pub browser: BrowserConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Process-wide browser launch options. Per-flow settings still come from `browserSettings`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub executable: Option<PathBuf>,
    pub profile_root: Option<PathBuf>,
    pub headless: Option<bool>,
    pub no_sandbox: Option<bool>,
    pub launch_timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            flows_dir: PathBuf::from("flows"),
            data_dir: default_data_dir(),
            retention_secs: 3_600,
            engine: EngineLimits::default(),
            browser: BrowserConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8804,
        }
    }
}

impl BrowserConfig {
    /// Launch configuration with detected defaults overridden by configured values.
    pub fn launch_config(&self) -> LaunchConfig {
        let mut launch = LaunchConfig::default();
        if let Some(path) = self.executable.as_ref() {
            launch.executable = path.clone();
        }
        if let Some(path) = self.profile_root.as_ref() {
            launch.profile_root = path.clone();
        }
        if let Some(flag) = self.no_sandbox {
            launch.no_sandbox = flag;
        }
        if let Some(ms) = self.launch_timeout_ms {
            launch.launch_timeout_ms = ms;
        }
        if let Some(ms) = self.request_timeout_ms {
            launch.request_timeout_ms = ms;
        }
        launch
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("flowpilot"))
        .unwrap_or_else(|| PathBuf::from(".flowpilot"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config: Config = serde_yaml::from_str(
            "server:\n  port: 9000\nengine:\n  maxNodeVisits: 50\nbrowser:\n  headless: false\n",
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.engine.max_node_visits, 50);
        assert_eq!(config.engine.max_depth, EngineLimits::default().max_depth);
        assert_eq!(config.browser.headless, Some(false));
        assert_eq!(config.flows_dir, PathBuf::from("flows"));
    }

    #[test]
    fn launch_config_applies_overrides() {
        let browser = BrowserConfig {
            executable: Some(PathBuf::from("/opt/chrome")),
            launch_timeout_ms: Some(5_000),
            ..Default::default()
        };
        let launch = browser.launch_config();
        assert_eq!(launch.executable, PathBuf::from("/opt/chrome"));
        assert_eq!(launch.launch_timeout_ms, 5_000);
    }
}
