use crate::detect_chrome_executable;
use serde::{Deserialize, Serialize};
use std::{env, path::PathBuf};

/// Page viewport in CSS pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 800,
        }
    }
}

/// Per-flow browser options, taken from the flow definition's `browserSettings`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrowserSettings {
    pub headless: bool,
    pub stealth: bool,
    pub keep_open: bool,
    pub viewport: Viewport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable_path: Option<PathBuf>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: resolve_headless_default(),
            stealth: false,
            keep_open: false,
            viewport: Viewport::default(),
            user_agent: None,
            executable_path: None,
        }
    }
}

/// Process-level launch configuration shared by every page the provider creates.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LaunchConfig {
    pub executable: PathBuf,
    pub profile_root: PathBuf,
    pub launch_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub no_sandbox: bool,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            executable: detect_chrome_executable().unwrap_or_default(),
            profile_root: default_profile_root(),
            launch_timeout_ms: 20_000,
            request_timeout_ms: 30_000,
            no_sandbox: env_flag("FLOWPILOT_DISABLE_SANDBOX"),
        }
    }
}

impl LaunchConfig {
    /// Executable to launch for `settings`, preferring a per-flow override.
    pub fn executable_for(&self, settings: &BrowserSettings) -> Option<PathBuf> {
        if let Some(path) = settings.executable_path.as_ref() {
            if path.exists() {
                return Some(path.clone());
            }
        }
        if !self.executable.as_os_str().is_empty() && self.executable.exists() {
            return Some(self.executable.clone());
        }
        detect_chrome_executable()
    }
}

fn resolve_headless_default() -> bool {
    // FLOWPILOT_HEADLESS: "0", "false", "no", "off" means headful
    match env::var("FLOWPILOT_HEADLESS") {
        Ok(value) => {
            let lower = value.to_ascii_lowercase();
            !matches!(lower.as_str(), "0" | "false" | "no" | "off")
        }
        Err(_) => true,
    }
}

fn default_profile_root() -> PathBuf {
    if let Ok(path) = env::var("FLOWPILOT_PROFILE_ROOT") {
        return PathBuf::from(path);
    }
    env::temp_dir().join("flowpilot-profiles")
}

pub(crate) fn env_flag(key: &str) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_accept_partial_camel_case_json() {
        let settings: BrowserSettings = serde_json::from_value(serde_json::json!({
            "headless": false,
            "keepOpen": true,
            "viewport": { "width": 800, "height": 600 }
        }))
        .unwrap();
        assert!(!settings.headless);
        assert!(settings.keep_open);
        assert!(!settings.stealth);
        assert_eq!(settings.viewport, Viewport { width: 800, height: 600 });
    }

    #[test]
    fn empty_settings_use_defaults() {
        let settings: BrowserSettings = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(settings.viewport, Viewport::default());
        assert!(!settings.keep_open);
    }
}
