use std::env;
use std::fs as stdfs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

const LOCAL_ENV_FILE: &str = "config/local.env";
const CONFIG_ENV: &str = "FLOWPILOT_CONFIG";
const LOG_JSON_ENV: &str = "FLOWPILOT_LOG_JSON";
const HEADLESS_ENV: &str = "FLOWPILOT_HEADLESS";

/// Export `config/local.env` entries that are not already set in the environment.
pub fn load_local_env_overrides() {
    let path = Path::new(LOCAL_ENV_FILE);
    if !path.exists() {
        return;
    }
    let contents = match stdfs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            warn!(path = %path.display(), ?err, "failed to read local.env overrides");
            return;
        }
    };

    let mut applied = 0usize;
    for (key, value) in parse_env_file(&contents) {
        if env::var_os(&key).is_none() {
            env::set_var(&key, value);
            applied += 1;
        }
    }
    info!(path = %path.display(), applied, "Loaded environment overrides from local.env");
}

/// `KEY=value` lines; blank lines and `#` comments are skipped, double-quoted values unescaped.
fn parse_env_file(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .enumerate()
        .filter_map(|(idx, raw)| {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let line = line.strip_prefix("export ").unwrap_or(line);
            match line.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => {
                    Some((key.trim().to_string(), unquote(value.trim())))
                }
                _ => {
                    warn!(line = idx + 1, "invalid local.env entry; skipping");
                    None
                }
            }
        })
        .collect()
}

fn unquote(value: &str) -> String {
    match value
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
    {
        Some(inner) => inner
            .replace("\\\"", "\"")
            .replace("\\n", "\n")
            .replace("\\r", "\r")
            .replace("\\t", "\t"),
        None => value.to_string(),
    }
}

/// Install the global subscriber on stderr so command output stays parseable.
///
/// `RUST_LOG` wins over `level`; `--debug` forces debug. `FLOWPILOT_LOG_JSON=1` emits JSON lines.
pub fn init_logging(level: &str, debug: bool) -> Result<()> {
    let level: tracing::Level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let json = env_flag(LOG_JSON_ENV);
    let json_layer = json.then(|| fmt::layer().json().with_writer(std::io::stderr));
    let text_layer = (!json).then(|| fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .context("Failed to install tracing subscriber")
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(false)
}

pub struct LoadedConfig {
    pub config: Config,
    /// File the config came from, or the first place that was searched when none existed
    pub path: PathBuf,
    pub from_file: bool,
}

/// Search order: `--config`, `$FLOWPILOT_CONFIG`, `./config/config.yaml`,
/// `<config dir>/flowpilot/config.yaml`.
fn config_candidates(explicit: Option<&PathBuf>) -> Vec<PathBuf> {
    if let Some(path) = explicit {
        return vec![path.clone()];
    }
    let mut candidates = Vec::new();
    if let Some(path) = env::var_os(CONFIG_ENV).filter(|value| !value.is_empty()) {
        candidates.push(PathBuf::from(path));
    }
    candidates.push(PathBuf::from("config/config.yaml"));
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join("flowpilot").join("config.yaml"));
    }
    candidates
}

pub async fn load_config(explicit: Option<&PathBuf>) -> Result<LoadedConfig> {
    let candidates = config_candidates(explicit);
    let found = candidates.iter().find(|path| path.exists()).cloned();

    let (mut config, path, from_file) = match found {
        Some(path) => {
            let content = fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: Config = serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            info!(path = %path.display(), "Loaded configuration");
            (config, path, true)
        }
        None => {
            let path = candidates
                .into_iter()
                .next()
                .unwrap_or_else(|| PathBuf::from("config/config.yaml"));
            warn!(path = %path.display(), "Config file not found, using defaults");
            (Config::default(), path, false)
        }
    };

    apply_env_overrides(&mut config, |key| env::var(key).ok());
    Ok(LoadedConfig {
        config,
        path,
        from_file,
    })
}

/// `FLOWPILOT_HOST`, `FLOWPILOT_PORT`, `FLOWPILOT_FLOWS_DIR` and `FLOWPILOT_DATA_DIR` replace
/// the matching config values.
fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(host) = lookup("FLOWPILOT_HOST").filter(|v| !v.trim().is_empty()) {
        config.server.host = host.trim().to_string();
    }
    if let Some(raw) = lookup("FLOWPILOT_PORT") {
        match raw.trim().parse::<u16>() {
            Ok(port) => config.server.port = port,
            Err(_) => warn!(value = %raw, "ignoring invalid FLOWPILOT_PORT"),
        }
    }
    if let Some(dir) = lookup("FLOWPILOT_FLOWS_DIR").filter(|v| !v.trim().is_empty()) {
        config.flows_dir = PathBuf::from(dir.trim());
    }
    if let Some(dir) = lookup("FLOWPILOT_DATA_DIR").filter(|v| !v.trim().is_empty()) {
        config.data_dir = PathBuf::from(dir.trim());
    }
}

/// Push config values that the browser layer reads from the environment.
pub fn apply_runtime_overrides(config: &Config) {
    if let Some(headless) = config.browser.headless {
        if env::var_os(HEADLESS_ENV).is_none() {
            env::set_var(HEADLESS_ENV, if headless { "1" } else { "0" });
            debug!(headless, "default headless mode taken from config");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn env_file_skips_comments_and_unquotes() {
        let parsed = parse_env_file(
            "# comment\n\nFLOWPILOT_PORT=9000\nexport NAME=\"say \\\"hi\\\"\"\nbroken line\n=nokey\n",
        );
        assert_eq!(
            parsed,
            vec![
                ("FLOWPILOT_PORT".to_string(), "9000".to_string()),
                ("NAME".to_string(), "say \"hi\"".to_string()),
            ]
        );
        assert_eq!(unquote("\"a\\tb\""), "a\tb");
        assert_eq!(unquote("\""), "\"");
    }

    #[test]
    fn env_overrides_replace_config_values() {
        let vars: HashMap<&str, &str> = [
            ("FLOWPILOT_PORT", "9300"),
            ("FLOWPILOT_DATA_DIR", "/tmp/fp"),
            ("FLOWPILOT_HOST", "  "),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        apply_env_overrides(&mut config, |key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.server.port, 9300);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/fp"));
        assert_eq!(config.server.host, Config::default().server.host);

        let mut config = Config::default();
        apply_env_overrides(&mut config, |key| {
            (key == "FLOWPILOT_PORT").then(|| "not-a-port".to_string())
        });
        assert_eq!(config.server.port, Config::default().server.port);
    }

    #[tokio::test]
    async fn explicit_config_path_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "server:\n  port: 9100\nflows_dir: my-flows\n").unwrap();
        let loaded = load_config(Some(&path)).await.unwrap();
        assert!(loaded.from_file);
        assert_eq!(loaded.path, path);
        assert_eq!(loaded.config.flows_dir, PathBuf::from("my-flows"));
    }

    #[tokio::test]
    async fn missing_config_falls_back_to_defaults() {
        let path = PathBuf::from("/definitely/not/here/config.yaml");
        let loaded = load_config(Some(&path)).await.unwrap();
        assert!(!loaded.from_file);
        assert_eq!(loaded.path, path);
    }

    #[tokio::test]
    async fn malformed_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "server: [not, a, map]\n").unwrap();
        let err = load_config(Some(&path)).await.err().expect("parse failure");
        assert!(format!("{:#}", err).contains("Failed to parse config file"));
    }
}
