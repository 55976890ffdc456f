use std::path::{Path, PathBuf};

use crate::app_context::AppContext;
use crate::config::Config;

pub struct CliContext {
    config: Config,
    config_path: PathBuf,
}

impl CliContext {
    pub fn new(config: Config, config_path: PathBuf) -> Self {
        Self {
            config,
            config_path,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Engine wiring for commands that execute flows.
    pub fn app_context(&self) -> AppContext {
        AppContext::from_config(&self.config)
    }
}
