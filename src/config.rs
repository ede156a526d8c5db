//! Optional user configuration (`config.toml` in the config directory)
//!
//! Every field has a default, so a missing file or a partial file is fine.
//! Command-line flags override whatever is set here.

use crate::paths;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.toml";

const DEFAULT_STATE_FILE: &str = "state.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Resolution rounds allowed before giving up
    pub retry_budget: usize,
    /// Driver used when the environment file does not name one
    pub default_driver: Option<String>,
    /// Where drivers write their output
    pub output_dir: Option<String>,
    /// Driver plugin directory (templates)
    pub plugin_dir: Option<String>,
    /// State file used when `--state` is not given
    pub state_file: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retry_budget: resolver::DEFAULT_RETRY_BUDGET,
            default_driver: None,
            output_dir: None,
            plugin_dir: None,
            state_file: None,
        }
    }
}

impl Config {
    /// Load the config from the default location, falling back to defaults
    pub fn load() -> Result<Self> {
        let path = paths::config_dir()?.join(CONFIG_FILE);
        Self::load_from(&path)
    }

    /// Load the config from `path`; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid config format in {}", path.display()))?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Resolved plugin directory: `KEYSTONE_PLUGIN_DIR`, then the config
    /// value, then the path default
    pub fn plugin_dir(&self) -> Result<PathBuf> {
        self.plugin_dir_from(paths::process_env)
    }

    fn plugin_dir_from(&self, env: impl Fn(&str) -> Option<String>) -> Result<PathBuf> {
        match (env(paths::ENV_PLUGIN_DIR), &self.plugin_dir) {
            (None, Some(dir)) => Ok(paths::expand(dir)),
            _ => paths::plugin_dir_from(env),
        }
    }

    /// Resolved state file: config value, else `state.yaml` in the state dir
    pub fn state_file(&self) -> Result<PathBuf> {
        match &self.state_file {
            Some(file) => Ok(paths::expand(file)),
            None => Ok(paths::state_dir()?.join(DEFAULT_STATE_FILE)),
        }
    }

    /// Resolved output directory: config value, else the current directory
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .as_deref()
            .map_or_else(|| PathBuf::from("."), paths::expand)
    }
}
