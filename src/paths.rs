//! Directory resolution for keystone
//!
//! Each directory is looked up in order:
//! 1. its `KEYSTONE_*` environment variable (`~` and `$VARS` expanded)
//! 2. the matching XDG variable, if it has one
//! 3. the platform default under the home directory
//!
//! | Directory | Override               | XDG               | Default                   |
//! |-----------|------------------------|-------------------|---------------------------|
//! | config    | `KEYSTONE_CONFIG_DIR`  | `XDG_CONFIG_HOME` | `~/.config/keystone`      |
//! | state     | `KEYSTONE_STATE_DIR`   | `XDG_STATE_HOME`  | `~/.local/state/keystone` |
//! | plugins   | `KEYSTONE_PLUGIN_DIR`  | -                 | `~/.keystone/plugins`     |
//!
//! On Windows the config and state defaults live under `%APPDATA%` and
//! `%LOCALAPPDATA%` instead. A `plugin_dir` set in `config.toml` sits
//! between the override and the default.

use anyhow::{Context, Result};
use std::path::PathBuf;

pub const ENV_CONFIG_DIR: &str = "KEYSTONE_CONFIG_DIR";
pub const ENV_STATE_DIR: &str = "KEYSTONE_STATE_DIR";
pub const ENV_PLUGIN_DIR: &str = "KEYSTONE_PLUGIN_DIR";

const APP_NAME: &str = "keystone";

/// A directory keystone reads from or writes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dir {
    Config,
    State,
    Plugins,
}

impl Dir {
    fn override_var(self) -> &'static str {
        match self {
            Self::Config => ENV_CONFIG_DIR,
            Self::State => ENV_STATE_DIR,
            Self::Plugins => ENV_PLUGIN_DIR,
        }
    }

    fn xdg_var(self) -> Option<&'static str> {
        match self {
            Self::Config => Some("XDG_CONFIG_HOME"),
            Self::State => Some("XDG_STATE_HOME"),
            Self::Plugins => None,
        }
    }

    #[cfg(windows)]
    fn platform_base(self) -> Option<PathBuf> {
        match self {
            Self::Config => dirs::config_dir(),
            Self::State => dirs::data_local_dir(),
            Self::Plugins => None,
        }
    }

    #[cfg(not(windows))]
    fn platform_base(self) -> Option<PathBuf> {
        None
    }

    fn home_default(self, home: PathBuf) -> PathBuf {
        match self {
            Self::Config => home.join(".config").join(APP_NAME),
            Self::State => home.join(".local").join("state").join(APP_NAME),
            Self::Plugins => home.join(format!(".{APP_NAME}")).join("plugins"),
        }
    }

    fn resolve(self) -> Result<PathBuf> {
        self.resolve_from(process_env)
    }

    /// Resolve with `env` standing in for the process environment
    fn resolve_from(self, env: impl Fn(&str) -> Option<String>) -> Result<PathBuf> {
        let var = self.override_var();
        if let Some(dir) = env(var) {
            let path = expand(&dir);
            log::debug!("{self:?} dir from {var}: {}", path.display());
            return Ok(path);
        }

        if let Some(base) = self.xdg_var().and_then(&env) {
            let path = PathBuf::from(base).join(APP_NAME);
            log::debug!("{self:?} dir from XDG: {}", path.display());
            return Ok(path);
        }

        if let Some(base) = self.platform_base() {
            let path = base.join(APP_NAME);
            log::debug!("{self:?} dir from platform default: {}", path.display());
            return Ok(path);
        }

        let home = dirs::home_dir().context("Could not determine home directory")?;
        let path = self.home_default(home);
        log::debug!("{self:?} dir default: {}", path.display());
        Ok(path)
    }
}

/// Directory holding `config.toml`
pub fn config_dir() -> Result<PathBuf> {
    Dir::Config.resolve()
}

/// Directory holding the default state file
pub fn state_dir() -> Result<PathBuf> {
    Dir::State.resolve()
}

/// Root of the driver plugin directories (`<root>/<driver>/templates/...`),
/// looked up through `env`
pub fn plugin_dir_from(env: impl Fn(&str) -> Option<String>) -> Result<PathBuf> {
    Dir::Plugins.resolve_from(env)
}

/// Environment lookup backed by the running process
pub fn process_env(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

/// Expand `~` and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}
