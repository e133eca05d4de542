//! User configuration at `~/.parcel/config.yaml`.
//!
//! ```yaml
//! jobs: 8
//! default_remote: file:///srv/parcel
//! remotes:
//!   local: file:///srv/parcel
//!   mirror: /mnt/mirror/parcel
//! ```
//!
//! Same API pattern as the rest of the crate: `fn_at(home: &Path, …)` for
//! tests, `fn(…)` deriving home from `dirs::home_dir()`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, WcError};
use crate::paths;

/// Transfer pool size when the config does not set one.
pub const DEFAULT_JOBS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Maximum concurrent fetches/uploads.
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    /// Locator (or alias) used by `checkout` when none is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_remote: Option<String>,

    /// Alias → locator.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub remotes: BTreeMap<String, String>,
}

fn default_jobs() -> usize {
    DEFAULT_JOBS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            jobs: DEFAULT_JOBS,
            default_remote: None,
            remotes: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Pool size, never below one.
    pub fn jobs(&self) -> usize {
        self.jobs.max(1)
    }

    /// Expand an alias; anything that is not an alias is returned as-is.
    /// With no argument, falls back to `default_remote`.
    pub fn resolve_remote(&self, name: Option<&str>) -> Option<String> {
        let name = name.map(str::to_string).or_else(|| self.default_remote.clone())?;
        Some(self.remotes.get(&name).cloned().unwrap_or(name))
    }
}

/// Load `<home>/.parcel/config.yaml`; a missing file yields defaults.
pub fn load_at(home: &Path) -> Result<Config, WcError> {
    let path = paths::config_path_at(home);
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    serde_yaml::from_str(&contents).map_err(|source| WcError::ConfigParse { path, source })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Config, WcError> {
    load_at(&home()?)
}

/// Atomically write `<home>/.parcel/config.yaml`.
pub fn save_at(home: &Path, config: &Config) -> Result<(), WcError> {
    let path = paths::config_path_at(home);
    let Some(dir) = path.parent() else {
        return Err(io_err(path, std::io::Error::other("invalid config path")));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    let yaml = serde_yaml::to_string(config)?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

fn home() -> Result<PathBuf, WcError> {
    dirs::home_dir().ok_or(WcError::HomeNotFound)
}
