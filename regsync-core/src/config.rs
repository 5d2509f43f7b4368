//! User configuration: `~/.regsync/config.yaml` overlaid by environment.
//!
//! Every knob has a default, so a missing file is not an error. Environment
//! variables win over the file.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

pub const IGNORE_CONFLICTS_ENV: &str = "REGSYNC_IGNORE_CONFLICTS";
pub const SPOOL_DIR_ENV: &str = "REGSYNC_SPOOL_DIR";
pub const SNAPSHOT_ENV: &str = "REGSYNC_SNAPSHOT";

/// Settings shared by the engines and the CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Take the server version instead of producing conflict artifacts.
    pub ignore_conflicts: bool,
    /// Where transient dump spools go; the OS temp dir when unset.
    pub spool_dir: Option<PathBuf>,
    /// Dump snapshot backing the embedded registry.
    pub snapshot: Option<PathBuf>,
    /// Reported in error context for registry failures.
    pub username: Option<String>,
}

impl SyncConfig {
    /// Apply overrides looked up through `lookup` (normally `std::env::var`).
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(IGNORE_CONFLICTS_ENV) {
            self.ignore_conflicts = parse_flag(IGNORE_CONFLICTS_ENV, &raw)?;
        }
        if let Some(dir) = lookup(SPOOL_DIR_ENV).filter(|s| !s.is_empty()) {
            self.spool_dir = Some(PathBuf::from(dir));
        }
        if let Some(file) = lookup(SNAPSHOT_ENV).filter(|s| !s.is_empty()) {
            self.snapshot = Some(PathBuf::from(file));
        }
        Ok(self)
    }
}

/// `~/.regsync/config.yaml`, rooted at `home`.
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".regsync").join("config.yaml")
}

/// Read the config file under `home` without environment overrides.
pub fn load_file_at(home: &Path) -> Result<SyncConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(SyncConfig::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    if contents.trim().is_empty() {
        return Ok(SyncConfig::default());
    }
    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })
}

/// Config file under `home`, then process environment.
pub fn load_at(home: &Path) -> Result<SyncConfig, ConfigError> {
    load_file_at(home)?.with_overrides(|key| std::env::var(key).ok())
}

/// [`load_at`] for the current user's home directory.
pub fn load() -> Result<SyncConfig, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
    load_at(&home)
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_owned(),
            value: raw.to_owned(),
        }),
    }
}
