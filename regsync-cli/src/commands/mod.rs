pub mod checkout;
pub mod console;
pub mod dump;
pub mod update;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::Colorize;

use regsync_core::{config, MemoryRegistry, SyncConfig};
use regsync_sync::SyncError;

/// `~/.regsync/config.yaml` overlaid with `REGSYNC_*` variables.
pub fn load_config() -> Result<SyncConfig> {
    let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;
    config::load_at(&home).context("failed to load ~/.regsync/config.yaml")
}

/// Load the embedded registry from `snapshot`, falling back to the configured
/// snapshot.
pub fn open_registry(snapshot: Option<&Path>, config: &SyncConfig) -> Result<MemoryRegistry> {
    let path = snapshot
        .map(Path::to_path_buf)
        .or_else(|| config.snapshot.clone())
        .context("no registry snapshot; pass --snapshot or set REGSYNC_SNAPSHOT")?;
    let registry = MemoryRegistry::load_snapshot_at(&path)
        .with_context(|| format!("cannot load registry snapshot '{}'", path.display()))?;
    log::debug!("registry loaded from {}", path.display());
    Ok(registry)
}

/// Report a spool that could not be removed. The command already succeeded.
pub fn warn_cleanup(err: Option<&SyncError>) {
    if let Some(err) = err {
        eprintln!("{} {err}", "warning:".yellow().bold());
    }
}
