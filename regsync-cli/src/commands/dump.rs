//! `regsync dump [path]`: print the dump of a registry subtree.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use regsync_core::{Registry, ROOT_PATH};

/// Arguments for `regsync dump`.
#[derive(Args, Debug)]
pub struct DumpArgs {
    /// Registry path to dump.
    #[arg(default_value = ROOT_PATH)]
    pub path: String,

    /// Registry dump to serve from.
    #[arg(long, value_name = "FILE")]
    pub snapshot: Option<PathBuf>,
}

impl DumpArgs {
    pub fn run(self) -> Result<()> {
        let config = super::load_config()?;
        let registry = super::open_registry(self.snapshot.as_deref(), &config)?;

        let stdout = io::stdout();
        let mut out = stdout.lock();
        registry
            .dump(&self.path, &mut out)
            .with_context(|| format!("cannot dump '{}'", self.path))?;
        out.flush()?;
        Ok(())
    }
}
