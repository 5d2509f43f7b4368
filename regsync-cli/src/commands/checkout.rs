//! `regsync checkout`: materialise a registry collection on disk.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use regsync_sync::{CheckoutCommand, CheckoutSummary};

use super::console::ConsoleCallback;

/// Arguments for `regsync checkout`.
#[derive(Args, Debug)]
pub struct CheckoutArgs {
    /// Registry url (`https://host/registry/path`) or a bare registry path.
    pub url: Option<String>,

    /// Working directory to check out into.
    #[arg(long, short = 'd', default_value = ".")]
    pub dir: PathBuf,

    /// Registry dump to serve from.
    #[arg(long, value_name = "FILE")]
    pub snapshot: Option<PathBuf>,

    /// Write the raw dump to FILE (relative to the working directory)
    /// instead of checking out.
    #[arg(long, short = 'o', value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// User name recorded in error reports.
    #[arg(long, short = 'u')]
    pub user: Option<String>,

    /// Answer every prompt with its default.
    #[arg(long)]
    pub non_interactive: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct CheckoutReportJson {
    added: usize,
    overwritten: usize,
    not_overwritten: usize,
    output_file: Option<String>,
    cleanup_error: Option<String>,
}

impl From<&CheckoutSummary> for CheckoutReportJson {
    fn from(s: &CheckoutSummary) -> Self {
        Self {
            added: s.added,
            overwritten: s.overwritten,
            not_overwritten: s.not_overwritten,
            output_file: s.output_file.as_ref().map(|p| p.display().to_string()),
            cleanup_error: s.cleanup_error.as_ref().map(ToString::to_string),
        }
    }
}

impl CheckoutArgs {
    pub fn run(self) -> Result<()> {
        let config = super::load_config()?;
        let registry = super::open_registry(self.snapshot.as_deref(), &config)?;

        let mut command = CheckoutCommand::new(self.url.as_deref(), &self.dir)
            .context("invalid checkout target")?
            .with_username(self.user.clone())
            .with_config(&config);
        if let Some(file) = &self.output {
            command = command.with_output_file(file);
        }

        let callback = ConsoleCallback::new(!self.non_interactive, self.json);
        let summary = command
            .execute(&registry, Some(&callback))
            .with_context(|| format!("checkout of {} failed", command.location()))?;

        if self.json {
            let report = CheckoutReportJson::from(&summary);
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        super::warn_cleanup(summary.cleanup_error.as_ref());
        match &summary.output_file {
            Some(file) => println!(
                "{} dumped {} to {}",
                "✓".green(),
                command.location(),
                file.display()
            ),
            None => println!(
                "{} checked out {} into {} ({} added, {} overwritten, {} kept)",
                "✓".green(),
                command.location(),
                self.dir.display(),
                summary.added,
                summary.overwritten,
                summary.not_overwritten
            ),
        }
        Ok(())
    }
}
