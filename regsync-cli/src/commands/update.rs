//! `regsync update`: merge registry changes into a working copy.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use regsync_sync::{UpdateCommand, UpdateSummary};

use super::console::ConsoleCallback;

/// Arguments for `regsync update`.
#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Registry url or path; defaults to where the working copy came from.
    pub url: Option<String>,

    /// Working copy to update.
    #[arg(long, short = 'd', default_value = ".")]
    pub dir: PathBuf,

    /// Registry dump to serve from.
    #[arg(long, value_name = "FILE")]
    pub snapshot: Option<PathBuf>,

    /// User name recorded in error reports.
    #[arg(long, short = 'u')]
    pub user: Option<String>,

    /// No prompts, no deletions, and local edits are never touched.
    #[arg(long)]
    pub silent: bool,

    /// Take the registry copy whenever both sides changed.
    #[arg(long)]
    pub ignore_conflicts: bool,

    /// Answer every prompt with its default.
    #[arg(long)]
    pub non_interactive: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct UpdateReportJson {
    any_change: bool,
    added: usize,
    updated: usize,
    conflicted: usize,
    deleted: usize,
    not_deleted: usize,
    cleanup_error: Option<String>,
}

impl From<&UpdateSummary> for UpdateReportJson {
    fn from(s: &UpdateSummary) -> Self {
        Self {
            any_change: s.any_change(),
            added: s.added,
            updated: s.updated,
            conflicted: s.conflicted,
            deleted: s.deleted,
            not_deleted: s.not_deleted,
            cleanup_error: s.cleanup_error.as_ref().map(ToString::to_string),
        }
    }
}

impl UpdateArgs {
    pub fn run(self) -> Result<()> {
        let config = super::load_config()?;
        let registry = super::open_registry(self.snapshot.as_deref(), &config)?;

        let command = UpdateCommand::new(self.url.as_deref(), &self.dir)
            .with_context(|| format!("cannot update '{}'", self.dir.display()))?
            .silent(self.silent)
            .ignore_conflicts(self.ignore_conflicts)
            .with_username(self.user.clone())
            .with_config(&config);

        let callback = ConsoleCallback::new(!self.non_interactive, self.json);
        let summary = command
            .execute(&registry, Some(&callback))
            .with_context(|| format!("update from {} failed", command.location()))?;

        if self.json {
            let report = UpdateReportJson::from(&summary);
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        super::warn_cleanup(summary.cleanup_error.as_ref());
        if !summary.any_change() && summary.conflicted == 0 {
            println!("{} '{}' is up to date", "✓".green(), self.dir.display());
            return Ok(());
        }
        println!(
            "{} updated '{}' ({} added, {} updated, {} conflicted, {} deleted)",
            "✓".green(),
            self.dir.display(),
            summary.added,
            summary.updated,
            summary.conflicted,
            summary.deleted
        );
        if summary.conflicted > 0 && !command.options().ignore_conflicts {
            println!(
                "  {} resolve conflicts by merging <name>.mine and <name>.server",
                "!".red().bold()
            );
        }
        Ok(())
    }
}
