//! regsync: check out and update registry working copies.
//!
//! # Usage
//!
//! ```text
//! regsync checkout <url> [-d DIR] [--snapshot FILE] [-o FILE] [-u USER] [--non-interactive] [--json]
//! regsync update [url] [-d DIR] [--snapshot FILE] [--silent] [--non-interactive] [--json]
//! regsync dump [path] [--snapshot FILE]
//! ```
//!
//! The registry is loaded from a dump snapshot given with `--snapshot`,
//! `REGSYNC_SNAPSHOT` or the `snapshot` key of `~/.regsync/config.yaml`.

mod commands;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};

use commands::{checkout::CheckoutArgs, dump::DumpArgs, update::UpdateArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "regsync",
    version,
    about = "Sync a local working copy with a resource registry",
    long_about = None,
)]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug). `RUST_LOG` wins when set.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check out a registry collection into a local directory.
    #[command(visible_alias = "co")]
    Checkout(CheckoutArgs),

    /// Merge registry changes into an existing working copy.
    #[command(visible_alias = "up")]
    Update(UpdateArgs),

    /// Print the dump of a registry path to stdout.
    Dump(DumpArgs),
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match cli.command {
        Commands::Checkout(args) => args.run(),
        Commands::Update(args) => args.run(),
        Commands::Dump(args) => args.run(),
    }
}
