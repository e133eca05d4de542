//! Parcel — package working-copy client.
//!
//! # Usage
//!
//! ```text
//! parcel checkout <project> <package> [<dir>] [--remote <locator|alias>] [-r <rev>]
//! parcel status [--json]
//! parcel update [-r <rev>] [--json]
//! parcel commit [<path>...] [-m <message>] [--json]
//! parcel add|remove|revert|resolve <path>...
//! parcel diff [<path>...]
//! parcel info [--json]
//! parcel cleanup [--force]
//! ```
//!
//! Logging goes to stderr; set `PARCEL_LOG` (or `RUST_LOG`) to e.g. `debug`.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    checkout::CheckoutArgs,
    cleanup::CleanupArgs,
    commit::CommitArgs,
    diff::DiffArgs,
    info::InfoArgs,
    local::{AddArgs, RemoveArgs, ResolveArgs, RevertArgs},
    status::StatusArgs,
    update::UpdateArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "parcel",
    version,
    about = "Check out, update and commit package sources against a remote",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a working copy of a remote package.
    #[command(alias = "co")]
    Checkout(CheckoutArgs),

    /// Show the status of every file in the working copy.
    #[command(alias = "st")]
    Status(StatusArgs),

    /// Bring the working copy to the latest (or a given) remote revision.
    #[command(alias = "up")]
    Update(UpdateArgs),

    /// Publish local changes as a new remote revision.
    #[command(alias = "ci")]
    Commit(CommitArgs),

    /// Schedule untracked files for addition.
    Add(AddArgs),

    /// Schedule tracked files for deletion.
    #[command(alias = "rm")]
    Remove(RemoveArgs),

    /// Discard local changes to files.
    Revert(RevertArgs),

    /// Mark conflicted files as resolved.
    Resolve(ResolveArgs),

    /// Show unified diffs of local changes against the base revision.
    Diff(DiffArgs),

    /// Show working-copy metadata and lock state.
    Info(InfoArgs),

    /// Recover from an interrupted operation.
    Cleanup(CleanupArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Checkout(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Update(args) => args.run(),
        Commands::Commit(args) => args.run(),
        Commands::Add(args) => args.run(),
        Commands::Remove(args) => args.run(),
        Commands::Revert(args) => args.run(),
        Commands::Resolve(args) => args.run(),
        Commands::Diff(args) => args.run(),
        Commands::Info(args) => args.run(),
        Commands::Cleanup(args) => args.run(),
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_env("PARCEL_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
