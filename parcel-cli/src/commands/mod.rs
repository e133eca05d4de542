//! Subcommand implementations and the plumbing they share.

pub mod checkout;
pub mod cleanup;
pub mod commit;
pub mod diff;
pub mod info;
pub mod local;
pub mod status;
pub mod update;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;

use parcel_core::{
    config::{self, Config},
    paths,
};
use parcel_remote::{open_remote, RemoteGateway};
use parcel_sync::{Direction, ProgressListener, SyncOptions, WorkingCopy};

/// Overrides `default_remote` from the config file.
pub const REMOTE_ENV: &str = "PARCEL_REMOTE";

pub fn load_config() -> Result<Config> {
    let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;
    config::load_at(&home).context("failed to load ~/.parcel/config.yaml")
}

pub fn current_dir() -> Result<PathBuf> {
    std::env::current_dir().context("could not determine current directory")
}

/// The working copy containing the current directory.
pub fn open_working_copy() -> Result<WorkingCopy> {
    let cwd = current_dir()?;
    WorkingCopy::discover(&cwd)
        .with_context(|| format!("'{}' is not inside a parcel working copy", cwd.display()))
}

/// Command-line paths (relative to the current directory) as working-copy
/// relative paths.
pub fn working_copy_paths(wc: &WorkingCopy, inputs: &[PathBuf]) -> Result<Vec<String>> {
    let cwd = current_dir()?;
    inputs
        .iter()
        .map(|input| {
            paths::relativize(wc.root(), &cwd, input)
                .with_context(|| format!("invalid path '{}'", input.display()))
        })
        .collect()
}

pub fn gateway(locator: &str) -> Result<Arc<dyn RemoteGateway>> {
    open_remote(locator).with_context(|| format!("cannot open remote '{locator}'"))
}

/// Transfer options from config, with an optional `--jobs` override.
/// Progress lines go to stderr unless `quiet`.
pub fn sync_options(config: &Config, jobs: Option<usize>, quiet: bool) -> SyncOptions {
    let mut opts = SyncOptions::from_config(config);
    if let Some(jobs) = jobs {
        opts = opts.with_jobs(jobs);
    }
    if !quiet {
        opts = opts.with_listener(Arc::new(ConsoleProgress));
    }
    opts
}

/// Drive `fut` to completion on a multi-threaded runtime. Ctrl-C cancels
/// `opts.cancel`, which the coordinators observe between transfers.
pub fn block_on<F: Future>(opts: &SyncOptions, fut: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let cancel = opts.cancel.clone();
    Ok(runtime.block_on(async move {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted; cancelling");
                cancel.cancel();
            }
        });
        fut.await
    }))
}

pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize JSON output")?
    );
    Ok(())
}

/// One dimmed line per transfer.
struct ConsoleProgress;

impl ProgressListener for ConsoleProgress {
    fn transfer(&self, direction: Direction, path: &str) {
        let arrow = match direction {
            Direction::Download => "↓",
            Direction::Upload => "↑",
        };
        eprintln!("  {} {}", arrow.bright_black(), path.bright_black());
    }
}

/// Bare relative locators are pinned to the current directory so the
/// recorded remote keeps working from anywhere.
pub fn absolute_locator(locator: String, cwd: &Path) -> String {
    if locator.contains("://") || Path::new(&locator).is_absolute() {
        return locator;
    }
    cwd.join(locator).display().to_string()
}
