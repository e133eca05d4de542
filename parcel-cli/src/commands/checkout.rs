//! `parcel checkout` — create a working copy of a remote package.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use parcel_core::{PackageRef, RevisionId};
use parcel_sync::checkout;

use super::{absolute_locator, block_on, current_dir, gateway, load_config, print_json, sync_options, REMOTE_ENV};

/// Arguments for `parcel checkout`.
#[derive(Args, Debug)]
pub struct CheckoutArgs {
    /// Project holding the package, e.g. `devel:tools`.
    pub project: String,

    /// Package name.
    pub package: String,

    /// Target directory (default: `./<package>`).
    pub dir: Option<PathBuf>,

    /// Remote locator or configured alias. Falls back to `$PARCEL_REMOTE`,
    /// then `default_remote` in the config file.
    #[arg(long)]
    pub remote: Option<String>,

    /// Check out this revision instead of the latest.
    #[arg(short = 'r', long)]
    pub revision: Option<String>,

    /// Concurrent downloads.
    #[arg(short = 'j', long)]
    pub jobs: Option<usize>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl CheckoutArgs {
    pub fn run(self) -> Result<()> {
        let config = load_config()?;
        let cwd = current_dir()?;

        let requested = self
            .remote
            .clone()
            .or_else(|| std::env::var(REMOTE_ENV).ok().filter(|v| !v.is_empty()));
        let locator = config.resolve_remote(requested.as_deref()).context(
            "no remote given — pass --remote, set PARCEL_REMOTE, or set default_remote in ~/.parcel/config.yaml",
        )?;
        let gateway = gateway(&absolute_locator(locator, &cwd))?;

        let pkg = PackageRef::new(self.project.as_str(), self.package.as_str());
        let dest = match self.dir {
            Some(dir) => dir,
            None => cwd.join(&self.package),
        };
        let revision = self.revision.map(RevisionId::from);
        let opts = sync_options(&config, self.jobs, self.json);

        let (_wc, result) = block_on(
            &opts,
            checkout(gateway.as_ref(), &pkg, revision.as_ref(), &dest, &opts),
        )?
        .with_context(|| format!("checkout of {pkg} failed"))?;

        if self.json {
            return print_json(&result);
        }
        println!(
            "{} {} at revision {} ({} files) into {}",
            "Checked out".green().bold(),
            result.package.bold(),
            result.revision,
            result.files,
            result.root.display()
        );
        Ok(())
    }
}
