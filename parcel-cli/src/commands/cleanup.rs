//! `parcel cleanup` — recover a working copy after an interrupted operation.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use super::open_working_copy;

/// Arguments for `parcel cleanup`.
#[derive(Args, Debug)]
pub struct CleanupArgs {
    /// Break the lock even when its holder still looks alive.
    #[arg(long)]
    pub force: bool,
}

impl CleanupArgs {
    pub fn run(self) -> Result<()> {
        let wc = open_working_copy()?;
        let report = parcel_sync::cleanup(&wc, self.force).context("cleanup failed")?;

        if report.lock_removed {
            println!("{} removed stale lock", "•".cyan());
        }
        if report.tmp_removed > 0 {
            println!("{} removed {} temporary file(s)", "•".cyan(), report.tmp_removed);
        }
        if report.markers_cleared > 0 {
            println!(
                "{} cleared {} interrupted-update marker(s); run `parcel update` to finish",
                "•".cyan(),
                report.markers_cleared
            );
        }
        if report.pristine_pruned > 0 {
            println!("{} pruned {} unused base copies", "•".cyan(), report.pristine_pruned);
        }
        println!("{}", "Working copy is consistent.".green());
        Ok(())
    }
}
