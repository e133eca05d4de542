//! `parcel diff [<path>...]` — unified diffs of local changes.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use super::{open_working_copy, working_copy_paths};

/// Arguments for `parcel diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Limit the diff to these files (default: every changed file).
    pub paths: Vec<PathBuf>,
}

impl DiffArgs {
    pub fn run(self) -> Result<()> {
        let wc = open_working_copy()?;
        let paths = working_copy_paths(&wc, &self.paths)?;

        let diffs = parcel_sync::diff(&wc, &paths).context("diff failed")?;
        if diffs.is_empty() {
            println!("No local changes.");
            return Ok(());
        }

        for diff in diffs {
            print!("{}", diff.unified_diff);
            if !diff.unified_diff.ends_with('\n') {
                println!();
            }
        }
        Ok(())
    }
}
