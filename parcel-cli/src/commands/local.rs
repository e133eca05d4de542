//! Offline bookkeeping: `add`, `remove`, `revert`, `resolve`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use parcel_sync::{OpAction, OpResult};

use super::{open_working_copy, working_copy_paths};

#[derive(Args, Debug)]
pub struct AddArgs {
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

impl AddArgs {
    pub fn run(self) -> Result<()> {
        let wc = open_working_copy()?;
        let paths = working_copy_paths(&wc, &self.paths)?;
        let results = parcel_sync::add(&wc, &paths).context("add failed")?;
        print_results(&results);
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct RemoveArgs {
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Schedule the deletion but leave the files on disk.
    #[arg(long)]
    pub keep_local: bool,
}

impl RemoveArgs {
    pub fn run(self) -> Result<()> {
        let wc = open_working_copy()?;
        let paths = working_copy_paths(&wc, &self.paths)?;
        let results = parcel_sync::remove(&wc, &paths, self.keep_local).context("remove failed")?;
        print_results(&results);
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct RevertArgs {
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

impl RevertArgs {
    pub fn run(self) -> Result<()> {
        let wc = open_working_copy()?;
        let paths = working_copy_paths(&wc, &self.paths)?;
        let results = parcel_sync::revert(&wc, &paths).context("revert failed")?;
        print_results(&results);
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct ResolveArgs {
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

impl ResolveArgs {
    pub fn run(self) -> Result<()> {
        let wc = open_working_copy()?;
        let paths = working_copy_paths(&wc, &self.paths)?;
        let results = parcel_sync::resolve(&wc, &paths).context("resolve failed")?;
        print_results(&results);
        Ok(())
    }
}

fn print_results(results: &[OpResult]) {
    for r in results {
        let action = format!("{:<10}", r.action.to_string());
        let action = match r.action {
            OpAction::Added | OpAction::Undeleted | OpAction::Restored | OpAction::Resolved => {
                action.green()
            }
            OpAction::Removed | OpAction::Untracked => action.red(),
            OpAction::Unchanged => action.bright_black(),
        };
        println!("{action} {}", r.path);
    }
}
