//! `parcel commit` — publish local changes as a new remote revision.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Args;
use colored::Colorize;

use parcel_sync::{commit, CommitResult, ErrorKind};

use super::{
    block_on, gateway, load_config, open_working_copy, print_json, sync_options, working_copy_paths,
};

/// Arguments for `parcel commit`.
#[derive(Args, Debug)]
pub struct CommitArgs {
    /// Commit only these files (default: every change).
    pub paths: Vec<PathBuf>,

    /// Commit message.
    #[arg(short = 'm', long)]
    pub message: Option<String>,

    /// Concurrent uploads.
    #[arg(short = 'j', long)]
    pub jobs: Option<usize>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl CommitArgs {
    pub fn run(self) -> Result<()> {
        let config = load_config()?;
        let wc = open_working_copy()?;
        let meta = wc.meta()?;
        let gateway = gateway(&meta.remote)?;
        let paths = working_copy_paths(&wc, &self.paths)?;
        let opts = sync_options(&config, self.jobs, self.json);

        let result = block_on(
            &opts,
            commit(&wc, gateway.as_ref(), &paths, self.message.as_deref(), &opts),
        )?
        .map_err(|e| match e.kind() {
            ErrorKind::RemoteConflict => {
                anyhow!(e).context("the remote has moved on — run `parcel update`, then commit again")
            }
            _ => anyhow!(e).context("commit failed"),
        })?;

        if self.json {
            return print_json(&result);
        }
        print_result(&result);
        Ok(())
    }
}

fn print_result(result: &CommitResult) {
    if !result.created {
        println!("{}", "Nothing to commit.".bright_black());
        return;
    }
    for file in &result.committed {
        println!("{}  {}", file.status.code().to_string().bold(), file.path);
    }
    println!(
        "{} revision {} ({} file(s), {} uploaded)",
        "Committed".green().bold(),
        result.revision,
        result.committed.len(),
        result.uploaded
    );
}
