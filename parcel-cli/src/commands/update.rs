//! `parcel update` — bring the working copy to a remote revision.
//!
//! Exits with status 1 when the update left conflicts behind.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use parcel_core::RevisionId;
use parcel_sync::{update, ChangeAction, UpdateResult};

use super::{block_on, gateway, load_config, open_working_copy, print_json, sync_options};

/// Arguments for `parcel update`.
#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Target revision (default: latest).
    #[arg(short = 'r', long)]
    pub revision: Option<String>,

    /// Concurrent downloads.
    #[arg(short = 'j', long)]
    pub jobs: Option<usize>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl UpdateArgs {
    pub fn run(self) -> Result<()> {
        let config = load_config()?;
        let wc = open_working_copy()?;
        let meta = wc.meta()?;
        let gateway = gateway(&meta.remote)?;
        let target = self.revision.map(RevisionId::from);
        let opts = sync_options(&config, self.jobs, self.json);

        let result = block_on(&opts, update(&wc, gateway.as_ref(), target.as_ref(), &opts))?
            .context("update failed")?;

        if self.json {
            print_json(&result)?;
        } else {
            print_result(&result);
        }
        if result.has_conflicts() {
            std::process::exit(1);
        }
        Ok(())
    }
}

fn print_result(result: &UpdateResult) {
    for change in &result.changes {
        if change.action == ChangeAction::Conflicted {
            continue;
        }
        let code = change.action.code().to_string();
        let code = match change.action {
            ChangeAction::Added | ChangeAction::Fetched => code.green(),
            ChangeAction::Removed => code.red(),
            _ => code.bright_black(),
        };
        println!("{code}  {}", change.path);
    }
    for conflict in &result.conflicts {
        let side = conflict
            .side_file
            .as_deref()
            .map(|f| format!(", remote version in {f}"))
            .unwrap_or_default();
        println!(
            "{}  {} ({}{side})",
            "C".red().bold(),
            conflict.path,
            conflict.kind
        );
    }

    if result.is_noop() {
        println!("{} {}", "At revision".bold(), result.to);
    } else {
        println!(
            "{} from revision {} to {} ({} change(s))",
            "Updated".green().bold(),
            result.from,
            result.to,
            result.changes.len()
        );
    }
    if result.has_conflicts() {
        eprintln!(
            "{} {} conflict(s) — edit the files, then run `parcel resolve <path>`",
            "warning:".yellow().bold(),
            result.conflicts.len()
        );
    }
}
