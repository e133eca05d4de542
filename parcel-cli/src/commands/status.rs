//! `parcel status` — one line per changed file.

use anyhow::{Context, Result};
use clap::Args;
use colored::{ColoredString, Colorize};

use parcel_core::LocalStatus;
use parcel_sync::{compute_status, StatusReport};

use super::{open_working_copy, print_json};

/// Arguments for `parcel status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Also list unmodified files.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let wc = open_working_copy()?;
        let report = compute_status(&wc).context("failed to compute status")?;
        if self.json {
            return print_json(&report);
        }
        let package = wc.package_ref()?;
        print_report(&package.to_string(), &report, self.verbose);
        Ok(())
    }
}

fn print_report(package: &str, report: &StatusReport, verbose: bool) {
    println!("{} @ revision {}", package.bold(), report.revision);

    for (path, status) in &report.files {
        if *status == LocalStatus::Unmodified && !verbose {
            continue;
        }
        println!("{}  {}", colored_code(*status), path);
    }
    for path in &report.untracked {
        println!("{}  {}", "?".bright_black(), path);
    }

    if !report.interrupted.is_empty() {
        eprintln!(
            "{} an interrupted update left {} file(s) half-applied — run `parcel update` again",
            "warning:".yellow().bold(),
            report.interrupted.len()
        );
    }
    let conflicted = report.conflicted();
    if !conflicted.is_empty() {
        eprintln!(
            "{} {} conflicted file(s); edit them, then run `parcel resolve <path>`",
            "note:".cyan().bold(),
            conflicted.len()
        );
    }
    if report.is_clean() && report.untracked.is_empty() {
        println!("{}", "Nothing changed.".bright_black());
    }
}

fn colored_code(status: LocalStatus) -> ColoredString {
    let code = status.code().to_string();
    match status {
        LocalStatus::Unmodified => code.normal(),
        LocalStatus::Added => code.green().bold(),
        LocalStatus::Deleted => code.red().bold(),
        LocalStatus::Modified => code.yellow().bold(),
        LocalStatus::Missing => code.magenta().bold(),
        LocalStatus::Conflicted => code.red().bold().underline(),
    }
}
