//! `parcel info` — working-copy metadata and lock state.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use parcel_sync::WorkingCopyInfo;

use super::{open_working_copy, print_json};

/// Arguments for `parcel info`.
#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct InfoRow {
    #[tabled(rename = "field")]
    field: &'static str,
    #[tabled(rename = "value")]
    value: String,
}

impl InfoArgs {
    pub fn run(self) -> Result<()> {
        let wc = open_working_copy()?;
        let info = wc.info().context("failed to read working-copy metadata")?;
        if self.json {
            return print_json(&info);
        }
        print_table(&info);
        Ok(())
    }
}

fn print_table(info: &WorkingCopyInfo) {
    let lock = match &info.locked_by {
        None => "free".to_string(),
        Some(holder) if info.lock_stale => format!(
            "stale: {} (pid {} on {}) — run `parcel cleanup`",
            holder.operation, holder.pid, holder.host
        ),
        Some(holder) => format!(
            "held: {} (pid {} on {}, since {})",
            holder.operation,
            holder.pid,
            holder.host,
            holder.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
    };

    let rows = vec![
        InfoRow { field: "root", value: info.root.display().to_string() },
        InfoRow { field: "package", value: info.package.clone() },
        InfoRow { field: "remote", value: info.remote.clone() },
        InfoRow { field: "revision", value: info.revision.to_string() },
        InfoRow { field: "tracked files", value: info.tracked_files.to_string() },
        InfoRow { field: "generation", value: info.generation.to_string() },
        InfoRow {
            field: "updated",
            value: info.updated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        },
        InfoRow { field: "lock", value: lock },
    ];

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{}", info.package.bold());
    println!("{table}");
}
