//! Update coordinator: bring a working copy to a remote revision.
//!
//! ## Phases
//!
//! 1. Plan every path from local status, base checksum and the target
//!    listing. Planning is pure ([`plan_path`]).
//! 2. Fetch needed content into the pristine store (bounded, cancellable).
//! 3. Record a `pending` marker on every entry about to be rewritten.
//! 4. Apply: write or delete working files, write conflict side files.
//! 5. Commit the new entries and revision in one transaction.
//!
//! Cancellation and transport failures are honoured up to phase 3; nothing
//! in the working tree has changed at that point. A crash during phase 4
//! leaves the old revision recorded with markers, and rerunning the update
//! converges.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use parcel_core::{
    paths, Checksum, ConflictKind, ConflictMarker, EntryState, FileEntry, LocalStatus,
    PendingTransfer, RevisionId, WorkingCopyMeta,
};
use parcel_remote::{FileListing, RemoteGateway};

use crate::error::{io_err, SyncError};
use crate::options::SyncOptions;
use crate::status;
use crate::transfer;
use crate::workspace::WorkingCopy;
use crate::writer;

/// What happened to one path during an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    /// Tracked file replaced with the remote content.
    Fetched,
    /// New remote file written.
    Added,
    /// Tracked file deleted because the remote dropped it.
    Removed,
    /// Local bytes already equal the remote; only the base moved.
    Adopted,
    /// Locally deleted file whose base moved.
    Rebased,
    /// Entry dropped without touching the disk.
    Untracked,
    Conflicted,
}

impl ChangeAction {
    /// Single-column code as printed by `parcel update`.
    pub fn code(self) -> char {
        match self {
            ChangeAction::Fetched => 'U',
            ChangeAction::Added => 'A',
            ChangeAction::Removed => 'D',
            ChangeAction::Adopted => 'G',
            ChangeAction::Rebased => 'R',
            ChangeAction::Untracked => '-',
            ChangeAction::Conflicted => 'C',
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeAction::Fetched => "fetched",
            ChangeAction::Added => "added",
            ChangeAction::Removed => "removed",
            ChangeAction::Adopted => "adopted",
            ChangeAction::Rebased => "rebased",
            ChangeAction::Untracked => "untracked",
            ChangeAction::Conflicted => "conflicted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChange {
    pub path: String,
    pub action: ChangeAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictReport {
    pub path: String,
    pub kind: ConflictKind,
    /// Where the remote version was written, if the remote still has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub side_file: Option<String>,
}

/// Outcome of [`update`]. Conflicts are data, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateResult {
    pub from: RevisionId,
    pub to: RevisionId,
    pub changes: Vec<FileChange>,
    pub conflicts: Vec<ConflictReport>,
}

impl UpdateResult {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    pub fn is_noop(&self) -> bool {
        self.from == self.to && self.changes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Local facts about one path.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LocalView<'a> {
    pub entry: Option<&'a FileEntry>,
    pub status: Option<LocalStatus>,
    /// Checksum of the file on disk, if there is one.
    pub disk: Option<&'a Checksum>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PlanAction {
    Keep,
    /// Write the remote content. `new` when nothing tracked the path.
    Fetch { checksum: Checksum, new: bool },
    /// Disk already holds the remote content; record it as the base.
    Adopt { checksum: Checksum },
    /// Keep a local deletion on top of the new base.
    Rebase { checksum: Checksum },
    RemoveLocal,
    Untrack,
    Conflict {
        kind: ConflictKind,
        checksum: Option<Checksum>,
    },
}

/// Decide what an update does with one path. `remote` is the checksum in the
/// target listing, `None` if the target does not contain the path.
pub(crate) fn plan_path(local: LocalView<'_>, remote: Option<&Checksum>) -> PlanAction {
    let base = local.entry.and_then(|e| e.checksum.as_ref());
    let Some(status) = local.status else {
        // Not tracked.
        return match (remote, local.disk) {
            (None, _) => PlanAction::Keep,
            (Some(r), None) => PlanAction::Fetch {
                checksum: r.clone(),
                new: true,
            },
            (Some(r), Some(d)) if r == d => PlanAction::Adopt { checksum: r.clone() },
            (Some(r), Some(_)) => PlanAction::Conflict {
                kind: ConflictKind::Obstructed,
                checksum: Some(r.clone()),
            },
        };
    };

    match (status, remote) {
        (LocalStatus::Conflicted, _) => PlanAction::Keep,
        (_, Some(r)) if Some(r) == base && status != LocalStatus::Added => PlanAction::Keep,

        (LocalStatus::Unmodified, None) => PlanAction::RemoveLocal,
        (LocalStatus::Unmodified, Some(r)) => PlanAction::Fetch {
            checksum: r.clone(),
            new: false,
        },

        (LocalStatus::Modified, None) => PlanAction::Conflict {
            kind: ConflictKind::DeletedRemotely,
            checksum: None,
        },
        (LocalStatus::Modified | LocalStatus::Added, Some(r)) if Some(r) == local.disk => {
            PlanAction::Adopt { checksum: r.clone() }
        }
        (LocalStatus::Modified, Some(r)) => PlanAction::Conflict {
            kind: ConflictKind::BothModified,
            checksum: Some(r.clone()),
        },

        (LocalStatus::Added, None) => PlanAction::Keep,
        (LocalStatus::Added, Some(r)) => PlanAction::Conflict {
            kind: ConflictKind::BothAdded,
            checksum: Some(r.clone()),
        },

        (LocalStatus::Missing, None) => {
            if local.entry.map(|e| e.state) == Some(EntryState::Added) {
                PlanAction::Keep
            } else {
                PlanAction::Untrack
            }
        }
        (LocalStatus::Missing, Some(r)) => PlanAction::Fetch {
            checksum: r.clone(),
            new: false,
        },

        (LocalStatus::Deleted, None) => PlanAction::Untrack,
        (LocalStatus::Deleted, Some(r)) => PlanAction::Rebase { checksum: r.clone() },
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Update `wc` to `target`, or to the latest remote revision.
///
/// Fails with `NotClean` while any file is conflicted.
pub async fn update(
    wc: &WorkingCopy,
    gateway: &dyn RemoteGateway,
    target: Option<&RevisionId>,
    opts: &SyncOptions,
) -> Result<UpdateResult, SyncError> {
    let _lock = wc.lock("update")?;
    let meta = wc.meta()?;
    let scan = status::scan(wc.root(), &meta)?;
    let conflicted = scan.report.conflicted();
    if !conflicted.is_empty() {
        return Err(SyncError::NotClean {
            conflicted,
            missing: Vec::new(),
        });
    }

    let pkg = meta.package_ref();
    let from = meta.revision.clone();
    opts.check_cancelled()?;
    let to = match target {
        Some(rev) => rev.clone(),
        None => gateway.latest_revision(&pkg).await?,
    };
    let listing = gateway.list_files(&pkg, &to).await?;
    for path in listing.keys() {
        paths::validate_rel_path(path)?;
    }

    // Phase 1: plan.
    let all_paths: BTreeSet<&String> = meta.entries.keys().chain(listing.keys()).collect();
    let mut plan = Vec::new();
    for path in all_paths {
        let disk = match scan.disk.get(path) {
            Some(known) => known.clone(),
            None => status::disk_checksum(wc.root(), path)?,
        };
        let view = LocalView {
            entry: meta.entries.get(path),
            status: scan.report.files.get(path).copied(),
            disk: disk.as_ref(),
        };
        let action = plan_path(view, listing.get(path));
        tracing::trace!(path = %path, action = ?action, "planned");
        if action != PlanAction::Keep {
            plan.push((path.clone(), action));
        }
    }

    let has_markers = meta.entries.values().any(|e| e.pending.is_some());
    if plan.is_empty() && from == to && !has_markers {
        tracing::info!(package = %pkg, revision = %to, "already up to date");
        return Ok(UpdateResult {
            from,
            to,
            changes: Vec::new(),
            conflicts: Vec::new(),
        });
    }
    opts.listener.begin("update", plan.len());

    let mut side_files: BTreeMap<String, String> = BTreeMap::new();
    for (path, action) in &plan {
        if let PlanAction::Conflict {
            checksum: Some(_), ..
        } = action
        {
            let side = free_side_file(wc, &meta, &listing, &side_files, path, &to);
            side_files.insert(path.clone(), side);
        }
    }

    // Phase 2: materialize every base the new metadata will reference.
    let mut wanted = Vec::new();
    for (path, action) in &plan {
        match action {
            PlanAction::Fetch { checksum, .. }
            | PlanAction::Rebase { checksum }
            | PlanAction::Conflict {
                checksum: Some(checksum),
                ..
            } => wanted.push((path.clone(), checksum.clone())),
            PlanAction::Adopt { checksum } => {
                let file = wc.file_path(path);
                let bytes = std::fs::read(&file).map_err(|e| io_err(&file, e))?;
                wc.pristine().put_verified(path, checksum, &bytes)?;
            }
            _ => {}
        }
    }
    transfer::fetch_into_pristine(gateway, &pkg, &to, wanted, wc.pristine(), opts).await?;

    // Phase 3: markers. Last point where cancellation is honoured.
    opts.check_cancelled()?;
    let marked: Vec<(&String, Option<Checksum>)> = plan
        .iter()
        .filter_map(|(path, action)| match action {
            PlanAction::Fetch { checksum, .. } => Some((path, Some(checksum.clone()))),
            PlanAction::RemoveLocal => Some((path, None)),
            _ => None,
        })
        .filter(|(path, _)| meta.entries.contains_key(*path))
        .collect();
    if !marked.is_empty() {
        let mut txn = wc.store().begin()?;
        for (path, checksum) in marked {
            if let Some(entry) = txn.entry_mut(path) {
                entry.pending = Some(PendingTransfer {
                    target: to.clone(),
                    checksum,
                });
            }
        }
        txn.commit()?;
    }

    // Phase 4: apply.
    let mut changes = Vec::new();
    let mut conflicts = Vec::new();
    for (path, action) in &plan {
        let file = wc.file_path(path);
        let change = match action {
            PlanAction::Keep => continue,
            PlanAction::Fetch { checksum, new } => {
                writer::write_atomic(&file, &wc.pristine().get(checksum)?)?;
                if *new {
                    ChangeAction::Added
                } else {
                    ChangeAction::Fetched
                }
            }
            PlanAction::Adopt { .. } => ChangeAction::Adopted,
            PlanAction::Rebase { .. } => ChangeAction::Rebased,
            PlanAction::RemoveLocal => {
                writer::remove_if_exists(&file)?;
                ChangeAction::Removed
            }
            PlanAction::Untrack => ChangeAction::Untracked,
            PlanAction::Conflict { kind, checksum } => {
                let side_file = match (checksum, side_files.get(path)) {
                    (Some(checksum), Some(side)) => {
                        writer::write_atomic(&wc.file_path(side), &wc.pristine().get(checksum)?)?;
                        Some(side.clone())
                    }
                    _ => None,
                };
                tracing::warn!(path = %path, kind = %kind, "conflict");
                conflicts.push(ConflictReport {
                    path: path.clone(),
                    kind: *kind,
                    side_file,
                });
                ChangeAction::Conflicted
            }
        };
        opts.listener.processed(path, &change.to_string());
        changes.push(FileChange {
            path: path.clone(),
            action: change,
        });
    }

    // Phase 5: commit point.
    let mut txn = wc.store().begin()?;
    for (path, action) in &plan {
        match action {
            PlanAction::Keep => {}
            PlanAction::Fetch { checksum, .. } | PlanAction::Adopt { checksum } => {
                txn.upsert(FileEntry::tracked(path.as_str(), checksum.clone()));
            }
            PlanAction::Rebase { checksum } => {
                if let Some(entry) = txn.entry_mut(path) {
                    entry.checksum = Some(checksum.clone());
                }
            }
            PlanAction::RemoveLocal | PlanAction::Untrack => {
                txn.remove(path);
            }
            PlanAction::Conflict { kind, checksum } => {
                let mut entry = txn
                    .entry(path)
                    .cloned()
                    .unwrap_or_else(|| FileEntry::added(path.as_str()));
                entry.checksum = checksum.clone();
                entry.state = EntryState::Conflicted;
                entry.conflict = Some(ConflictMarker {
                    kind: *kind,
                    remote_revision: to.clone(),
                    side_file: side_files.get(path).cloned(),
                });
                txn.upsert(entry);
            }
        }
    }
    txn.clear_pending();
    txn.set_revision(to.clone());
    let committed = txn.commit()?;
    wc.prune_pristine(&committed);

    opts.listener.finished("update");
    tracing::info!(
        package = %pkg,
        from = %from,
        to = %to,
        changes = changes.len(),
        conflicts = conflicts.len(),
        "updated"
    );
    Ok(UpdateResult {
        from,
        to,
        changes,
        conflicts,
    })
}

/// `<path>.r<rev>`, or the first `<path>.r<rev>.<n>` that is not on disk,
/// tracked, part of the target listing, or already handed out.
fn free_side_file(
    wc: &WorkingCopy,
    meta: &WorkingCopyMeta,
    listing: &FileListing,
    chosen: &BTreeMap<String, String>,
    path: &str,
    to: &RevisionId,
) -> String {
    let taken = |name: &str| {
        meta.entries.contains_key(name)
            || listing.contains_key(name)
            || chosen.values().any(|c| c == name)
            || std::fs::symlink_metadata(wc.file_path(name)).is_ok()
    };
    let base = paths::conflict_side_file(path, to);
    if !taken(&base) {
        return base;
    }
    let mut n = 1usize;
    loop {
        let candidate = format!("{base}.{n}");
        if !taken(&candidate) {
            tracing::debug!(path = %path, side_file = %candidate, "side file name taken, using next free");
            return candidate;
        }
        n += 1;
    }
}
