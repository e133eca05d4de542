//! Local-only operations: add, remove, revert, resolve, cleanup.
//!
//! Each call takes the working-copy lock, validates every path before
//! touching anything, and records its changes in a single transaction.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use serde::Serialize;

use parcel_core::{
    lock, paths, ConflictKind, EntryState, FileEntry, LocalStatus, WorkingCopyMeta,
};

use crate::error::{io_err, SyncError};
use crate::status::{self, classify};
use crate::workspace::WorkingCopy;
use crate::writer;

/// What an operation did to one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpAction {
    Added,
    /// A scheduled deletion was cancelled.
    Undeleted,
    /// Scheduled for deletion.
    Removed,
    /// Entry dropped; the file stays on disk.
    Untracked,
    /// Working file reset to its base content.
    Restored,
    Resolved,
    Unchanged,
}

impl fmt::Display for OpAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OpAction::Added => "added",
            OpAction::Undeleted => "undeleted",
            OpAction::Removed => "removed",
            OpAction::Untracked => "untracked",
            OpAction::Restored => "restored",
            OpAction::Resolved => "resolved",
            OpAction::Unchanged => "unchanged",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpResult {
    pub path: String,
    pub action: OpAction,
}

/// Summary of [`cleanup`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub lock_removed: bool,
    pub tmp_removed: usize,
    pub markers_cleared: usize,
    pub pristine_pruned: usize,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Validated, de-duplicated paths in first-seen order.
fn checked_paths(requested: &[String]) -> Result<Vec<String>, SyncError> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for path in requested {
        paths::validate_rel_path(path)?;
        if seen.insert(path.as_str()) {
            out.push(path.clone());
        }
    }
    Ok(out)
}

fn current_status(wc: &WorkingCopy, entry: &FileEntry) -> Result<LocalStatus, SyncError> {
    let disk = status::disk_checksum(wc.root(), &entry.path)?;
    Ok(classify(entry, disk.as_ref()))
}

fn tracked<'m>(meta: &'m WorkingCopyMeta, path: &str) -> Result<&'m FileEntry, SyncError> {
    meta.entries.get(path).ok_or_else(|| SyncError::NotTracked {
        path: path.to_string(),
    })
}

fn resolve_first(path: &str, operation: &'static str) -> SyncError {
    SyncError::InvalidState {
        path: path.to_string(),
        operation,
        reason: "file is conflicted; resolve it first".to_string(),
    }
}

// ---------------------------------------------------------------------------
// add
// ---------------------------------------------------------------------------

/// Schedule untracked files for addition, or cancel a scheduled deletion.
pub fn add(wc: &WorkingCopy, requested: &[String]) -> Result<Vec<OpResult>, SyncError> {
    let targets = checked_paths(requested)?;
    let _lock = wc.lock("add")?;
    let meta = wc.meta()?;

    let mut results = Vec::new();
    for path in &targets {
        let present = wc.file_path(path).is_file();
        let action = match meta.entries.get(path) {
            None if present => OpAction::Added,
            None => return Err(SyncError::NoSuchFile { path: path.clone() }),
            Some(entry) if entry.state == EntryState::Deleted => {
                if !present {
                    return Err(SyncError::InvalidState {
                        path: path.clone(),
                        operation: "add",
                        reason: "file is gone; use revert to restore it".to_string(),
                    });
                }
                OpAction::Undeleted
            }
            Some(_) => return Err(SyncError::AlreadyTracked { path: path.clone() }),
        };
        results.push(OpResult {
            path: path.clone(),
            action,
        });
    }

    let mut txn = wc.store().begin()?;
    for result in &results {
        match result.action {
            OpAction::Added => txn.upsert(FileEntry::added(result.path.as_str())),
            _ => {
                if let Some(entry) = txn.entry_mut(&result.path) {
                    entry.state = EntryState::Normal;
                }
            }
        }
    }
    txn.commit()?;
    tracing::info!(count = results.len(), "scheduled for addition");
    Ok(results)
}

// ---------------------------------------------------------------------------
// remove
// ---------------------------------------------------------------------------

/// Schedule tracked files for deletion.
///
/// Unmodified files are deleted from disk unless `keep_local`; modified
/// content is always left in place. Removing a locally added file just
/// untracks it.
pub fn remove(wc: &WorkingCopy, requested: &[String], keep_local: bool) -> Result<Vec<OpResult>, SyncError> {
    let targets = checked_paths(requested)?;
    let _lock = wc.lock("remove")?;
    let meta = wc.meta()?;

    let mut results = Vec::new();
    let mut unlink = Vec::new();
    for path in &targets {
        let entry = tracked(&meta, path)?;
        let action = match current_status(wc, entry)? {
            LocalStatus::Conflicted => return Err(resolve_first(path, "remove")),
            LocalStatus::Deleted => OpAction::Unchanged,
            LocalStatus::Added => OpAction::Untracked,
            LocalStatus::Missing if entry.state == EntryState::Added => OpAction::Untracked,
            LocalStatus::Unmodified => {
                if !keep_local {
                    unlink.push(path.clone());
                }
                OpAction::Removed
            }
            LocalStatus::Modified | LocalStatus::Missing => OpAction::Removed,
        };
        results.push(OpResult {
            path: path.clone(),
            action,
        });
    }

    let mut txn = wc.store().begin()?;
    for result in &results {
        match result.action {
            OpAction::Untracked => {
                txn.remove(&result.path);
            }
            OpAction::Removed => {
                if let Some(entry) = txn.entry_mut(&result.path) {
                    entry.state = EntryState::Deleted;
                }
            }
            _ => {}
        }
    }
    txn.commit()?;

    for path in unlink {
        writer::remove_if_exists(&wc.file_path(&path))?;
    }
    tracing::info!(count = results.len(), keep_local, "scheduled for deletion");
    Ok(results)
}

// ---------------------------------------------------------------------------
// revert
// ---------------------------------------------------------------------------

/// Discard local changes: restore base content and clear scheduled
/// additions and deletions. A reverted addition keeps its file on disk.
pub fn revert(wc: &WorkingCopy, requested: &[String]) -> Result<Vec<OpResult>, SyncError> {
    let targets = checked_paths(requested)?;
    let _lock = wc.lock("revert")?;
    let meta = wc.meta()?;

    let mut results = Vec::new();
    for path in &targets {
        let entry = tracked(&meta, path)?;
        let action = match current_status(wc, entry)? {
            LocalStatus::Conflicted => return Err(resolve_first(path, "revert")),
            LocalStatus::Unmodified => OpAction::Unchanged,
            LocalStatus::Added => OpAction::Untracked,
            LocalStatus::Missing if entry.state == EntryState::Added => OpAction::Untracked,
            LocalStatus::Deleted | LocalStatus::Modified | LocalStatus::Missing => {
                OpAction::Restored
            }
        };
        results.push(OpResult {
            path: path.clone(),
            action,
        });
    }

    // Base content goes back before the metadata says the file is clean.
    for result in results.iter().filter(|r| r.action == OpAction::Restored) {
        let entry = tracked(&meta, &result.path)?;
        let checksum = entry.checksum.as_ref().ok_or_else(|| SyncError::InvalidState {
            path: result.path.clone(),
            operation: "revert",
            reason: "no base content recorded".to_string(),
        })?;
        let bytes = wc.pristine().get(checksum)?;
        writer::write_atomic(&wc.file_path(&result.path), &bytes)?;
    }

    let mut txn = wc.store().begin()?;
    for result in &results {
        match result.action {
            OpAction::Untracked => {
                txn.remove(&result.path);
            }
            OpAction::Restored => {
                if let Some(entry) = txn.entry_mut(&result.path) {
                    entry.state = EntryState::Normal;
                }
            }
            _ => {}
        }
    }
    txn.commit()?;
    tracing::info!(count = results.len(), "reverted");
    Ok(results)
}

// ---------------------------------------------------------------------------
// resolve
// ---------------------------------------------------------------------------

/// Mark conflicted files as resolved and delete their side files.
///
/// The working file is kept as it is. A file deleted remotely becomes a
/// scheduled addition; every other conflict becomes a local modification
/// against the new base.
pub fn resolve(wc: &WorkingCopy, requested: &[String]) -> Result<Vec<OpResult>, SyncError> {
    let targets = checked_paths(requested)?;
    let _lock = wc.lock("resolve")?;
    let meta = wc.meta()?;

    for path in &targets {
        if !tracked(&meta, path)?.is_conflicted() {
            return Err(SyncError::NotConflicted { path: path.clone() });
        }
    }

    let mut side_files = Vec::new();
    let mut txn = wc.store().begin()?;
    for path in &targets {
        if let Some(entry) = txn.entry_mut(path) {
            let marker = entry.conflict.take();
            if marker.as_ref().map(|m| m.kind) == Some(ConflictKind::DeletedRemotely) {
                entry.checksum = None;
                entry.state = EntryState::Added;
            } else {
                entry.state = EntryState::Normal;
            }
            if let Some(side) = marker.and_then(|m| m.side_file) {
                side_files.push(side);
            }
        }
    }
    txn.commit()?;

    for side in side_files {
        writer::remove_if_exists(&wc.file_path(&side))?;
    }
    tracing::info!(count = targets.len(), "resolved");
    Ok(targets
        .into_iter()
        .map(|path| OpResult {
            path,
            action: OpAction::Resolved,
        })
        .collect())
}

// ---------------------------------------------------------------------------
// cleanup
// ---------------------------------------------------------------------------

/// Recover after a crash: break a stale lock (or a live one with `force`),
/// delete leftover temp files, clear update markers, prune the pristine store.
pub fn cleanup(wc: &WorkingCopy, force: bool) -> Result<CleanupReport, SyncError> {
    let mut report = CleanupReport {
        lock_removed: lock::break_lock(wc.root(), force)?.is_some(),
        ..CleanupReport::default()
    };
    let _lock = wc.lock("cleanup")?;

    report.tmp_removed = remove_tmp_files(wc.root())?;
    let meta_tmp = paths::meta_path(wc.root()).with_extension("json.tmp");
    if writer::remove_if_exists(&meta_tmp)? {
        report.tmp_removed += 1;
    }

    let mut txn = wc.store().begin()?;
    report.markers_cleared = txn.clear_pending();
    let meta = if report.markers_cleared > 0 {
        txn.commit()?
    } else {
        let meta = txn.meta().clone();
        txn.abort();
        meta
    };
    report.pristine_pruned = wc.prune_pristine(&meta);

    tracing::info!(
        lock_removed = report.lock_removed,
        tmp_removed = report.tmp_removed,
        markers_cleared = report.markers_cleared,
        pristine_pruned = report.pristine_pruned,
        "cleanup finished"
    );
    Ok(report)
}

/// Delete every `*.parcel.tmp` file under `root`, metadata directory included.
fn remove_tmp_files(root: &Path) -> Result<usize, SyncError> {
    let mut removed = 0;
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = std::fs::read_dir(&dir).map_err(|e| io_err(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&dir, e))?;
            let file_type = entry.file_type().map_err(|e| io_err(entry.path(), e))?;
            if file_type.is_dir() {
                stack.push(entry.path());
            } else if paths::is_tmp_name(&entry.file_name().to_string_lossy()) {
                if writer::remove_if_exists(&entry.path())? {
                    tracing::debug!(path = %entry.path().display(), "removed leftover temp file");
                    removed += 1;
                }
            }
        }
    }
    Ok(removed)
}
