//! Commit coordinator: publish local changes as a new remote revision.
//!
//! The remote revision is created before any local metadata changes. If the
//! process dies between the two, the working copy still records the old base
//! with the committed bytes on disk; the next update adopts them.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use parcel_core::{paths, EntryState, FileEntry, LocalStatus, RevisionId};
use parcel_remote::{CommitRequest, FileHandle, Rejection, RemoteError, RemoteGateway};

use crate::error::{io_err, SyncError};
use crate::options::SyncOptions;
use crate::status;
use crate::transfer;
use crate::workspace::WorkingCopy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommittedFile {
    pub path: String,
    pub status: LocalStatus,
}

/// Outcome of [`commit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitResult {
    /// `false` when there was nothing to commit.
    pub created: bool,
    pub base: RevisionId,
    /// The new revision, or the unchanged base when nothing was created.
    pub revision: RevisionId,
    pub committed: Vec<CommittedFile>,
    /// Distinct blobs sent to the remote.
    pub uploaded: usize,
}

/// Commit the added, modified and deleted files among `requested`, or every
/// change when `requested` is empty.
///
/// Files outside `requested` go to the remote unchanged: tracked files with
/// their base content, scheduled additions not at all.
///
/// Refuses with `Interrupted` while update markers remain, with `NotClean`
/// while files are conflicted (anywhere) or missing (among those committed),
/// and with `Rejected(Conflict)` when the base is no longer the latest remote
/// revision.
pub async fn commit(
    wc: &WorkingCopy,
    gateway: &dyn RemoteGateway,
    requested: &[String],
    message: Option<&str>,
    opts: &SyncOptions,
) -> Result<CommitResult, SyncError> {
    let _lock = wc.lock("commit")?;
    let meta = wc.meta()?;
    let interrupted: Vec<String> = meta
        .entries
        .iter()
        .filter(|(_, entry)| entry.pending.is_some())
        .map(|(path, _)| path.clone())
        .collect();
    if !interrupted.is_empty() {
        return Err(SyncError::Interrupted { paths: interrupted });
    }

    let scan = status::scan(wc.root(), &meta)?;
    let named = named_paths(&scan.report.files, requested)?;
    let in_scope = |path: &str| named.as_ref().map_or(true, |n| n.contains(path));

    let conflicted = scan.report.conflicted();
    let missing: Vec<String> = scan
        .report
        .missing()
        .into_iter()
        .filter(|path| in_scope(path))
        .collect();
    if !conflicted.is_empty() || !missing.is_empty() {
        return Err(SyncError::NotClean {
            conflicted,
            missing,
        });
    }

    let base = meta.revision.clone();
    let changes: Vec<CommittedFile> = scan
        .report
        .changes()
        .filter(|(path, _)| in_scope(path))
        .map(|(path, status)| CommittedFile {
            path: path.to_string(),
            status,
        })
        .collect();
    if changes.is_empty() {
        tracing::info!(revision = %base, "nothing to commit");
        return Ok(CommitResult {
            created: false,
            revision: base.clone(),
            base,
            committed: changes,
            uploaded: 0,
        });
    }

    let pkg = meta.package_ref();
    opts.listener.begin("commit", changes.len());
    opts.check_cancelled()?;
    let latest = gateway.latest_revision(&pkg).await?;
    if latest != base {
        return Err(RemoteError::Rejected(Rejection::Conflict {
            base,
            current: latest,
        })
        .into());
    }

    let mut to_upload = Vec::new();
    for change in &changes {
        if matches!(change.status, LocalStatus::Added | LocalStatus::Modified) {
            let file = wc.file_path(&change.path);
            let bytes = std::fs::read(&file).map_err(|e| io_err(&file, e))?;
            let checksum = wc.pristine().put(&bytes)?;
            to_upload.push((change.path.clone(), checksum));
        }
    }
    let uploaded_blobs = to_upload.iter().map(|(_, c)| c).collect::<BTreeSet<_>>().len();
    let uploaded = transfer::upload_all(gateway, &pkg, to_upload, wc.pristine(), opts).await?;

    let mut files: BTreeMap<String, FileHandle> = BTreeMap::new();
    for (path, entry) in &meta.entries {
        let status = scan.report.files.get(path).copied();
        let sent = if in_scope(path) {
            match status {
                Some(LocalStatus::Added | LocalStatus::Modified) => uploaded.get(path).cloned(),
                Some(LocalStatus::Unmodified) => base_handle(wc, entry)?,
                _ => None,
            }
        } else if entry.state == EntryState::Added {
            None
        } else {
            base_handle(wc, entry)?
        };
        if let Some(handle) = sent {
            files.insert(path.clone(), handle);
        }
    }

    opts.check_cancelled()?;
    let request = CommitRequest {
        base: base.clone(),
        files,
        message: message.map(str::to_string),
    };
    let revision = gateway.commit_revision(&pkg, request).await?;

    let mut txn = wc.store().begin()?;
    for change in &changes {
        match uploaded.get(&change.path) {
            Some(handle) => txn.upsert(FileEntry::tracked(
                change.path.as_str(),
                handle.checksum.clone(),
            )),
            None => {
                txn.remove(&change.path);
            }
        }
        opts.listener.processed(&change.path, "committed");
    }
    txn.set_revision(revision.clone());
    let committed = txn.commit()?;
    wc.prune_pristine(&committed);

    opts.listener.finished("commit");
    tracing::info!(
        package = %pkg,
        base = %base,
        revision = %revision,
        files = changes.len(),
        "committed"
    );
    Ok(CommitResult {
        created: true,
        base,
        revision,
        committed: changes,
        uploaded: uploaded_blobs,
    })
}

/// `requested` as a set of tracked paths; `None` when empty.
fn named_paths(
    tracked: &BTreeMap<String, LocalStatus>,
    requested: &[String],
) -> Result<Option<BTreeSet<String>>, SyncError> {
    if requested.is_empty() {
        return Ok(None);
    }
    let mut named = BTreeSet::new();
    for path in requested {
        paths::validate_rel_path(path)?;
        if !tracked.contains_key(path) {
            return Err(SyncError::NotTracked { path: path.clone() });
        }
        named.insert(path.clone());
    }
    Ok(Some(named))
}

/// The entry as recorded at the base revision, sized from its pristine copy.
fn base_handle(wc: &WorkingCopy, entry: &FileEntry) -> Result<Option<FileHandle>, SyncError> {
    let Some(checksum) = &entry.checksum else {
        return Ok(None);
    };
    let blob = wc.pristine().path_of(checksum);
    let size = std::fs::metadata(&blob).map_err(|e| io_err(&blob, e))?.len();
    Ok(Some(FileHandle {
        checksum: checksum.clone(),
        size,
    }))
}
