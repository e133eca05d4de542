//! Status engine: effective status of every file in a working copy.
//!
//! Per tracked entry, in precedence order:
//! 1. recorded `conflicted` → `Conflicted`
//! 2. recorded `deleted` → `Deleted` (even if the file is back on disk)
//! 3. file absent → `Missing`
//! 4. recorded `added` → `Added`
//! 5. bytes match the base checksum → `Unmodified`, else `Modified`
//!
//! Untracked files are listed separately, never absorbed. Computing status
//! is read-only and takes no lock.

use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::Path;

use serde::Serialize;

use parcel_core::{paths, Checksum, EntryState, FileEntry, LocalStatus, RevisionId, WorkingCopyMeta};

use crate::error::{io_err, SyncError};
use crate::workspace::WorkingCopy;

/// Result of [`compute_status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    /// Base revision the statuses are relative to.
    pub revision: RevisionId,
    pub files: BTreeMap<String, LocalStatus>,
    pub untracked: Vec<String>,
    /// Paths an interrupted update already rewrote on disk.
    pub interrupted: Vec<String>,
}

impl StatusReport {
    pub fn with_status(&self, status: LocalStatus) -> Vec<String> {
        self.files
            .iter()
            .filter(|(_, s)| **s == status)
            .map(|(p, _)| p.clone())
            .collect()
    }

    pub fn conflicted(&self) -> Vec<String> {
        self.with_status(LocalStatus::Conflicted)
    }

    pub fn missing(&self) -> Vec<String> {
        self.with_status(LocalStatus::Missing)
    }

    /// Every tracked path whose status is not `Unmodified`.
    pub fn changes(&self) -> impl Iterator<Item = (&str, LocalStatus)> {
        self.files
            .iter()
            .filter(|(_, s)| **s != LocalStatus::Unmodified)
            .map(|(p, s)| (p.as_str(), *s))
    }

    pub fn count(&self, status: LocalStatus) -> usize {
        self.files.values().filter(|s| **s == status).count()
    }

    /// No local changes of any kind (untracked files do not count).
    pub fn is_clean(&self) -> bool {
        self.changes().next().is_none()
    }
}

/// Status plus the disk checksums it was computed from.
#[derive(Debug, Clone)]
pub(crate) struct Scan {
    pub report: StatusReport,
    pub disk: BTreeMap<String, Option<Checksum>>,
}

/// Classify one entry against the checksum of its file on disk.
pub fn classify(entry: &FileEntry, disk: Option<&Checksum>) -> LocalStatus {
    match entry.state {
        EntryState::Conflicted => LocalStatus::Conflicted,
        EntryState::Deleted => LocalStatus::Deleted,
        _ if disk.is_none() => LocalStatus::Missing,
        EntryState::Added => LocalStatus::Added,
        EntryState::Normal => {
            if disk == entry.checksum.as_ref() {
                LocalStatus::Unmodified
            } else {
                LocalStatus::Modified
            }
        }
    }
}

/// Compute the status of the whole working copy.
pub fn compute_status(wc: &WorkingCopy) -> Result<StatusReport, SyncError> {
    let meta = wc.meta()?;
    Ok(scan(wc.root(), &meta)?.report)
}

/// Status of a single path; `None` if it is not tracked.
pub fn status_of(wc: &WorkingCopy, rel: &str) -> Result<Option<LocalStatus>, SyncError> {
    let meta = wc.meta()?;
    let Some(entry) = meta.entries.get(rel) else {
        return Ok(None);
    };
    let disk = disk_checksum(wc.root(), rel)?;
    Ok(Some(classify(entry, disk.as_ref())))
}

pub(crate) fn scan(root: &Path, meta: &WorkingCopyMeta) -> Result<Scan, SyncError> {
    let mut files = BTreeMap::new();
    let mut disk = BTreeMap::new();
    let mut interrupted = Vec::new();

    for (path, entry) in &meta.entries {
        let checksum = disk_checksum(root, path)?;
        let status = classify(entry, checksum.as_ref());
        tracing::trace!(path = %path, status = %status, "classified");
        if let Some(pending) = &entry.pending {
            if pending.checksum == checksum {
                interrupted.push(path.clone());
            }
        }
        files.insert(path.clone(), status);
        disk.insert(path.clone(), checksum);
    }

    Ok(Scan {
        report: StatusReport {
            revision: meta.revision.clone(),
            files,
            untracked: collect_untracked(root, meta)?,
            interrupted,
        },
        disk,
    })
}

/// Checksum of the regular file at `rel`, or `None` if there is none.
pub(crate) fn disk_checksum(root: &Path, rel: &str) -> Result<Option<Checksum>, SyncError> {
    let path = paths::to_fs_path(root, rel);
    match std::fs::metadata(&path) {
        Ok(m) if m.is_file() => {}
        Ok(_) => return Ok(None),
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(&path, e)),
    }
    match Checksum::of_file(&path) {
        Ok(c) => Ok(Some(c)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(&path, e)),
    }
}

/// Walk the tree for regular files that are neither tracked, engine temp
/// files, nor conflict side files.
fn collect_untracked(root: &Path, meta: &WorkingCopyMeta) -> Result<Vec<String>, SyncError> {
    let mut known: BTreeSet<&str> = meta.entries.keys().map(String::as_str).collect();
    known.extend(
        meta.entries
            .values()
            .filter_map(|e| e.conflict.as_ref())
            .filter_map(|c| c.side_file.as_deref()),
    );

    let mut untracked = Vec::new();
    let mut stack = vec![(root.to_path_buf(), String::new())];
    while let Some((dir, prefix)) = stack.pop() {
        let entries = std::fs::read_dir(&dir).map_err(|e| io_err(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if prefix.is_empty() && name == paths::META_DIR {
                continue;
            }
            if paths::is_tmp_name(&name) {
                continue;
            }
            let rel = if prefix.is_empty() {
                name
            } else {
                format!("{prefix}/{name}")
            };
            let file_type = entry.file_type().map_err(|e| io_err(entry.path(), e))?;
            if file_type.is_dir() {
                stack.push((entry.path(), rel));
            } else if !known.contains(rel.as_str()) {
                untracked.push(rel);
            }
        }
    }
    untracked.sort();
    Ok(untracked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parcel_core::{ConflictKind, ConflictMarker, MetadataStore, PackageRef, PendingTransfer};
    use rstest::rstest;
    use tempfile::TempDir;

    fn entry(state: EntryState, base: Option<&[u8]>) -> FileEntry {
        FileEntry {
            path: "f".to_string(),
            checksum: base.map(Checksum::of),
            state,
            pending: None,
            conflict: None,
        }
    }

    #[rstest]
    #[case::unmodified(EntryState::Normal, Some(b"a".as_slice()), Some(b"a".as_slice()), LocalStatus::Unmodified)]
    #[case::modified(EntryState::Normal, Some(b"a".as_slice()), Some(b"b".as_slice()), LocalStatus::Modified)]
    #[case::missing(EntryState::Normal, Some(b"a".as_slice()), None, LocalStatus::Missing)]
    #[case::added(EntryState::Added, None, Some(b"new".as_slice()), LocalStatus::Added)]
    #[case::added_but_gone(EntryState::Added, None, None, LocalStatus::Missing)]
    #[case::deleted(EntryState::Deleted, Some(b"a".as_slice()), None, LocalStatus::Deleted)]
    #[case::deleted_wins_over_presence(EntryState::Deleted, Some(b"a".as_slice()), Some(b"a".as_slice()), LocalStatus::Deleted)]
    #[case::conflicted_wins(EntryState::Conflicted, Some(b"a".as_slice()), Some(b"a".as_slice()), LocalStatus::Conflicted)]
    #[case::conflicted_when_absent(EntryState::Conflicted, Some(b"a".as_slice()), None, LocalStatus::Conflicted)]
    fn classify_cases(
        #[case] state: EntryState,
        #[case] base: Option<&[u8]>,
        #[case] disk: Option<&[u8]>,
        #[case] expected: LocalStatus,
    ) {
        let disk = disk.map(Checksum::of);
        assert_eq!(classify(&entry(state, base), disk.as_ref()), expected);
    }

    fn setup() -> (TempDir, WorkingCopy) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::write(root.join("same.txt"), "same").unwrap();
        std::fs::write(root.join("edited.txt"), "edited locally").unwrap();
        std::fs::create_dir_all(root.join("patches")).unwrap();
        std::fs::write(root.join("patches/new.patch"), "new").unwrap();
        std::fs::write(root.join("patches/stray.orig"), "stray").unwrap();
        std::fs::write(root.join("both.txt"), "mine").unwrap();
        std::fs::write(root.join("both.txt.r4"), "theirs").unwrap();
        std::fs::write(root.join("half.parcel.tmp"), "tmp").unwrap();

        let mut meta = WorkingCopyMeta::new(
            &PackageRef::new("p", "k"),
            "memory:",
            RevisionId::from("4"),
        );
        for (path, base) in [
            ("same.txt", "same"),
            ("edited.txt", "original"),
            ("gone.txt", "gone"),
        ] {
            meta.entries
                .insert(path.to_string(), FileEntry::tracked(path, Checksum::of(base.as_bytes())));
        }
        meta.entries
            .insert("patches/new.patch".to_string(), FileEntry::added("patches/new.patch"));
        let mut conflicted = FileEntry::tracked("both.txt", Checksum::of(b"theirs"));
        conflicted.state = EntryState::Conflicted;
        conflicted.conflict = Some(ConflictMarker {
            kind: ConflictKind::BothModified,
            remote_revision: RevisionId::from("4"),
            side_file: Some("both.txt.r4".to_string()),
        });
        meta.entries.insert("both.txt".to_string(), conflicted);
        MetadataStore::init(root, &meta).unwrap();
        let wc = WorkingCopy::open(root).unwrap();
        (tmp, wc)
    }

    #[test]
    fn full_report_over_a_real_tree() {
        let (_tmp, wc) = setup();
        let report = compute_status(&wc).unwrap();
        assert_eq!(report.files["same.txt"], LocalStatus::Unmodified);
        assert_eq!(report.files["edited.txt"], LocalStatus::Modified);
        assert_eq!(report.files["gone.txt"], LocalStatus::Missing);
        assert_eq!(report.files["patches/new.patch"], LocalStatus::Added);
        assert_eq!(report.files["both.txt"], LocalStatus::Conflicted);
        assert_eq!(report.untracked, vec!["patches/stray.orig".to_string()]);
        assert_eq!(report.conflicted(), vec!["both.txt".to_string()]);
        assert_eq!(report.missing(), vec!["gone.txt".to_string()]);
        assert!(!report.is_clean());
        assert_eq!(report.changes().count(), 4);
    }

    #[test]
    fn status_is_idempotent_and_read_only() {
        let (tmp, wc) = setup();
        let meta_before = std::fs::read(paths::meta_path(tmp.path())).unwrap();
        let first = compute_status(&wc).unwrap();
        let second = compute_status(&wc).unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::read(paths::meta_path(tmp.path())).unwrap(), meta_before);
    }

    #[test]
    fn pending_marker_matching_disk_is_interrupted() {
        let (tmp, wc) = setup();
        let mut txn = wc.store().begin().unwrap();
        txn.entry_mut("edited.txt").unwrap().pending = Some(PendingTransfer {
            target: RevisionId::from("5"),
            checksum: Some(Checksum::of(b"edited locally")),
        });
        txn.entry_mut("same.txt").unwrap().pending = Some(PendingTransfer {
            target: RevisionId::from("5"),
            checksum: Some(Checksum::of(b"not yet written")),
        });
        txn.commit().unwrap();
        let report = compute_status(&wc).unwrap();
        assert_eq!(report.interrupted, vec!["edited.txt".to_string()]);
        drop(tmp);
    }

    #[test]
    fn status_of_single_paths() {
        let (_tmp, wc) = setup();
        assert_eq!(status_of(&wc, "edited.txt").unwrap(), Some(LocalStatus::Modified));
        assert_eq!(status_of(&wc, "patches/stray.orig").unwrap(), None);
    }
}
