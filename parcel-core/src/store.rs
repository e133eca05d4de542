//! Crash-consistent metadata store for one working copy.
//!
//! # Commit protocol
//!
//! A [`Transaction`] works on a private copy of the metadata read at
//! [`MetadataStore::begin`]. [`Transaction::commit`]:
//!
//! 1. re-reads the on-disk generation and refuses to commit if it moved;
//! 2. bumps `generation` and `updated_at`;
//! 3. writes `meta.json.tmp`, `chmod 0600`, `fsync`;
//! 4. renames it over `meta.json` (atomic on POSIX);
//! 5. `fsync`s the `.parcel` directory.
//!
//! A crash at any point leaves either the old or the new document in place.
//! Dropping a transaction without committing discards it.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{io_err, WcError};
use crate::paths;
use crate::types::{FileEntry, RevisionId, WorkingCopyMeta, FORMAT_VERSION};

// ---------------------------------------------------------------------------
// MetadataStore
// ---------------------------------------------------------------------------

/// Handle on `<root>/.parcel/meta.json`.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    root: PathBuf,
}

impl MetadataStore {
    /// Create the metadata directory and write the initial document.
    ///
    /// Fails with [`WcError::AlreadyAWorkingCopy`] if metadata already exists.
    pub fn init(root: &Path, meta: &WorkingCopyMeta) -> Result<Self, WcError> {
        let path = paths::meta_path(root);
        if path.exists() {
            return Err(WcError::AlreadyAWorkingCopy {
                path: root.to_path_buf(),
            });
        }
        let dir = paths::meta_dir(root);
        std::fs::create_dir_all(paths::pristine_dir(root)).map_err(|e| io_err(&dir, e))?;
        set_dir_permissions(&dir)?;

        let mut initial = meta.clone();
        initial.format = FORMAT_VERSION;
        initial.generation = 1;
        initial.updated_at = Utc::now();
        write_atomic(&path, &initial)?;
        tracing::info!(root = %root.display(), revision = %initial.revision, "initialized working copy");
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Open an existing working copy without reading it.
    pub fn open(root: &Path) -> Result<Self, WcError> {
        if !paths::meta_path(root).is_file() {
            return Err(WcError::NotAWorkingCopy {
                path: root.to_path_buf(),
            });
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Open and read in one step.
    pub fn load_at(root: &Path) -> Result<(Self, WorkingCopyMeta), WcError> {
        let store = Self::open(root)?;
        let meta = store.load()?;
        Ok((store, meta))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta_path(&self) -> PathBuf {
        paths::meta_path(&self.root)
    }

    /// Read the committed document. Leftover `meta.json.tmp` files are ignored.
    pub fn load(&self) -> Result<WorkingCopyMeta, WcError> {
        read_meta(&self.root)
    }

    pub fn begin(&self) -> Result<Transaction<'_>, WcError> {
        let meta = self.load()?;
        Ok(Transaction {
            store: self,
            base_generation: meta.generation,
            meta,
            finished: false,
        })
    }
}

fn read_meta(root: &Path) -> Result<WorkingCopyMeta, WcError> {
    let path = paths::meta_path(root);
    let contents = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(WcError::NotAWorkingCopy {
                path: root.to_path_buf(),
            })
        }
        Err(e) => return Err(io_err(&path, e)),
    };
    let meta: WorkingCopyMeta = serde_json::from_str(&contents)
        .map_err(|source| WcError::CorruptMetadata {
            path: path.clone(),
            source,
        })?;
    if meta.format > FORMAT_VERSION {
        return Err(WcError::UnsupportedFormat {
            path,
            found: meta.format,
            supported: FORMAT_VERSION,
        });
    }
    Ok(meta)
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// Scoped, all-or-nothing change to the metadata.
#[derive(Debug)]
pub struct Transaction<'a> {
    store: &'a MetadataStore,
    base_generation: u64,
    meta: WorkingCopyMeta,
    finished: bool,
}

impl<'a> Transaction<'a> {
    pub fn meta(&self) -> &WorkingCopyMeta {
        &self.meta
    }

    pub fn revision(&self) -> &RevisionId {
        &self.meta.revision
    }

    pub fn read_entries(&self) -> &BTreeMap<String, FileEntry> {
        &self.meta.entries
    }

    pub fn entry(&self, path: &str) -> Option<&FileEntry> {
        self.meta.entries.get(path)
    }

    pub fn entry_mut(&mut self, path: &str) -> Option<&mut FileEntry> {
        self.meta.entries.get_mut(path)
    }

    /// Replace the whole entry set.
    pub fn write_entries(&mut self, entries: BTreeMap<String, FileEntry>) {
        self.meta.entries = entries;
    }

    /// Insert or replace one entry, keyed by its path.
    pub fn upsert(&mut self, entry: FileEntry) {
        self.meta.entries.insert(entry.path.clone(), entry);
    }

    pub fn remove(&mut self, path: &str) -> Option<FileEntry> {
        self.meta.entries.remove(path)
    }

    pub fn set_revision(&mut self, revision: RevisionId) {
        self.meta.revision = revision;
    }

    /// Drop every in-flight update marker. Returns how many were set.
    pub fn clear_pending(&mut self) -> usize {
        let mut cleared = 0;
        for entry in self.meta.entries.values_mut() {
            if entry.pending.take().is_some() {
                cleared += 1;
            }
        }
        cleared
    }

    /// Persist atomically and return the committed document.
    pub fn commit(mut self) -> Result<WorkingCopyMeta, WcError> {
        self.finished = true;
        let path = self.store.meta_path();
        let on_disk = read_meta(self.store.root())?;
        if on_disk.generation != self.base_generation {
            return Err(WcError::ConcurrentModification {
                path,
                expected: self.base_generation,
                found: on_disk.generation,
            });
        }
        let mut meta = self.meta.clone();
        meta.generation = self.base_generation + 1;
        meta.updated_at = Utc::now();
        write_atomic(&path, &meta)?;
        tracing::debug!(
            generation = meta.generation,
            revision = %meta.revision,
            entries = meta.entries.len(),
            "committed metadata transaction",
        );
        Ok(meta)
    }

    /// Discard all changes.
    pub fn abort(mut self) {
        self.finished = true;
        tracing::debug!(generation = self.base_generation, "aborted metadata transaction");
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(
                generation = self.base_generation,
                "metadata transaction dropped without commit; changes discarded",
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Atomic write
// ---------------------------------------------------------------------------

fn write_atomic(path: &Path, meta: &WorkingCopyMeta) -> Result<(), WcError> {
    let json = serde_json::to_vec_pretty(meta)?;
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp).map_err(|e| io_err(&tmp, e))?;
        file.write_all(&json).map_err(|e| io_err(&tmp, e))?;
        file.sync_all().map_err(|e| io_err(&tmp, e))?;
    }
    set_file_permissions(&tmp)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    sync_parent_dir(path)
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> Result<(), WcError> {
    let Some(dir) = path.parent() else {
        return Ok(());
    };
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| io_err(dir, e))
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> Result<(), WcError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), WcError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), WcError> {
    Ok(())
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), WcError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), WcError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Checksum, PackageRef};
    use tempfile::TempDir;

    fn sample_meta() -> WorkingCopyMeta {
        let mut meta = WorkingCopyMeta::new(
            &PackageRef::new("devel:tools", "hello"),
            "file:///srv/parcel",
            RevisionId::from("5"),
        );
        meta.entries.insert(
            "hello.spec".to_string(),
            FileEntry::tracked("hello.spec", Checksum::of(b"spec")),
        );
        meta
    }

    #[test]
    fn commit_persists_and_bumps_generation() {
        let tmp = TempDir::new().unwrap();
        let store = MetadataStore::init(tmp.path(), &sample_meta()).unwrap();
        let mut txn = store.begin().unwrap();
        txn.set_revision(RevisionId::from("6"));
        txn.upsert(FileEntry::added("new.patch"));
        let committed = txn.commit().unwrap();
        assert_eq!(committed.generation, 2);

        let reloaded = store.load().unwrap();
        assert_eq!(reloaded.revision, RevisionId::from("6"));
        assert!(reloaded.entries.contains_key("new.patch"));
        assert_eq!(reloaded, committed);
    }

    #[test]
    fn dropped_transaction_leaves_state_untouched() {
        let tmp = TempDir::new().unwrap();
        let store = MetadataStore::init(tmp.path(), &sample_meta()).unwrap();
        {
            let mut txn = store.begin().unwrap();
            txn.set_revision(RevisionId::from("99"));
            txn.remove("hello.spec");
        }
        let meta = store.load().unwrap();
        assert_eq!(meta.revision, RevisionId::from("5"));
        assert!(meta.entries.contains_key("hello.spec"));
    }

    #[test]
    fn stale_transaction_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = MetadataStore::init(tmp.path(), &sample_meta()).unwrap();
        let mut first = store.begin().unwrap();
        let second = store.begin().unwrap();
        second.commit().unwrap();
        first.set_revision(RevisionId::from("6"));
        let err = first.commit().unwrap_err();
        assert!(matches!(
            err,
            WcError::ConcurrentModification { expected: 1, found: 2, .. }
        ));
        assert_eq!(store.load().unwrap().revision, RevisionId::from("5"));
    }

    #[test]
    fn clear_pending_counts_markers() {
        let tmp = TempDir::new().unwrap();
        let store = MetadataStore::init(tmp.path(), &sample_meta()).unwrap();
        let mut txn = store.begin().unwrap();
        txn.entry_mut("hello.spec").unwrap().pending = Some(crate::types::PendingTransfer {
            target: RevisionId::from("6"),
            checksum: None,
        });
        assert_eq!(txn.clear_pending(), 1);
        assert_eq!(txn.clear_pending(), 0);
        txn.abort();
    }

    #[test]
    fn init_twice_is_already_a_working_copy() {
        let tmp = TempDir::new().unwrap();
        MetadataStore::init(tmp.path(), &sample_meta()).unwrap();
        let err = MetadataStore::init(tmp.path(), &sample_meta()).unwrap_err();
        assert!(matches!(err, WcError::AlreadyAWorkingCopy { .. }));
    }

    #[test]
    fn open_without_metadata_is_not_a_working_copy() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            MetadataStore::open(tmp.path()),
            Err(WcError::NotAWorkingCopy { .. })
        ));
    }

    #[test]
    fn corrupt_document_is_reported_with_path() {
        let tmp = TempDir::new().unwrap();
        let store = MetadataStore::init(tmp.path(), &sample_meta()).unwrap();
        std::fs::write(paths::meta_path(tmp.path()), "{ not json").unwrap();
        match store.load() {
            Err(WcError::CorruptMetadata { path, .. }) => {
                assert!(path.ends_with("meta.json"))
            }
            other => panic!("expected CorruptMetadata, got {other:?}"),
        }
    }

    #[test]
    fn newer_format_is_refused() {
        let tmp = TempDir::new().unwrap();
        let store = MetadataStore::init(tmp.path(), &sample_meta()).unwrap();
        let mut meta = store.load().unwrap();
        meta.format = FORMAT_VERSION + 1;
        std::fs::write(
            paths::meta_path(tmp.path()),
            serde_json::to_string(&meta).unwrap(),
        )
        .unwrap();
        assert!(matches!(
            store.load(),
            Err(WcError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    #[cfg(unix)]
    fn rename_failure_keeps_previous_document() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let store = MetadataStore::init(tmp.path(), &sample_meta()).unwrap();
        let dir = paths::meta_dir(tmp.path());
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o500)).unwrap();

        let mut txn = store.begin().unwrap();
        txn.set_revision(RevisionId::from("6"));
        let result = txn.commit();

        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700)).unwrap();
        // Root bypasses directory permissions; only assert when the write failed.
        if result.is_err() {
            assert_eq!(store.load().unwrap().revision, RevisionId::from("5"));
            assert!(!paths::meta_path(tmp.path()).with_extension("json.tmp").exists());
        }
    }
}
