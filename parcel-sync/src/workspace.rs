//! The explicit working-copy context passed to every operation.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use parcel_core::{
    lock, paths, LockHolder, MetadataStore, PackageRef, PristineStore, RevisionId, WcError,
    WorkingCopyLock, WorkingCopyMeta,
};

use crate::error::SyncError;

/// A checked-out package directory.
#[derive(Debug, Clone)]
pub struct WorkingCopy {
    root: PathBuf,
    store: MetadataStore,
    pristine: PristineStore,
}

/// Summary printed by `parcel info`.
#[derive(Debug, Clone, Serialize)]
pub struct WorkingCopyInfo {
    pub root: PathBuf,
    pub package: String,
    pub remote: String,
    pub revision: RevisionId,
    pub generation: u64,
    pub updated_at: DateTime<Utc>,
    pub tracked_files: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<LockHolder>,
    pub lock_stale: bool,
}

impl WorkingCopy {
    /// Open the working copy rooted exactly at `root`.
    pub fn open(root: &Path) -> Result<Self, SyncError> {
        let store = MetadataStore::open(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            pristine: PristineStore::for_root(root),
            store,
        })
    }

    /// Open the nearest working copy at or above `start`.
    pub fn discover(start: &Path) -> Result<Self, SyncError> {
        for dir in start.ancestors() {
            if paths::meta_path(dir).is_file() {
                return Self::open(dir);
            }
        }
        Err(WcError::NotAWorkingCopy {
            path: start.to_path_buf(),
        }
        .into())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn pristine(&self) -> &PristineStore {
        &self.pristine
    }

    /// Committed metadata.
    pub fn meta(&self) -> Result<WorkingCopyMeta, SyncError> {
        Ok(self.store.load()?)
    }

    pub fn package_ref(&self) -> Result<PackageRef, SyncError> {
        Ok(self.meta()?.package_ref())
    }

    /// Take the single-writer lock for `operation`. Fails fast.
    pub fn lock(&self, operation: &str) -> Result<WorkingCopyLock, SyncError> {
        Ok(WorkingCopyLock::acquire(&self.root, operation)?)
    }

    /// Filesystem location of a working-copy relative path.
    pub fn file_path(&self, rel: &str) -> PathBuf {
        paths::to_fs_path(&self.root, rel)
    }

    /// Drop pristine blobs no entry of `meta` references. Failures only warn.
    pub(crate) fn prune_pristine(&self, meta: &WorkingCopyMeta) -> usize {
        match self.pristine.gc(&meta.live_checksums()) {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(root = %self.root.display(), error = %e, "pristine cleanup failed");
                0
            }
        }
    }

    pub fn info(&self) -> Result<WorkingCopyInfo, SyncError> {
        let meta = self.meta()?;
        let lock = lock::read_holder(&self.root)?;
        Ok(WorkingCopyInfo {
            root: self.root.clone(),
            package: meta.package_ref().to_string(),
            remote: meta.remote.clone(),
            revision: meta.revision.clone(),
            generation: meta.generation,
            updated_at: meta.updated_at,
            tracked_files: meta.entries.len(),
            lock_stale: lock.as_ref().map(|(_, stale)| *stale).unwrap_or(false),
            locked_by: lock.map(|(holder, _)| holder),
        })
    }
}
