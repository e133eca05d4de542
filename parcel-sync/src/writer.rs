//! Atomic file placement inside a working copy.
//!
//! ## `write_atomic` protocol
//!
//! 1. Hash the new content.
//! 2. Compare with the file on disk → skip if identical.
//! 3. Create parent directories.
//! 4. Write to `<path>.parcel.tmp`.
//! 5. Rename to the final path (atomic on POSIX); on failure remove the tmp.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parcel_core::{paths, Checksum};

use crate::error::{io_err, SyncError};

/// Outcome of an individual file write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// File was written (content changed or did not previously exist).
    Written { path: PathBuf },
    /// File already held exactly this content.
    Unchanged { path: PathBuf },
}

/// Atomically replace `path` with `content`.
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> Result<WriteResult, SyncError> {
    let tmp = paths::tmp_path_for(path);
    write_atomic_with_tmp(path, content, &tmp)
}

fn write_atomic_with_tmp(path: &Path, content: &[u8], tmp: &Path) -> Result<WriteResult, SyncError> {
    let digest = Checksum::of(content);
    // Unreadable targets (or a directory in the way) surface on rename.
    if let Ok(existing) = Checksum::of_file(path) {
        if existing == digest {
            tracing::debug!(path = %path.display(), "unchanged");
            return Ok(WriteResult::Unchanged {
                path: path.to_path_buf(),
            });
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    std::fs::write(tmp, content).map_err(|e| io_err(tmp, e))?;

    if let Err(e) = std::fs::rename(tmp, path) {
        let _ = std::fs::remove_file(tmp);
        return Err(io_err(path, e));
    }

    tracing::debug!(path = %path.display(), "wrote");
    Ok(WriteResult::Written {
        path: path.to_path_buf(),
    })
}

/// Remove `path`, treating "already gone" as success. Returns whether a file
/// was removed.
pub(crate) fn remove_if_exists(path: &Path) -> Result<bool, SyncError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(io_err(path, e)),
    }
}
