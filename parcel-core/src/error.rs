//! Error types for parcel-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::lock::LockHolder;
use crate::types::Checksum;

/// All errors that can arise from working-copy metadata, lock, pristine and
/// config operations.
#[derive(Debug, Error)]
pub enum WcError {
    /// No `.parcel/meta.json` under the given directory.
    #[error("{path} is not a working copy (no .parcel/meta.json)")]
    NotAWorkingCopy { path: PathBuf },

    #[error("{path} is already a working copy")]
    AlreadyAWorkingCopy { path: PathBuf },

    /// Another operation holds `.parcel/lock`.
    #[error("working copy is locked by {holder} ({path}){}", stale_hint(.stale))]
    Locked {
        path: PathBuf,
        holder: LockHolder,
        stale: bool,
    },

    #[error("metadata at {path} is corrupt: {source}")]
    CorruptMetadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("metadata at {path} uses format {found}, this build understands up to {supported}")]
    UnsupportedFormat {
        path: PathBuf,
        found: u32,
        supported: u32,
    },

    /// The metadata changed on disk between `begin` and `commit`.
    #[error("metadata at {path} changed underneath the transaction (generation {expected} -> {found})")]
    ConcurrentModification {
        path: PathBuf,
        expected: u64,
        found: u64,
    },

    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("content for {path} does not match checksum {expected} (got {actual})")]
    ChecksumMismatch {
        path: String,
        expected: Checksum,
        actual: Checksum,
    },

    /// The pristine store has no copy of a base checksum.
    #[error("pristine copy {checksum} is missing; run `parcel update` to refetch")]
    PristineMissing { checksum: Checksum },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on config load, with the file path.
    #[error("failed to parse config at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

fn stale_hint(stale: &bool) -> &'static str {
    if *stale {
        "; the holder is gone, run `parcel cleanup` to reclaim it"
    } else {
        ""
    }
}

/// Convenience constructor for [`WcError::Io`].
pub fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> WcError {
    WcError::Io {
        path: path.into(),
        source,
    }
}
