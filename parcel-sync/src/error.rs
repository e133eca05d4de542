//! Error types for parcel-sync.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use parcel_core::WcError;
use parcel_remote::{Rejection, RemoteError};

/// All errors that can arise from working-copy operations.
///
/// Update conflicts are not errors; they are reported in
/// [`crate::UpdateResult::conflicts`].
#[derive(Debug, Error)]
pub enum SyncError {
    /// Metadata, lock, pristine or config failure.
    #[error(transparent)]
    WorkingCopy(#[from] WcError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Conflicted or missing files block the operation.
    #[error("working copy is not clean: {}", describe_not_clean(.conflicted, .missing))]
    NotClean {
        conflicted: Vec<String>,
        missing: Vec<String>,
    },

    /// Pending markers from an update that never reached its final transaction.
    #[error(
        "an interrupted update left {} half-applied; run `parcel update` to finish it or `parcel cleanup` to drop the markers",
        .paths.join(", ")
    )]
    Interrupted { paths: Vec<String> },

    #[error("operation cancelled")]
    Cancelled,

    #[error("'{path}' is not tracked")]
    NotTracked { path: String },

    #[error("'{path}' is already tracked")]
    AlreadyTracked { path: String },

    #[error("'{path}' is not conflicted")]
    NotConflicted { path: String },

    #[error("'{path}' does not exist or is not a regular file")]
    NoSuchFile { path: String },

    /// The operation does not apply to a file in this status.
    #[error("cannot {operation} '{path}': {reason}")]
    InvalidState {
        path: String,
        operation: &'static str,
        reason: String,
    },

    /// Checkout target already holds different files at remote paths.
    #[error("checkout would overwrite {} existing file(s): {}", .paths.len(), .paths.join(", "))]
    CheckoutCollision { paths: Vec<String> },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("background task failed: {0}")]
    Join(String),
}

fn describe_not_clean(conflicted: &[String], missing: &[String]) -> String {
    let mut parts = Vec::new();
    if !conflicted.is_empty() {
        parts.push(format!("conflicted: {}", conflicted.join(", ")));
    }
    if !missing.is_empty() {
        parts.push(format!("missing: {}", missing.join(", ")));
    }
    parts.join("; ")
}

/// Caller-facing classification of a [`SyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotAWorkingCopy,
    AlreadyAWorkingCopy,
    WorkingCopyLocked,
    WorkingCopyNotClean,
    TransportError,
    RemoteRejected,
    RemoteConflict,
    Cancelled,
    InvalidRequest,
    CorruptMetadata,
    Io,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::WorkingCopy(e) => match e {
                WcError::NotAWorkingCopy { .. } => ErrorKind::NotAWorkingCopy,
                WcError::AlreadyAWorkingCopy { .. } => ErrorKind::AlreadyAWorkingCopy,
                WcError::Locked { .. } => ErrorKind::WorkingCopyLocked,
                WcError::CorruptMetadata { .. }
                | WcError::UnsupportedFormat { .. }
                | WcError::ConcurrentModification { .. }
                | WcError::PristineMissing { .. }
                | WcError::Json(_) => ErrorKind::CorruptMetadata,
                WcError::InvalidPath { .. } => ErrorKind::InvalidRequest,
                WcError::ChecksumMismatch { .. } => ErrorKind::TransportError,
                WcError::Io { .. }
                | WcError::Yaml(_)
                | WcError::ConfigParse { .. }
                | WcError::HomeNotFound => ErrorKind::Io,
            },
            SyncError::Remote(RemoteError::Transport(_)) => ErrorKind::TransportError,
            SyncError::Remote(RemoteError::Rejected(Rejection::Conflict { .. })) => {
                ErrorKind::RemoteConflict
            }
            SyncError::Remote(RemoteError::Rejected(_)) => ErrorKind::RemoteRejected,
            SyncError::NotClean { .. } | SyncError::Interrupted { .. } => {
                ErrorKind::WorkingCopyNotClean
            }
            SyncError::Cancelled => ErrorKind::Cancelled,
            SyncError::NotTracked { .. }
            | SyncError::AlreadyTracked { .. }
            | SyncError::NotConflicted { .. }
            | SyncError::NoSuchFile { .. }
            | SyncError::InvalidState { .. }
            | SyncError::CheckoutCollision { .. } => ErrorKind::InvalidRequest,
            SyncError::Io { .. } | SyncError::Join(_) => ErrorKind::Io,
        }
    }

    /// Safe to retry the whole operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::TransportError)
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
