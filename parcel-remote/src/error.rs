//! Error types for parcel-remote.

use thiserror::Error;

use parcel_core::RevisionId;

/// Terminal refusals from the remote.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Optimistic-concurrency guard: the commit was based on a revision that
    /// is no longer current.
    #[error("base revision {base} is out of date (remote is at {current})")]
    Conflict {
        base: RevisionId,
        current: RevisionId,
    },

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("invalid request: {0}")]
    Invalid(String),
}

/// All errors a gateway may return.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Network or storage hiccup; retrying the whole operation is safe.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote rejected the request: {0}")]
    Rejected(#[from] Rejection),
}

impl RemoteError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Transport(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, RemoteError::Rejected(Rejection::Conflict { .. }))
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        RemoteError::Rejected(Rejection::NotFound { what: what.into() })
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        RemoteError::Rejected(Rejection::Invalid(reason.into()))
    }
}

/// Convenience constructor for [`RemoteError::Transport`] from an I/O failure.
pub(crate) fn transport_err(context: impl std::fmt::Display, source: std::io::Error) -> RemoteError {
    RemoteError::Transport(format!("{context}: {source}"))
}
