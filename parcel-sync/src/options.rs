//! Per-call knobs shared by the network-facing coordinators.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use parcel_core::config::{Config, DEFAULT_JOBS};

use crate::error::SyncError;
use crate::listener::{NoProgress, ProgressListener};

#[derive(Clone)]
pub struct SyncOptions {
    /// Maximum concurrent fetches/uploads (at least one).
    pub jobs: usize,
    /// Checked between file-level network operations.
    pub cancel: CancellationToken,
    pub listener: Arc<dyn ProgressListener>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            jobs: DEFAULT_JOBS,
            cancel: CancellationToken::new(),
            listener: Arc::new(NoProgress),
        }
    }
}

impl fmt::Debug for SyncOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOptions")
            .field("jobs", &self.jobs)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            jobs: config.jobs(),
            ..Self::default()
        }
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn ProgressListener>) -> Self {
        self.listener = listener;
        self
    }

    pub(crate) fn jobs(&self) -> usize {
        self.jobs.max(1)
    }

    pub(crate) fn check_cancelled(&self) -> Result<(), SyncError> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }
}
