//! Progress notifications for long-running operations.

use std::fmt;

/// Which way a transfer goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Download,
    Upload,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Download => write!(f, "download"),
            Direction::Upload => write!(f, "upload"),
        }
    }
}

/// Observer for checkout/update/commit progress. All methods default to no-ops.
///
/// Callbacks may arrive from concurrent transfers in any order.
pub trait ProgressListener: Send + Sync {
    /// `operation` is starting and will touch `total` files.
    fn begin(&self, _operation: &str, _total: usize) {}

    /// A transfer for `path` is starting.
    fn transfer(&self, _direction: Direction, _path: &str) {}

    /// `path` has been handled; `action` is a short past-tense verb.
    fn processed(&self, _path: &str, _action: &str) {}

    fn finished(&self, _operation: &str) {}
}

/// Listener that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressListener for NoProgress {}
