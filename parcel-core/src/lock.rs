//! Advisory single-writer lock for a working copy.
//!
//! `.parcel/lock` is created with create-new semantics and held with an
//! exclusive `fs2` advisory lock for the lifetime of [`WorkingCopyLock`].
//! Its content is a JSON [`LockHolder`] record used for diagnostics.
//!
//! Acquisition never waits and never reclaims: a second operation fails with
//! [`WcError::Locked`], which reports whether the holder looks dead. Reclaiming
//! a stale lock is the explicit job of [`break_lock`] (`parcel cleanup`).

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::error::{io_err, WcError};
use crate::paths;

// ---------------------------------------------------------------------------
// LockHolder
// ---------------------------------------------------------------------------

/// Who holds the lock, stored inside the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub pid: u32,
    pub host: String,
    /// Operation name, e.g. `update` or `commit`.
    pub operation: String,
    pub started_at: DateTime<Utc>,
}

impl LockHolder {
    pub fn current(operation: &str) -> Self {
        Self {
            pid: std::process::id(),
            host: current_host(),
            operation: operation.to_string(),
            started_at: Utc::now(),
        }
    }

    /// Placeholder when the lock file exists but cannot be parsed.
    fn unknown() -> Self {
        Self {
            pid: 0,
            host: "unknown".to_string(),
            operation: "unknown".to_string(),
            started_at: Utc::now(),
        }
    }

    /// The holder ran on this host and its process is gone.
    ///
    /// Cross-host holders are never considered stale.
    pub fn is_stale(&self) -> bool {
        if self.pid == 0 || self.host != current_host() {
            return false;
        }
        !is_process_running(self.pid)
    }
}

impl fmt::Display for LockHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let age = Utc::now().signed_duration_since(self.started_at);
        let age = if age.num_hours() > 0 {
            format!("{}h {}m ago", age.num_hours(), age.num_minutes() % 60)
        } else if age.num_minutes() > 0 {
            format!("{}m {}s ago", age.num_minutes(), age.num_seconds() % 60)
        } else {
            format!("{}s ago", age.num_seconds().max(0))
        };
        write!(
            f,
            "`{}` (pid {} on {}, started {})",
            self.operation, self.pid, self.host, age
        )
    }
}

fn current_host() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    // kill(pid, 0) probes for existence; EPERM still means "alive".
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    true
}

// ---------------------------------------------------------------------------
// WorkingCopyLock
// ---------------------------------------------------------------------------

/// A held lock on a working copy, released on drop.
#[derive(Debug)]
pub struct WorkingCopyLock {
    file: File,
    path: PathBuf,
    holder: LockHolder,
}

impl WorkingCopyLock {
    /// Take the lock for `operation`, failing fast if anyone else holds it.
    pub fn acquire(root: &Path, operation: &str) -> Result<Self, WcError> {
        let path = paths::lock_path(root);
        let holder = LockHolder::current(operation);

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                if let Err(e) = file.try_lock_exclusive() {
                    let _ = std::fs::remove_file(&path);
                    return Err(io_err(&path, e));
                }
                let json = serde_json::to_string_pretty(&holder)?;
                file.write_all(json.as_bytes())
                    .and_then(|_| file.sync_all())
                    .map_err(|e| {
                        let _ = std::fs::remove_file(&path);
                        io_err(&path, e)
                    })?;
                tracing::debug!(path = %path.display(), operation, "acquired working-copy lock");
                Ok(Self { file, path, holder })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let (existing, stale) = inspect(&path)?;
                Err(WcError::Locked {
                    path,
                    holder: existing,
                    stale,
                })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(WcError::NotAWorkingCopy {
                path: root.to_path_buf(),
            }),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    pub fn holder(&self) -> &LockHolder {
        &self.holder
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkingCopyLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        let _ = std::fs::remove_file(&self.path);
        tracing::debug!(path = %self.path.display(), "released working-copy lock");
    }
}

/// Read the lock record and decide whether its holder is gone.
///
/// An unreadable record is stale only if nobody holds the advisory lock.
fn inspect(path: &Path) -> Result<(LockHolder, bool), WcError> {
    match read_holder_file(path)? {
        Some(holder) => {
            let stale = holder.is_stale();
            Ok((holder, stale))
        }
        None => {
            let stale = advisory_lock_free(path);
            Ok((LockHolder::unknown(), stale))
        }
    }
}

fn read_holder_file(path: &Path) -> Result<Option<LockHolder>, WcError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(path, e)),
    };
    Ok(serde_json::from_str(&contents).ok())
}

fn advisory_lock_free(path: &Path) -> bool {
    let Ok(file) = OpenOptions::new().read(true).open(path) else {
        return false;
    };
    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = file.unlock();
            true
        }
        Err(_) => false,
    }
}

/// Current lock record, if the working copy is locked.
pub fn read_holder(root: &Path) -> Result<Option<(LockHolder, bool)>, WcError> {
    let path = paths::lock_path(root);
    if !path.exists() {
        return Ok(None);
    }
    inspect(&path).map(Some)
}

/// Recovery action: remove a lock whose holder is gone.
///
/// A live holder is only removed with `force`. Returns the removed record,
/// or `None` if the working copy was not locked.
pub fn break_lock(root: &Path, force: bool) -> Result<Option<LockHolder>, WcError> {
    let path = paths::lock_path(root);
    let Some((holder, stale)) = read_holder(root)? else {
        return Ok(None);
    };
    if !stale && !force {
        return Err(WcError::Locked {
            path,
            holder,
            stale,
        });
    }
    tracing::warn!(
        pid = holder.pid,
        host = %holder.host,
        operation = %holder.operation,
        forced = force && !stale,
        "removing working-copy lock",
    );
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(Some(holder)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Some(holder)),
        Err(e) => Err(io_err(&path, e)),
    }
}
