//! In-process gateway used by tests and embedders.
//!
//! Revision ids are per-package decimal counters starting at `1`. Besides the
//! [`RemoteGateway`] surface it exposes hooks to play "another client"
//! (`publish`, `race_next_commit`) and to inject transport failures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use parcel_core::{Checksum, PackageRef, RevisionId};

use crate::error::RemoteError;
use crate::gateway::{check_manifest, CommitRequest, FileHandle, FileListing, RemoteGateway};

/// One change applied by [`MemoryRemote::publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Put(String, Vec<u8>),
    Delete(String),
}

impl Change {
    pub fn put(path: &str, bytes: impl AsRef<[u8]>) -> Self {
        Change::Put(path.to_string(), bytes.as_ref().to_vec())
    }

    pub fn delete(path: &str) -> Self {
        Change::Delete(path.to_string())
    }
}

#[derive(Debug, Clone)]
struct StoredRevision {
    id: RevisionId,
    files: FileListing,
    message: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    packages: HashMap<PackageRef, Vec<StoredRevision>>,
    blobs: HashMap<Checksum, Vec<u8>>,
    /// Revisions to publish right before the next `commit_revision` of a package.
    races: Vec<(PackageRef, Vec<Change>)>,
}

#[derive(Debug, Default)]
struct Faults {
    offline: bool,
    fetch_budget: Option<usize>,
    upload_budget: Option<usize>,
}

#[derive(Debug, Default)]
pub struct MemoryRemote {
    state: RwLock<State>,
    faults: Mutex<Faults>,
    fetches: AtomicUsize,
    uploads: AtomicUsize,
    commits: AtomicUsize,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Server-side hooks
    // -----------------------------------------------------------------------

    /// Create `pkg` with an initial revision holding `files`.
    pub fn create_package<B: AsRef<[u8]>>(
        &self,
        pkg: &PackageRef,
        files: &[(&str, B)],
    ) -> Result<RevisionId, RemoteError> {
        let changes = files.iter().map(|(p, b)| Change::put(p, b)).collect();
        self.publish(pkg, changes, Some("initial import"))
    }

    /// Publish a revision on top of the latest one, as another client would.
    pub fn publish(
        &self,
        pkg: &PackageRef,
        changes: Vec<Change>,
        message: Option<&str>,
    ) -> Result<RevisionId, RemoteError> {
        let mut state = self.write()?;
        Ok(apply_changes(&mut state, pkg, changes, message.map(str::to_string)))
    }

    /// Publish `changes` immediately before the next commit of `pkg` is
    /// evaluated, so the commit loses the race.
    pub fn race_next_commit(&self, pkg: &PackageRef, changes: Vec<Change>) -> Result<(), RemoteError> {
        self.write()?.races.push((pkg.clone(), changes));
        Ok(())
    }

    /// Content of `path` at `revision`, if it exists.
    pub fn file_at(&self, pkg: &PackageRef, revision: &RevisionId, path: &str) -> Option<Vec<u8>> {
        let state = self.read().ok()?;
        let rev = find_revision(&state, pkg, revision).ok()?;
        let checksum = rev.files.get(path)?;
        state.blobs.get(checksum).cloned()
    }

    pub fn message_of(&self, pkg: &PackageRef, revision: &RevisionId) -> Option<String> {
        let state = self.read().ok()?;
        find_revision(&state, pkg, revision).ok()?.message.clone()
    }

    // -----------------------------------------------------------------------
    // Fault injection + counters
    // -----------------------------------------------------------------------

    /// Every call fails with a transport error while offline.
    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.offline = offline;
        }
    }

    /// Allow `n` more successful fetches, then fail every fetch.
    pub fn fail_fetches_after(&self, n: usize) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.fetch_budget = Some(n);
        }
    }

    /// Allow `n` more successful uploads, then fail every upload.
    pub fn fail_uploads_after(&self, n: usize) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.upload_budget = Some(n);
        }
    }

    /// Clear every injected fault.
    pub fn heal(&self) {
        if let Ok(mut faults) = self.faults.lock() {
            *faults = Faults::default();
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, RemoteError> {
        self.state
            .read()
            .map_err(|_| RemoteError::Transport("memory remote state poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, RemoteError> {
        self.state
            .write()
            .map_err(|_| RemoteError::Transport("memory remote state poisoned".to_string()))
    }

    fn check_online(&self) -> Result<(), RemoteError> {
        let faults = self
            .faults
            .lock()
            .map_err(|_| RemoteError::Transport("memory remote faults poisoned".to_string()))?;
        if faults.offline {
            return Err(RemoteError::Transport("remote is offline".to_string()));
        }
        Ok(())
    }

    fn spend(&self, pick: fn(&mut Faults) -> &mut Option<usize>, what: &str) -> Result<(), RemoteError> {
        let mut faults = self
            .faults
            .lock()
            .map_err(|_| RemoteError::Transport("memory remote faults poisoned".to_string()))?;
        if faults.offline {
            return Err(RemoteError::Transport("remote is offline".to_string()));
        }
        match pick(&mut faults) {
            Some(0) => Err(RemoteError::Transport(format!("injected {what} failure"))),
            Some(n) => {
                *n -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

fn find_revision<'s>(
    state: &'s State,
    pkg: &PackageRef,
    revision: &RevisionId,
) -> Result<&'s StoredRevision, RemoteError> {
    let history = state
        .packages
        .get(pkg)
        .ok_or_else(|| RemoteError::not_found(format!("package {pkg}")))?;
    history
        .iter()
        .find(|r| &r.id == revision)
        .ok_or_else(|| RemoteError::not_found(format!("revision {revision} of {pkg}")))
}

fn apply_changes(
    state: &mut State,
    pkg: &PackageRef,
    changes: Vec<Change>,
    message: Option<String>,
) -> RevisionId {
    let history = state.packages.entry(pkg.clone()).or_default();
    let mut files = history.last().map(|r| r.files.clone()).unwrap_or_default();
    let mut new_blobs = Vec::new();
    for change in changes {
        match change {
            Change::Put(path, bytes) => {
                let checksum = Checksum::of(&bytes);
                files.insert(path, checksum.clone());
                new_blobs.push((checksum, bytes));
            }
            Change::Delete(path) => {
                files.remove(&path);
            }
        }
    }
    let id = RevisionId((history.len() + 1).to_string());
    history.push(StoredRevision {
        id: id.clone(),
        files,
        message,
    });
    state.blobs.extend(new_blobs);
    id
}

#[async_trait]
impl RemoteGateway for MemoryRemote {
    fn locator(&self) -> String {
        "memory:".to_string()
    }

    async fn latest_revision(&self, pkg: &PackageRef) -> Result<RevisionId, RemoteError> {
        self.check_online()?;
        let state = self.read()?;
        state
            .packages
            .get(pkg)
            .and_then(|h| h.last())
            .map(|r| r.id.clone())
            .ok_or_else(|| RemoteError::not_found(format!("package {pkg}")))
    }

    async fn list_files(
        &self,
        pkg: &PackageRef,
        revision: &RevisionId,
    ) -> Result<FileListing, RemoteError> {
        self.check_online()?;
        let state = self.read()?;
        Ok(find_revision(&state, pkg, revision)?.files.clone())
    }

    async fn fetch_file(
        &self,
        pkg: &PackageRef,
        revision: &RevisionId,
        path: &str,
    ) -> Result<Vec<u8>, RemoteError> {
        self.spend(|f| &mut f.fetch_budget, "fetch")?;
        let state = self.read()?;
        let rev = find_revision(&state, pkg, revision)?;
        let checksum = rev
            .files
            .get(path)
            .ok_or_else(|| RemoteError::not_found(format!("file '{path}' in {pkg}@{revision}")))?;
        let bytes = state
            .blobs
            .get(checksum)
            .cloned()
            .ok_or_else(|| RemoteError::not_found(format!("blob {checksum}")))?;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(bytes)
    }

    async fn upload_file(&self, _pkg: &PackageRef, bytes: Vec<u8>) -> Result<FileHandle, RemoteError> {
        self.spend(|f| &mut f.upload_budget, "upload")?;
        let checksum = Checksum::of(&bytes);
        let handle = FileHandle {
            checksum: checksum.clone(),
            size: bytes.len() as u64,
        };
        self.write()?.blobs.entry(checksum).or_insert(bytes);
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }

    async fn commit_revision(
        &self,
        pkg: &PackageRef,
        request: CommitRequest,
    ) -> Result<RevisionId, RemoteError> {
        self.check_online()?;
        check_manifest(&request.files)?;
        let mut state = self.write()?;

        let races = {
            let (mine, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut state.races)
                .into_iter()
                .partition(|(p, _)| p == pkg);
            state.races = rest;
            mine
        };
        for (_, changes) in races {
            apply_changes(&mut state, pkg, changes, Some("concurrent commit".to_string()));
        }

        let current = state
            .packages
            .get(pkg)
            .and_then(|h| h.last())
            .map(|r| r.id.clone())
            .ok_or_else(|| RemoteError::not_found(format!("package {pkg}")))?;
        if current != request.base {
            return Err(crate::Rejection::Conflict {
                base: request.base,
                current,
            }
            .into());
        }
        let mut files = FileListing::new();
        for (path, handle) in request.files {
            if !state.blobs.contains_key(&handle.checksum) {
                return Err(RemoteError::invalid(format!(
                    "'{path}' references blob {} that was never uploaded",
                    handle.checksum
                )));
            }
            files.insert(path, handle.checksum);
        }
        let history = state.packages.entry(pkg.clone()).or_default();
        let id = RevisionId((history.len() + 1).to_string());
        history.push(StoredRevision {
            id: id.clone(),
            files,
            message: request.message,
        });
        self.commits.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(package = %pkg, revision = %id, "memory remote accepted commit");
        Ok(id)
    }
}
