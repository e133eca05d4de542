//! Directory-backed gateway: a plain directory acting as the authoritative
//! server.
//!
//! # Storage layout
//!
//! ```text
//! <root>/
//!   blobs/<sha256>                                   (uploaded contents)
//!   packages/<project>/<package>/
//!     commit.lock                                    (fs2 lock while committing)
//!     revisions/<n>.json                             (one manifest per revision)
//! ```
//!
//! Revision `n + 1` is staged as `revisions/<n>.json.<pid>.tmp` and
//! hard-linked into place while holding the package's `commit.lock`, so two
//! clients racing on the same base produce exactly one new revision and one
//! `Conflict`, and `<n>.json` never exists half-written.
//!
//! All filesystem work runs on `spawn_blocking`.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use parcel_core::{Checksum, PackageRef, RevisionId};

use crate::error::{transport_err, RemoteError};
use crate::gateway::{
    check_manifest, check_package, CommitRequest, FileHandle, FileListing, RemoteGateway,
};

/// Manifest stored at `revisions/<n>.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevisionManifest {
    pub revision: RevisionId,
    pub files: FileListing,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DirRemote {
    root: PathBuf,
}

impl DirRemote {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create `pkg` with an initial revision holding `files`. Blocking.
    pub fn create_package<B: AsRef<[u8]>>(
        &self,
        pkg: &PackageRef,
        files: &[(&str, B)],
    ) -> Result<RevisionId, RemoteError> {
        check_package(pkg)?;
        let mut listing = FileListing::new();
        for (path, bytes) in files {
            let handle = store_blob(&self.root, bytes.as_ref())?;
            listing.insert(path.to_string(), handle.checksum);
        }
        let pkg_dir = package_dir(&self.root, pkg);
        if latest_blocking(&pkg_dir).is_ok() {
            return Err(RemoteError::invalid(format!("package {pkg} already exists")));
        }
        write_revision(&pkg_dir, 1, listing, Some("initial import".to_string()))
    }

    /// Manifest of one revision. Blocking.
    pub fn manifest(&self, pkg: &PackageRef, revision: &RevisionId) -> Result<RevisionManifest, RemoteError> {
        check_package(pkg)?;
        read_manifest(&package_dir(&self.root, pkg), revision)
    }
}

// ---------------------------------------------------------------------------
// Blocking internals
// ---------------------------------------------------------------------------

fn package_dir(root: &Path, pkg: &PackageRef) -> PathBuf {
    root.join("packages").join(&pkg.project.0).join(&pkg.package.0)
}

fn revisions_dir(pkg_dir: &Path) -> PathBuf {
    pkg_dir.join("revisions")
}

fn blob_path(root: &Path, checksum: &Checksum) -> PathBuf {
    root.join("blobs").join(checksum.as_str())
}

fn latest_blocking(pkg_dir: &Path) -> Result<u64, RemoteError> {
    let dir = revisions_dir(pkg_dir);
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(RemoteError::not_found(format!("package at {}", pkg_dir.display())))
        }
        Err(e) => return Err(transport_err(dir.display(), e)),
    };
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            e.file_name()
                .to_string_lossy()
                .strip_suffix(".json")
                .and_then(|n| n.parse::<u64>().ok())
        })
        .max()
        .ok_or_else(|| RemoteError::not_found(format!("revisions of {}", pkg_dir.display())))
}

fn read_manifest(pkg_dir: &Path, revision: &RevisionId) -> Result<RevisionManifest, RemoteError> {
    let n: u64 = revision
        .0
        .parse()
        .map_err(|_| RemoteError::not_found(format!("revision {revision}")))?;
    let path = revisions_dir(pkg_dir).join(format!("{n}.json"));
    let contents = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(RemoteError::not_found(format!("revision {revision}")))
        }
        Err(e) => return Err(transport_err(path.display(), e)),
    };
    serde_json::from_str(&contents)
        .map_err(|e| RemoteError::Transport(format!("corrupt manifest {}: {e}", path.display())))
}

fn store_blob(root: &Path, bytes: &[u8]) -> Result<FileHandle, RemoteError> {
    let checksum = Checksum::of(bytes);
    let path = blob_path(root, &checksum);
    let handle = FileHandle {
        checksum,
        size: bytes.len() as u64,
    };
    if path.is_file() {
        return Ok(handle);
    }
    let dir = root.join("blobs");
    std::fs::create_dir_all(&dir).map_err(|e| transport_err(dir.display(), e))?;
    let tmp = path.with_extension(format!("{}.tmp", std::process::id()));
    std::fs::write(&tmp, bytes).map_err(|e| transport_err(tmp.display(), e))?;
    if let Err(e) = std::fs::rename(&tmp, &path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(transport_err(path.display(), e));
    }
    Ok(handle)
}

fn write_revision(
    pkg_dir: &Path,
    n: u64,
    files: FileListing,
    message: Option<String>,
) -> Result<RevisionId, RemoteError> {
    let dir = revisions_dir(pkg_dir);
    std::fs::create_dir_all(&dir).map_err(|e| transport_err(dir.display(), e))?;
    let revision = RevisionId(n.to_string());
    let manifest = RevisionManifest {
        revision: revision.clone(),
        files,
        message,
        created_at: Utc::now(),
    };
    let json = serde_json::to_vec_pretty(&manifest)
        .map_err(|e| RemoteError::Transport(format!("manifest encoding: {e}")))?;
    let path = dir.join(format!("{n}.json"));
    let staged = dir.join(format!("{n}.json.{}.tmp", std::process::id()));
    let written = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&staged)
        .and_then(|mut file| file.write_all(&json).and_then(|_| file.sync_all()));
    if let Err(e) = written {
        let _ = std::fs::remove_file(&staged);
        return Err(transport_err(staged.display(), e));
    }
    // The link either publishes the complete manifest or fails with
    // AlreadyExists; a crash before it leaves only the staged file.
    let linked = std::fs::hard_link(&staged, &path);
    let _ = std::fs::remove_file(&staged);
    match linked {
        Ok(()) => Ok(revision),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(crate::Rejection::Conflict {
            base: RevisionId((n - 1).to_string()),
            current: revision,
        }
        .into()),
        Err(e) => Err(transport_err(path.display(), e)),
    }
}

fn commit_blocking(
    root: &Path,
    pkg: &PackageRef,
    request: CommitRequest,
) -> Result<RevisionId, RemoteError> {
    let pkg_dir = package_dir(root, pkg);
    let latest = latest_blocking(&pkg_dir)?;

    let lock_path = pkg_dir.join("commit.lock");
    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .map_err(|e| transport_err(lock_path.display(), e))?;
    lock.lock_exclusive()
        .map_err(|e| transport_err(lock_path.display(), e))?;

    let result = (|| {
        let current = latest_blocking(&pkg_dir)?.max(latest);
        let current_id = RevisionId(current.to_string());
        if request.base != current_id {
            return Err(crate::Rejection::Conflict {
                base: request.base,
                current: current_id,
            }
            .into());
        }
        let mut files = FileListing::new();
        for (path, handle) in request.files {
            if !blob_path(root, &handle.checksum).is_file() {
                return Err(RemoteError::invalid(format!(
                    "'{path}' references blob {} that was never uploaded",
                    handle.checksum
                )));
            }
            files.insert(path, handle.checksum);
        }
        write_revision(&pkg_dir, current + 1, files, request.message)
    })();

    let _ = lock.unlock();
    result
}

async fn blocking<T, F>(f: F) -> Result<T, RemoteError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, RemoteError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RemoteError::Transport(format!("blocking task failed: {e}")))?
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

#[async_trait]
impl RemoteGateway for DirRemote {
    fn locator(&self) -> String {
        format!("file://{}", self.root.display())
    }

    async fn latest_revision(&self, pkg: &PackageRef) -> Result<RevisionId, RemoteError> {
        check_package(pkg)?;
        let pkg_dir = package_dir(&self.root, pkg);
        let n = blocking(move || latest_blocking(&pkg_dir)).await?;
        Ok(RevisionId(n.to_string()))
    }

    async fn list_files(
        &self,
        pkg: &PackageRef,
        revision: &RevisionId,
    ) -> Result<FileListing, RemoteError> {
        check_package(pkg)?;
        let pkg_dir = package_dir(&self.root, pkg);
        let revision = revision.clone();
        let manifest = blocking(move || read_manifest(&pkg_dir, &revision)).await?;
        Ok(manifest.files)
    }

    async fn fetch_file(
        &self,
        pkg: &PackageRef,
        revision: &RevisionId,
        path: &str,
    ) -> Result<Vec<u8>, RemoteError> {
        check_package(pkg)?;
        let root = self.root.clone();
        let pkg_dir = package_dir(&self.root, pkg);
        let revision = revision.clone();
        let path = path.to_string();
        blocking(move || {
            let manifest = read_manifest(&pkg_dir, &revision)?;
            let checksum = manifest.files.get(&path).ok_or_else(|| {
                RemoteError::not_found(format!("file '{path}' in revision {revision}"))
            })?;
            let blob = blob_path(&root, checksum);
            match std::fs::read(&blob) {
                Ok(bytes) => Ok(bytes),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    Err(RemoteError::not_found(format!("blob {checksum}")))
                }
                Err(e) => Err(transport_err(blob.display(), e)),
            }
        })
        .await
    }

    async fn upload_file(&self, pkg: &PackageRef, bytes: Vec<u8>) -> Result<FileHandle, RemoteError> {
        check_package(pkg)?;
        let root = self.root.clone();
        blocking(move || store_blob(&root, &bytes)).await
    }

    async fn commit_revision(
        &self,
        pkg: &PackageRef,
        request: CommitRequest,
    ) -> Result<RevisionId, RemoteError> {
        check_package(pkg)?;
        check_manifest(&request.files)?;
        let root = self.root.clone();
        let pkg_owned = pkg.clone();
        let revision = blocking(move || commit_blocking(&root, &pkg_owned, request)).await?;
        tracing::info!(package = %pkg, revision = %revision, "directory remote created revision");
        Ok(revision)
    }
}
