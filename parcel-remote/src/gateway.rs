//! The remote boundary the coordinators talk to.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use parcel_core::{Checksum, PackageRef, RevisionId};

use crate::error::RemoteError;

/// Files of one remote revision: relative path → content checksum.
pub type FileListing = BTreeMap<String, Checksum>;

/// Receipt for an uploaded blob. Uploads are content-addressed, so the same
/// bytes always produce the same handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHandle {
    pub checksum: Checksum,
    pub size: u64,
}

/// Full manifest of a new revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRequest {
    /// Revision the manifest was built against.
    pub base: RevisionId,
    /// Every file of the new revision; paths absent here are deleted.
    pub files: BTreeMap<String, FileHandle>,
    pub message: Option<String>,
}

/// Authoritative revision history for packages.
///
/// Every call may fail with [`RemoteError::Transport`] (retryable) or
/// [`RemoteError::Rejected`] (terminal).
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Locator string recorded in working-copy metadata.
    fn locator(&self) -> String;

    async fn latest_revision(&self, pkg: &PackageRef) -> Result<RevisionId, RemoteError>;

    async fn list_files(
        &self,
        pkg: &PackageRef,
        revision: &RevisionId,
    ) -> Result<FileListing, RemoteError>;

    async fn fetch_file(
        &self,
        pkg: &PackageRef,
        revision: &RevisionId,
        path: &str,
    ) -> Result<Vec<u8>, RemoteError>;

    async fn upload_file(&self, pkg: &PackageRef, bytes: Vec<u8>) -> Result<FileHandle, RemoteError>;

    /// Create a new revision. Fails with `Rejected(Conflict)` unless
    /// `request.base` is the package's current revision.
    async fn commit_revision(
        &self,
        pkg: &PackageRef,
        request: CommitRequest,
    ) -> Result<RevisionId, RemoteError>;
}

/// Package names become directory names on directory-backed remotes.
pub(crate) fn check_package(pkg: &PackageRef) -> Result<(), RemoteError> {
    for part in [&pkg.project.0, &pkg.package.0] {
        if part.is_empty() || part == "." || part == ".." || part.contains(['/', '\\']) {
            return Err(RemoteError::invalid(format!("invalid package reference '{pkg}'")));
        }
    }
    Ok(())
}

pub(crate) fn check_manifest(files: &BTreeMap<String, FileHandle>) -> Result<(), RemoteError> {
    for path in files.keys() {
        parcel_core::paths::validate_rel_path(path)
            .map_err(|e| RemoteError::invalid(e.to_string()))?;
    }
    Ok(())
}
