//! Domain types for a package working copy.
//!
//! Relative file paths inside a working copy are `/`-separated `String`s
//! (they double as map keys in the metadata document); filesystem locations
//! are always `PathBuf`. Everything here round-trips through serde + serde_json.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Metadata document format written by this version.
pub const FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Name of a project on the build service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectName(pub String);

impl fmt::Display for ProjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ProjectName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProjectName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Name of a package inside a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageName(pub String);

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for PackageName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PackageName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Opaque revision identifier assigned by the remote.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionId(pub String);

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for RevisionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RevisionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Lowercase hex SHA-256 digest of a file's content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(pub String);

impl Checksum {
    /// Digest of an in-memory buffer.
    pub fn of(bytes: &[u8]) -> Self {
        let mut h = Sha256::new();
        h.update(bytes);
        Self(hex::encode(h.finalize()))
    }

    /// Streaming digest of a file on disk.
    pub fn of_file(path: &Path) -> std::io::Result<Self> {
        let mut file = std::fs::File::open(path)?;
        let mut h = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            h.update(&buf[..n]);
        }
        Ok(Self(hex::encode(h.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for human-facing output.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(12);
        self.0.get(..end).unwrap_or(&self.0)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A package addressed on the remote: `<project>/<package>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageRef {
    pub project: ProjectName,
    pub package: PackageName,
}

impl PackageRef {
    pub fn new(project: impl Into<ProjectName>, package: impl Into<PackageName>) -> Self {
        Self {
            project: project.into(),
            package: package.into(),
        }
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project, self.package)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Recorded intent for a tracked file. Only the Update Coordinator sets
/// `Conflicted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    #[default]
    Normal,
    Added,
    Deleted,
    Conflicted,
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryState::Normal => write!(f, "normal"),
            EntryState::Added => write!(f, "added"),
            EntryState::Deleted => write!(f, "deleted"),
            EntryState::Conflicted => write!(f, "conflicted"),
        }
    }
}

/// Effective status of a tracked file, computed from disk + metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalStatus {
    Unmodified,
    Added,
    Deleted,
    Modified,
    Missing,
    Conflicted,
}

impl LocalStatus {
    /// Single-column status code as printed by `parcel status`.
    pub fn code(self) -> char {
        match self {
            LocalStatus::Unmodified => ' ',
            LocalStatus::Added => 'A',
            LocalStatus::Deleted => 'D',
            LocalStatus::Modified => 'M',
            LocalStatus::Missing => '!',
            LocalStatus::Conflicted => 'C',
        }
    }

    /// True for statuses a commit would send to the remote.
    pub fn is_committable(self) -> bool {
        matches!(
            self,
            LocalStatus::Added | LocalStatus::Deleted | LocalStatus::Modified
        )
    }
}

impl fmt::Display for LocalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalStatus::Unmodified => write!(f, "unmodified"),
            LocalStatus::Added => write!(f, "added"),
            LocalStatus::Deleted => write!(f, "deleted"),
            LocalStatus::Modified => write!(f, "modified"),
            LocalStatus::Missing => write!(f, "missing"),
            LocalStatus::Conflicted => write!(f, "conflicted"),
        }
    }
}

/// Why an update flagged a path as conflicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictKind {
    /// Local edit and remote edit disagree.
    BothModified,
    /// Remote deleted a file that carries a local edit.
    DeletedRemotely,
    /// Local add and remote add of the same path disagree.
    BothAdded,
    /// An untracked local file sits where the remote added one.
    Obstructed,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::BothModified => write!(f, "both modified"),
            ConflictKind::DeletedRemotely => write!(f, "deleted remotely"),
            ConflictKind::BothAdded => write!(f, "both added"),
            ConflictKind::Obstructed => write!(f, "obstructed by untracked file"),
        }
    }
}

// ---------------------------------------------------------------------------
// Entry structs
// ---------------------------------------------------------------------------

/// Marker recorded before an update rewrites a file on disk.
///
/// `checksum == None` means the file is about to be deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransfer {
    pub target: RevisionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<Checksum>,
}

/// Details of an unresolved conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictMarker {
    pub kind: ConflictKind,
    pub remote_revision: RevisionId,
    /// Side file holding the remote version, relative to the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side_file: Option<String>,
}

/// Persisted record for one tracked file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    /// Content checksum at the base revision; `None` for local adds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<Checksum>,
    #[serde(default)]
    pub state: EntryState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingTransfer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<ConflictMarker>,
}

impl FileEntry {
    /// An unmodified file at the base revision.
    pub fn tracked(path: impl Into<String>, checksum: Checksum) -> Self {
        Self {
            path: path.into(),
            checksum: Some(checksum),
            state: EntryState::Normal,
            pending: None,
            conflict: None,
        }
    }

    /// A file scheduled for addition.
    pub fn added(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            checksum: None,
            state: EntryState::Added,
            pending: None,
            conflict: None,
        }
    }

    pub fn is_conflicted(&self) -> bool {
        self.state == EntryState::Conflicted
    }
}

/// The whole metadata document for one working copy (`.parcel/meta.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingCopyMeta {
    pub format: u32,
    pub project: ProjectName,
    pub package: PackageName,
    /// Remote locator the working copy was checked out from.
    pub remote: String,
    pub revision: RevisionId,
    /// Bumped on every committed transaction.
    #[serde(default)]
    pub generation: u64,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub entries: BTreeMap<String, FileEntry>,
}

impl WorkingCopyMeta {
    pub fn new(pkg: &PackageRef, remote: impl Into<String>, revision: RevisionId) -> Self {
        Self {
            format: FORMAT_VERSION,
            project: pkg.project.clone(),
            package: pkg.package.clone(),
            remote: remote.into(),
            revision,
            generation: 0,
            updated_at: Utc::now(),
            entries: BTreeMap::new(),
        }
    }

    pub fn package_ref(&self) -> PackageRef {
        PackageRef {
            project: self.project.clone(),
            package: self.package.clone(),
        }
    }

    /// Base checksums the pristine store must keep.
    pub fn live_checksums(&self) -> std::collections::BTreeSet<Checksum> {
        self.entries
            .values()
            .filter_map(|e| e.checksum.clone())
            .collect()
    }
}
