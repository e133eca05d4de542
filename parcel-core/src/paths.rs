//! On-disk layout of a working copy.
//!
//! ```text
//! <root>/
//!   .parcel/
//!     meta.json          (working-copy metadata, mode 0600)
//!     meta.json.tmp      (only while a transaction commits)
//!     pristine/<sha256>  (base-revision contents)
//!     lock               (present while an operation holds the working copy)
//!   <tracked files>
//!   <path>.r<revision>   (conflict side files)
//! ```

use std::path::{Component, Path, PathBuf};

use crate::error::WcError;
use crate::types::RevisionId;

pub const META_DIR: &str = ".parcel";
pub const META_FILE: &str = "meta.json";
pub const LOCK_FILE: &str = "lock";
pub const PRISTINE_DIR: &str = "pristine";

/// Suffix of the temp sibling used for atomic file replacement.
pub const TMP_SUFFIX: &str = ".parcel.tmp";

/// `<root>/.parcel/`
pub fn meta_dir(root: &Path) -> PathBuf {
    root.join(META_DIR)
}

/// `<root>/.parcel/meta.json`
pub fn meta_path(root: &Path) -> PathBuf {
    meta_dir(root).join(META_FILE)
}

/// `<root>/.parcel/lock`
pub fn lock_path(root: &Path) -> PathBuf {
    meta_dir(root).join(LOCK_FILE)
}

/// `<root>/.parcel/pristine/`
pub fn pristine_dir(root: &Path) -> PathBuf {
    meta_dir(root).join(PRISTINE_DIR)
}

/// `<home>/.parcel/config.yaml` — pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".parcel").join("config.yaml")
}

/// `<path>.parcel.tmp`
pub fn tmp_path_for(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}{TMP_SUFFIX}", path.display()))
}

pub fn is_tmp_name(name: &str) -> bool {
    name.ends_with(TMP_SUFFIX)
}

/// Name of the side file that receives the remote version of a conflicted
/// file: `<path>.r<revision>`.
pub fn conflict_side_file(path: &str, revision: &RevisionId) -> String {
    format!("{path}.r{revision}")
}

/// Resolve a working-copy relative path to its location under `root`.
pub fn to_fs_path(root: &Path, rel: &str) -> PathBuf {
    rel.split('/').fold(root.to_path_buf(), |acc, part| acc.join(part))
}

/// Check that `rel` is a clean relative path that stays inside the working
/// copy and outside the metadata directory.
pub fn validate_rel_path(rel: &str) -> Result<(), WcError> {
    let invalid = |reason| {
        Err(WcError::InvalidPath {
            path: rel.to_string(),
            reason,
        })
    };
    if rel.is_empty() {
        return invalid("empty path");
    }
    if rel.contains('\\') {
        return invalid("backslashes are not allowed");
    }
    if rel.starts_with('/') {
        return invalid("absolute paths are not allowed");
    }
    for part in rel.split('/') {
        match part {
            "" => return invalid("empty path component"),
            "." | ".." => return invalid("relative components are not allowed"),
            _ => {}
        }
    }
    if rel == META_DIR || rel.starts_with(&format!("{META_DIR}/")) {
        return invalid("paths inside the metadata directory are reserved");
    }
    if is_tmp_name(rel) {
        return invalid("temporary file names are reserved");
    }
    Ok(())
}

/// Turn a user-supplied path (absolute, or relative to `cwd`) into a
/// working-copy relative path under `root`.
pub fn relativize(root: &Path, cwd: &Path, input: &Path) -> Result<String, WcError> {
    let joined = if input.is_absolute() {
        input.to_path_buf()
    } else {
        cwd.join(input)
    };
    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }
    let stripped = normalized.strip_prefix(root).map_err(|_| WcError::InvalidPath {
        path: input.display().to_string(),
        reason: "path is outside the working copy",
    })?;
    let rel = stripped
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");
    validate_rel_path(&rel)?;
    Ok(rel)
}
