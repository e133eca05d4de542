//! Unified diffs of local changes against the base revision.

use std::io::ErrorKind;
use std::path::Path;

use serde::Serialize;
use similar::TextDiff;

use parcel_core::{FileEntry, LocalStatus, RevisionId};

use crate::error::{io_err, SyncError};
use crate::status;
use crate::workspace::WorkingCopy;

/// Bytes inspected for NUL when deciding whether content is binary.
const BINARY_SNIFF_LEN: usize = 8000;

/// A single file diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDiff {
    pub path: String,
    pub status: LocalStatus,
    pub unified_diff: String,
}

/// Diff the given paths, or every changed file when `paths` is empty.
///
/// No files are written and no lock is taken.
pub fn diff(wc: &WorkingCopy, paths: &[String]) -> Result<Vec<FileDiff>, SyncError> {
    let meta = wc.meta()?;
    let report = status::scan(wc.root(), &meta)?.report;

    let selected: Vec<(&String, LocalStatus)> = if paths.is_empty() {
        report
            .files
            .iter()
            .filter(|(_, s)| **s != LocalStatus::Unmodified)
            .map(|(p, s)| (p, *s))
            .collect()
    } else {
        let mut out = Vec::new();
        for path in paths {
            let (path, status) = report
                .files
                .get_key_value(path)
                .ok_or_else(|| SyncError::NotTracked { path: path.clone() })?;
            out.push((path, *status));
        }
        out
    };

    let mut diffs = Vec::new();
    for (path, status) in selected {
        let Some(entry) = meta.entries.get(path) else {
            continue;
        };
        let (old, new) = match status {
            LocalStatus::Unmodified => continue,
            LocalStatus::Added => (Vec::new(), read_or_empty(&wc.file_path(path))?),
            LocalStatus::Deleted | LocalStatus::Missing => (base_bytes(wc, entry)?, Vec::new()),
            LocalStatus::Modified | LocalStatus::Conflicted => {
                (base_bytes(wc, entry)?, read_or_empty(&wc.file_path(path))?)
            }
        };
        diffs.push(FileDiff {
            path: path.clone(),
            status,
            unified_diff: render(path, status, &meta.revision, &old, &new),
        });
    }
    Ok(diffs)
}

fn base_bytes(wc: &WorkingCopy, entry: &FileEntry) -> Result<Vec<u8>, SyncError> {
    match &entry.checksum {
        Some(checksum) => Ok(wc.pristine().get(checksum)?),
        None => Ok(Vec::new()),
    }
}

fn read_or_empty(path: &Path) -> Result<Vec<u8>, SyncError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(io_err(path, err)),
    }
}

fn render(path: &str, status: LocalStatus, revision: &RevisionId, old: &[u8], new: &[u8]) -> String {
    let (Some(old_text), Some(new_text)) = (as_text(old), as_text(new)) else {
        return format!("Binary file {path} has changed\n");
    };
    let old_text = normalize_line_endings(old_text);
    let new_text = normalize_line_endings(new_text);
    let old_header = match status {
        LocalStatus::Added => "/dev/null".to_string(),
        _ => format!("a/{path}\t(revision {revision})"),
    };
    let new_header = match status {
        LocalStatus::Deleted | LocalStatus::Missing => "/dev/null".to_string(),
        _ => format!("b/{path}\t(working copy)"),
    };
    TextDiff::from_lines(&old_text, &new_text)
        .unified_diff()
        .header(&old_header, &new_header)
        .context_radius(3)
        .to_string()
}

fn as_text(bytes: &[u8]) -> Option<&str> {
    if bytes[..bytes.len().min(BINARY_SNIFF_LEN)].contains(&0) {
        return None;
    }
    std::str::from_utf8(bytes).ok()
}

fn normalize_line_endings(content: &str) -> String {
    content.replace("\r\n", "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_diff_has_revision_headers() {
        let out = render("hello.spec", LocalStatus::Modified, &RevisionId::from("7"), b"a\nb\n", b"a\nc\n");
        assert!(out.contains("--- a/hello.spec\t(revision 7)"));
        assert!(out.contains("+++ b/hello.spec\t(working copy)"));
        assert!(out.contains("-b"));
        assert!(out.contains("+c"));
    }

    #[test]
    fn added_and_deleted_files_diff_against_dev_null() {
        let rev = RevisionId::from("2");
        let added = render("new.patch", LocalStatus::Added, &rev, b"", b"p\n");
        assert!(added.contains("--- /dev/null"));
        assert!(added.contains("+p"));
        let gone = render("old.patch", LocalStatus::Deleted, &rev, b"o\n", b"");
        assert!(gone.contains("+++ /dev/null"));
        assert!(gone.contains("-o"));
    }

    #[test]
    fn nul_bytes_mean_binary() {
        let out = render("logo.png", LocalStatus::Modified, &RevisionId::from("1"), b"\x89PNG\0", b"\x89PNG\0\x01");
        assert_eq!(out, "Binary file logo.png has changed\n");
    }

    #[test]
    fn invalid_utf8_is_binary() {
        assert!(as_text(&[0xff, 0xfe, b'a']).is_none());
        assert_eq!(as_text(b"plain"), Some("plain"));
    }

    #[test]
    fn crlf_is_normalized() {
        let out = render("x", LocalStatus::Modified, &RevisionId::from("1"), b"a\r\nb\r\n", b"a\nb\n");
        assert!(!out.contains("-a"));
    }
}
