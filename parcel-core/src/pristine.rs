//! Content-addressed copies of base-revision file contents.
//!
//! Blobs live at `.parcel/pristine/<sha256>` and are written with the same
//! `.tmp` + rename pattern as the metadata. Writing a blob never changes the
//! committed working-copy state, so coordinators stage fetched content here
//! before their metadata transaction.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{io_err, WcError};
use crate::paths;
use crate::types::Checksum;

#[derive(Debug, Clone)]
pub struct PristineStore {
    dir: PathBuf,
}

impl PristineStore {
    /// Pristine store of the working copy at `root`.
    pub fn for_root(root: &Path) -> Self {
        Self {
            dir: paths::pristine_dir(root),
        }
    }

    pub fn path_of(&self, checksum: &Checksum) -> PathBuf {
        self.dir.join(checksum.as_str())
    }

    pub fn contains(&self, checksum: &Checksum) -> bool {
        self.path_of(checksum).is_file()
    }

    /// Store `bytes`, returning their checksum. Idempotent.
    pub fn put(&self, bytes: &[u8]) -> Result<Checksum, WcError> {
        let checksum = Checksum::of(bytes);
        self.write_blob(&checksum, bytes)?;
        Ok(checksum)
    }

    /// Store `bytes` that must hash to `expected` (content fetched for `path`).
    pub fn put_verified(&self, path: &str, expected: &Checksum, bytes: &[u8]) -> Result<(), WcError> {
        let actual = Checksum::of(bytes);
        if &actual != expected {
            return Err(WcError::ChecksumMismatch {
                path: path.to_string(),
                expected: expected.clone(),
                actual,
            });
        }
        self.write_blob(expected, bytes)
    }

    pub fn get(&self, checksum: &Checksum) -> Result<Vec<u8>, WcError> {
        let path = self.path_of(checksum);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(WcError::PristineMissing {
                checksum: checksum.clone(),
            }),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    /// Delete every blob not in `live`. Returns the number removed.
    pub fn gc(&self, live: &BTreeSet<Checksum>) -> Result<usize, WcError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(io_err(&self.dir, e)),
        };
        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&self.dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if live.contains(&Checksum(name.clone())) {
                continue;
            }
            let path = entry.path();
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(io_err(&path, e)),
            }
        }
        if removed > 0 {
            tracing::debug!(removed, "pruned pristine store");
        }
        Ok(removed)
    }

    fn write_blob(&self, checksum: &Checksum, bytes: &[u8]) -> Result<(), WcError> {
        let path = self.path_of(checksum);
        if path.is_file() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.dir).map_err(|e| io_err(&self.dir, e))?;
        let tmp = paths::tmp_path_for(&path);
        std::fs::write(&tmp, bytes).map_err(|e| io_err(&tmp, e))?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(&path, e));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn put_then_get_returns_same_bytes() {
        let tmp = TempDir::new().unwrap();
        let store = PristineStore::for_root(tmp.path());
        let c = store.put(b"Name: hello\n").unwrap();
        assert!(store.contains(&c));
        assert_eq!(store.get(&c).unwrap(), b"Name: hello\n");
    }

    #[test]
    fn put_verified_rejects_wrong_content() {
        let tmp = TempDir::new().unwrap();
        let store = PristineStore::for_root(tmp.path());
        let expected = Checksum::of(b"right");
        let err = store.put_verified("a.txt", &expected, b"wrong").unwrap_err();
        assert!(matches!(err, WcError::ChecksumMismatch { .. }));
        assert!(!store.contains(&expected));
    }

    #[test]
    fn missing_blob_is_reported_by_checksum() {
        let tmp = TempDir::new().unwrap();
        let store = PristineStore::for_root(tmp.path());
        let err = store.get(&Checksum::of(b"nope")).unwrap_err();
        assert!(matches!(err, WcError::PristineMissing { .. }));
    }

    #[test]
    fn gc_keeps_only_live_blobs() {
        let tmp = TempDir::new().unwrap();
        let store = PristineStore::for_root(tmp.path());
        let keep = store.put(b"keep").unwrap();
        let drop = store.put(b"drop").unwrap();
        let live = BTreeSet::from([keep.clone()]);
        assert_eq!(store.gc(&live).unwrap(), 1);
        assert!(store.contains(&keep));
        assert!(!store.contains(&drop));
    }
}
