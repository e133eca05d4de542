//! Bounded, cancellable fan-out of fetches and uploads.
//!
//! At most `SyncOptions::jobs` transfers are in flight. The first failure
//! (or cancellation) drops the remaining futures and is returned.

use std::collections::{BTreeMap, BTreeSet};

use futures::stream::{self, StreamExt, TryStreamExt};

use parcel_core::{Checksum, PackageRef, PristineStore, RevisionId, WcError};
use parcel_remote::{FileHandle, RemoteGateway};

use crate::error::SyncError;
use crate::listener::Direction;
use crate::options::SyncOptions;

/// Download every `(path, checksum)` the pristine store does not hold yet.
/// Content is verified against its listed checksum before it is stored.
/// Returns the number of blobs fetched.
pub(crate) async fn fetch_into_pristine(
    gateway: &dyn RemoteGateway,
    pkg: &PackageRef,
    revision: &RevisionId,
    wanted: Vec<(String, Checksum)>,
    pristine: &PristineStore,
    opts: &SyncOptions,
) -> Result<usize, SyncError> {
    let mut seen = BTreeSet::new();
    let todo: Vec<_> = wanted
        .into_iter()
        .filter(|(_, checksum)| !pristine.contains(checksum) && seen.insert(checksum.clone()))
        .collect();
    let count = todo.len();
    tracing::debug!(package = %pkg, revision = %revision, count, "fetching");

    stream::iter(todo)
        .map(|(path, checksum)| async move {
            opts.check_cancelled()?;
            opts.listener.transfer(Direction::Download, &path);
            let bytes = tokio::select! {
                _ = opts.cancel.cancelled() => return Err(SyncError::Cancelled),
                fetched = gateway.fetch_file(pkg, revision, &path) => fetched?,
            };
            let store = pristine.clone();
            tokio::task::spawn_blocking(move || store.put_verified(&path, &checksum, &bytes))
                .await
                .map_err(|e| SyncError::Join(e.to_string()))??;
            Ok::<_, SyncError>(())
        })
        .buffer_unordered(opts.jobs())
        .try_collect::<Vec<()>>()
        .await?;

    Ok(count)
}

/// Upload the pristine copy of each `(path, checksum)`. Identical content is
/// sent once. Returns the handle for every path.
pub(crate) async fn upload_all(
    gateway: &dyn RemoteGateway,
    pkg: &PackageRef,
    files: Vec<(String, Checksum)>,
    pristine: &PristineStore,
    opts: &SyncOptions,
) -> Result<BTreeMap<String, FileHandle>, SyncError> {
    let mut by_checksum: BTreeMap<Checksum, String> = BTreeMap::new();
    for (path, checksum) in &files {
        by_checksum.entry(checksum.clone()).or_insert_with(|| path.clone());
    }
    tracing::debug!(package = %pkg, count = by_checksum.len(), "uploading");

    let handles: BTreeMap<Checksum, FileHandle> = stream::iter(by_checksum)
        .map(|(checksum, path)| async move {
            opts.check_cancelled()?;
            opts.listener.transfer(Direction::Upload, &path);
            let store = pristine.clone();
            let wanted = checksum.clone();
            let bytes = tokio::task::spawn_blocking(move || store.get(&wanted))
                .await
                .map_err(|e| SyncError::Join(e.to_string()))??;
            let handle = tokio::select! {
                _ = opts.cancel.cancelled() => return Err(SyncError::Cancelled),
                uploaded = gateway.upload_file(pkg, bytes) => uploaded?,
            };
            if handle.checksum != checksum {
                return Err(WcError::ChecksumMismatch {
                    path,
                    expected: checksum,
                    actual: handle.checksum,
                }
                .into());
            }
            Ok::<_, SyncError>((checksum, handle))
        })
        .buffer_unordered(opts.jobs())
        .try_collect()
        .await?;

    Ok(files
        .into_iter()
        .filter_map(|(path, checksum)| handles.get(&checksum).map(|h| (path, h.clone())))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parcel_remote::MemoryRemote;
    use tempfile::TempDir;

    fn pkg() -> PackageRef {
        PackageRef::new("home:me", "tool")
    }

    fn remote_with(files: &[(&str, &str)]) -> MemoryRemote {
        let remote = MemoryRemote::new();
        remote.create_package(&pkg(), files).unwrap();
        remote
    }

    fn listing(files: &[(&str, &str)]) -> Vec<(String, Checksum)> {
        files
            .iter()
            .map(|(p, c)| (p.to_string(), Checksum::of(c.as_bytes())))
            .collect()
    }

    #[tokio::test]
    async fn fetches_each_blob_once_and_skips_known_ones() {
        let files = [("a", "same"), ("b", "same"), ("c", "other")];
        let remote = remote_with(&files);
        let tmp = TempDir::new().unwrap();
        let pristine = PristineStore::for_root(tmp.path());
        let opts = SyncOptions::default().with_jobs(2);

        let n = fetch_into_pristine(&remote, &pkg(), &"1".into(), listing(&files), &pristine, &opts)
            .await
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(remote.fetch_count(), 2);

        let again = fetch_into_pristine(&remote, &pkg(), &"1".into(), listing(&files), &pristine, &opts)
            .await
            .unwrap();
        assert_eq!(again, 0);
        assert_eq!(remote.fetch_count(), 2);
    }

    #[tokio::test]
    async fn wrong_listed_checksum_is_rejected() {
        let remote = remote_with(&[("a", "real")]);
        let tmp = TempDir::new().unwrap();
        let pristine = PristineStore::for_root(tmp.path());
        let err = fetch_into_pristine(
            &remote,
            &pkg(),
            &"1".into(),
            listing(&[("a", "claimed")]),
            &pristine,
            &SyncOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            SyncError::WorkingCopy(WcError::ChecksumMismatch { .. })
        ));
        assert!(!pristine.contains(&Checksum::of(b"claimed")));
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_any_fetch() {
        let files = [("a", "1"), ("b", "2")];
        let remote = remote_with(&files);
        let tmp = TempDir::new().unwrap();
        let pristine = PristineStore::for_root(tmp.path());
        let opts = SyncOptions::default();
        opts.cancel.cancel();
        let err = fetch_into_pristine(&remote, &pkg(), &"1".into(), listing(&files), &pristine, &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert_eq!(remote.fetch_count(), 0);
    }

    #[tokio::test]
    async fn transport_failure_surfaces() {
        let files = [("a", "1"), ("b", "2"), ("c", "3")];
        let remote = remote_with(&files);
        remote.fail_fetches_after(1);
        let tmp = TempDir::new().unwrap();
        let pristine = PristineStore::for_root(tmp.path());
        let err = fetch_into_pristine(
            &remote,
            &pkg(),
            &"1".into(),
            listing(&files),
            &pristine,
            &SyncOptions::default().with_jobs(1),
        )
        .await
        .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn uploads_dedupe_identical_content() {
        let remote = remote_with(&[]);
        let tmp = TempDir::new().unwrap();
        let pristine = PristineStore::for_root(tmp.path());
        let c = pristine.put(b"dup").unwrap();
        let d = pristine.put(b"other").unwrap();
        let handles = upload_all(
            &remote,
            &pkg(),
            vec![
                ("x".to_string(), c.clone()),
                ("y".to_string(), c.clone()),
                ("z".to_string(), d.clone()),
            ],
            &pristine,
            &SyncOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(remote.upload_count(), 2);
        assert_eq!(handles.len(), 3);
        assert_eq!(handles["y"].checksum, c);
        assert_eq!(handles["z"].size, 5);
    }
}
