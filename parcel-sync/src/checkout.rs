//! Create a working copy from a remote revision.
//!
//! `meta.json` is written last: until then the directory is not a working
//! copy, and a failed checkout can simply be rerun.

use std::path::{Path, PathBuf};

use serde::Serialize;

use parcel_core::{
    paths, FileEntry, MetadataStore, PackageRef, PristineStore, RevisionId, WcError,
    WorkingCopyLock, WorkingCopyMeta,
};
use parcel_remote::RemoteGateway;

use crate::error::{io_err, SyncError};
use crate::options::SyncOptions;
use crate::status;
use crate::transfer;
use crate::workspace::WorkingCopy;
use crate::writer;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutResult {
    pub root: PathBuf,
    pub package: String,
    pub revision: RevisionId,
    pub files: usize,
}

/// Check out `pkg` at `revision` (latest if `None`) into `dest`.
///
/// `dest` may already contain files; any that would be overwritten with
/// different content abort the checkout with `CheckoutCollision`.
pub async fn checkout(
    gateway: &dyn RemoteGateway,
    pkg: &PackageRef,
    revision: Option<&RevisionId>,
    dest: &Path,
    opts: &SyncOptions,
) -> Result<(WorkingCopy, CheckoutResult), SyncError> {
    if paths::meta_path(dest).exists() {
        return Err(WcError::AlreadyAWorkingCopy {
            path: dest.to_path_buf(),
        }
        .into());
    }
    let meta_dir = paths::meta_dir(dest);
    let created = !meta_dir.exists();
    std::fs::create_dir_all(&meta_dir).map_err(|e| io_err(&meta_dir, e))?;

    let result = checkout_into(gateway, pkg, revision, dest, opts).await;
    if result.is_err() && created {
        if let Err(e) = std::fs::remove_dir_all(&meta_dir) {
            tracing::warn!(path = %meta_dir.display(), error = %e, "could not remove metadata directory");
        }
    }
    result
}

async fn checkout_into(
    gateway: &dyn RemoteGateway,
    pkg: &PackageRef,
    revision: Option<&RevisionId>,
    dest: &Path,
    opts: &SyncOptions,
) -> Result<(WorkingCopy, CheckoutResult), SyncError> {
    let _lock = WorkingCopyLock::acquire(dest, "checkout")?;
    opts.check_cancelled()?;
    let revision = match revision {
        Some(rev) => rev.clone(),
        None => gateway.latest_revision(pkg).await?,
    };
    let listing = gateway.list_files(pkg, &revision).await?;

    let mut collisions = Vec::new();
    for (path, checksum) in &listing {
        paths::validate_rel_path(path)?;
        match status::disk_checksum(dest, path)? {
            Some(existing) if &existing != checksum => collisions.push(path.clone()),
            _ => {}
        }
    }
    if !collisions.is_empty() {
        return Err(SyncError::CheckoutCollision { paths: collisions });
    }

    opts.listener.begin("checkout", listing.len());
    let pristine = PristineStore::for_root(dest);
    let wanted = listing
        .iter()
        .map(|(path, checksum)| (path.clone(), checksum.clone()))
        .collect();
    transfer::fetch_into_pristine(gateway, pkg, &revision, wanted, &pristine, opts).await?;
    opts.check_cancelled()?;

    let mut meta = WorkingCopyMeta::new(pkg, gateway.locator(), revision.clone());
    for (path, checksum) in &listing {
        let bytes = pristine.get(checksum)?;
        writer::write_atomic(&paths::to_fs_path(dest, path), &bytes)?;
        meta.entries
            .insert(path.clone(), FileEntry::tracked(path.as_str(), checksum.clone()));
        opts.listener.processed(path, "fetched");
    }
    MetadataStore::init(dest, &meta)?;
    opts.listener.finished("checkout");

    tracing::info!(
        package = %pkg,
        revision = %revision,
        root = %dest.display(),
        files = listing.len(),
        "checked out"
    );
    let wc = WorkingCopy::open(dest)?;
    Ok((
        wc,
        CheckoutResult {
            root: dest.to_path_buf(),
            package: pkg.to_string(),
            revision,
            files: listing.len(),
        },
    ))
}
