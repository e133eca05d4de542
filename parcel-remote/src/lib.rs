//! # parcel-remote
//!
//! The [`RemoteGateway`] boundary between working-copy coordinators and the
//! authoritative package history, plus two gateways:
//! - [`MemoryRemote`] — in-process, with hooks for tests
//! - [`DirRemote`] — a directory acting as the server (`file://` locators)

pub mod dir;
pub mod error;
pub mod gateway;
pub mod memory;

use std::path::PathBuf;
use std::sync::Arc;

pub use dir::DirRemote;
pub use error::{Rejection, RemoteError};
pub use gateway::{CommitRequest, FileHandle, FileListing, RemoteGateway};
pub use memory::{Change, MemoryRemote};

/// Open the gateway named by `locator`.
///
/// Accepts `file://<path>` or a bare filesystem path; anything else is
/// rejected as an unsupported scheme.
pub fn open_remote(locator: &str) -> Result<Arc<dyn RemoteGateway>, RemoteError> {
    if let Some(path) = locator.strip_prefix("file://") {
        if path.is_empty() {
            return Err(RemoteError::Rejected(Rejection::Invalid(
                "file:// locator without a path".to_string(),
            )));
        }
        return Ok(Arc::new(DirRemote::new(PathBuf::from(path))));
    }
    if let Some((scheme, _)) = locator.split_once("://") {
        return Err(RemoteError::Rejected(Rejection::Invalid(format!(
            "unsupported remote scheme '{scheme}'"
        ))));
    }
    if locator.is_empty() {
        return Err(RemoteError::Rejected(Rejection::Invalid(
            "empty remote locator".to_string(),
        )));
    }
    Ok(Arc::new(DirRemote::new(PathBuf::from(locator))))
}
