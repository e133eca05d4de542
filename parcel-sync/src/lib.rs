//! # parcel-sync
//!
//! Working-copy operations on top of the metadata store and a
//! [`parcel_remote::RemoteGateway`].
//!
//! Open a [`WorkingCopy`] (or create one with [`checkout`]), then call
//! [`compute_status`], [`update`], [`commit`] or the local operations in
//! [`ops`]. Every operation takes the working copy explicitly; there is no
//! global state.

pub mod checkout;
pub mod commit;
pub mod diff;
pub mod error;
pub mod listener;
pub mod ops;
pub mod options;
pub mod status;
mod transfer;
pub mod update;
pub mod workspace;
mod writer;

pub use checkout::{checkout, CheckoutResult};
pub use commit::{commit, CommitResult, CommittedFile};
pub use diff::{diff, FileDiff};
pub use error::{ErrorKind, SyncError};
pub use listener::{Direction, NoProgress, ProgressListener};
pub use ops::{add, cleanup, remove, resolve, revert, CleanupReport, OpAction, OpResult};
pub use options::SyncOptions;
pub use status::{compute_status, status_of, StatusReport};
pub use update::{update, ChangeAction, ConflictReport, FileChange, UpdateResult};
pub use workspace::{WorkingCopy, WorkingCopyInfo};
pub use writer::WriteResult;

pub use tokio_util::sync::CancellationToken;
