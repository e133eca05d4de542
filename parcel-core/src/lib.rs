//! Parcel core library — working-copy domain types, metadata store, pristine
//! store, advisory lock, config, errors.
//!
//! Public API surface:
//! - [`types`] — newtypes, entry records, the metadata document
//! - [`store`] — [`MetadataStore`] / [`Transaction`]
//! - [`pristine`] — content-addressed base copies
//! - [`lock`] — [`WorkingCopyLock`] and the `break_lock` recovery action
//! - [`config`] — `~/.parcel/config.yaml`
//! - [`paths`] — on-disk layout and path validation
//! - [`error`] — [`WcError`]

pub mod config;
pub mod error;
pub mod lock;
pub mod paths;
pub mod pristine;
pub mod store;
pub mod types;

pub use error::WcError;
pub use lock::{LockHolder, WorkingCopyLock};
pub use pristine::PristineStore;
pub use store::{MetadataStore, Transaction};
pub use types::{
    Checksum, ConflictKind, ConflictMarker, EntryState, FileEntry, LocalStatus, PackageName,
    PackageRef, PendingTransfer, ProjectName, RevisionId, WorkingCopyMeta,
};
