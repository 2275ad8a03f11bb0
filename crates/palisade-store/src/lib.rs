//! Durable storage layer for Palisade configuration snapshots.
//!
//! This crate provides the `SnapshotStore` for the `running` and `working`
//! configuration slots and named backups, a content-addressed `SnapshotObjects`
//! store for immutable pre-apply snapshots, the persisted `TxnMarker` that
//! makes the apply/confirm window crash-safe, `StoreLayout` for directory
//! structure management, and an fs2-based cross-process `StoreLock`.

pub mod layout;
pub mod lock;
pub mod objects;
pub mod snapshots;
pub mod txn;

pub use layout::{StoreLayout, STORE_FORMAT_VERSION};
pub use lock::StoreLock;
pub use objects::SnapshotObjects;
pub use snapshots::{validate_backup_name, BackupInfo, Slot, SnapshotStore};
pub use txn::{Phase, TxnMarker, TxnStore};

use std::path::Path;
use thiserror::Error;

/// Fsync a directory to ensure that a preceding `rename()` is durable.
///
/// On Linux with ext4 `data=ordered` (the default), renames are usually
/// durable without an explicit dir fsync, but POSIX does not guarantee this.
/// Calling `fsync()` on the parent directory makes the rename durable on
/// all filesystems and mount configurations.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no {0} configuration has been saved yet")]
    NotFound(String),
    #[error("snapshot object not found: {0}")]
    SnapshotNotFound(String),
    #[error("backup not found: {0}")]
    BackupNotFound(String),
    #[error("a backup named '{0}' already exists (use overwrite to replace it)")]
    DuplicateName(String),
    #[error("invalid backup name: {0}")]
    InvalidName(String),
    #[error("integrity check failed for snapshot '{hash}': content hashes to {actual}")]
    IntegrityFailure { hash: String, actual: String },
    #[error("lock acquisition failed: {0}")]
    LockFailed(String),
    #[error("store format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("config error: {0}")]
    Config(#[from] palisade_config::ConfigError),
}
