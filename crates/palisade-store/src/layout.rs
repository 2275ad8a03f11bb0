use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Current store format version. Incremented on incompatible layout changes.
pub const STORE_FORMAT_VERSION: u32 = 1;
const VERSION_FILE: &str = "version";

/// Directory layout for the Palisade configuration store.
///
/// Manages paths for the config slots, content-addressed snapshot objects,
/// named backups, the transaction marker, and the store version marker.
/// All subdirectories are created lazily on [`initialize`](Self::initialize).
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreVersion {
    format_version: u32,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    #[inline]
    pub fn objects_dir(&self) -> PathBuf {
        self.root.join("objects")
    }

    #[inline]
    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    #[inline]
    pub fn slot_path(&self, slot: crate::Slot) -> PathBuf {
        self.state_dir().join(format!("{slot}.json"))
    }

    #[inline]
    pub fn backup_path(&self, name: &str) -> PathBuf {
        self.backups_dir().join(format!("{name}.json"))
    }

    /// Path of the persisted in-flight transaction marker.
    #[inline]
    pub fn txn_marker_path(&self) -> PathBuf {
        self.state_dir().join("transaction.json")
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.root.join(".lock")
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.state_dir())?;
        fs::create_dir_all(self.objects_dir())?;
        fs::create_dir_all(self.backups_dir())?;

        let version_path = self.root.join(VERSION_FILE);
        if version_path.exists() {
            self.verify_version()?;
        } else {
            let ver = StoreVersion {
                format_version: STORE_FORMAT_VERSION,
            };
            let content = serde_json::to_string_pretty(&ver)?;
            let mut tmp = NamedTempFile::new_in(&self.root)?;
            tmp.write_all(content.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&version_path)
                .map_err(|e| StoreError::Io(e.error))?;
            crate::fsync_dir(&self.root)?;
        }

        Ok(())
    }

    pub fn verify_version(&self) -> Result<(), StoreError> {
        let version_path = self.root.join(VERSION_FILE);
        let content = fs::read_to_string(&version_path)?;
        let ver: StoreVersion = serde_json::from_str(&content)?;

        if ver.format_version != STORE_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: STORE_FORMAT_VERSION,
                found: ver.format_version,
            });
        }
        Ok(())
    }
}
