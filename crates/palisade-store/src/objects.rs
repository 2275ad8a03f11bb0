use crate::layout::StoreLayout;
use crate::{fsync_dir, StoreError};
use palisade_config::{ConfigDocument, SnapshotHash};
use std::fs;
use std::io::Write;
use tempfile::NamedTempFile;

/// Content-addressed store for immutable configuration snapshots.
///
/// Pre-apply snapshots live here, named by the blake3 content hash of the
/// document tree. Writes are atomic via `NamedTempFile`, and reads verify
/// integrity by recomputing the hash.
pub struct SnapshotObjects {
    layout: StoreLayout,
}

impl SnapshotObjects {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    /// Store a snapshot and return its content hash. Idempotent — existing
    /// snapshots are skipped.
    pub fn put(&self, doc: &ConfigDocument) -> Result<SnapshotHash, StoreError> {
        let hash = SnapshotHash::new(doc.content_hash());
        let dir = self.layout.objects_dir();
        let dest = dir.join(hash.as_str());

        if dest.exists() {
            return Ok(hash);
        }

        let content = serde_json::to_string_pretty(doc)?;
        fs::create_dir_all(&dir)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&dir)?;

        Ok(hash)
    }

    /// Retrieve a snapshot by hash, verifying integrity on read.
    pub fn get(&self, hash: &SnapshotHash) -> Result<ConfigDocument, StoreError> {
        let path = self.layout.objects_dir().join(hash.as_str());
        if !path.exists() {
            return Err(StoreError::SnapshotNotFound(hash.to_string()));
        }
        let content = fs::read_to_string(&path)?;
        let doc: ConfigDocument = serde_json::from_str(&content)?;

        let actual = doc.content_hash();
        if actual != hash.as_str() {
            return Err(StoreError::IntegrityFailure {
                hash: hash.to_string(),
                actual,
            });
        }

        Ok(doc)
    }

    pub fn exists(&self, hash: &SnapshotHash) -> bool {
        self.layout.objects_dir().join(hash.as_str()).exists()
    }

    pub fn remove(&self, hash: &SnapshotHash) -> Result<(), StoreError> {
        let path = self.layout.objects_dir().join(hash.as_str());
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}
