use crate::layout::StoreLayout;
use crate::{fsync_dir, StoreError};
use palisade_config::ConfigDocument;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use tempfile::NamedTempFile;
use tracing::warn;

/// The two mutable configuration slots.
///
/// `Running` is the last confirmed, live-materialized configuration and is
/// only ever written by the engine (promotion after confirm, or restore).
/// `Working` is the operator's draft and is written freely by the
/// presentation layer; it is never materialized directly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Slot {
    Running,
    Working,
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Slot::Running => write!(f, "running"),
            Slot::Working => write!(f, "working"),
        }
    }
}

/// Summary of one named backup, derived from the stored document.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BackupInfo {
    pub name: String,
    pub created_at: Option<String>,
    pub content_hash: String,
}

pub fn validate_backup_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() || name.len() > 64 {
        return Err(StoreError::InvalidName(
            "backup name must be 1-64 characters".to_owned(),
        ));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(StoreError::InvalidName(
            "backup name must match [a-zA-Z0-9_-]".to_owned(),
        ));
    }
    Ok(())
}

/// Durable store for the configuration slots and named backups.
///
/// All writes go through atomic temp-file-then-rename with fsync, so a crash
/// never leaves a torn document on disk.
pub struct SnapshotStore {
    layout: StoreLayout,
}

impl SnapshotStore {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    /// Load a slot. Fails with `NotFound` if no document has been saved;
    /// callers fall back to the compiled-in default document.
    pub fn load(&self, slot: Slot) -> Result<ConfigDocument, StoreError> {
        let path = self.layout.slot_path(slot);
        if !path.exists() {
            return Err(StoreError::NotFound(slot.to_string()));
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Durably write a slot. The document is stamped with the current time
    /// if it does not carry a creation timestamp yet.
    pub fn save(&self, slot: Slot, doc: &ConfigDocument) -> Result<(), StoreError> {
        let mut to_store = doc.clone();
        if to_store.created_at().is_none() {
            to_store.stamp();
        }
        self.write_atomic(&self.layout.slot_path(slot), &to_store)
    }

    /// Copy the current `running` document into a named backup slot.
    /// Fails with `DuplicateName` if the name is taken and `overwrite` is false.
    pub fn backup(&self, name: &str, overwrite: bool) -> Result<(), StoreError> {
        let running = self.load(Slot::Running)?;
        self.save_backup(name, &running, overwrite)
    }

    /// Write a document into a named backup slot.
    pub fn save_backup(
        &self,
        name: &str,
        doc: &ConfigDocument,
        overwrite: bool,
    ) -> Result<(), StoreError> {
        validate_backup_name(name)?;
        let dest = self.layout.backup_path(name);
        if dest.exists() && !overwrite {
            return Err(StoreError::DuplicateName(name.to_owned()));
        }
        self.write_atomic(&dest, doc)
    }

    /// Load a named backup document.
    pub fn load_backup(&self, name: &str) -> Result<ConfigDocument, StoreError> {
        validate_backup_name(name)?;
        let path = self.layout.backup_path(name);
        if !path.exists() {
            return Err(StoreError::BackupNotFound(name.to_owned()));
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn delete_backup(&self, name: &str) -> Result<(), StoreError> {
        validate_backup_name(name)?;
        let path = self.layout.backup_path(name);
        if !path.exists() {
            return Err(StoreError::BackupNotFound(name.to_owned()));
        }
        fs::remove_file(path)?;
        Ok(())
    }

    /// List all backups, sorted by name. Corrupt entries are skipped with a
    /// warning rather than failing the whole listing.
    pub fn list_backups(&self) -> Result<Vec<BackupInfo>, StoreError> {
        let dir = self.layout.backups_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(name) = file_name
                .to_str()
                .and_then(|n| n.strip_suffix(".json"))
                .map(str::to_owned)
            else {
                continue;
            };
            match self.load_backup(&name) {
                Ok(doc) => results.push(BackupInfo {
                    name,
                    created_at: doc.created_at().map(str::to_owned),
                    content_hash: doc.content_hash(),
                }),
                Err(e) => {
                    warn!("skipping corrupted backup '{name}': {e}");
                }
            }
        }
        results.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(results)
    }

    fn write_atomic(
        &self,
        dest: &std::path::Path,
        doc: &ConfigDocument,
    ) -> Result<(), StoreError> {
        let dir = dest
            .parent()
            .ok_or_else(|| StoreError::NotFound(dest.display().to_string()))?;
        fs::create_dir_all(dir)?;
        let content = serde_json::to_string_pretty(doc)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(dir)?;
        Ok(())
    }
}
