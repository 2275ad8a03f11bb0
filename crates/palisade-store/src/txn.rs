use crate::layout::StoreLayout;
use crate::{fsync_dir, StoreError};
use palisade_config::SnapshotHash;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use tempfile::NamedTempFile;
use tracing::debug;

/// Phase of the apply state machine.
///
/// `Idle` is represented on disk by the absence of a marker; a persisted
/// marker always carries `Applying` or `PendingConfirm` so that a crash
/// inside the window is detected and rolled back on the next start.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Applying,
    PendingConfirm,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Applying => write!(f, "applying"),
            Phase::PendingConfirm => write!(f, "pending-confirm"),
        }
    }
}

/// Persisted record of an in-flight apply transaction.
///
/// Written before the first applier is touched and updated when the confirm
/// window opens. Cleared on confirm, rollback, or recovery. The snapshots
/// themselves live in the content-addressed object store; the marker only
/// references them by hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxnMarker {
    pub phase: Phase,
    pub started_at: String,
    /// Absolute confirm deadline (RFC 3339); present once the window is open.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    pub pre_apply: SnapshotHash,
    pub applied: SnapshotHash,
}

impl TxnMarker {
    pub fn begin(pre_apply: SnapshotHash, applied: SnapshotHash) -> Self {
        Self {
            phase: Phase::Applying,
            started_at: chrono::Utc::now().to_rfc3339(),
            deadline: None,
            pre_apply,
            applied,
        }
    }

    /// True if the marker carries a deadline that has already passed.
    pub fn deadline_expired(&self) -> bool {
        match &self.deadline {
            Some(raw) => chrono::DateTime::parse_from_rfc3339(raw)
                .map(|d| d <= chrono::Utc::now())
                .unwrap_or(true),
            None => false,
        }
    }
}

/// Durable storage for the transaction marker.
pub struct TxnStore {
    layout: StoreLayout,
}

impl TxnStore {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    /// Atomically persist the marker.
    pub fn save(&self, marker: &TxnMarker) -> Result<(), StoreError> {
        let dest = self.layout.txn_marker_path();
        let dir = self.layout.state_dir();
        fs::create_dir_all(&dir)?;
        let content = serde_json::to_string_pretty(marker)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&dir)?;
        debug!("persisted transaction marker (phase={})", marker.phase);
        Ok(())
    }

    /// Load the marker if one is present. A corrupt marker is treated as
    /// present-but-unreadable and surfaced as an error, never ignored.
    pub fn load(&self) -> Result<Option<TxnMarker>, StoreError> {
        let path = self.layout.txn_marker_path();
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Remove the marker. Idempotent.
    pub fn clear(&self) -> Result<(), StoreError> {
        let path = self.layout.txn_marker_path();
        if path.exists() {
            fs::remove_file(&path)?;
            fsync_dir(&self.layout.state_dir())?;
            debug!("cleared transaction marker");
        }
        Ok(())
    }
}
