//! Configuration document model for Palisade.
//!
//! This crate provides `ConfigDocument` — the immutable-once-handed-off,
//! hierarchical key-value snapshot addressed by dotted paths — along with
//! deep merge semantics, blake3 content hashing for change detection, a
//! structural diff, and the compiled-in default appliance configuration.

pub mod diff;
pub mod document;
pub mod types;

pub use diff::{diff_documents, DiffSummary};
pub use document::{default_document, ConfigDocument};
pub use types::SnapshotHash;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config path '{0}': empty segment")]
    InvalidPath(String),
    #[error("config root must be a JSON object")]
    NotAnObject,
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
