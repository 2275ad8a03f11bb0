//! Newtype wrapper for snapshot content hashes, providing compile-time type safety.
//!
//! Serializes/deserializes as a plain string for on-disk compatibility.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

/// Blake3 hex digest identifying a content-addressed configuration snapshot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotHash(String);

impl SnapshotHash {
    /// Create a new instance from a string.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Return the inner string as a slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume self and return the inner `String`.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Deref for SnapshotHash {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SnapshotHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for SnapshotHash {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl From<String> for SnapshotHash {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SnapshotHash {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}
