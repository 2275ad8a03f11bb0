//! Applier capability boundary for Palisade.
//!
//! The engine materializes a configuration by handing each top-level subtree
//! to a registered `Applier` in a fixed dependency order. Concrete appliers
//! (packet-filter programming, interface configuration, proxy reloads) live
//! outside the core; this crate defines the contract, the statically built
//! `ApplierRegistry`, a `MockApplier` for tests, and a `CommandApplier` that
//! shells out to an external tool under a hard timeout.

pub mod applier;
pub mod command;
pub mod mock;

pub use applier::{Applier, ApplierRegistry, APPLY_ORDER};
pub use command::CommandApplier;
pub use mock::MockApplier;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApplierError {
    #[error("materialization failed: {0}")]
    Failed(String),
    #[error("applier did not complete within {0} seconds")]
    Timeout(u64),
    #[error("unknown subtree '{0}': not in the fixed apply order")]
    UnknownSubtree(String),
    #[error("subtree '{0}' is already registered")]
    AlreadyRegistered(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
