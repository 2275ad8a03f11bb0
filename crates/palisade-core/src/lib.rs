//! Apply/confirm/rollback engine for Palisade.
//!
//! This crate ties together the configuration document model, the snapshot
//! store, and the applier registry into the `ApplyEngine` — the state machine
//! that makes configuration changes safe to apply remotely. An applied
//! configuration must be confirmed within a bounded window or the engine
//! reverts to the pre-apply snapshot automatically, so an operator who locks
//! themselves out regains access without intervention.

pub mod concurrency;
pub mod engine;
pub mod phase;
pub mod status;

pub use concurrency::{install_signal_handler, shutdown_requested};
pub use engine::{ApplyEngine, ApplyReport, DEFAULT_CONFIRM_WINDOW};
pub use phase::validate_transition;
pub use status::{EngineStatus, SubtreeResult};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("an apply is already pending; confirm or roll it back first")]
    AlreadyPending,
    #[error("no apply is pending")]
    NothingPending,
    #[error("applier '{subtree}' failed: {detail}")]
    ApplierFailure { subtree: String, detail: String },
    #[error(
        "applied configuration is live but could not be persisted as running: {0}; \
         retry confirm or roll back"
    )]
    ConfirmPersistFailure(String),
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("store error: {0}")]
    Store(#[from] palisade_store::StoreError),
    #[error("config error: {0}")]
    Config(#[from] palisade_config::ConfigError),
    #[error("applier registry error: {0}")]
    Registry(#[from] palisade_appliers::ApplierError),
}
