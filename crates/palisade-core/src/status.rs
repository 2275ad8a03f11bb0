use palisade_config::DiffSummary;
use palisade_store::Phase;
use serde::Serialize;

/// Outcome of one applier invocation during the most recent apply, rollback,
/// or restore.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SubtreeResult {
    pub subtree: String,
    pub ok: bool,
    pub detail: String,
}

impl SubtreeResult {
    pub fn ok(subtree: &str) -> Self {
        Self {
            subtree: subtree.to_owned(),
            ok: true,
            detail: String::new(),
        }
    }

    pub fn failed(subtree: &str, detail: &str) -> Self {
        Self {
            subtree: subtree.to_owned(),
            ok: false,
            detail: detail.to_owned(),
        }
    }
}

/// Read-only projection of engine state for the presentation layer.
///
/// Computed under the engine lock and returned by value; holding one of
/// these never blocks the engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub phase: Phase,
    /// Whole seconds until the confirm deadline; present only while a
    /// confirm window is open. Clamped at zero.
    pub deadline_seconds_remaining: Option<i64>,
    /// Structural diff between the working draft and the running config.
    pub working_vs_running: DiffSummary,
    /// Diff between the applied candidate and the pre-apply snapshot, while
    /// a transaction is in flight.
    pub pending_vs_snapshot: Option<DiffSummary>,
    /// Per-subtree outcomes of the most recent materialization pass.
    pub last_results: Vec<SubtreeResult>,
}
