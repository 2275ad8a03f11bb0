use crate::applier::Applier;
use crate::ApplierError;
use palisade_config::ConfigDocument;
use std::sync::{Arc, Mutex};

/// Shared view into a [`MockApplier`]'s recorded state, for assertions after
/// the applier has been boxed into a registry.
#[derive(Clone, Default)]
pub struct MockRecorder {
    inner: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    applied: Vec<ConfigDocument>,
    fail_next: Option<String>,
    fail_always: Option<String>,
}

impl MockRecorder {
    /// Documents materialized so far, in order.
    pub fn applied(&self) -> Vec<ConfigDocument> {
        self.inner.lock().map(|s| s.applied.clone()).unwrap_or_default()
    }

    pub fn apply_count(&self) -> usize {
        self.inner.lock().map(|s| s.applied.len()).unwrap_or(0)
    }

    /// The most recently materialized document, if any. This is the mock's
    /// notion of "live state" for equality assertions.
    pub fn live_state(&self) -> Option<ConfigDocument> {
        self.inner
            .lock()
            .ok()
            .and_then(|s| s.applied.last().cloned())
    }

    /// Make the next materialize call fail once with the given detail.
    pub fn fail_next(&self, detail: &str) {
        if let Ok(mut s) = self.inner.lock() {
            s.fail_next = Some(detail.to_owned());
        }
    }

    /// Make every materialize call fail until cleared.
    pub fn fail_always(&self, detail: &str) {
        if let Ok(mut s) = self.inner.lock() {
            s.fail_always = Some(detail.to_owned());
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut s) = self.inner.lock() {
            s.fail_next = None;
            s.fail_always = None;
        }
    }
}

/// Test applier that records every materialized document and supports
/// failure injection.
pub struct MockApplier {
    name: String,
    recorder: MockRecorder,
}

impl MockApplier {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            recorder: MockRecorder::default(),
        }
    }

    /// Handle for assertions and failure injection that remains usable after
    /// the applier is boxed.
    pub fn recorder(&self) -> MockRecorder {
        self.recorder.clone()
    }
}

impl Applier for MockApplier {
    fn name(&self) -> &str {
        &self.name
    }

    fn materialize(&self, subtree: &ConfigDocument) -> Result<(), ApplierError> {
        let mut state = self
            .recorder
            .inner
            .lock()
            .map_err(|e| ApplierError::Failed(format!("mutex poisoned: {e}")))?;
        if let Some(detail) = state.fail_next.take() {
            return Err(ApplierError::Failed(detail));
        }
        if let Some(detail) = state.fail_always.clone() {
            return Err(ApplierError::Failed(detail));
        }
        state.applied.push(subtree.clone());
        Ok(())
    }
}
