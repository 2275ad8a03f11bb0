use crate::phase::validate_transition;
use crate::status::{EngineStatus, SubtreeResult};
use crate::CoreError;
use chrono::{DateTime, Utc};
use palisade_appliers::ApplierRegistry;
use palisade_config::{default_document, diff_documents, ConfigDocument, SnapshotHash};
use palisade_store::{
    Phase, Slot, SnapshotObjects, SnapshotStore, StoreError, StoreLayout, StoreLock, TxnMarker,
    TxnStore,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default confirm window: an unconfirmed apply is reverted after this long.
pub const DEFAULT_CONFIRM_WINDOW: Duration = Duration::from_secs(60);

/// Result of a successful apply: the confirm window is open.
#[derive(Debug, Clone)]
pub struct ApplyReport {
    pub results: Vec<SubtreeResult>,
    /// Absolute confirm deadline, RFC 3339.
    pub deadline: String,
    pub window_seconds: u64,
}

/// In-flight transaction state. Exists only while phase is `Applying` or
/// `PendingConfirm`; `Idle` is the absence of a transaction.
struct ActiveTxn {
    id: u64,
    phase: Phase,
    applied: ConfigDocument,
    pre_apply: ConfigDocument,
    deadline: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct EngineState {
    txn: Option<ActiveTxn>,
    next_txn_id: u64,
    last_results: Vec<SubtreeResult>,
}

struct EngineInner {
    layout: StoreLayout,
    snapshots: SnapshotStore,
    objects: SnapshotObjects,
    txn_store: TxnStore,
    registry: ApplierRegistry,
    confirm_window: Duration,
    /// Serializes apply/confirm/rollback/restore end to end, including the
    /// (possibly slow) materialization calls.
    gate: Mutex<()>,
    /// Transaction bookkeeping; held only briefly so `status()` stays
    /// responsive while appliers run.
    state: Mutex<EngineState>,
}

/// The commit-confirmed apply engine.
///
/// Coordinates the snapshot store and the applier registry through the
/// `Idle → Applying → PendingConfirm` state machine. At most one transaction
/// is in flight; a second `apply()` is rejected, never queued. Once the
/// confirm window opens, a deadline timer reverts the live system to the
/// pre-apply snapshot unless `confirm()` arrives first.
///
/// On construction, a persisted transaction marker left by a dead process is
/// rolled back before any operation is accepted: a deadline cannot be
/// trusted across a restart, and the engine never auto-confirms. A marker
/// whose owner still holds the store lock belongs to a live confirm window
/// and is left alone.
pub struct ApplyEngine {
    inner: Arc<EngineInner>,
}

impl ApplyEngine {
    /// Create an engine rooted at the given store directory with the default
    /// confirm window.
    pub fn new(
        store_root: impl Into<PathBuf>,
        registry: ApplierRegistry,
    ) -> Result<Self, CoreError> {
        Self::with_confirm_window(store_root, registry, DEFAULT_CONFIRM_WINDOW)
    }

    pub fn with_confirm_window(
        store_root: impl Into<PathBuf>,
        registry: ApplierRegistry,
        confirm_window: Duration,
    ) -> Result<Self, CoreError> {
        let layout = StoreLayout::new(store_root.into());
        layout.initialize()?;

        let inner = Arc::new(EngineInner {
            snapshots: SnapshotStore::new(layout.clone()),
            objects: SnapshotObjects::new(layout.clone()),
            txn_store: TxnStore::new(layout.clone()),
            layout,
            registry,
            confirm_window,
            gate: Mutex::new(()),
            state: Mutex::new(EngineState::default()),
        });

        // Recover only when no live process owns the store. An open confirm
        // window is governed by its owner's in-process timer, and the owner
        // holds the store lock for as long as it runs; a free lock with a
        // marker present means the owner died inside the window.
        match StoreLock::try_acquire(&inner.layout.lock_file())? {
            Some(_guard) => inner.recover()?,
            None => debug!("store lock held by a live process, skipping recovery"),
        }

        Ok(Self { inner })
    }

    pub fn store_layout(&self) -> &StoreLayout {
        &self.inner.layout
    }

    /// Apply the working configuration with the engine's confirm window.
    pub fn apply(&self) -> Result<ApplyReport, CoreError> {
        self.apply_with_window(self.inner.confirm_window)
    }

    /// Apply the working configuration, opening a confirm window of the
    /// given duration on success.
    ///
    /// Fails with `AlreadyPending` if a transaction is in flight, and with
    /// `ApplierFailure` if any applier rejects its subtree — in that case
    /// every touched applier is re-materialized from the pre-apply snapshot
    /// and no confirm window is granted.
    pub fn apply_with_window(&self, window: Duration) -> Result<ApplyReport, CoreError> {
        let inner = &self.inner;
        let _gate = lock(&inner.gate);

        {
            let state = lock(&inner.state);
            if state.txn.is_some() {
                return Err(CoreError::AlreadyPending);
            }
        }
        validate_transition(Phase::Idle, Phase::Applying)?;

        let working = inner.load_or_default(Slot::Working)?;
        let running = inner.load_or_default(Slot::Running)?;

        // Snapshot both sides and persist the marker before the first
        // applier is touched, so a crash mid-materialization is recoverable.
        let pre_hash = inner.objects.put(&running)?;
        let applied_hash = inner.objects.put(&working)?;
        let mut marker = TxnMarker::begin(pre_hash, applied_hash);
        inner.txn_store.save(&marker)?;

        let txn_id = {
            let mut state = lock(&inner.state);
            state.next_txn_id += 1;
            state.txn = Some(ActiveTxn {
                id: state.next_txn_id,
                phase: Phase::Applying,
                applied: working.clone(),
                pre_apply: running.clone(),
                deadline: None,
            });
            state.next_txn_id
        };

        info!(
            "applying working configuration ({} registered subtrees)",
            inner.registry.ordered_names().len()
        );

        match inner.materialize_ordered(&working) {
            Err((touched, subtree, detail)) => {
                warn!(
                    "applier '{subtree}' failed, reverting {} touched subtree(s): {detail}",
                    touched.len()
                );
                let mut results: Vec<SubtreeResult> = touched
                    .iter()
                    .filter(|name| **name != subtree)
                    .map(|name| SubtreeResult::ok(name))
                    .collect();
                results.push(SubtreeResult::failed(&subtree, &detail));

                inner.revert_materialize(&running, &touched);
                inner.txn_store.clear()?;
                {
                    let mut state = lock(&inner.state);
                    state.txn = None;
                    state.last_results = results;
                }
                inner.prune_objects(&[marker.pre_apply, marker.applied]);
                Err(CoreError::ApplierFailure { subtree, detail })
            }
            Ok(results) => {
                validate_transition(Phase::Applying, Phase::PendingConfirm)?;
                let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
                let deadline = Utc::now() + chrono::Duration::milliseconds(window_ms);

                marker.phase = Phase::PendingConfirm;
                marker.deadline = Some(deadline.to_rfc3339());
                inner.txn_store.save(&marker)?;

                {
                    let mut state = lock(&inner.state);
                    if let Some(txn) = state.txn.as_mut() {
                        txn.phase = Phase::PendingConfirm;
                        txn.deadline = Some(deadline);
                    }
                    state.last_results = results.clone();
                }

                let timer_inner = Arc::clone(inner);
                std::thread::spawn(move || {
                    std::thread::sleep(window);
                    timer_inner.expire(txn_id);
                });

                info!(
                    "confirm window open for {}s (deadline {})",
                    window.as_secs(),
                    deadline.to_rfc3339()
                );
                Ok(ApplyReport {
                    results,
                    deadline: deadline.to_rfc3339(),
                    window_seconds: window.as_secs(),
                })
            }
        }
    }

    /// Promote the applied configuration to `running`.
    ///
    /// The only path that durably persists a new running configuration. A
    /// store failure here is reported as `ConfirmPersistFailure` — the live
    /// system already reflects the new configuration but disk does not, and
    /// the transaction stays pending so the operator can retry or roll back.
    pub fn confirm(&self) -> Result<(), CoreError> {
        let inner = &self.inner;
        let _gate = lock(&inner.gate);

        let (pre_apply, applied) = {
            let state = lock(&inner.state);
            match &state.txn {
                Some(txn) if txn.phase == Phase::PendingConfirm => {
                    (txn.pre_apply.clone(), txn.applied.clone())
                }
                _ => return Err(CoreError::NothingPending),
            }
        };
        validate_transition(Phase::PendingConfirm, Phase::Idle)?;

        if let Err(e) = inner.snapshots.save(Slot::Running, &applied) {
            return Err(CoreError::ConfirmPersistFailure(e.to_string()));
        }
        inner.txn_store.clear()?;
        {
            let mut state = lock(&inner.state);
            state.txn = None;
        }
        inner.prune_objects(&[
            SnapshotHash::new(pre_apply.content_hash()),
            SnapshotHash::new(applied.content_hash()),
        ]);
        info!("configuration confirmed, promoted to running");
        Ok(())
    }

    /// Revert the live system to the pre-apply snapshot and close the
    /// transaction. `running` is left untouched — nothing was promoted.
    pub fn rollback(&self) -> Result<(), CoreError> {
        let _gate = lock(&self.inner.gate);
        self.inner.rollback_locked()
    }

    /// Read-only projection of engine state. Never mutates anything; safe to
    /// call from any thread, including while an apply is materializing.
    pub fn status(&self) -> Result<EngineStatus, CoreError> {
        let inner = &self.inner;
        let (phase, remaining, pending_diff, last_results) = {
            let state = lock(&inner.state);
            match &state.txn {
                Some(txn) => (
                    txn.phase,
                    txn.deadline
                        .map(|d| (d - Utc::now()).num_seconds().max(0)),
                    Some(diff_documents(&txn.pre_apply, &txn.applied)),
                    state.last_results.clone(),
                ),
                None => (Phase::Idle, None, None, state.last_results.clone()),
            }
        };

        let working = inner.load_or_default(Slot::Working)?;
        let running = inner.load_or_default(Slot::Running)?;

        Ok(EngineStatus {
            phase,
            deadline_seconds_remaining: remaining,
            working_vs_running: diff_documents(&running, &working),
            pending_vs_snapshot: pending_diff,
            last_results,
        })
    }

    /// The operator's draft configuration (compiled-in default if none saved).
    pub fn working(&self) -> Result<ConfigDocument, CoreError> {
        self.inner.load_or_default(Slot::Working)
    }

    /// The last confirmed configuration (compiled-in default if none saved).
    pub fn running(&self) -> Result<ConfigDocument, CoreError> {
        self.inner.load_or_default(Slot::Running)
    }

    pub fn save_working(&self, doc: &ConfigDocument) -> Result<(), CoreError> {
        Ok(self.inner.snapshots.save(Slot::Working, doc)?)
    }

    /// Deep-merge a patch into the working draft and persist it.
    pub fn update_working(&self, patch: &ConfigDocument) -> Result<ConfigDocument, CoreError> {
        let mut working = self.working()?;
        working.merge(patch);
        self.save_working(&working)?;
        Ok(working)
    }

    pub fn backup(&self, name: &str, overwrite: bool) -> Result<(), CoreError> {
        info!("backing up running configuration as '{name}'");
        let running = self.inner.load_or_default(Slot::Running)?;
        Ok(self.inner.snapshots.save_backup(name, &running, overwrite)?)
    }

    pub fn list_backups(&self) -> Result<Vec<palisade_store::BackupInfo>, CoreError> {
        Ok(self.inner.snapshots.list_backups()?)
    }

    pub fn delete_backup(&self, name: &str) -> Result<(), CoreError> {
        Ok(self.inner.snapshots.delete_backup(name)?)
    }

    /// Materialize a named backup and promote it to `running` directly.
    ///
    /// Explicit operator-initiated disaster recovery: no confirm window. The
    /// backup still goes through the applier registry, and a rejected backup
    /// leaves `running` untouched.
    pub fn restore(&self, name: &str) -> Result<(), CoreError> {
        let inner = &self.inner;
        let _gate = lock(&inner.gate);

        {
            let state = lock(&inner.state);
            if state.txn.is_some() {
                return Err(CoreError::AlreadyPending);
            }
        }

        let doc = inner.snapshots.load_backup(name)?;
        info!("restoring backup '{name}'");

        match inner.materialize_ordered(&doc) {
            Err((touched, subtree, detail)) => {
                warn!("restore of '{name}' failed in applier '{subtree}', reverting");
                let running = inner.load_or_default(Slot::Running)?;
                inner.revert_materialize(&running, &touched);
                Err(CoreError::ApplierFailure { subtree, detail })
            }
            Ok(results) => {
                inner.snapshots.save(Slot::Running, &doc)?;
                let mut state = lock(&inner.state);
                state.last_results = results;
                Ok(())
            }
        }
    }
}

impl EngineInner {
    /// Roll back any transaction left behind by a previous process.
    ///
    /// A marker in `Applying` or `PendingConfirm` means the last run crashed
    /// inside the window. The deadline is not trusted across a restart: the
    /// pre-apply snapshot is re-materialized unconditionally and the marker
    /// cleared. `running` was never promoted, so it is already correct.
    fn recover(&self) -> Result<(), CoreError> {
        let Some(marker) = self.txn_store.load()? else {
            return Ok(());
        };

        info!(
            "recovering unconfirmed transaction from {} (phase {}, deadline expired: {})",
            marker.started_at,
            marker.phase,
            marker.deadline_expired()
        );

        let snapshot = match self.objects.get(&marker.pre_apply) {
            Ok(doc) => doc,
            Err(e) => {
                warn!("pre-apply snapshot unavailable ({e}), falling back to running slot");
                self.load_or_default(Slot::Running)?
            }
        };

        let names = self.registry.ordered_names();
        let results = self.revert_materialize(&snapshot, &names);
        self.txn_store.clear()?;
        self.prune_objects(&[marker.pre_apply, marker.applied]);
        {
            let mut state = lock(&self.state);
            state.last_results = results;
        }
        info!("recovery complete, engine is idle");
        Ok(())
    }

    fn load_or_default(&self, slot: Slot) -> Result<ConfigDocument, CoreError> {
        match self.snapshots.load(slot) {
            Ok(doc) => Ok(doc),
            Err(StoreError::NotFound(_)) => Ok(default_document()),
            Err(e) => Err(e.into()),
        }
    }

    /// Invoke each registered applier in the fixed order with its subtree.
    /// On failure, returns the touched prefix (including the failing
    /// subtree) so the caller can revert exactly what was reached.
    #[allow(clippy::type_complexity)]
    fn materialize_ordered(
        &self,
        doc: &ConfigDocument,
    ) -> Result<Vec<SubtreeResult>, (Vec<&'static str>, String, String)> {
        let mut results = Vec::new();
        let mut touched = Vec::new();
        for (name, applier) in self.registry.ordered() {
            touched.push(name);
            match applier.materialize(&doc.subtree(name)) {
                Ok(()) => {
                    debug!("materialized subtree '{name}'");
                    results.push(SubtreeResult::ok(name));
                }
                Err(e) => return Err((touched, name.to_owned(), e.to_string())),
            }
        }
        Ok(results)
    }

    /// Re-materialize the given subtrees from a snapshot. Best-effort: a
    /// failure here is logged and the remaining appliers still get the
    /// snapshot back.
    fn revert_materialize(
        &self,
        snapshot: &ConfigDocument,
        names: &[&'static str],
    ) -> Vec<SubtreeResult> {
        let mut results = Vec::new();
        for name in names {
            let Some(applier) = self.registry.get(name) else {
                continue;
            };
            match applier.materialize(&snapshot.subtree(name)) {
                Ok(()) => results.push(SubtreeResult::ok(name)),
                Err(e) => {
                    warn!("rollback materialization of '{name}' failed: {e}");
                    results.push(SubtreeResult::failed(name, &e.to_string()));
                }
            }
        }
        results
    }

    /// Drop the content-addressed snapshot objects once the transaction that
    /// referenced them is closed. Best-effort: a leftover object is garbage,
    /// not corruption.
    fn prune_objects(&self, hashes: &[SnapshotHash]) {
        for hash in hashes {
            if let Err(e) = self.objects.remove(hash) {
                warn!("failed to prune snapshot object {hash}: {e}");
            }
        }
    }

    fn rollback_locked(&self) -> Result<(), CoreError> {
        let (pre_apply, applied) = {
            let state = lock(&self.state);
            match &state.txn {
                Some(txn) => (txn.pre_apply.clone(), txn.applied.clone()),
                None => return Err(CoreError::NothingPending),
            }
        };

        let names = self.registry.ordered_names();
        let results = self.revert_materialize(&pre_apply, &names);
        self.txn_store.clear()?;
        {
            let mut state = lock(&self.state);
            state.txn = None;
            state.last_results = results;
        }
        self.prune_objects(&[
            SnapshotHash::new(pre_apply.content_hash()),
            SnapshotHash::new(applied.content_hash()),
        ]);
        info!("rolled back to pre-apply snapshot");
        Ok(())
    }

    /// Deadline timer callback. Re-checks the transaction under the lock —
    /// a confirm or explicit rollback that won the race makes this a no-op.
    fn expire(&self, txn_id: u64) {
        let _gate = lock(&self.gate);

        let still_pending = {
            let state = lock(&self.state);
            state
                .txn
                .as_ref()
                .is_some_and(|t| t.id == txn_id && t.phase == Phase::PendingConfirm)
        };
        if !still_pending {
            debug!("confirm timer for transaction {txn_id} fired after completion; no-op");
            return;
        }

        info!("confirm window expired for transaction {txn_id}, auto-reverting");
        if let Err(e) = self.rollback_locked() {
            warn!("auto-rollback failed: {e}");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_appliers::{MockApplier, APPLY_ORDER};
    use serde_json::json;
    use std::collections::HashMap;

    struct Recorders(HashMap<&'static str, palisade_appliers::mock::MockRecorder>);

    impl Recorders {
        fn get(&self, name: &str) -> &palisade_appliers::mock::MockRecorder {
            &self.0[name]
        }
    }

    fn mock_registry() -> (ApplierRegistry, Recorders) {
        let mut registry = ApplierRegistry::new();
        let mut recorders = HashMap::new();
        for name in APPLY_ORDER {
            let applier = MockApplier::new(name);
            recorders.insert(name, applier.recorder());
            registry.register(name, Box::new(applier)).unwrap();
        }
        (registry, Recorders(recorders))
    }

    fn test_engine(window: Duration) -> (tempfile::TempDir, ApplyEngine, Recorders) {
        let dir = tempfile::tempdir().unwrap();
        let (registry, recorders) = mock_registry();
        let engine =
            ApplyEngine::with_confirm_window(dir.path(), registry, window).unwrap();
        (dir, engine, recorders)
    }

    fn long_window() -> Duration {
        Duration::from_secs(60)
    }

    fn doc(v: serde_json::Value) -> ConfigDocument {
        ConfigDocument::from_value(v).unwrap()
    }

    fn accept_doc() -> ConfigDocument {
        doc(json!({"firewall": {"default_policy": "accept"}}))
    }

    fn drop_doc() -> ConfigDocument {
        doc(json!({"firewall": {"default_policy": "drop"}}))
    }

    #[test]
    fn apply_opens_confirm_window() {
        let (_dir, engine, _recorders) = test_engine(long_window());
        engine.save_working(&drop_doc()).unwrap();

        let report = engine.apply().unwrap();
        assert_eq!(report.results.len(), APPLY_ORDER.len());
        assert!(report.results.iter().all(|r| r.ok));

        let status = engine.status().unwrap();
        assert_eq!(status.phase, Phase::PendingConfirm);
        let remaining = status.deadline_seconds_remaining.unwrap();
        assert!(remaining > 50 && remaining <= 60, "remaining={remaining}");
    }

    #[test]
    fn single_flight_second_apply_rejected() {
        let (_dir, engine, _recorders) = test_engine(long_window());
        engine.save_working(&drop_doc()).unwrap();
        engine.apply().unwrap();

        assert!(matches!(engine.apply(), Err(CoreError::AlreadyPending)));

        engine.rollback().unwrap();
        engine.apply().unwrap();
    }

    #[test]
    fn confirm_promotes_exactly_once() {
        let (_dir, engine, _recorders) = test_engine(long_window());
        engine.save_working(&drop_doc()).unwrap();

        engine.apply().unwrap();
        engine.confirm().unwrap();

        assert_eq!(engine.running().unwrap(), drop_doc());
        assert_eq!(engine.working().unwrap(), drop_doc(), "working unchanged");
        assert_eq!(engine.status().unwrap().phase, Phase::Idle);
        assert!(matches!(engine.confirm(), Err(CoreError::NothingPending)));
    }

    #[test]
    fn rollback_leaves_running_untouched() {
        let (_dir, engine, recorders) = test_engine(long_window());
        // Establish a confirmed running config first
        engine.save_working(&accept_doc()).unwrap();
        engine.apply().unwrap();
        engine.confirm().unwrap();

        engine.save_working(&drop_doc()).unwrap();
        engine.apply().unwrap();
        engine.rollback().unwrap();

        assert_eq!(engine.running().unwrap(), accept_doc());
        assert_eq!(engine.status().unwrap().phase, Phase::Idle);
        // Live state reverted to the pre-apply snapshot's firewall subtree
        assert_eq!(
            recorders.get("firewall").live_state().unwrap(),
            accept_doc().subtree("firewall")
        );
    }

    #[test]
    fn rollback_without_pending_fails() {
        let (_dir, engine, _recorders) = test_engine(long_window());
        assert!(matches!(engine.rollback(), Err(CoreError::NothingPending)));
    }

    #[test]
    fn fail_closed_at_every_position() {
        for fail_at in APPLY_ORDER {
            let (_dir, engine, recorders) = test_engine(long_window());
            engine.save_working(&accept_doc()).unwrap();
            engine.apply().unwrap();
            engine.confirm().unwrap();
            let pre = engine.running().unwrap();

            engine.save_working(&drop_doc()).unwrap();
            recorders.get(fail_at).fail_next("injected failure");

            let err = engine.apply().unwrap_err();
            match err {
                CoreError::ApplierFailure { subtree, detail } => {
                    assert_eq!(subtree, fail_at);
                    assert!(detail.contains("injected failure"));
                }
                other => panic!("expected ApplierFailure, got {other}"),
            }

            let status = engine.status().unwrap();
            assert_eq!(status.phase, Phase::Idle, "fail_at={fail_at}");
            assert_eq!(engine.running().unwrap(), pre, "fail_at={fail_at}");
            // Touched appliers got the pre-apply snapshot back
            let touched: Vec<_> = APPLY_ORDER
                .iter()
                .take_while(|n| **n != fail_at)
                .chain(std::iter::once(&fail_at))
                .collect();
            for name in touched {
                if let Some(live) = recorders.get(name).live_state() {
                    assert_eq!(live, pre.subtree(name), "fail_at={fail_at} name={name}");
                }
            }
        }
    }

    #[test]
    fn failed_apply_records_failing_result() {
        let (_dir, engine, recorders) = test_engine(long_window());
        engine.save_working(&drop_doc()).unwrap();
        recorders.get("nat").fail_next("boom");

        assert!(engine.apply().is_err());
        let status = engine.status().unwrap();
        let nat = status
            .last_results
            .iter()
            .find(|r| r.subtree == "nat")
            .unwrap();
        assert!(!nat.ok);
        assert!(nat.detail.contains("boom"));
    }

    #[test]
    fn timeout_equals_explicit_rollback() {
        // Explicit rollback path
        let (_dir_a, engine_a, rec_a) = test_engine(long_window());
        engine_a.save_working(&accept_doc()).unwrap();
        engine_a.apply().unwrap();
        engine_a.confirm().unwrap();
        engine_a.save_working(&drop_doc()).unwrap();
        engine_a.apply().unwrap();
        engine_a.rollback().unwrap();

        // Timeout path, same documents
        let (_dir_b, engine_b, rec_b) = test_engine(long_window());
        engine_b.save_working(&accept_doc()).unwrap();
        engine_b.apply().unwrap();
        engine_b.confirm().unwrap();
        engine_b.save_working(&drop_doc()).unwrap();
        engine_b
            .apply_with_window(Duration::from_millis(100))
            .unwrap();
        std::thread::sleep(Duration::from_millis(500));

        assert_eq!(engine_b.status().unwrap().phase, Phase::Idle);
        assert_eq!(engine_a.running().unwrap(), engine_b.running().unwrap());
        assert_eq!(
            rec_a.get("firewall").live_state(),
            rec_b.get("firewall").live_state()
        );
    }

    #[test]
    fn confirm_wins_race_against_timer() {
        let (_dir, engine, _recorders) = test_engine(Duration::from_millis(500));
        engine.save_working(&drop_doc()).unwrap();
        engine.apply().unwrap();
        engine.confirm().unwrap();

        std::thread::sleep(Duration::from_millis(900));

        // The stale timer must not have reverted the confirmed config
        assert_eq!(engine.running().unwrap(), drop_doc());
        assert_eq!(engine.status().unwrap().phase, Phase::Idle);
    }

    #[test]
    fn marker_persisted_while_pending() {
        let (dir, engine, _recorders) = test_engine(long_window());
        engine.save_working(&drop_doc()).unwrap();
        engine.apply().unwrap();

        let txn_store = TxnStore::new(StoreLayout::new(dir.path()));
        let marker = txn_store.load().unwrap().unwrap();
        assert_eq!(marker.phase, Phase::PendingConfirm);
        assert!(marker.deadline.is_some());

        engine.confirm().unwrap();
        assert!(txn_store.load().unwrap().is_none());
    }

    #[test]
    fn crash_recovery_rolls_back_pending_marker() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();

        // Simulate a crash mid-window: running is the old config, marker says
        // PendingConfirm with an unexpired deadline.
        let snapshots = SnapshotStore::new(layout.clone());
        snapshots.save(Slot::Running, &accept_doc()).unwrap();
        snapshots.save(Slot::Working, &drop_doc()).unwrap();
        let objects = SnapshotObjects::new(layout.clone());
        let pre_hash = objects.put(&accept_doc()).unwrap();
        let applied_hash = objects.put(&drop_doc()).unwrap();
        let mut marker = TxnMarker::begin(pre_hash, applied_hash);
        marker.phase = Phase::PendingConfirm;
        marker.deadline =
            Some((Utc::now() + chrono::Duration::seconds(300)).to_rfc3339());
        TxnStore::new(layout.clone()).save(&marker).unwrap();

        let (registry, recorders) = mock_registry();
        let engine = ApplyEngine::new(dir.path(), registry).unwrap();

        assert_eq!(engine.status().unwrap().phase, Phase::Idle);
        assert_eq!(engine.running().unwrap(), accept_doc(), "never auto-confirms");
        assert!(TxnStore::new(layout).load().unwrap().is_none());
        // Recovery re-materialized the pre-apply snapshot
        assert_eq!(
            recorders.get("firewall").live_state().unwrap(),
            accept_doc().subtree("firewall")
        );
        // ...and pruned the orphaned snapshot objects
        assert!(!objects.exists(&SnapshotHash::new(accept_doc().content_hash())));
    }

    #[test]
    fn construction_defers_to_a_live_window_owner() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, recorders) = mock_registry();
        let engine =
            ApplyEngine::with_confirm_window(dir.path(), registry, long_window()).unwrap();
        engine.save_working(&accept_doc()).unwrap();
        engine.apply().unwrap();
        engine.confirm().unwrap();

        engine.save_working(&drop_doc()).unwrap();
        engine.apply().unwrap();

        // A window owner holds the store lock for as long as it runs. While
        // it does, a second process must leave the window alone.
        let layout = StoreLayout::new(dir.path());
        let _owner = StoreLock::acquire(&layout.lock_file()).unwrap();
        let (registry2, _rec2) = mock_registry();
        let peer = ApplyEngine::new(dir.path(), registry2).unwrap();
        assert_eq!(peer.status().unwrap().phase, Phase::Idle);

        assert!(
            TxnStore::new(layout).load().unwrap().is_some(),
            "marker must survive a peer's construction"
        );
        assert_eq!(
            recorders.get("firewall").live_state().unwrap(),
            drop_doc().subtree("firewall"),
            "live state must not be reverted out from under the owner"
        );

        // The owner's window is still intact and confirmable
        engine.confirm().unwrap();
        assert_eq!(engine.running().unwrap(), drop_doc());
    }

    #[test]
    fn snapshot_objects_pruned_when_transaction_closes() {
        let (dir, engine, recorders) = test_engine(long_window());
        let objects_dir = StoreLayout::new(dir.path()).objects_dir();
        let object_count = || std::fs::read_dir(&objects_dir).unwrap().count();

        // confirm path
        engine.save_working(&drop_doc()).unwrap();
        engine.apply().unwrap();
        assert!(object_count() > 0, "pending txn references its snapshots");
        engine.confirm().unwrap();
        assert_eq!(object_count(), 0);

        // rollback path
        engine.save_working(&accept_doc()).unwrap();
        engine.apply().unwrap();
        engine.rollback().unwrap();
        assert_eq!(object_count(), 0);

        // failed-apply path
        recorders.get("vpn").fail_next("boom");
        assert!(engine.apply().is_err());
        assert_eq!(object_count(), 0);
    }

    #[test]
    fn crash_recovery_with_expired_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();

        let snapshots = SnapshotStore::new(layout.clone());
        snapshots.save(Slot::Running, &accept_doc()).unwrap();
        let objects = SnapshotObjects::new(layout.clone());
        let pre_hash = objects.put(&accept_doc()).unwrap();
        let mut marker = TxnMarker::begin(pre_hash, SnapshotHash::new("unused"));
        marker.phase = Phase::PendingConfirm;
        marker.deadline =
            Some((Utc::now() - chrono::Duration::seconds(300)).to_rfc3339());
        TxnStore::new(layout.clone()).save(&marker).unwrap();

        let (registry, _recorders) = mock_registry();
        let engine = ApplyEngine::new(dir.path(), registry).unwrap();
        assert_eq!(engine.status().unwrap().phase, Phase::Idle);
        assert_eq!(engine.running().unwrap(), accept_doc());
    }

    #[test]
    fn crash_recovery_falls_back_to_running_slot() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();

        let snapshots = SnapshotStore::new(layout.clone());
        snapshots.save(Slot::Running, &accept_doc()).unwrap();
        // Marker references a snapshot object that was never written
        let mut marker =
            TxnMarker::begin(SnapshotHash::new("missing"), SnapshotHash::new("missing"));
        marker.phase = Phase::PendingConfirm;
        TxnStore::new(layout).save(&marker).unwrap();

        let (registry, recorders) = mock_registry();
        let engine = ApplyEngine::new(dir.path(), registry).unwrap();
        assert_eq!(engine.status().unwrap().phase, Phase::Idle);
        assert_eq!(
            recorders.get("firewall").live_state().unwrap(),
            accept_doc().subtree("firewall")
        );
    }

    #[test]
    fn backup_restore_roundtrip() {
        let (_dir, engine, _recorders) = test_engine(long_window());
        engine.save_working(&accept_doc()).unwrap();
        engine.apply().unwrap();
        engine.confirm().unwrap();

        engine.backup("x", false).unwrap();

        engine.save_working(&drop_doc()).unwrap();
        engine.apply().unwrap();
        engine.confirm().unwrap();
        assert_eq!(engine.running().unwrap(), drop_doc());

        engine.restore("x").unwrap();
        assert_eq!(engine.running().unwrap(), accept_doc());
    }

    #[test]
    fn restore_goes_through_appliers() {
        let (_dir, engine, recorders) = test_engine(long_window());
        engine.save_working(&accept_doc()).unwrap();
        engine.apply().unwrap();
        engine.confirm().unwrap();
        engine.backup("x", false).unwrap();

        engine.restore("x").unwrap();
        assert_eq!(
            recorders.get("firewall").live_state().unwrap(),
            accept_doc().subtree("firewall")
        );
    }

    #[test]
    fn restore_failure_leaves_running_untouched() {
        let (_dir, engine, recorders) = test_engine(long_window());
        engine.save_working(&accept_doc()).unwrap();
        engine.apply().unwrap();
        engine.confirm().unwrap();
        engine.backup("x", false).unwrap();

        recorders.get("network").fail_next("nic down");
        assert!(matches!(
            engine.restore("x"),
            Err(CoreError::ApplierFailure { .. })
        ));
        assert_eq!(engine.running().unwrap(), accept_doc());
    }

    #[test]
    fn restore_missing_backup_fails() {
        let (_dir, engine, _recorders) = test_engine(long_window());
        assert!(engine.restore("ghost").is_err());
    }

    #[test]
    fn restore_rejected_while_pending() {
        let (_dir, engine, _recorders) = test_engine(long_window());
        engine.save_working(&accept_doc()).unwrap();
        engine.apply().unwrap();
        engine.confirm().unwrap();
        engine.backup("x", false).unwrap();

        engine.save_working(&drop_doc()).unwrap();
        engine.apply().unwrap();
        assert!(matches!(engine.restore("x"), Err(CoreError::AlreadyPending)));
        engine.rollback().unwrap();
    }

    #[test]
    fn confirm_persist_failure_is_distinct() {
        let (dir, engine, _recorders) = test_engine(long_window());
        engine.save_working(&drop_doc()).unwrap();
        engine.apply().unwrap();

        // Force the running-slot rename to fail: put a directory in the way.
        let running_path = StoreLayout::new(dir.path()).slot_path(Slot::Running);
        if running_path.exists() {
            std::fs::remove_file(&running_path).unwrap();
        }
        std::fs::create_dir(&running_path).unwrap();

        let err = engine.confirm().unwrap_err();
        assert!(matches!(err, CoreError::ConfirmPersistFailure(_)));
        // Transaction stays pending so the operator can retry
        assert_eq!(engine.status().unwrap().phase, Phase::PendingConfirm);

        std::fs::remove_dir(&running_path).unwrap();
        engine.confirm().unwrap();
        assert_eq!(engine.running().unwrap(), drop_doc());
    }

    #[test]
    fn status_reports_diffs() {
        let (_dir, engine, _recorders) = test_engine(long_window());
        engine.save_working(&accept_doc()).unwrap();
        engine.apply().unwrap();
        engine.confirm().unwrap();

        let mut working = engine.working().unwrap();
        working
            .set("firewall.default_policy", json!("drop"))
            .unwrap();
        engine.save_working(&working).unwrap();

        let status = engine.status().unwrap();
        assert!(status.working_vs_running.has_changes);
        assert!(status
            .working_vs_running
            .modified
            .contains(&"firewall.default_policy".to_owned()));
        assert!(status.pending_vs_snapshot.is_none());

        engine.apply().unwrap();
        let status = engine.status().unwrap();
        let pending = status.pending_vs_snapshot.unwrap();
        assert!(pending
            .modified
            .contains(&"firewall.default_policy".to_owned()));
        engine.rollback().unwrap();
    }

    #[test]
    fn update_working_merges_patch() {
        let (_dir, engine, _recorders) = test_engine(long_window());
        engine.save_working(&accept_doc()).unwrap();
        let patch = doc(json!({"vpn": {"enabled": true}}));
        let merged = engine.update_working(&patch).unwrap();
        assert_eq!(merged.get("vpn.enabled"), Some(&json!(true)));
        assert_eq!(merged.get("firewall.default_policy"), Some(&json!("accept")));
        assert_eq!(engine.working().unwrap(), merged);
    }

    #[test]
    fn unconfigured_store_falls_back_to_default() {
        let (_dir, engine, _recorders) = test_engine(long_window());
        let running = engine.running().unwrap();
        assert_eq!(running, default_document());
    }

    #[test]
    fn commit_confirmed_scenario() {
        // working = drop, running = accept; apply; rollback keeps accept;
        // apply again and confirm lands drop.
        let (_dir, engine, _recorders) = test_engine(long_window());
        engine.save_working(&accept_doc()).unwrap();
        engine.apply().unwrap();
        engine.confirm().unwrap();
        engine.save_working(&drop_doc()).unwrap();

        let report = engine.apply().unwrap();
        assert_eq!(engine.status().unwrap().phase, Phase::PendingConfirm);
        assert_eq!(report.window_seconds, 60);

        engine.rollback().unwrap();
        assert_eq!(
            engine.running().unwrap().get("firewall.default_policy"),
            Some(&json!("accept"))
        );

        engine.apply().unwrap();
        engine.confirm().unwrap();
        assert_eq!(
            engine.running().unwrap().get("firewall.default_policy"),
            Some(&json!("drop"))
        );
    }

    #[test]
    fn apply_with_empty_registry_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ApplyEngine::with_confirm_window(
            dir.path(),
            ApplierRegistry::new(),
            long_window(),
        )
        .unwrap();
        engine.save_working(&drop_doc()).unwrap();
        let report = engine.apply().unwrap();
        assert!(report.results.is_empty());
        engine.confirm().unwrap();
        assert_eq!(engine.running().unwrap(), drop_doc());
    }
}
