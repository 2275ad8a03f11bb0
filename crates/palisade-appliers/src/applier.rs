use crate::ApplierError;
use palisade_config::ConfigDocument;
use std::collections::HashMap;

/// Fixed applier invocation order: routing before filtering before
/// forwarding before balancing. Never derived from document contents, so
/// that partial-failure rollback is well-defined — appliers already
/// materialized are always a prefix of this order.
pub const APPLY_ORDER: [&str; 5] = ["network", "firewall", "nat", "loadbalancer", "vpn"];

/// Capability interface the engine uses to turn a configuration subtree into
/// live system state.
///
/// Implementations must be idempotent (reapplying the same subtree yields the
/// same live state) and must return promptly, reporting
/// [`ApplierError::Timeout`] rather than blocking indefinitely. The engine
/// treats a timeout like any other materialization failure.
pub trait Applier: Send + Sync {
    fn name(&self) -> &str;

    fn materialize(&self, subtree: &ConfigDocument) -> Result<(), ApplierError>;
}

/// Explicit table mapping subtree name to applier, built once at startup.
///
/// Iteration follows [`APPLY_ORDER`]; subtrees without a registered applier
/// are skipped. Registration of a name outside the fixed order is rejected —
/// there is no runtime name-to-type resolution.
#[derive(Default)]
pub struct ApplierRegistry {
    appliers: HashMap<String, Box<dyn Applier>>,
}

impl std::fmt::Debug for ApplierRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplierRegistry")
            .field("appliers", &self.appliers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ApplierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        subtree: &str,
        applier: Box<dyn Applier>,
    ) -> Result<(), ApplierError> {
        if !APPLY_ORDER.contains(&subtree) {
            return Err(ApplierError::UnknownSubtree(subtree.to_owned()));
        }
        if self.appliers.contains_key(subtree) {
            return Err(ApplierError::AlreadyRegistered(subtree.to_owned()));
        }
        self.appliers.insert(subtree.to_owned(), applier);
        Ok(())
    }

    pub fn get(&self, subtree: &str) -> Option<&dyn Applier> {
        self.appliers.get(subtree).map(AsRef::as_ref)
    }

    pub fn is_empty(&self) -> bool {
        self.appliers.is_empty()
    }

    /// Registered subtree names in fixed apply order.
    pub fn ordered_names(&self) -> Vec<&'static str> {
        APPLY_ORDER
            .into_iter()
            .filter(|name| self.appliers.contains_key(*name))
            .collect()
    }

    /// Registered appliers in fixed apply order.
    pub fn ordered(&self) -> Vec<(&'static str, &dyn Applier)> {
        APPLY_ORDER
            .into_iter()
            .filter_map(|name| self.appliers.get(name).map(|a| (name, a.as_ref())))
            .collect()
    }
}
