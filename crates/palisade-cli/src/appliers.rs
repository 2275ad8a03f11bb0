//! Applier registry construction from the operator's `appliers.toml`.
//!
//! Each entry names a subtree from the fixed apply order and the external
//! program that materializes it. A missing file yields an empty registry:
//! the engine still runs the full apply/confirm cycle, which is how a store
//! is exercised before any materializer is wired up.

use palisade_appliers::{ApplierRegistry, CommandApplier};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const APPLIERS_FILE: &str = "appliers.toml";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct AppliersConfig {
    #[serde(default)]
    appliers: BTreeMap<String, ApplierSpec>,
}

#[derive(Debug, Deserialize)]
struct ApplierSpec {
    program: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

pub fn load_registry(store_path: &Path) -> Result<ApplierRegistry, String> {
    let path = store_path.join(APPLIERS_FILE);
    if !path.exists() {
        debug!("no {APPLIERS_FILE} in store, running with an empty applier registry");
        return Ok(ApplierRegistry::new());
    }

    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    let config: AppliersConfig = toml::from_str(&content)
        .map_err(|e| format!("failed to parse {}: {e}", path.display()))?;

    let mut registry = ApplierRegistry::new();
    for (subtree, spec) in &config.appliers {
        let applier = CommandApplier::new(
            subtree,
            &spec.program,
            spec.args.clone(),
            Duration::from_secs(spec.timeout_secs),
        );
        registry
            .register(subtree, Box::new(applier))
            .map_err(|e| format!("{}: {e}", path.display()))?;
        debug!("registered applier for '{subtree}': {}", spec.program);
    }
    Ok(registry)
}
