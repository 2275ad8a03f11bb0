use super::{json_pretty, lock_store, payload, EXIT_SUCCESS};
use palisade_config::ConfigDocument;
use palisade_core::ApplyEngine;
use serde_json::Value;
use std::path::Path;

pub fn run(
    engine: &ApplyEngine,
    assignments: &[String],
    file: Option<&Path>,
    json: bool,
) -> Result<u8, String> {
    if assignments.is_empty() && file.is_none() {
        return Err("nothing to set: give key=value assignments or --file".to_owned());
    }

    let _lock = lock_store(engine)?;

    let mut patch = match file {
        Some(path) => load_patch_file(path)?,
        None => ConfigDocument::new(),
    };

    for assignment in assignments {
        let (key, raw) = assignment
            .split_once('=')
            .ok_or_else(|| format!("invalid assignment '{assignment}': expected key=value"))?;
        let value = parse_value(raw);
        patch
            .set(key, value)
            .map_err(|e| format!("invalid key '{key}': {e}"))?;
    }

    let working = engine.update_working(&patch).map_err(|e| e.to_string())?;

    let count = assignments.len();
    let message = match file {
        Some(path) => format!("merged {} into working configuration", path.display()),
        None => format!("updated {count} value(s) in working configuration"),
    };
    if json {
        println!(
            "{}",
            json_pretty(&payload(true, &message, working.to_value()))?
        );
    } else {
        println!("{message}");
    }
    Ok(EXIT_SUCCESS)
}

/// Values are JSON when they parse as JSON, plain strings otherwise, so
/// `set firewall.default_policy=drop` and `set vpn.enabled=true` both do
/// what they look like. An explicit `null` deletes the key on merge.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

fn load_patch_file(path: &Path) -> Result<ConfigDocument, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;

    let value: Value = if path.extension().is_some_and(|ext| ext == "toml") {
        let parsed: toml::Value = toml::from_str(&content)
            .map_err(|e| format!("failed to parse {}: {e}", path.display()))?;
        serde_json::to_value(parsed).map_err(|e| e.to_string())?
    } else {
        serde_json::from_str(&content)
            .map_err(|e| format!("failed to parse {}: {e}", path.display()))?
    };

    ConfigDocument::from_value(value)
        .map_err(|e| format!("patch {} is not an object: {e}", path.display()))
}
