pub mod apply;
pub mod backup;
pub mod backups;
pub mod confirm;
pub mod restore;
pub mod rollback;
pub mod set;
pub mod show;
pub mod status;

use palisade_core::ApplyEngine;
use palisade_store::StoreLock;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_PRECONDITION: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

/// Structured `--json` payload shared by all commands.
pub fn payload(success: bool, message: &str, data: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "success": success,
        "message": message,
        "data": data,
    })
}

pub fn colorize_phase(phase: &str) -> String {
    use console::Style;
    match phase {
        "idle" => Style::new().green().apply_to(phase).to_string(),
        "applying" => Style::new().cyan().bold().apply_to(phase).to_string(),
        "pending-confirm" => Style::new().yellow().bold().apply_to(phase).to_string(),
        other => other.to_owned(),
    }
}

/// Take the cross-process store lock for a mutating command.
pub fn lock_store(engine: &ApplyEngine) -> Result<StoreLock, String> {
    StoreLock::acquire(&engine.store_layout().lock_file())
        .map_err(|e| format!("store lock: {e}"))
}

/// Print a diff summary as `+` / `~` / `-` lines, one leaf path per line.
pub fn print_diff(diff: &palisade_config::DiffSummary) {
    for path in &diff.added {
        println!("  + {path}");
    }
    for path in &diff.modified {
        println!("  ~ {path}");
    }
    for path in &diff.removed {
        println!("  - {path}");
    }
}
