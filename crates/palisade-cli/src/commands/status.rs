use super::{colorize_phase, json_pretty, payload, print_diff, EXIT_SUCCESS};
use palisade_core::ApplyEngine;

pub fn run(engine: &ApplyEngine, json: bool) -> Result<u8, String> {
    let status = engine.status().map_err(|e| e.to_string())?;

    if json {
        let data = serde_json::to_value(&status).map_err(|e| e.to_string())?;
        println!("{}", json_pretty(&payload(true, "engine status", data))?);
        return Ok(EXIT_SUCCESS);
    }

    println!("phase: {}", colorize_phase(&status.phase.to_string()));
    if let Some(remaining) = status.deadline_seconds_remaining {
        println!("confirm deadline: {remaining}s remaining");
    }

    if status.working_vs_running.has_changes {
        println!("working vs running:");
        print_diff(&status.working_vs_running);
    } else {
        println!("working matches running");
    }

    if let Some(pending) = &status.pending_vs_snapshot {
        println!("pending vs pre-apply snapshot:");
        print_diff(pending);
    }

    if !status.last_results.is_empty() {
        println!("last materialization:");
        for result in &status.last_results {
            if result.ok {
                println!("  ✓ {}", result.subtree);
            } else {
                println!("  ✗ {}: {}", result.subtree, result.detail);
            }
        }
    }
    Ok(EXIT_SUCCESS)
}
