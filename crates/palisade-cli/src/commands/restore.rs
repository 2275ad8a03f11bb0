use super::{json_pretty, lock_store, payload, EXIT_SUCCESS};
use palisade_core::ApplyEngine;

pub fn run(engine: &ApplyEngine, name: &str, json: bool) -> Result<u8, String> {
    let _lock = lock_store(engine)?;
    engine.restore(name).map_err(|e| e.to_string())?;

    let message = format!("restored backup '{name}' to running");
    if json {
        println!(
            "{}",
            json_pretty(&payload(true, &message, serde_json::json!({"name": name})))?
        );
    } else {
        println!("{message}");
    }
    Ok(EXIT_SUCCESS)
}
