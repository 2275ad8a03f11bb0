use super::{json_pretty, lock_store, payload, EXIT_SUCCESS};
use palisade_core::ApplyEngine;

pub fn run(engine: &ApplyEngine, name: &str, overwrite: bool, json: bool) -> Result<u8, String> {
    let _lock = lock_store(engine)?;
    engine.backup(name, overwrite).map_err(|e| e.to_string())?;

    let message = format!("saved running configuration as backup '{name}'");
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
