use super::{json_pretty, lock_store, payload, EXIT_SUCCESS};
use palisade_core::ApplyEngine;

pub fn run(engine: &ApplyEngine, json: bool) -> Result<u8, String> {
    let _lock = lock_store(engine)?;
    engine.confirm().map_err(|e| e.to_string())?;

    let message = "confirmed; configuration promoted to running";
    if json {
        println!(
            "{}",
            json_pretty(&payload(true, message, serde_json::Value::Null))?
        );
    } else {
        println!("{message}");
    }
    Ok(EXIT_SUCCESS)
}
