use super::{json_pretty, lock_store, payload, EXIT_SUCCESS};
use palisade_core::ApplyEngine;

pub fn run(engine: &ApplyEngine, delete: Option<&str>, json: bool) -> Result<u8, String> {
    if let Some(name) = delete {
        let _lock = lock_store(engine)?;
        engine.delete_backup(name).map_err(|e| e.to_string())?;
        let message = format!("deleted backup '{name}'");
        if json {
            println!(
                "{}",
                json_pretty(&payload(true, &message, serde_json::json!({"name": name})))?
            );
        } else {
            println!("{message}");
        }
        return Ok(EXIT_SUCCESS);
    }

    let backups = engine.list_backups().map_err(|e| e.to_string())?;
    if json {
        let data = serde_json::to_value(&backups).map_err(|e| e.to_string())?;
        println!("{}", json_pretty(&payload(true, "backups", data))?);
    } else if backups.is_empty() {
        println!("no backups found");
    } else {
        println!("{:<24} {:<28} CONTENT_HASH", "NAME", "CREATED_AT");
        for backup in &backups {
            let created = backup.created_at.as_deref().unwrap_or("");
            println!(
                "{:<24} {:<28} {}",
                backup.name, created, backup.content_hash
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
