use super::{json_pretty, payload, EXIT_FAILURE, EXIT_SUCCESS};
use palisade_core::ApplyEngine;

pub fn run(
    engine: &ApplyEngine,
    running: bool,
    path: Option<&str>,
    json: bool,
) -> Result<u8, String> {
    let (slot, doc) = if running {
        ("running", engine.running().map_err(|e| e.to_string())?)
    } else {
        ("working", engine.working().map_err(|e| e.to_string())?)
    };

    let value = match path {
        Some(p) => match doc.get(p) {
            Some(v) => v.clone(),
            None => {
                if json {
                    println!(
                        "{}",
                        json_pretty(&payload(
                            false,
                            &format!("no value at '{p}' in {slot} configuration"),
                            serde_json::Value::Null,
                        ))?
                    );
                } else {
                    eprintln!("no value at '{p}' in {slot} configuration");
                }
                return Ok(EXIT_FAILURE);
            }
        },
        None => doc.to_value(),
    };

    if json {
        println!(
            "{}",
            json_pretty(&payload(true, &format!("{slot} configuration"), value))?
        );
    } else {
        println!("{}", json_pretty(&value)?);
    }
    Ok(EXIT_SUCCESS)
}
