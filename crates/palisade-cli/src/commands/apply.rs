use super::{json_pretty, lock_store, payload, EXIT_FAILURE, EXIT_SUCCESS};
use palisade_core::{ApplyEngine, ApplyReport, CoreError};
use std::io::BufRead;
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// Apply the working draft, then resolve the confirm window in-process.
///
/// The engine rolls back any persisted transaction on construction, so a
/// window left open by an exited process is never confirmable later — the
/// process that applied must also confirm. `--confirm` does so immediately;
/// otherwise the operator gets an interactive countdown and must type
/// `confirm` before the deadline. Timeout, EOF, or anything else rolls back.
pub fn run(
    engine: &ApplyEngine,
    window: Option<u64>,
    confirm_now: bool,
    json: bool,
) -> Result<u8, String> {
    let _lock = lock_store(engine)?;

    let report = match window {
        Some(secs) => engine.apply_with_window(Duration::from_secs(secs)),
        None => engine.apply(),
    }
    .map_err(|e| e.to_string())?;

    if confirm_now {
        engine.confirm().map_err(|e| e.to_string())?;
        let message = "applied and confirmed; configuration promoted to running";
        if json {
            println!("{}", json_pretty(&payload(true, message, report_data(&report)))?);
        } else {
            print_results(&report);
            println!("{message}");
        }
        return Ok(EXIT_SUCCESS);
    }

    if !json {
        print_results(&report);
    }
    eprintln!(
        "confirm window open for {}s (deadline {})",
        report.window_seconds, report.deadline
    );
    eprintln!("type 'confirm' to keep this configuration; anything else rolls back");

    if wait_for_confirmation(Duration::from_secs(report.window_seconds)) {
        match engine.confirm() {
            Ok(()) => {
                let message = "confirmed; configuration promoted to running";
                if json {
                    println!("{}", json_pretty(&payload(true, message, report_data(&report)))?);
                } else {
                    println!("{message}");
                }
                Ok(EXIT_SUCCESS)
            }
            // The deadline timer won the race and already rolled back.
            Err(CoreError::NothingPending) => rolled_back(&report, json),
            Err(e) => Err(e.to_string()),
        }
    } else {
        // Roll back ourselves unless the timer got there first.
        match engine.rollback() {
            Ok(()) | Err(CoreError::NothingPending) => rolled_back(&report, json),
            Err(e) => Err(e.to_string()),
        }
    }
}

fn rolled_back(report: &ApplyReport, json: bool) -> Result<u8, String> {
    let message = "not confirmed; rolled back to pre-apply snapshot";
    if json {
        println!("{}", json_pretty(&payload(false, message, report_data(report)))?);
    } else {
        eprintln!("{message}");
    }
    Ok(EXIT_FAILURE)
}

fn report_data(report: &ApplyReport) -> serde_json::Value {
    serde_json::json!({
        "results": report.results,
        "deadline": report.deadline,
        "window_seconds": report.window_seconds,
    })
}

fn print_results(report: &ApplyReport) {
    for result in &report.results {
        if result.ok {
            println!("  ✓ {}", result.subtree);
        } else {
            println!("  ✗ {}: {}", result.subtree, result.detail);
        }
    }
}

const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

/// Block until the operator types `confirm`, stdin closes, the window
/// elapses, or a shutdown is requested. Returns true only for an explicit
/// confirmation in time.
fn wait_for_confirmation(window: Duration) -> bool {
    let deadline = Instant::now() + window;
    let (tx, rx) = mpsc::channel::<String>();

    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    let mut stdin_open = true;
    loop {
        if palisade_core::shutdown_requested() {
            eprintln!("interrupted; rolling back");
            return false;
        }
        let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
            return false;
        };
        if !stdin_open {
            // Non-interactive run: wait out the window so the deadline
            // timer performs the rollback deterministically.
            std::thread::sleep(remaining.min(SHUTDOWN_POLL));
            continue;
        }
        match rx.recv_timeout(remaining.min(SHUTDOWN_POLL)) {
            Ok(line) if line.trim() == "confirm" => return true,
            Ok(_) => {
                eprintln!("unrecognized input; type 'confirm' to keep this configuration");
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                stdin_open = false;
            }
        }
    }
}
