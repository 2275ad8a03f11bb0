mod appliers;
mod commands;

use clap::{Parser, Subcommand};
use commands::{EXIT_FAILURE, EXIT_PRECONDITION, EXIT_STORE_ERROR};
use palisade_core::{install_signal_handler, ApplyEngine};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "palisade",
    version,
    about = "Commit-confirmed configuration engine for network appliances"
)]
struct Cli {
    /// Path to the Palisade configuration store directory.
    #[arg(long, default_value = "/var/lib/palisade")]
    store: String,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show the working (draft) configuration, or running with --running.
    Show {
        /// Show the running configuration instead of the working draft.
        #[arg(long, default_value_t = false)]
        running: bool,
        /// Show only this dotted-path subtree or value.
        path: Option<String>,
    },
    /// Update the working draft: key=value assignments and/or a patch file.
    Set {
        /// Assignments of the form key.path=value (value parsed as JSON,
        /// falling back to a plain string; null deletes the key).
        assignments: Vec<String>,
        /// Patch file to deep-merge into the working draft (.json or .toml).
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Apply the working draft and open a confirm window.
    Apply {
        /// Confirm window in seconds (default 60).
        #[arg(long)]
        window: Option<u64>,
        /// Confirm immediately instead of waiting for interactive confirmation.
        #[arg(long, default_value_t = false)]
        confirm: bool,
    },
    /// Confirm a pending apply, promoting it to running.
    Confirm,
    /// Roll a pending apply back to the pre-apply snapshot.
    Rollback,
    /// Show engine phase, confirm deadline, and configuration diffs.
    Status,
    /// Save the running configuration as a named backup.
    Backup {
        /// Backup name ([a-zA-Z0-9_-], up to 64 characters).
        name: String,
        /// Replace an existing backup of the same name.
        #[arg(long, default_value_t = false)]
        overwrite: bool,
    },
    /// Restore a named backup directly to running (no confirm window).
    Restore {
        /// Backup name.
        name: String,
    },
    /// List named backups.
    Backups {
        /// Delete the named backup instead of listing.
        #[arg(long)]
        delete: Option<String>,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("PALISADE_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    install_signal_handler();

    let store_path = expand_tilde(&cli.store);
    let json_output = cli.json;

    let result = build_engine(&store_path).and_then(|engine| match cli.command {
        Commands::Show { running, ref path } => {
            commands::show::run(&engine, running, path.as_deref(), json_output)
        }
        Commands::Set {
            ref assignments,
            ref file,
        } => commands::set::run(&engine, assignments, file.as_deref(), json_output),
        Commands::Apply { window, confirm } => {
            commands::apply::run(&engine, window, confirm, json_output)
        }
        Commands::Confirm => commands::confirm::run(&engine, json_output),
        Commands::Rollback => commands::rollback::run(&engine, json_output),
        Commands::Status => commands::status::run(&engine, json_output),
        Commands::Backup {
            ref name,
            overwrite,
        } => commands::backup::run(&engine, name, overwrite, json_output),
        Commands::Restore { ref name } => commands::restore::run(&engine, name, json_output),
        Commands::Backups { ref delete } => {
            commands::backups::run(&engine, delete.as_deref(), json_output)
        }
    });

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("an apply is already pending")
                || msg.starts_with("no apply is pending")
            {
                EXIT_PRECONDITION
            } else if msg.starts_with("store error:") || msg.starts_with("store lock:") {
                EXIT_STORE_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}

fn build_engine(store_path: &std::path::Path) -> Result<ApplyEngine, String> {
    let registry = appliers::load_registry(store_path)?;
    ApplyEngine::new(store_path, registry).map_err(|e| e.to_string())
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}
