//! Mirrorlock: inspect and use the locks that serialize Git mirror updates.
//!
//! This is the main entry point for the `mirrorlock` CLI. It parses
//! arguments, loads configuration, installs logging, dispatches to the
//! appropriate command handler, and handles errors with proper exit codes.

mod cli;
mod commands;
mod context;

use cli::Cli;
use mirrorlock::config::Config;
use mirrorlock::exit_codes;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Environment variable holding a log filter; overrides `log_level`.
const LOG_ENV: &str = "MIRRORLOCK_LOG";

fn main() -> ExitCode {
    let cli = Cli::parse_args();

    let config = match Config::resolve(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {}", err);
            return ExitCode::from(err.exit_code() as u8);
        }
    };
    init_logging(&config.log_level);

    match commands::dispatch(&config, cli.command) {
        Ok(()) => ExitCode::from(exit_codes::SUCCESS as u8),
        Err(err) => {
            // Print user-actionable error message to stderr
            eprintln!("Error: {}", err);

            // Return appropriate exit code
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

/// Log to stderr, filtered by `MIRRORLOCK_LOG` or else the configured level.
fn init_logging(fallback: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
