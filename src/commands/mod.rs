//! Command implementations for mirrorlock.
//!
//! This module provides the dispatcher that routes CLI commands to their
//! implementations.

mod clear;
mod exec;
mod status;

#[cfg(test)]
mod tests;

use crate::cli::Command;
use crate::context::LockContext;
use mirrorlock::config::Config;
use mirrorlock::error::Result;

/// Dispatch a command to its implementation.
///
/// This is the main entry point for command execution. Each command
/// is routed to its handler function.
pub fn dispatch(config: &Config, command: Command) -> Result<()> {
    let ctx = LockContext::from_config(config)?;
    match command {
        Command::Status(args) => status::cmd_status(&ctx, args),
        Command::Clear(args) => clear::cmd_clear(&ctx, args),
        Command::Exec(args) => exec::cmd_exec(&ctx, args),
    }
}
