//! CLI argument parsing for mirrorlock.
//!
//! Uses clap derive macros for declarative argument definitions.
//! This module defines the command structure; actual implementations
//! are in the `commands` module.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Mirrorlock: inspect and use the locks that serialize Git mirror updates.
///
/// Remote locks live in a key/value store shared by every server; local
/// locks are reader/writer marker files under the configured lock root.
#[derive(Parser, Debug)]
#[command(name = "mirrorlock")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (default: $MIRRORLOCK_CONFIG, else built-in defaults).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands for mirrorlock.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the state of remote and local locks.
    ///
    /// Lists owner groups with owner liveness, the shared and space locks,
    /// and local reader/writer markers.
    Status(StatusArgs),

    /// Forcibly remove a repository's locks.
    ///
    /// Requires --force. Only use this once the owning processes are known
    /// to be gone.
    Clear(ClearArgs),

    /// Run a command while holding a repository lock.
    ///
    /// Takes a local read or write lock (and optionally the remote group
    /// lock), runs the command, and releases the locks when it exits.
    Exec(ExecArgs),
}

/// Arguments for the `status` command.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Only report this repository.
    pub repo: Option<String>,

    /// Emit the report as JSON.
    #[arg(long)]
    pub json: bool,

    /// Also sample claim counters twice to find ones that look stuck.
    #[arg(long)]
    pub check_stuck: bool,

    /// Delay between the two counter samples, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub sample_ms: u64,
}

/// Arguments for the `clear` command.
#[derive(Args, Debug)]
pub struct ClearArgs {
    /// Repository whose locks should be cleared.
    pub repo: String,

    /// Force clearing the locks (required for safety).
    #[arg(long)]
    pub force: bool,

    /// Only clear the remote keys.
    #[arg(long, conflicts_with = "local")]
    pub remote: bool,

    /// Only clear the local markers.
    #[arg(long)]
    pub local: bool,
}

/// Arguments for the `exec` command.
#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Repository to lock.
    pub repo: String,

    /// Command line to run, split with shell quoting rules.
    pub command: String,

    /// Take a shared read lock.
    #[arg(long, conflicts_with = "write", required_unless_present = "write")]
    pub read: bool,

    /// Take the exclusive write lock.
    #[arg(long)]
    pub write: bool,

    /// Fail instead of waiting when the lock is busy.
    #[arg(long)]
    pub nonblocking: bool,

    /// Allow one remaining reader when taking the write lock.
    #[arg(long, requires = "write")]
    pub upgrade: bool,

    /// Join an existing write lock instead of waiting for it.
    #[arg(long, requires = "write")]
    pub append: bool,

    /// Also hold the remote group lock while the command runs.
    #[arg(long, requires = "write")]
    pub remote: bool,

    /// Group to join on the remote lock (default: this process's PID).
    #[arg(long, requires = "remote", value_name = "ID")]
    pub group_id: Option<String>,
}

impl Cli {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_debug_assert() {
        // Verifies the CLI arguments configuration is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_status_defaults() {
        let cli = Cli::try_parse_from(["mirrorlock", "status"]).unwrap();
        assert!(cli.config.is_none());
        if let Command::Status(args) = cli.command {
            assert!(args.repo.is_none());
            assert!(!args.json);
            assert!(!args.check_stuck);
            assert_eq!(args.sample_ms, 1000);
        } else {
            panic!("Expected Status command");
        }
    }

    #[test]
    fn parse_global_config_after_subcommand() {
        let cli =
            Cli::try_parse_from(["mirrorlock", "status", "proj", "--config", "/etc/ml.yaml"])
                .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/ml.yaml")));
        if let Command::Status(args) = cli.command {
            assert_eq!(args.repo.as_deref(), Some("proj"));
        } else {
            panic!("Expected Status command");
        }
    }

    #[test]
    fn parse_clear() {
        let cli = Cli::try_parse_from(["mirrorlock", "clear", "proj", "--force", "--local"])
            .unwrap();
        if let Command::Clear(args) = cli.command {
            assert_eq!(args.repo, "proj");
            assert!(args.force);
            assert!(args.local);
            assert!(!args.remote);
        } else {
            panic!("Expected Clear command");
        }
    }

    #[test]
    fn clear_scopes_conflict() {
        let result =
            Cli::try_parse_from(["mirrorlock", "clear", "proj", "--remote", "--local"]);
        assert!(result.is_err());
    }

    #[test]
    fn parse_exec_write() {
        let cli = Cli::try_parse_from([
            "mirrorlock",
            "exec",
            "proj",
            "git gc --prune=now",
            "--write",
            "--nonblocking",
            "--remote",
            "--group-id",
            "555",
        ])
        .unwrap();
        if let Command::Exec(args) = cli.command {
            assert_eq!(args.repo, "proj");
            assert_eq!(args.command, "git gc --prune=now");
            assert!(args.write);
            assert!(!args.read);
            assert!(args.nonblocking);
            assert!(args.remote);
            assert_eq!(args.group_id.as_deref(), Some("555"));
        } else {
            panic!("Expected Exec command");
        }
    }

    #[test]
    fn exec_requires_a_mode() {
        let result = Cli::try_parse_from(["mirrorlock", "exec", "proj", "true"]);
        assert!(result.is_err());
    }

    #[test]
    fn exec_read_rejects_write_only_flags() {
        let result =
            Cli::try_parse_from(["mirrorlock", "exec", "proj", "true", "--read", "--upgrade"]);
        assert!(result.is_err());

        let result =
            Cli::try_parse_from(["mirrorlock", "exec", "proj", "true", "--read", "--write"]);
        assert!(result.is_err());
    }
}
