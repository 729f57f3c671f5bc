//! Implementation of the `mirrorlock exec` command.
//!
//! Runs a command while holding a repository's local read lock, or its local
//! write lock plus (optionally) the remote group lock.

use crate::cli::ExecArgs;
use crate::context::LockContext;
use mirrorlock::error::{LockError, Result};
use mirrorlock::local::{LocalRepoLocks, WriteOptions};
use mirrorlock::remote::RemoteOwnerGroupLock;
use mirrorlock::wait::CancellationToken;
use std::process::Command;
use tracing::{debug, error, info};

/// Execute the `mirrorlock exec` command.
pub fn cmd_exec(ctx: &LockContext, args: ExecArgs) -> Result<()> {
    let argv = shell_words::split(&args.command)
        .map_err(|e| LockError::UserError(format!("invalid command '{}': {}", args.command, e)))?;
    if argv.is_empty() {
        return Err(LockError::UserError("command must not be empty".to_string()));
    }

    if args.read {
        let locks = local_locks(ctx, args.nonblocking);
        let guard = locks.read_lock(&args.repo)?;
        if guard.waited() {
            info!("waited for a writer on {}", args.repo);
        }
        let outcome = run(&argv);
        guard.release()?;
        return outcome;
    }

    let options = WriteOptions {
        upgrade: args.upgrade,
        blocking: !args.nonblocking,
        append: args.append,
    };
    let locks = local_locks(ctx, args.nonblocking);
    let write_guard = locks.write_lock(&args.repo, options)?;

    let outcome = if args.remote {
        with_remote_lock(ctx, &args, || run(&argv))
    } else {
        run(&argv)
    };
    write_guard.release()?;
    outcome
}

/// Local locks whose waits end in `Busy` at once when `nonblocking`.
///
/// The stale-marker sweep still runs before the first wait would begin.
fn local_locks(ctx: &LockContext, nonblocking: bool) -> LocalRepoLocks {
    if !nonblocking {
        return ctx.local.clone();
    }
    let token = CancellationToken::new();
    token.cancel();
    ctx.local
        .clone()
        .with_wait_policy(ctx.wait.clone().with_cancellation(token))
}

/// Run `f` while a member of the repository's remote owner group.
fn with_remote_lock(ctx: &LockContext, args: &ExecArgs, f: impl FnOnce() -> Result<()>) -> Result<()> {
    let client_name = ctx.client_name();
    ctx.store.register_client(&client_name)?;

    let mut lock = RemoteOwnerGroupLock::new(ctx.store.clone(), &ctx.names, &args.repo, ctx.server_id.clone())
        .with_blocking(!args.nonblocking)
        .with_wait_policy(ctx.wait.clone())
        .with_client_name(client_name.clone())
        .with_registry(ctx.store.clone());
    if let Some(group_id) = &args.group_id {
        lock = lock.with_group_id(group_id.clone());
    }

    let outcome = lock.acquire().and_then(|()| {
        let result = f();
        lock.release().and(result)
    });

    if let Err(e) = ctx.store.unregister_client(&client_name) {
        error!("failed to unregister client {}: {}", client_name, e);
    }
    outcome
}

fn run(argv: &[String]) -> Result<()> {
    let (program, rest) = argv
        .split_first()
        .ok_or_else(|| LockError::UserError("command must not be empty".to_string()))?;
    debug!("running {:?}", argv);
    let status = Command::new(program)
        .args(rest)
        .status()
        .map_err(|e| LockError::Io(format!("failed to run '{}': {}", program, e)))?;
    if status.success() {
        Ok(())
    } else {
        Err(LockError::UserError(format!("'{}' exited with {}", program, status)))
    }
}
