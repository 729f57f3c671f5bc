//! Implementation of the `mirrorlock clear` command.

use crate::cli::ClearArgs;
use crate::context::LockContext;
use mirrorlock::error::{LockError, Result};
use mirrorlock::store::KeyValueStore;
use tracing::warn;

/// Execute the `mirrorlock clear` command.
///
/// Deletes the repository's claim counter and owners document and/or its
/// local markers, whoever holds them.
pub fn cmd_clear(ctx: &LockContext, args: ClearArgs) -> Result<()> {
    if !args.force {
        return Err(LockError::UserError(format!(
            "refusing to clear locks for '{}' without --force\n\
             Check `mirrorlock status {}` first: clearing a lock held by a live \
             process breaks its exclusion.",
            args.repo, args.repo
        )));
    }

    let clear_remote = !args.local;
    let clear_local = !args.remote;

    if clear_remote {
        for key in [
            ctx.names.view_owners(&args.repo),
            ctx.names.view_lock(&args.repo),
        ] {
            if ctx.store.delete(&key)? {
                warn!("deleted remote key {}", key);
                println!("Deleted remote key {}", key);
            }
        }
    }

    if clear_local {
        let removed = ctx.local.clear(&args.repo)?;
        if let Some(writers) = &removed.writers {
            println!("Removed write marker ({})", writers.join(", "));
        }
        for reader in &removed.readers {
            println!("Removed read marker {}", reader);
        }
    }

    println!("Cleared locks for {}", args.repo);
    Ok(())
}
