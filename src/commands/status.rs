//! Implementation of the `mirrorlock status` command.
//!
//! Displays remote owner groups, the shared locks and local markers, and
//! optionally claim counters that look stuck.

use crate::cli::StatusArgs;
use crate::context::LockContext;
use mirrorlock::error::{LockError, Result};
use mirrorlock::process::SignalProbe;
use mirrorlock::status::LockInspector;
use serde_json::json;
use std::time::Duration;

/// Execute the `mirrorlock status` command.
pub fn cmd_status(ctx: &LockContext, args: StatusArgs) -> Result<()> {
    let probe = SignalProbe;
    let inspector = LockInspector {
        store: ctx.store.as_ref(),
        registry: Some(ctx.store.as_ref()),
        names: &ctx.names,
        server_id: &ctx.server_id,
        probe: &probe,
        local: &ctx.local,
    };

    let report = inspector.report(args.repo.as_deref())?;
    let stuck = if args.check_stuck {
        inspector.stuck_counters(args.repo.as_deref(), Duration::from_millis(args.sample_ms))?
    } else {
        Vec::new()
    };

    if args.json {
        let output = json!({
            "status": report,
            "stuck_counters": stuck,
        });
        let text = serde_json::to_string_pretty(&output)
            .map_err(|e| LockError::Io(format!("failed to serialize status: {}", e)))?;
        println!("{}", text);
        return Ok(());
    }

    print!("{}", report);
    if !stuck.is_empty() {
        println!();
        for counter in &stuck {
            println!("Possibly broken repo lock: {}", counter.repo);
            println!(
                "  May need to delete key {} if the repo is inaccessible",
                counter.key
            );
        }
    }
    Ok(())
}
