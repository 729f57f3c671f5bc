//! Locks held in the remote key/value service.
//!
//! Everything here is built on one primitive: an [`AtomicCounterLock`], a
//! counter key whose increment from unset to `1` grants exclusive access.
//!
//! - [`RemoteOwnerGroupLock`]: per-repository lock owned by a group of
//!   cooperating processes, recorded in a JSON owners document that is only
//!   read or written while the repository's counter is held.
//! - [`SimpleSharedLock`]: one globally shared resource with a single owner
//!   record on the side.
//!
//! # Acquisition
//!
//! All three share one polling loop: attempt; on failure run the lock's
//! stale-owner check (once per wait episode) and retry at once if it freed
//! anything; otherwise fail with `Busy` when non-blocking, or sleep and retry.
//!
//! # Scoped use
//!
//! The lock values are their own guards: dropping a held lock releases it,
//! logging (never panicking on) a failed release. Call `release()` to see
//! the error instead.

mod counter;
mod group;
mod keys;
mod owners;
mod shared;


pub use counter::AtomicCounterLock;
pub use group::{ReleaseCallback, RemoteOwnerGroupLock};
pub use keys::KeyNames;
pub use owners::{OwnerRecord, OwnersDocument};
pub use shared::{SharedOwnerRecord, SimpleSharedLock};

use crate::error::{LockError, Result};
use crate::wait::WaitPolicy;
use tracing::debug;

/// The pieces of a remote lock the shared acquisition loop drives.
pub(crate) trait Acquire {
    /// One attempt. `Ok(false)` means someone else holds the lock.
    fn try_acquire(&mut self) -> Result<bool>;

    /// Drop owners proven dead; returns whether anything was removed.
    fn remove_stale_owners(&mut self) -> Result<bool> {
        Ok(false)
    }

    fn is_blocking(&self) -> bool;

    fn wait_policy(&self) -> &WaitPolicy;

    /// Name used in log lines and `Busy` errors.
    fn describe(&self) -> String;
}

/// Poll until `lock` is acquired, or fail with `Busy` when non-blocking.
pub(crate) fn acquire_loop<L: Acquire>(lock: &mut L) -> Result<()> {
    let policy = lock.wait_policy().clone();
    let mut episode = policy.episode(format!("accessing remote lock {}", lock.describe()));
    loop {
        if lock.try_acquire()? {
            debug!("lock-acquired {}", lock.describe());
            return Ok(());
        }

        if episode.take_stale_check() && lock.remove_stale_owners()? {
            continue;
        }

        if !lock.is_blocking() {
            debug!("lock-busy {}", lock.describe());
            return Err(LockError::Busy(lock.describe()));
        }

        debug!("lock-waiting {}", lock.describe());
        episode.pause()?;
    }
}
