//! Counter-key mutex.

use super::{Acquire, acquire_loop};
use crate::error::{LockError, Result};
use crate::store::{Increment, KeyValueStore};
use crate::wait::WaitPolicy;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Exclusive lock on a single counter key.
///
/// Acquiring increments the key and succeeds only if the result is exactly
/// `1`; any other value (or a non-numeric one) means another process holds
/// it. Releasing deletes the key.
pub struct AtomicCounterLock {
    store: Arc<dyn KeyValueStore>,
    key: String,
    blocking: bool,
    wait: WaitPolicy,
    has_lock: bool,
}

impl std::fmt::Debug for AtomicCounterLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicCounterLock")
            .field("key", &self.key)
            .field("blocking", &self.blocking)
            .field("has_lock", &self.has_lock)
            .finish()
    }
}

impl AtomicCounterLock {
    /// A blocking lock on `key` with the default polling policy.
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            blocking: true,
            wait: WaitPolicy::default(),
            has_lock: false,
        }
    }

    pub fn with_blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    pub fn with_wait_policy(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    pub(crate) fn set_blocking(&mut self, blocking: bool) {
        self.blocking = blocking;
    }

    pub(crate) fn set_wait_policy(&mut self, wait: WaitPolicy) {
        self.wait = wait;
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_held(&self) -> bool {
        self.has_lock
    }

    /// Acquire the counter or fail with `Busy` (non-blocking only).
    pub fn acquire(&mut self) -> Result<()> {
        if self.has_lock {
            return Err(LockError::UserError(format!(
                "lock {} is already held by this handle",
                self.key
            )));
        }
        acquire_loop(self)?;
        self.has_lock = true;
        Ok(())
    }

    /// Acquire with a one-off blocking mode, restoring the configured one.
    pub(crate) fn acquire_with(&mut self, blocking: bool) -> Result<()> {
        let configured = self.blocking;
        self.blocking = blocking;
        let result = self.acquire();
        self.blocking = configured;
        result
    }

    /// Delete the counter key. A failing delete means the lock state can no
    /// longer be trusted and is reported as `Corrupt`.
    pub fn release(&mut self) -> Result<()> {
        if !self.has_lock {
            return Ok(());
        }
        debug!("lock-release {}", self.key);
        self.has_lock = false;
        match self.store.delete(&self.key) {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!("lock key {} was already gone at release", self.key);
                Ok(())
            }
            Err(e) => {
                error!("failed to release lock {}: {}", self.key, e);
                Err(LockError::Corrupt(self.key.clone()))
            }
        }
    }

    /// Run `f` while holding the counter, always releasing afterwards.
    ///
    /// An error from `f` wins over a release error, which is then only logged.
    pub(crate) fn locked<T>(
        &mut self,
        blocking: bool,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        self.acquire_with(blocking)?;
        let outcome = f();
        let released = self.release();
        match outcome {
            Ok(value) => released.map(|_| value),
            Err(e) => {
                if let Err(release_err) = released {
                    error!("{} (while handling: {})", release_err, e);
                }
                Err(e)
            }
        }
    }
}

impl Acquire for AtomicCounterLock {
    fn try_acquire(&mut self) -> Result<bool> {
        match self.store.increment(&self.key)? {
            Increment::Value(value) => Ok(value == "1"),
            // Someone stored a non-number here; treat as held.
            Increment::NotNumeric => Ok(false),
        }
    }

    fn is_blocking(&self) -> bool {
        self.blocking
    }

    fn wait_policy(&self) -> &WaitPolicy {
        &self.wait
    }

    fn describe(&self) -> String {
        self.key.clone()
    }
}

impl Drop for AtomicCounterLock {
    fn drop(&mut self) {
        if self.has_lock
            && let Err(e) = self.release()
        {
            error!("failed to release lock on drop: {}", e);
        }
    }
}
