//! Lock on the single globally shared resource.

use super::{AtomicCounterLock, KeyNames};
use crate::error::{LockError, Result};
use crate::process::ProcessIdentity;
use crate::store::KeyValueStore;
use crate::wait::WaitPolicy;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

/// Informational record of the shared lock's current holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedOwnerRecord {
    pub server_id: String,
    pub process_id: u32,
    pub start_time: String,
}

/// Exclusive lock on one resource shared by every server.
///
/// A plain counter lock plus a side key naming the holder. There is no group
/// membership and no stale-owner pruning.
pub struct SimpleSharedLock {
    counter: AtomicCounterLock,
    store: Arc<dyn KeyValueStore>,
    owner_key: String,
    record: SharedOwnerRecord,
}

impl std::fmt::Debug for SimpleSharedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleSharedLock")
            .field("counter", &self.counter)
            .field("record", &self.record)
            .finish()
    }
}

impl SimpleSharedLock {
    pub fn new(store: Arc<dyn KeyValueStore>, names: &KeyNames, server_id: impl Into<String>) -> Self {
        let me = ProcessIdentity::current();
        Self {
            counter: AtomicCounterLock::new(store.clone(), names.reviews_common_lock()),
            store,
            owner_key: names.reviews_common_owner(),
            record: SharedOwnerRecord {
                server_id: server_id.into(),
                process_id: me.process_id,
                start_time: me.start_time,
            },
        }
    }

    pub fn with_blocking(mut self, blocking: bool) -> Self {
        self.counter.set_blocking(blocking);
        self
    }

    pub fn with_wait_policy(mut self, wait: WaitPolicy) -> Self {
        self.counter.set_wait_policy(wait);
        self
    }

    pub fn with_process(mut self, process: ProcessIdentity) -> Self {
        self.record.process_id = process.process_id;
        self.record.start_time = process.start_time;
        self
    }

    pub fn is_held(&self) -> bool {
        self.counter.is_held()
    }

    /// Take the counter, then record ourselves as owner.
    pub fn acquire(&mut self) -> Result<()> {
        self.counter.acquire()?;
        let recorded = serde_json::to_string(&self.record)
            .map_err(|e| LockError::Corrupt(format!("{} ({})", self.owner_key, e)))
            .and_then(|value| self.store.set(&self.owner_key, &value));
        if let Err(e) = recorded {
            // Do not keep a counter we could not annotate.
            if let Err(release_err) = self.counter.release() {
                error!("{} (while handling: {})", release_err, e);
            }
            return Err(e);
        }
        debug!("shared lock acquired by {}", self.record.process_id);
        Ok(())
    }

    /// Delete the owner record, then release the counter.
    pub fn release(&mut self) -> Result<()> {
        if !self.counter.is_held() {
            return Ok(());
        }
        if let Err(e) = self.store.delete(&self.owner_key) {
            error!("failed to delete {}: {}", self.owner_key, e);
            // Still drop the counter so the resource is not wedged.
            if let Err(release_err) = self.counter.release() {
                error!("{} (while handling: {})", release_err, e);
            }
            return Err(LockError::Corrupt(self.owner_key.clone()));
        }
        self.counter.release()
    }

    /// The recorded holder, if any.
    pub fn current_owner(
        store: &dyn KeyValueStore,
        names: &KeyNames,
    ) -> Result<Option<SharedOwnerRecord>> {
        let key = names.reviews_common_owner();
        match store.get(&key)? {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| LockError::Corrupt(format!("{} ({})", key, e))),
        }
    }
}

impl Drop for SimpleSharedLock {
    fn drop(&mut self) {
        if self.counter.is_held()
            && let Err(e) = self.release()
        {
            error!("failed to release shared lock on drop: {}", e);
        }
    }
}
