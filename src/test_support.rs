use crate::error::{LockError, Result};
use crate::process::{Liveness, ProcessProbe};
use crate::store::{ClientRegistry, Increment, KeyValueStore, MemoryStore};
use crate::wait::{WaitPolicy, WaitSettings};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

/// Polling fast enough for tests.
pub(crate) fn fast_wait() -> WaitPolicy {
    WaitPolicy::new(WaitSettings {
        retry_period: Duration::from_millis(5),
        report_every: Duration::from_secs(60),
    })
}

/// Liveness answers scripted per PID. Unlisted PIDs are alive unless the
/// probe was built with `all_dead`.
#[derive(Debug, Default)]
pub(crate) struct ScriptedProbe {
    dead: Mutex<BTreeSet<i32>>,
    everyone_dead: bool,
    fail: bool,
}

impl ScriptedProbe {
    pub(crate) fn all_alive() -> Self {
        Self::default()
    }

    pub(crate) fn all_dead() -> Self {
        Self {
            everyone_dead: true,
            ..Self::default()
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn with_dead<I: IntoIterator<Item = i32>>(pids: I) -> Self {
        Self {
            dead: Mutex::new(pids.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Mark a PID as exited.
    pub(crate) fn kill(&self, pid: i32) {
        self.dead.lock().unwrap().insert(pid);
    }
}

impl ProcessProbe for ScriptedProbe {
    fn probe(&self, pid: i32) -> Result<Liveness> {
        if self.fail {
            return Err(LockError::Io("probe unavailable".to_string()));
        }
        if self.everyone_dead || self.dead.lock().unwrap().contains(&pid) {
            Ok(Liveness::Dead)
        } else {
            Ok(Liveness::Alive)
        }
    }
}

/// A `MemoryStore` whose selected operations fail.
#[derive(Debug, Default)]
pub(crate) struct FailingStore {
    inner: MemoryStore,
    fail_deletes: bool,
    fail_registry: bool,
}

impl FailingStore {
    pub(crate) fn failing_deletes() -> Self {
        Self {
            fail_deletes: true,
            ..Self::default()
        }
    }

    pub(crate) fn failing_registry() -> Self {
        Self {
            fail_registry: true,
            ..Self::default()
        }
    }
}

impl KeyValueStore for FailingStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.inner.set(key, value)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        if self.fail_deletes {
            return Err(LockError::Store("connection reset".to_string()));
        }
        self.inner.delete(key)
    }

    fn increment(&self, key: &str) -> Result<Increment> {
        self.inner.increment(key)
    }

    fn keys(&self, pattern: &str) -> Result<BTreeMap<String, String>> {
        self.inner.keys(pattern)
    }
}

impl ClientRegistry for FailingStore {
    fn clients_matching(&self, pattern: &str) -> Result<Vec<String>> {
        if self.fail_registry {
            return Err(LockError::Store("connection reset".to_string()));
        }
        self.inner.clients_matching(pattern)
    }
}
