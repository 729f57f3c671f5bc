//! In-process key/value store.

use super::{ClientRegistry, Increment, KeyValueStore, incremented, key_matcher};
use crate::error::{LockError, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

/// A `KeyValueStore` and `ClientRegistry` held in memory.
///
/// Share it between simulated processes with an `Arc`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
    clients: Mutex<BTreeSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client registration.
    pub fn register_client(&self, name: &str) {
        lock(&self.clients).insert(name.to_string());
    }

    /// Remove a client registration, as when its process goes away.
    pub fn unregister_client(&self, name: &str) {
        lock(&self.clients).remove(name);
    }

    /// Number of keys currently set.
    pub fn len(&self) -> usize {
        lock(&self.values).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// A poisoned map is still a consistent map: every mutation is a single call.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.values).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        lock(&self.values).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(lock(&self.values).remove(key).is_some())
    }

    fn increment(&self, key: &str) -> Result<Increment> {
        let mut values = lock(&self.values);
        match incremented(values.get(key).map(String::as_str)) {
            Some(next) => {
                values.insert(key.to_string(), next.clone());
                Ok(Increment::Value(next))
            }
            None => Ok(Increment::NotNumeric),
        }
    }

    fn keys(&self, pattern: &str) -> Result<BTreeMap<String, String>> {
        let matcher = key_matcher(pattern)?;
        Ok(lock(&self.values)
            .iter()
            .filter(|(key, _)| matcher.is_match(key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}

impl ClientRegistry for MemoryStore {
    fn clients_matching(&self, pattern: &str) -> Result<Vec<String>> {
        let matcher = key_matcher(pattern).map_err(|e| LockError::Store(e.to_string()))?;
        Ok(lock(&self.clients)
            .iter()
            .filter(|name| matcher.is_match(name.as_str()))
            .cloned()
            .collect())
    }
}
