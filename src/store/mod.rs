//! Key/value service consumed by the remote locks.
//!
//! The remote locks rely on nothing beyond atomic increment, get, set and
//! delete. Set and delete are last-writer-wins; there is no compare-and-swap,
//! which is why every owners document is only ever touched while its claim
//! counter is held.
//!
//! Two stores are provided:
//! - [`MemoryStore`]: in-process, shared through an `Arc`; used by tests and
//!   by embedders that bring their own transport.
//! - [`FileStore`]: a directory on the local filesystem; cooperating
//!   processes on one host share it, and the CLI operates on it.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::{LockError, Result};
use globset::{GlobBuilder, GlobMatcher};
use std::collections::BTreeMap;

/// Result of an atomic increment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Increment {
    /// The key now holds this value.
    Value(String),
    /// The existing value is not a number; the key was left unchanged.
    NotNumeric,
}

/// A named-value service with an atomic counter primitive.
pub trait KeyValueStore: Send + Sync {
    /// Value of `key`, or `None` if unset.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set `key` to `value`.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete `key`; returns whether it existed.
    fn delete(&self, key: &str) -> Result<bool>;

    /// Atomically increment `key`, treating an unset key as zero.
    fn increment(&self, key: &str) -> Result<Increment>;

    /// All keys matching a `*`-glob pattern, with their values.
    fn keys(&self, pattern: &str) -> Result<BTreeMap<String, String>>;
}

/// Registrations whose continued existence proves a remote owner alive.
pub trait ClientRegistry: Send + Sync {
    /// Names of current registrations matching a `*`-glob pattern.
    fn clients_matching(&self, pattern: &str) -> Result<Vec<String>>;
}

/// Compile a key pattern. `*` matches any run of characters.
pub(crate) fn key_matcher(pattern: &str) -> Result<GlobMatcher> {
    GlobBuilder::new(pattern)
        .literal_separator(false)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|e| LockError::UserError(format!("invalid key pattern '{}': {}", pattern, e)))
}

/// Next counter value for an increment, or `None` if `current` is not numeric.
pub(crate) fn incremented(current: Option<&str>) -> Option<String> {
    match current {
        None => Some("1".to_string()),
        Some(value) => value
            .trim()
            .parse::<i64>()
            .ok()
            .map(|n| n.saturating_add(1).to_string()),
    }
}
