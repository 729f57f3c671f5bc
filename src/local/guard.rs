//! RAII guards for local read and write locks.

use super::operations::LocalRepoLocks;
use crate::error::Result;
use tracing::error;

/// A held read lock. Dropping it removes the read marker.
#[derive(Debug)]
pub struct ReadLockGuard<'a> {
    locks: &'a LocalRepoLocks,
    repo: String,
    waited: bool,
    released: bool,
}

impl<'a> ReadLockGuard<'a> {
    pub(super) fn new(locks: &'a LocalRepoLocks, repo: &str, waited: bool) -> Self {
        Self {
            locks,
            repo: repo.to_string(),
            waited,
            released: false,
        }
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// True if acquisition had to wait for a writer.
    pub fn waited(&self) -> bool {
        self.waited
    }

    /// Release now, surfacing any error instead of logging it.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.locks.remove_read(&self.repo)
    }
}

impl Drop for ReadLockGuard<'_> {
    fn drop(&mut self) {
        if !self.released
            && let Err(e) = self.locks.remove_read(&self.repo)
        {
            error!("failed to release read-lock for {}: {}", self.repo, e);
        }
    }
}

/// A held write lock. Dropping it removes this process from the write marker.
#[derive(Debug)]
pub struct WriteLockGuard<'a> {
    locks: &'a LocalRepoLocks,
    repo: String,
    released: bool,
}

impl<'a> WriteLockGuard<'a> {
    pub(super) fn new(locks: &'a LocalRepoLocks, repo: &str) -> Self {
        Self {
            locks,
            repo: repo.to_string(),
            released: false,
        }
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// Release now, surfacing any error instead of logging it.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.locks.remove_write(&self.repo, false)
    }
}

impl Drop for WriteLockGuard<'_> {
    fn drop(&mut self) {
        if !self.released
            && let Err(e) = self.locks.remove_write(&self.repo, false)
        {
            error!("failed to release write-lock for {}: {}", self.repo, e);
        }
    }
}
