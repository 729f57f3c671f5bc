//! Read and write lock acquisition, release, listing and clearing.

use super::guard::{ReadLockGuard, WriteLockGuard};
use super::markers::{RepoLockDir, RepoMarkers};
use crate::error::{LockError, Result};
use crate::process::{ProcessProbe, SignalProbe, all_dead, entry_is_alive};
use crate::wait::WaitPolicy;
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// How a write lock is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Tolerate one remaining reader (the caller's own read marker).
    pub upgrade: bool,
    /// Wait for other writers and for readers to drain, instead of failing
    /// with `Busy`.
    pub blocking: bool,
    /// Join an existing write marker instead of waiting for it.
    pub append: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            upgrade: false,
            blocking: true,
            append: false,
        }
    }
}

/// Local reader/writer locks for every repository under one lock root.
#[derive(Debug, Clone)]
pub struct LocalRepoLocks {
    root: PathBuf,
    pid: u32,
    probe: Arc<dyn ProcessProbe>,
    wait: WaitPolicy,
}

impl LocalRepoLocks {
    /// Locks under `lock_root` held on behalf of the current process.
    pub fn new<P: Into<PathBuf>>(lock_root: P) -> Self {
        Self {
            root: lock_root.into(),
            pid: std::process::id(),
            probe: Arc::new(SignalProbe),
            wait: WaitPolicy::default(),
        }
    }

    /// Act on behalf of another PID.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn ProcessProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_wait_policy(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    fn repo_dir(&self, repo: &str) -> Result<RepoLockDir> {
        validate_repo_name(repo)?;
        Ok(RepoLockDir::new(self.locks_dir().join(repo)))
    }

    // ------------------------------------------------------------------------
    // Readers
    // ------------------------------------------------------------------------

    /// Add this process's read marker, waiting while a live writer holds the
    /// write marker. Returns true if the call had to wait.
    pub fn acquire_read(&self, repo: &str) -> Result<bool> {
        let dir = self.repo_dir(repo)?;
        debug!("read-lock acquiring: {}", repo);
        let mut episode = self.wait.episode(format!("acquiring read-lock for {}", repo));
        loop {
            let acquired = {
                let _guard = dir.guard(self.pid)?;
                let may_read = match dir.write_owners()? {
                    None => true,
                    Some(owners) => {
                        let stale = episode.take_stale_check()
                            && all_dead(self.probe.as_ref(), owners.iter().map(String::as_str));
                        if stale {
                            warn!("stale write lock for {} removed", repo);
                            dir.remove_write_marker()?;
                        }
                        stale
                    }
                };
                if may_read {
                    dir.create_read_marker(self.pid)?;
                }
                may_read
            };
            if acquired {
                debug!("read-lock acquired: {}", repo);
                return Ok(episode.waited());
            }
            episode.pause()?;
        }
    }

    /// Remove this process's read marker. A missing marker is tolerated.
    pub fn remove_read(&self, repo: &str) -> Result<()> {
        let dir = self.repo_dir(repo)?;
        let removed = {
            let _guard = dir.guard(self.pid)?;
            dir.remove_read_marker(&self.pid.to_string())?
        };
        if removed {
            debug!("read-lock released: {}", repo);
        } else {
            debug!("read-lock for {} was already gone", repo);
        }
        Ok(())
    }

    /// Acquire a read lock released when the guard drops.
    pub fn read_lock(&self, repo: &str) -> Result<ReadLockGuard<'_>> {
        let waited = self.acquire_read(repo)?;
        Ok(ReadLockGuard::new(self, repo, waited))
    }

    // ------------------------------------------------------------------------
    // Writers
    // ------------------------------------------------------------------------

    /// Claim the write marker, then wait for readers to drain.
    ///
    /// Non-blocking calls fail with `Busy` if another live writer holds the
    /// marker, or if readers remain (after withdrawing the claim).
    pub fn acquire_write(&self, repo: &str, options: WriteOptions) -> Result<()> {
        let dir = self.repo_dir(repo)?;
        debug!(
            "write-lock acquiring: {}, upgrade={}, blocking={}, append={}",
            repo, options.upgrade, options.blocking, options.append
        );
        self.claim_write_marker(&dir, repo, options)?;
        debug!("write-lock pending: {}", repo);

        if let Err(e) = self.drain_readers(&dir, repo, options) {
            if let Err(remove_err) = self.release_write_entry(&dir) {
                warn!("{} (while handling: {})", remove_err, e);
            }
            debug!("write-lock cancelled: {}", repo);
            return Err(e);
        }
        debug!("write-lock acquired: {}", repo);
        Ok(())
    }

    fn claim_write_marker(&self, dir: &RepoLockDir, repo: &str, options: WriteOptions) -> Result<()> {
        let me = self.pid.to_string();
        let mut episode = self.wait.episode(format!("acquiring write-lock for {}", repo));
        loop {
            let claimed = {
                let _guard = dir.guard(self.pid)?;
                match dir.write_owners()? {
                    None => {
                        dir.store_write_owners(&BTreeSet::from([me.clone()]))?;
                        true
                    }
                    Some(mut owners) if options.append => {
                        if owners.insert(me.clone()) {
                            dir.store_write_owners(&owners)?;
                        }
                        debug!("write-lock borrowed: {} by {}", repo, me);
                        true
                    }
                    Some(owners) => {
                        let stale = episode.take_stale_check()
                            && all_dead(self.probe.as_ref(), owners.iter().map(String::as_str));
                        if stale {
                            warn!("stale write-lock for {} removed", repo);
                            dir.store_write_owners(&BTreeSet::from([me.clone()]))?;
                        }
                        stale
                    }
                }
            };
            if claimed {
                return Ok(());
            }
            if !options.blocking {
                return Err(LockError::Busy(format!("write-lock for {}", repo)));
            }
            episode.pause()?;
        }
    }

    fn drain_readers(&self, dir: &RepoLockDir, repo: &str, options: WriteOptions) -> Result<()> {
        let allowed = if options.upgrade { 1 } else { 0 };
        let mut episode = self
            .wait
            .episode(format!("draining readers for write-lock on {}", repo));
        loop {
            let readers = {
                let _guard = dir.guard(self.pid)?;
                dir.readers()?.len()
            };
            debug!("active reader count {}: {}", readers, repo);
            if readers <= allowed {
                return Ok(());
            }
            if !options.blocking {
                return Err(LockError::Busy(format!("write-lock for {} (cancelled)", repo)));
            }
            if episode.take_stale_check() && self.prune_dead_readers(dir, repo)? > 0 {
                continue;
            }
            episode.pause()?;
        }
    }

    /// Delete read markers whose process is provably dead.
    fn prune_dead_readers(&self, dir: &RepoLockDir, repo: &str) -> Result<usize> {
        let _guard = dir.guard(self.pid)?;
        let mut pruned = 0;
        for reader in dir.readers()? {
            if !entry_is_alive(self.probe.as_ref(), &reader) {
                warn!("stale read-lock {} for {} removed", reader, repo);
                if dir.remove_read_marker(&reader)? {
                    pruned += 1;
                }
            }
        }
        Ok(pruned)
    }

    /// Remove this process's entry from the write marker, deleting the marker
    /// once no entries remain. A missing marker or entry is tolerated.
    pub fn remove_write(&self, repo: &str, suppress_log: bool) -> Result<()> {
        let dir = self.repo_dir(repo)?;
        self.release_write_entry(&dir)?;
        if !suppress_log {
            debug!("write-lock released: {}", repo);
        }
        Ok(())
    }

    fn release_write_entry(&self, dir: &RepoLockDir) -> Result<()> {
        let _guard = dir.guard(self.pid)?;
        let Some(mut owners) = dir.write_owners()? else {
            return Ok(());
        };
        owners.remove(&self.pid.to_string());
        if owners.is_empty() {
            dir.remove_write_marker()?;
        } else {
            dir.store_write_owners(&owners)?;
        }
        Ok(())
    }

    /// Acquire a write lock released when the guard drops.
    pub fn write_lock(&self, repo: &str, options: WriteOptions) -> Result<WriteLockGuard<'_>> {
        self.acquire_write(repo, options)?;
        Ok(WriteLockGuard::new(self, repo))
    }

    // ------------------------------------------------------------------------
    // Inspection and operator cleanup
    // ------------------------------------------------------------------------

    /// Names of every repository with a lock directory.
    pub fn repos(&self) -> Result<Vec<String>> {
        let locks_dir = self.locks_dir();
        let entries = match fs::read_dir(&locks_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(LockError::Io(format!(
                    "failed to list '{}': {}",
                    locks_dir.display(),
                    e
                )));
            }
        };

        let mut repos: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        repos.sort();
        Ok(repos)
    }

    /// Current markers of `repo`, read under the guard. A repository with no
    /// lock directory has none and is left untouched.
    pub fn markers(&self, repo: &str) -> Result<RepoMarkers> {
        let dir = self.repo_dir(repo)?;
        if !dir.path().is_dir() {
            return Ok(RepoMarkers::empty(repo));
        }
        let _guard = dir.guard(self.pid)?;
        Ok(RepoMarkers {
            repo: repo.to_string(),
            writers: dir.write_owners()?.map(|owners| owners.into_iter().collect()),
            readers: dir.readers()?,
        })
    }

    /// True if a marker entry names a live process.
    pub fn is_alive(&self, entry: &str) -> bool {
        entry_is_alive(self.probe.as_ref(), entry)
    }

    /// Delete every marker of `repo` regardless of liveness. Returns what was
    /// removed.
    pub fn clear(&self, repo: &str) -> Result<RepoMarkers> {
        let dir = self.repo_dir(repo)?;
        if !dir.path().is_dir() {
            return Ok(RepoMarkers::empty(repo));
        }
        let _guard = dir.guard(self.pid)?;
        let removed = RepoMarkers {
            repo: repo.to_string(),
            writers: dir.write_owners()?.map(|owners| owners.into_iter().collect()),
            readers: dir.readers()?,
        };
        dir.remove_write_marker()?;
        for reader in &removed.readers {
            dir.remove_read_marker(reader)?;
        }
        warn!("cleared local locks for {} in {}", repo, dir.path().display());
        Ok(removed)
    }
}

/// Repository names become directory names; reject anything that would
/// escape the lock root or collide with the marker files.
fn validate_repo_name(repo: &str) -> Result<()> {
    let invalid = repo.is_empty()
        || repo == "."
        || repo == ".."
        || repo.contains(['/', '\\', '\0']);
    if invalid {
        return Err(LockError::UserError(format!(
            "invalid repository name '{}'",
            repo
        )));
    }
    Ok(())
}
