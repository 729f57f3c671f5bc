//! Per-repository lock owned by a group of cooperating processes.

use super::owners::{OwnerRecord, OwnersDocument};
use super::{Acquire, AtomicCounterLock, KeyNames, acquire_loop};
use crate::error::{LockError, Result};
use crate::process::ProcessIdentity;
use crate::store::{ClientRegistry, KeyValueStore};
use crate::wait::WaitPolicy;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Callback fired during release.
pub type ReleaseCallback = Box<dyn FnMut() + Send>;

/// The owners document key and the store it lives in.
struct OwnersKey {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl OwnersKey {
    fn read(&self) -> Result<Option<OwnersDocument>> {
        match self.store.get(&self.key)? {
            None => Ok(None),
            Some(raw) => OwnersDocument::decode(&self.key, &raw).map(Some),
        }
    }

    /// Read a document that must exist because the caller holds a share.
    fn read_held(&self) -> Result<OwnersDocument> {
        self.read()?.ok_or_else(|| {
            error!("owners document {} vanished while held", self.key);
            LockError::Corrupt(format!("{} (missing)", self.key))
        })
    }

    fn write(&self, doc: &OwnersDocument) -> Result<()> {
        self.store.set(&self.key, &doc.encode(&self.key)?)
    }

    fn delete(&self) -> Result<()> {
        self.store.delete(&self.key).map(|_| ())
    }
}

/// Who this lock handle claims to be.
struct Membership {
    server_id: String,
    group_id: Option<String>,
    process: ProcessIdentity,
    client_name: Option<String>,
}

impl Membership {
    fn group_id(&self) -> String {
        self.group_id
            .clone()
            .unwrap_or_else(|| self.process.process_id.to_string())
    }

    fn record(&self) -> OwnerRecord {
        OwnerRecord::new(&self.process, self.client_name.clone())
    }
}

/// A per-repository write lock that a group of processes can hold together.
///
/// The group is identified by `(server_id, group_id)`; `group_id` defaults to
/// the PID of the acquiring process. A second process presenting the same
/// identity joins the existing owners instead of waiting, which is how a
/// foreground handler and the background worker it spawns share one lock.
///
/// # Hand-off
///
/// A process about to spawn a successor calls [`set_acquire_pending`] first.
/// Its own release then proceeds normally, but any other owner's release
/// waits until the successor's `acquire` clears the flag, so the lock never
/// drops to zero owners while a successor is expected.
///
/// [`set_acquire_pending`]: RemoteOwnerGroupLock::set_acquire_pending
pub struct RemoteOwnerGroupLock {
    claim: AtomicCounterLock,
    owners: OwnersKey,
    member: Membership,
    registry: Option<Arc<dyn ClientRegistry>>,
    blocking: bool,
    wait: WaitPolicy,
    repo_name: String,
    has_lock: bool,
    ignore_pending_acquire: bool,
    acquired_at: Option<Instant>,
    transfer_complete_cb: Option<ReleaseCallback>,
    post_release_cb: Option<ReleaseCallback>,
}

impl std::fmt::Debug for RemoteOwnerGroupLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteOwnerGroupLock")
            .field("owners_key", &self.owners.key)
            .field("server_id", &self.member.server_id)
            .field("group_id", &self.member.group_id())
            .field("process", &self.member.process)
            .field("has_lock", &self.has_lock)
            .finish()
    }
}

impl RemoteOwnerGroupLock {
    /// A blocking lock on `repo_name` for the current process.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        names: &KeyNames,
        repo_name: &str,
        server_id: impl Into<String>,
    ) -> Self {
        let wait = WaitPolicy::default();
        Self {
            claim: AtomicCounterLock::new(store.clone(), names.view_lock(repo_name))
                .with_wait_policy(wait.clone()),
            owners: OwnersKey {
                store,
                key: names.view_owners(repo_name),
            },
            member: Membership {
                server_id: server_id.into(),
                group_id: None,
                process: ProcessIdentity::current(),
                client_name: None,
            },
            registry: None,
            blocking: true,
            wait,
            repo_name: repo_name.to_string(),
            has_lock: false,
            ignore_pending_acquire: false,
            acquired_at: None,
            transfer_complete_cb: None,
            post_release_cb: None,
        }
    }

    pub fn with_blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self.claim.set_blocking(blocking);
        self
    }

    /// Join the group with this id instead of founding one named by our PID.
    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.member.group_id = Some(group_id.into());
        self
    }

    /// Present a specific process identity (defaults to the caller's).
    pub fn with_process(mut self, process: ProcessIdentity) -> Self {
        self.member.process = process;
        self
    }

    /// Record a client registration that proves this owner alive.
    pub fn with_client_name(mut self, client_name: impl Into<String>) -> Self {
        self.member.client_name = Some(client_name.into());
        self
    }

    /// Registry consulted to prune owners whose registration has vanished.
    pub fn with_registry(mut self, registry: Arc<dyn ClientRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_wait_policy(mut self, wait: WaitPolicy) -> Self {
        self.claim.set_wait_policy(wait.clone());
        self.wait = wait;
        self
    }

    pub fn owners_key(&self) -> &str {
        &self.owners.key
    }

    pub fn group_id(&self) -> String {
        self.member.group_id()
    }

    pub fn is_held(&self) -> bool {
        self.has_lock
    }

    /// Register a callback fired when a release leaves other owners behind.
    pub fn set_transfer_complete_cb(&mut self, callback: impl FnMut() + Send + 'static) {
        self.transfer_complete_cb = Some(Box::new(callback));
    }

    /// Register a callback fired at the end of every successful release,
    /// after the transfer-complete callback.
    pub fn set_lock_release_cb(&mut self, callback: impl FnMut() + Send + 'static) {
        self.post_release_cb = Some(Box::new(callback));
    }

    /// Join or create the owner group, or fail with `Busy`.
    pub fn acquire(&mut self) -> Result<()> {
        if self.has_lock {
            return Err(LockError::UserError(format!(
                "lock {} is already held by this handle",
                self.owners.key
            )));
        }
        acquire_loop(self)?;
        self.has_lock = true;
        self.acquired_at = Some(Instant::now());
        debug!("remote lock acquired: {}", self.repo_name);
        Ok(())
    }

    /// Leave the owner group, deleting the document if we were the last.
    ///
    /// Blocks while a hand-off is pending, unless this handle set it.
    pub fn release(&mut self) -> Result<()> {
        if !self.has_lock {
            return Ok(());
        }
        debug!("lock-release {}", self.owners.key);

        match self.leave_group() {
            Ok(()) => {
                self.has_lock = false;
                Ok(())
            }
            // Cancelled while waiting for a hand-off: we still own our share.
            Err(e @ LockError::Busy(_)) => Err(e),
            Err(e @ LockError::Corrupt(_)) => {
                self.has_lock = false;
                error!("failed to release {}: {}", self.owners.key, e);
                Err(e)
            }
            Err(e) => {
                self.has_lock = false;
                error!("failed to release {}: {}", self.owners.key, e);
                Err(LockError::Corrupt(format!("{} ({})", self.owners.key, e)))
            }
        }
    }

    fn leave_group(&mut self) -> Result<()> {
        let policy = self.wait.clone();
        let mut episode = policy.episode(format!("releasing remote lock for {}", self.repo_name));
        loop {
            let owners = &self.owners;
            let me = &self.member.process;
            let ignore_pending = self.ignore_pending_acquire;

            // None: a hand-off is pending and we must wait for the successor.
            let left = self.claim.locked(true, || {
                let doc = owners.read_held()?;
                if doc.acquire_pending() && !ignore_pending {
                    return Ok(None);
                }
                let rest = doc.remove_owner(me);
                if rest.is_empty() {
                    owners.delete()?;
                    Ok(Some(false))
                } else {
                    owners.write(&rest)?;
                    Ok(Some(true))
                }
            })?;

            match left {
                Some(others_remain) => {
                    if others_remain && let Some(cb) = self.transfer_complete_cb.as_mut() {
                        cb();
                    }
                    if let Some(cb) = self.post_release_cb.as_mut() {
                        cb();
                    }
                    let held_ms = self
                        .acquired_at
                        .take()
                        .map(|t| t.elapsed().as_millis())
                        .unwrap_or_default();
                    debug!(
                        "remote lock released: {} after {} ms",
                        self.repo_name, held_ms
                    );
                    return Ok(());
                }
                None => episode.pause()?,
            }
        }
    }

    /// Mark the lock so that no other owner's release completes until a
    /// successor has acquired it. This handle's own release is exempt.
    pub fn set_acquire_pending(&mut self) -> Result<()> {
        if !self.has_lock {
            return Err(LockError::NotHeld(self.owners.key.clone()));
        }
        let owners = &self.owners;
        self.claim.locked(true, || {
            let doc = owners.read_held()?;
            owners.write(&doc.set_pending())
        })?;
        self.ignore_pending_acquire = true;
        debug!("acquire pending set on {}", self.owners.key);
        Ok(())
    }

    /// True if this handle is the one and only owner and no hand-off is pending.
    pub fn wholly_owned(&mut self) -> Result<bool> {
        if !self.has_lock {
            return Ok(false);
        }
        let owners = &self.owners;
        self.claim.locked(true, || {
            let doc = owners.read_held()?;
            Ok(!doc.acquire_pending() && doc.owners().len() == 1)
        })
    }
}

impl Acquire for RemoteOwnerGroupLock {
    fn try_acquire(&mut self) -> Result<bool> {
        let owners = &self.owners;
        let member = &self.member;
        let blocking = self.blocking;
        let joined = self.claim.locked(blocking, || {
            let group_id = member.group_id();
            let doc = match owners.read()? {
                None => OwnersDocument::new(member.server_id.clone(), group_id),
                Some(doc) if doc.belongs_to(&member.server_id, &group_id) => doc.clear_pending(),
                Some(doc) => {
                    debug!(
                        "cannot add lock owner: {} vs {}, {} vs {}",
                        doc.server_id(),
                        member.server_id,
                        doc.group_id(),
                        group_id
                    );
                    return Err(LockError::Busy(owners.key.clone()));
                }
            };
            owners.write(&doc.add_owner(member.record()))
        });

        match joined {
            Ok(()) => Ok(true),
            Err(LockError::Busy(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn remove_stale_owners(&mut self) -> Result<bool> {
        let Some(registry) = self.registry.clone() else {
            return Ok(false);
        };
        let owners = &self.owners;
        let repo_name = &self.repo_name;
        let blocking = self.blocking;
        self.claim.locked(blocking, || {
            let Some(doc) = owners.read()? else {
                return Ok(false);
            };
            let fresh = doc.retain_owners(|owner| owner_is_live(registry.as_ref(), owner, repo_name));
            if fresh.owners().len() == doc.owners().len() {
                return Ok(false);
            }
            if fresh.is_empty() {
                owners.delete()?;
            } else {
                owners.write(&fresh)?;
            }
            Ok(true)
        })
    }

    fn is_blocking(&self) -> bool {
        self.blocking
    }

    fn wait_policy(&self) -> &WaitPolicy {
        &self.wait
    }

    fn describe(&self) -> String {
        self.owners.key.clone()
    }
}

/// An owner stays unless its client registration is provably gone.
fn owner_is_live(registry: &dyn ClientRegistry, owner: &OwnerRecord, repo_name: &str) -> bool {
    let Some(client_name) = owner.client_name.as_deref() else {
        return true;
    };
    match registry.clients_matching(client_name) {
        Ok(found) if !found.is_empty() => true,
        Ok(_) => {
            warn!(
                "stale remote lock {} for {} removed",
                owner.process_id, repo_name
            );
            false
        }
        Err(e) => {
            warn!(
                "cannot check client {} of lock owner {}: {}",
                client_name, owner.process_id, e
            );
            true
        }
    }
}

impl Drop for RemoteOwnerGroupLock {
    fn drop(&mut self) {
        if self.has_lock
            && let Err(e) = self.release()
        {
            error!("failed to release lock on drop: {}", e);
        }
    }
}
