//! Runtime context resolution for mirrorlock commands.
//!
//! Turns a loaded [`Config`] into the concrete collaborators every command
//! needs: the file key/value store, the key naming scheme, this server's
//! identity, the polling policy and the local lock root.

use mirrorlock::config::Config;
use mirrorlock::error::Result;
use mirrorlock::local::LocalRepoLocks;
use mirrorlock::remote::KeyNames;
use mirrorlock::store::FileStore;
use mirrorlock::wait::WaitPolicy;
use std::sync::Arc;
use tracing::debug;

/// Resolved collaborators for one CLI invocation.
#[derive(Debug, Clone)]
pub struct LockContext {
    pub store: Arc<FileStore>,
    pub names: KeyNames,
    pub server_id: String,
    pub wait: WaitPolicy,
    pub local: LocalRepoLocks,
}

impl LockContext {
    /// Open the store and build the lock handles described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = FileStore::open(config.store_dir())?;
        let wait = WaitPolicy::new(config.wait_settings());
        let local = LocalRepoLocks::new(&config.lock_root).with_wait_policy(wait.clone());
        debug!(
            "lock root {}, store {}",
            config.lock_root.display(),
            store.root().display()
        );
        Ok(Self {
            store: Arc::new(store),
            names: config.key_names(),
            server_id: config.server_id(),
            wait,
            local,
        })
    }

    /// Client registration name that proves this process alive to others.
    pub fn client_name(&self) -> String {
        format!("mirrorlock-{}-{}", self.server_id, std::process::id())
    }
}
