//! Lock status reporting.
//!
//! Collects a snapshot of every lock this crate manages: remote owner
//! documents with per-owner liveness, the shared and space counters, and
//! local marker sets. Also detects claim counters that look stuck.

use crate::error::{LockError, Result};
use crate::local::LocalRepoLocks;
use crate::process::{Liveness, ProcessProbe};
use crate::remote::{KeyNames, OwnerRecord, OwnersDocument, SharedOwnerRecord, SimpleSharedLock};
use crate::store::{ClientRegistry, KeyValueStore};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Liveness of a remote owner as far as this host can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OwnerStatus {
    Live,
    Dead,
    Unknown,
}

impl fmt::Display for OwnerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OwnerStatus::Live => "LIVE",
            OwnerStatus::Dead => "DEAD",
            OwnerStatus::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnerReport {
    pub process_id: u32,
    pub start_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    pub status: OwnerStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteRepoReport {
    pub repo: String,
    pub owners_key: String,
    pub server_id: String,
    pub group_id: String,
    pub acquire_pending: bool,
    /// True if the claim counter is currently set.
    pub claim_counter_set: bool,
    pub owners: Vec<OwnerReport>,
}

impl RemoteRepoReport {
    pub fn dead_owners(&self) -> usize {
        self.owners
            .iter()
            .filter(|o| o.status == OwnerStatus::Dead)
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarkerReport {
    pub entry: String,
    pub alive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalRepoReport {
    pub repo: String,
    pub writers: Option<Vec<MarkerReport>>,
    pub readers: Vec<MarkerReport>,
}

/// Everything `status` reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub remote: Vec<RemoteRepoReport>,
    /// Owner document keys that could not be decoded.
    pub malformed: Vec<String>,
    pub space_lock_set: bool,
    pub shared_owner: Option<SharedOwnerRecord>,
    pub local: Vec<LocalRepoReport>,
}

/// A claim counter that did not decrease between two samples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StuckCounter {
    pub repo: String,
    pub key: String,
    pub value: String,
}

/// Read-only view over both lock tiers.
pub struct LockInspector<'a> {
    pub store: &'a dyn KeyValueStore,
    pub registry: Option<&'a dyn ClientRegistry>,
    pub names: &'a KeyNames,
    /// This host's server id; owners of other servers cannot be probed by PID.
    pub server_id: &'a str,
    pub probe: &'a dyn ProcessProbe,
    pub local: &'a LocalRepoLocks,
}

impl LockInspector<'_> {
    /// Collect the full report, optionally restricted to one repository.
    pub fn report(&self, repo: Option<&str>) -> Result<StatusReport> {
        let mut remote = Vec::new();
        let mut malformed = Vec::new();

        for (key, raw) in self.store.keys(&self.names.view_owners_pattern())? {
            let Some(repo_name) = self.names.repo_from_owners_key(&key) else {
                continue;
            };
            if repo.is_some_and(|wanted| wanted != repo_name) {
                continue;
            }
            match OwnersDocument::decode(&key, &raw) {
                Ok(doc) => remote.push(self.remote_repo(repo_name, key, &doc)?),
                Err(e) => {
                    warn!("{}", e);
                    malformed.push(key);
                }
            }
        }

        let space_lock_set = self.store.get(&self.names.space_lock())?.is_some();
        let shared_owner = match SimpleSharedLock::current_owner(self.store, self.names) {
            Ok(owner) => owner,
            Err(e @ LockError::Corrupt(_)) => {
                warn!("{}", e);
                malformed.push(self.names.reviews_common_owner());
                None
            }
            Err(e) => return Err(e),
        };

        let repos = match repo {
            Some(repo) => vec![repo.to_string()],
            None => self.local.repos()?,
        };
        let mut local = Vec::new();
        for repo in repos {
            let report = self.local_repo(&repo)?;
            if report.writers.is_some() || !report.readers.is_empty() {
                local.push(report);
            }
        }

        Ok(StatusReport {
            remote,
            malformed,
            space_lock_set,
            shared_owner,
            local,
        })
    }

    fn remote_repo(&self, repo: String, owners_key: String, doc: &OwnersDocument) -> Result<RemoteRepoReport> {
        let claim_counter_set = self.store.get(&self.names.view_lock(&repo))?.is_some();
        let owners = doc
            .owners()
            .iter()
            .map(|owner| OwnerReport {
                process_id: owner.process_id,
                start_time: owner.start_time.clone(),
                client_name: owner.client_name.clone(),
                status: self.owner_status(doc.server_id(), owner),
            })
            .collect();
        Ok(RemoteRepoReport {
            repo,
            owners_key,
            server_id: doc.server_id().to_string(),
            group_id: doc.group_id().to_string(),
            acquire_pending: doc.acquire_pending(),
            claim_counter_set,
            owners,
        })
    }

    /// Owners on this server are probed by PID; elsewhere the client
    /// registry is the only evidence.
    fn owner_status(&self, owner_server: &str, owner: &OwnerRecord) -> OwnerStatus {
        if owner_server == self.server_id {
            let Ok(pid) = i32::try_from(owner.process_id) else {
                return OwnerStatus::Unknown;
            };
            return match self.probe.probe(pid) {
                Ok(Liveness::Alive) => OwnerStatus::Live,
                Ok(Liveness::Dead) => OwnerStatus::Dead,
                Err(e) => {
                    debug!("cannot probe owner {}: {}", owner.process_id, e);
                    OwnerStatus::Unknown
                }
            };
        }
        match (self.registry, owner.client_name.as_deref()) {
            (Some(registry), Some(client)) => match registry.clients_matching(client) {
                Ok(found) if found.is_empty() => OwnerStatus::Dead,
                Ok(_) => OwnerStatus::Live,
                Err(_) => OwnerStatus::Unknown,
            },
            _ => OwnerStatus::Unknown,
        }
    }

    fn local_repo(&self, repo: &str) -> Result<LocalRepoReport> {
        let markers = self.local.markers(repo)?;
        let judge = |entry: String| MarkerReport {
            alive: self.local.is_alive(&entry),
            entry,
        };
        Ok(LocalRepoReport {
            repo: markers.repo,
            writers: markers
                .writers
                .map(|writers| writers.into_iter().map(judge).collect()),
            readers: markers.readers.into_iter().map(judge).collect(),
        })
    }

    /// Sample the claim counters (all of them, or only `repo`'s), wait
    /// `interval`, and sample again.
    ///
    /// Claims are held only for one document update, so a counter still set
    /// at an equal or higher value after the interval is probably orphaned.
    pub fn stuck_counters(&self, repo: Option<&str>, interval: Duration) -> Result<Vec<StuckCounter>> {
        let before: Vec<(String, String, String)> = self
            .store
            .keys(&self.names.view_lock_pattern())?
            .into_iter()
            .filter_map(|(key, value)| {
                let name = self.names.repo_from_lock_key(&key)?;
                repo.is_none_or(|wanted| wanted == name).then_some((name, key, value))
            })
            .collect();
        if before.is_empty() {
            return Ok(Vec::new());
        }
        std::thread::sleep(interval);

        let mut stuck = Vec::new();
        for (repo, key, old_value) in before {
            let Some(new_value) = self.store.get(&key)? else {
                continue;
            };
            let (Ok(old), Ok(new)) = (old_value.trim().parse::<i64>(), new_value.trim().parse::<i64>())
            else {
                warn!("non-numeric lock counter {}: {}", key, new_value);
                continue;
            };
            if new >= old {
                warn!("possibly broken repo lock: {}", repo);
                stuck.push(StuckCounter {
                    repo,
                    key,
                    value: new_value,
                });
            }
        }
        Ok(stuck)
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Remote Locks")?;
        writeln!(f, "============")?;
        if self.remote.is_empty() && self.malformed.is_empty() {
            writeln!(f, "  (none)")?;
        }
        for repo in &self.remote {
            writeln!(f, "{}:", repo.repo)?;
            writeln!(f, "  Owning instance: {}", repo.server_id)?;
            writeln!(f, "  Group: {}", repo.group_id)?;
            if repo.acquire_pending {
                writeln!(f, "  Hand-off pending")?;
            }
            if repo.claim_counter_set {
                writeln!(f, "  Claim counter {} is set", repo.owners_key.trim_end_matches("-owners"))?;
            }
            for (n, owner) in repo.owners.iter().enumerate() {
                writeln!(
                    f,
                    "  Owner #{}: PID {}, started at {}, status {}",
                    n + 1,
                    owner.process_id,
                    owner.start_time,
                    owner.status
                )?;
            }
            let dead = repo.dead_owners();
            if dead > 0 && dead == repo.owners.len() {
                writeln!(
                    f,
                    "  ==> All owners are gone; it is safe to clear this lock."
                )?;
            } else if dead > 0 {
                writeln!(
                    f,
                    "  ==> Some owners are gone; query again once the rest finish."
                )?;
            }
        }
        for key in &self.malformed {
            writeln!(f, "Malformed lock {}", key)?;
        }
        writeln!(f)?;

        writeln!(f, "Shared Locks")?;
        writeln!(f, "============")?;
        match &self.shared_owner {
            Some(owner) => writeln!(
                f,
                "  Shared lock held by PID {} on {} since {}",
                owner.process_id, owner.server_id, owner.start_time
            )?,
            None => writeln!(f, "  Shared lock is free")?,
        }
        let space = if self.space_lock_set { "held" } else { "free" };
        writeln!(f, "  Space lock is {}", space)?;
        writeln!(f)?;

        writeln!(f, "Local Locks")?;
        writeln!(f, "===========")?;
        if self.local.is_empty() {
            writeln!(f, "  (none)")?;
        }
        for repo in &self.local {
            writeln!(f, "{}:", repo.repo)?;
            if let Some(writers) = &repo.writers {
                writeln!(f, "  Writers: {}", describe_markers(writers))?;
            }
            if !repo.readers.is_empty() {
                writeln!(f, "  Readers: {}", describe_markers(&repo.readers))?;
            }
        }
        Ok(())
    }
}

fn describe_markers(markers: &[MarkerReport]) -> String {
    markers
        .iter()
        .map(|m| {
            if m.alive {
                m.entry.clone()
            } else {
                format!("{} [DEAD]", m.entry)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}
