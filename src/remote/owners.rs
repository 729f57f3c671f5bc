//! The owners document stored under a group lock's owners key.
//!
//! The document is a value: every transition returns a new document and
//! encoding/decoding lives here, so the lock code only ever reads, transforms
//! and writes whole documents while it holds the claim counter.

use crate::error::{LockError, Result};
use crate::process::ProcessIdentity;
use serde::{Deserialize, Serialize};

/// One process holding a share of a group lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRecord {
    pub process_id: u32,
    pub start_time: String,

    /// Client registration whose existence proves this owner alive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
}

impl OwnerRecord {
    pub fn new(process: &ProcessIdentity, client_name: Option<String>) -> Self {
        Self {
            process_id: process.process_id,
            start_time: process.start_time.clone(),
            client_name,
        }
    }

    /// Owners are matched by PID and start time; client name is ignored.
    pub fn is_process(&self, process: &ProcessIdentity) -> bool {
        self.process_id == process.process_id && self.start_time == process.start_time
    }
}

/// Owner group bound to one `(server_id, group_id)` identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnersDocument {
    server_id: String,
    group_id: String,
    owners: Vec<OwnerRecord>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    acquire_pending: bool,
}

impl OwnersDocument {
    /// An empty document bound to an identity.
    pub fn new(server_id: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            group_id: group_id.into(),
            owners: Vec::new(),
            acquire_pending: false,
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn owners(&self) -> &[OwnerRecord] {
        &self.owners
    }

    pub fn acquire_pending(&self) -> bool {
        self.acquire_pending
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    /// True if the document is bound to this identity.
    pub fn belongs_to(&self, server_id: &str, group_id: &str) -> bool {
        self.server_id == server_id && self.group_id == group_id
    }

    pub fn add_owner(&self, owner: OwnerRecord) -> Self {
        let mut next = self.clone();
        next.owners.push(owner);
        next
    }

    pub fn remove_owner(&self, process: &ProcessIdentity) -> Self {
        let mut next = self.clone();
        next.owners.retain(|owner| !owner.is_process(process));
        next
    }

    /// Keep only the owners the predicate accepts.
    pub fn retain_owners(&self, keep: impl FnMut(&OwnerRecord) -> bool) -> Self {
        let mut next = self.clone();
        next.owners.retain(keep);
        next
    }

    pub fn set_pending(&self) -> Self {
        Self {
            acquire_pending: true,
            ..self.clone()
        }
    }

    pub fn clear_pending(&self) -> Self {
        Self {
            acquire_pending: false,
            ..self.clone()
        }
    }

    /// Decode a stored value. `key` only feeds the error message.
    pub fn decode(key: &str, raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| LockError::Corrupt(format!("{} (invalid owners document: {})", key, e)))
    }

    pub fn encode(&self, key: &str) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| LockError::Corrupt(format!("{} (cannot encode owners: {})", key, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn me(pid: u32) -> ProcessIdentity {
        ProcessIdentity::new(pid, "2024-05-01 10:00:00")
    }

    #[test]
    fn transitions_leave_original_untouched() {
        let doc = OwnersDocument::new("S1", "G1");
        let joined = doc.add_owner(OwnerRecord::new(&me(100), None));

        assert!(doc.is_empty());
        assert_eq!(joined.owners().len(), 1);

        let pending = joined.set_pending();
        assert!(!joined.acquire_pending());
        assert!(pending.acquire_pending());
        assert!(!pending.clear_pending().acquire_pending());
    }

    #[test]
    fn remove_owner_matches_pid_and_start_time() {
        let doc = OwnersDocument::new("S1", "G1")
            .add_owner(OwnerRecord::new(&me(100), None))
            .add_owner(OwnerRecord::new(&ProcessIdentity::new(100, "later"), None));

        let after = doc.remove_owner(&me(100));
        assert_eq!(after.owners().len(), 1);
        assert_eq!(after.owners()[0].start_time, "later");
        assert!(after.remove_owner(&ProcessIdentity::new(100, "later")).is_empty());
    }

    #[test]
    fn encodes_field_names_of_the_wire_format() {
        let doc = OwnersDocument::new("S1", "555")
            .add_owner(OwnerRecord::new(&me(100), Some("gf-client".to_string())));
        let raw = doc.encode("k").unwrap();

        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["server_id"], "S1");
        assert_eq!(value["group_id"], "555");
        assert_eq!(value["owners"][0]["process_id"], 100);
        assert_eq!(value["owners"][0]["client_name"], "gf-client");
        assert!(value.get("acquire_pending").is_none());

        let raw = doc.set_pending().encode("k").unwrap();
        assert!(raw.contains("\"acquire_pending\":true"));
    }

    #[test]
    fn decodes_documents_without_optional_fields() {
        let raw = r#"{"server_id":"S1","group_id":"9","owners":[{"process_id":7,"start_time":"t"}]}"#;
        let doc = OwnersDocument::decode("k", raw).unwrap();
        assert!(doc.belongs_to("S1", "9"));
        assert!(!doc.acquire_pending());
        assert_eq!(doc.owners()[0].client_name, None);
    }

    #[test]
    fn garbage_is_corrupt() {
        let err = OwnersDocument::decode("mirror-view-p-lock-owners", "{not json").unwrap_err();
        assert!(matches!(err, LockError::Corrupt(_)));
        assert!(err.to_string().contains("mirror-view-p-lock-owners"));

        let err = OwnersDocument::decode("k", r#"{"server_id":"S1"}"#).unwrap_err();
        assert!(matches!(err, LockError::Corrupt(_)));
    }
}
