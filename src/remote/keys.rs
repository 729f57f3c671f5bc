//! Remote key naming.

use regex::Regex;
use std::sync::LazyLock;

static OWNERS_KEY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<prefix>.+?)-view-(?P<repo>.+)-lock-owners$").expect("Invalid owners key regex")
});

static LOCK_KEY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<prefix>.+?)-view-(?P<repo>.+)-lock$").expect("Invalid lock key regex")
});

/// Derives every remote key name from one configurable prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyNames {
    prefix: String,
}

impl Default for KeyNames {
    fn default() -> Self {
        Self::new("mirror")
    }
}

impl KeyNames {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Claim counter guarding a repository's owners document.
    pub fn view_lock(&self, repo: &str) -> String {
        format!("{}-view-{}-lock", self.prefix, repo)
    }

    /// Owners document of a repository's group lock.
    pub fn view_owners(&self, repo: &str) -> String {
        format!("{}-view-{}-lock-owners", self.prefix, repo)
    }

    pub fn view_lock_pattern(&self) -> String {
        self.view_lock("*")
    }

    pub fn view_owners_pattern(&self) -> String {
        self.view_owners("*")
    }

    /// Counter of the single globally shared lock.
    pub fn reviews_common_lock(&self) -> String {
        format!("{}-reviews-common-lock", self.prefix)
    }

    /// Side key naming the shared lock's current owner.
    pub fn reviews_common_owner(&self) -> String {
        format!("{}-reviews-common-lock-owner", self.prefix)
    }

    /// Counter serializing disk-space accounting.
    pub fn space_lock(&self) -> String {
        format!("{}-space-lock", self.prefix)
    }

    /// Repository named by an owners-document key under this prefix.
    pub fn repo_from_owners_key(&self, key: &str) -> Option<String> {
        let captures = OWNERS_KEY_REGEX.captures(key)?;
        if &captures["prefix"] != self.prefix {
            return None;
        }
        Some(captures["repo"].to_string())
    }

    /// Repository named by a claim-counter key under this prefix.
    pub fn repo_from_lock_key(&self, key: &str) -> Option<String> {
        let captures = LOCK_KEY_REGEX.captures(key)?;
        if &captures["prefix"] != self.prefix {
            return None;
        }
        Some(captures["repo"].to_string())
    }
}
