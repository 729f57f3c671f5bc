//! Directory-backed key/value store.
//!
//! Layout under the store root:
//! - `keys/{encoded-key}`: one file per key holding its value
//! - `clients/{encoded-name}`: one empty file per client registration
//! - `store.lock`: advisory lock serializing every operation
//!
//! Key names are percent-encoded so any key maps to a single file name.

use super::{ClientRegistry, Increment, KeyValueStore, incremented, key_matcher};
use crate::error::{LockError, Result};
use crate::fs::{ExclusiveFile, atomic_write_file};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const KEYS_DIR: &str = "keys";
const CLIENTS_DIR: &str = "clients";
const STORE_LOCK: &str = "store.lock";

/// A `KeyValueStore` shared by processes on one host through a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for dir in [root.join(KEYS_DIR), root.join(CLIENTS_DIR)] {
            fs::create_dir_all(&dir).map_err(|e| {
                LockError::Store(format!(
                    "failed to create store directory '{}': {}",
                    dir.display(),
                    e
                ))
            })?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Add a client registration.
    pub fn register_client(&self, name: &str) -> Result<()> {
        let _guard = self.exclusive()?;
        let path = self.root.join(CLIENTS_DIR).join(encode_name(name));
        fs::write(&path, b"").map_err(|e| store_error("register client", name, e))
    }

    /// Remove a client registration; returns whether it existed.
    pub fn unregister_client(&self, name: &str) -> Result<bool> {
        let _guard = self.exclusive()?;
        let path = self.root.join(CLIENTS_DIR).join(encode_name(name));
        remove_if_present(&path).map_err(|e| store_error("unregister client", name, e))
    }

    fn exclusive(&self) -> Result<ExclusiveFile> {
        ExclusiveFile::acquire(self.root.join(STORE_LOCK))
            .map_err(|e| LockError::Store(e.to_string()))
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root.join(KEYS_DIR).join(encode_name(key))
    }

    fn read_value(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.key_path(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(store_error("read key", key, e)),
        }
    }

    fn write_value(&self, key: &str, value: &str) -> Result<()> {
        atomic_write_file(self.key_path(key), value)
            .map_err(|e| LockError::Store(format!("failed to write key '{}': {}", key, e)))
    }

    fn list_names(&self, dir: &str) -> Result<Vec<String>> {
        let dir = self.root.join(dir);
        let entries = fs::read_dir(&dir).map_err(|e| {
            LockError::Store(format!(
                "failed to read store directory '{}': {}",
                dir.display(),
                e
            ))
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                LockError::Store(format!("failed to read store directory entry: {}", e))
            })?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            // Leftover temp files from interrupted writes.
            if file_name.starts_with('.') {
                continue;
            }
            if let Some(name) = decode_name(file_name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.exclusive()?;
        self.read_value(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.exclusive()?;
        self.write_value(key, value)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let _guard = self.exclusive()?;
        remove_if_present(&self.key_path(key)).map_err(|e| store_error("delete key", key, e))
    }

    fn increment(&self, key: &str) -> Result<Increment> {
        let _guard = self.exclusive()?;
        let current = self.read_value(key)?;
        match incremented(current.as_deref()) {
            Some(next) => {
                self.write_value(key, &next)?;
                Ok(Increment::Value(next))
            }
            None => Ok(Increment::NotNumeric),
        }
    }

    fn keys(&self, pattern: &str) -> Result<BTreeMap<String, String>> {
        let matcher = key_matcher(pattern)?;
        let _guard = self.exclusive()?;
        let mut found = BTreeMap::new();
        for key in self.list_names(KEYS_DIR)? {
            if !matcher.is_match(key.as_str()) {
                continue;
            }
            if let Some(value) = self.read_value(&key)? {
                found.insert(key, value);
            }
        }
        Ok(found)
    }
}

impl ClientRegistry for FileStore {
    fn clients_matching(&self, pattern: &str) -> Result<Vec<String>> {
        let matcher = key_matcher(pattern).map_err(|e| LockError::Store(e.to_string()))?;
        let _guard = self.exclusive()?;
        Ok(self
            .list_names(CLIENTS_DIR)?
            .into_iter()
            .filter(|name| matcher.is_match(name.as_str()))
            .collect())
    }
}

fn remove_if_present(path: &Path) -> std::io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn store_error(action: &str, name: &str, e: std::io::Error) -> LockError {
    LockError::Store(format!("failed to {} '{}': {}", action, name, e))
}

fn is_plain(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_')
}

/// Percent-encode everything but `[A-Za-z0-9_-]`.
fn encode_name(name: &str) -> String {
    let mut encoded = String::with_capacity(name.len());
    for byte in name.bytes() {
        if is_plain(byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}

fn decode_name(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, FileStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(temp_dir.path().join("store")).unwrap();
        (temp_dir, store)
    }

    #[test]
    fn names_survive_encoding() {
        for name in ["mirror-view-proj-lock", "team/proj", "a b%c", ".hidden", "ü"] {
            let encoded = encode_name(name);
            assert!(!encoded.contains('/'));
            assert!(!encoded.starts_with('.'));
            assert_eq!(decode_name(&encoded).as_deref(), Some(name));
        }
    }

    #[test]
    fn get_set_delete() {
        let (_temp_dir, store) = open_store();
        assert_eq!(store.get("k").unwrap(), None);

        store.set("k", "{\"owners\": []}").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("{\"owners\": []}"));

        assert!(store.delete("k").unwrap());
        assert!(!store.delete("k").unwrap());
    }

    #[test]
    fn increment_counts_and_refuses_text() {
        let (_temp_dir, store) = open_store();
        assert_eq!(
            store.increment("c").unwrap(),
            Increment::Value("1".to_string())
        );
        assert_eq!(
            store.increment("c").unwrap(),
            Increment::Value("2".to_string())
        );

        store.set("t", "busy").unwrap();
        assert_eq!(store.increment("t").unwrap(), Increment::NotNumeric);
    }

    #[test]
    fn keys_lists_matching_values() {
        let (_temp_dir, store) = open_store();
        store.set("mirror-view-team/a-lock-owners", "{}").unwrap();
        store.set("mirror-view-b-lock", "1").unwrap();

        let found = store.keys("mirror-view-*-lock-owners").unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.contains_key("mirror-view-team/a-lock-owners"));
    }

    #[test]
    fn clients_register_and_unregister() {
        let (_temp_dir, store) = open_store();
        store.register_client("gf-host-100").unwrap();
        store.register_client("gf-host-200").unwrap();

        assert_eq!(store.clients_matching("gf-host-*").unwrap().len(), 2);
        assert!(store.unregister_client("gf-host-100").unwrap());
        assert_eq!(
            store.clients_matching("gf-host-*").unwrap(),
            vec!["gf-host-200".to_string()]
        );
    }

    #[test]
    fn concurrent_increments_grant_one_winner() {
        let (_temp_dir, store) = open_store();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.increment("claim").unwrap())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|v| *v == Increment::Value("1".to_string()))
            .count();

        assert_eq!(winners, 1);
        assert_eq!(store.get("claim").unwrap().as_deref(), Some("8"));
    }
}
