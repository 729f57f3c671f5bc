//! Marker files of one repository's lock directory.

use crate::error::{LockError, Result};
use crate::fs::{ExclusiveFile, atomic_write_file};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub(super) const GUARD_FILE: &str = "lock";
pub(super) const WRITE_FILE: &str = "write";

/// Snapshot of a repository's markers, for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoMarkers {
    pub repo: String,
    /// PID entries of the write marker, if present.
    pub writers: Option<Vec<String>>,
    /// Names of the read markers.
    pub readers: Vec<String>,
}

impl RepoMarkers {
    /// No markers at all, as for a repository that was never locked.
    pub fn empty(repo: &str) -> Self {
        Self {
            repo: repo.to_string(),
            writers: None,
            readers: Vec::new(),
        }
    }
}

/// `{lock_root}/locks/{repo}` and the files in it.
///
/// Nothing here takes the guard on its own: callers hold it (via
/// [`RepoLockDir::guard`]) around every sequence of reads and writes.
#[derive(Debug, Clone)]
pub(super) struct RepoLockDir {
    dir: PathBuf,
}

impl RepoLockDir {
    pub(super) fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub(super) fn path(&self) -> &Path {
        &self.dir
    }

    fn write_path(&self) -> PathBuf {
        self.dir.join(WRITE_FILE)
    }

    fn read_path(&self, pid: &str) -> PathBuf {
        self.dir.join(pid)
    }

    /// Take the guard file's exclusive lock and stamp it with `pid`.
    pub(super) fn guard(&self, pid: u32) -> Result<ExclusiveFile> {
        let mut guard = ExclusiveFile::acquire(self.dir.join(GUARD_FILE))?;
        guard.record_holder(pid)?;
        Ok(guard)
    }

    /// The write marker's PID set, or `None` when there is no writer.
    pub(super) fn write_owners(&self) -> Result<Option<BTreeSet<String>>> {
        let path = self.write_path();
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(
                content
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LockError::Io(format!(
                "failed to read write marker '{}': {}",
                path.display(),
                e
            ))),
        }
    }

    pub(super) fn store_write_owners(&self, owners: &BTreeSet<String>) -> Result<()> {
        let content = owners.iter().cloned().collect::<Vec<_>>().join("\n");
        atomic_write_file(self.write_path(), &content)
    }

    /// Delete the write marker; returns false if it was already gone.
    pub(super) fn remove_write_marker(&self) -> Result<bool> {
        remove_if_present(&self.write_path())
    }

    pub(super) fn create_read_marker(&self, pid: u32) -> Result<()> {
        let path = self.read_path(&pid.to_string());
        fs::write(&path, "1").map_err(|e| {
            LockError::Io(format!(
                "failed to create read marker '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Delete a read marker; returns false if it was already gone.
    pub(super) fn remove_read_marker(&self, entry: &str) -> Result<bool> {
        remove_if_present(&self.read_path(entry))
    }

    /// Names of every read marker: all entries except the guard file, the
    /// write marker and dot-files left behind by interrupted writes.
    pub(super) fn readers(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(LockError::Io(format!(
                    "failed to list lock directory '{}': {}",
                    self.dir.display(),
                    e
                )));
            }
        };

        let mut readers = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                LockError::Io(format!(
                    "failed to list lock directory '{}': {}",
                    self.dir.display(),
                    e
                ))
            })?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name == GUARD_FILE || name == WRITE_FILE || name.starts_with('.') {
                continue;
            }
            readers.push(name);
        }
        readers.sort();
        Ok(readers)
    }
}

fn remove_if_present(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(LockError::Io(format!(
            "failed to remove '{}': {}",
            path.display(),
            e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_owners_round_trip_through_file() {
        let temp_dir = TempDir::new().unwrap();
        let dir = RepoLockDir::new(temp_dir.path().to_path_buf());
        assert_eq!(dir.write_owners().unwrap(), None);

        let owners: BTreeSet<String> = ["200".to_string(), "100".to_string()].into();
        dir.store_write_owners(&owners).unwrap();
        assert_eq!(
            fs::read_to_string(temp_dir.path().join(WRITE_FILE)).unwrap(),
            "100\n200"
        );
        assert_eq!(dir.write_owners().unwrap(), Some(owners));

        assert!(dir.remove_write_marker().unwrap());
        assert!(!dir.remove_write_marker().unwrap());
    }

    #[test]
    fn duplicate_and_blank_lines_collapse() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(WRITE_FILE), "100\n\n100\n 200 \n").unwrap();
        let dir = RepoLockDir::new(temp_dir.path().to_path_buf());

        let owners = dir.write_owners().unwrap().unwrap();
        assert_eq!(owners.into_iter().collect::<Vec<_>>(), vec!["100", "200"]);
    }

    #[test]
    fn readers_skip_guard_write_and_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let dir = RepoLockDir::new(temp_dir.path().to_path_buf());
        let _guard = dir.guard(1).unwrap();
        dir.store_write_owners(&["7".to_string()].into()).unwrap();
        dir.create_read_marker(300).unwrap();
        dir.create_read_marker(42).unwrap();
        fs::write(temp_dir.path().join(".write.tmp"), "junk").unwrap();

        assert_eq!(dir.readers().unwrap(), vec!["300", "42"]);
        assert_eq!(
            fs::read_to_string(temp_dir.path().join("42")).unwrap(),
            "1"
        );
    }

    #[test]
    fn missing_directory_has_no_readers() {
        let temp_dir = TempDir::new().unwrap();
        let dir = RepoLockDir::new(temp_dir.path().join("absent"));
        assert!(dir.readers().unwrap().is_empty());
        assert_eq!(dir.write_owners().unwrap(), None);
    }

    #[test]
    fn guard_records_holder_pid() {
        let temp_dir = TempDir::new().unwrap();
        let dir = RepoLockDir::new(temp_dir.path().join("repo"));
        drop(dir.guard(4242).unwrap());
        assert_eq!(
            fs::read_to_string(temp_dir.path().join("repo").join(GUARD_FILE)).unwrap(),
            "4242"
        );
    }
}
