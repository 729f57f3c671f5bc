//! Advisory exclusive file locks.
//!
//! An [`ExclusiveFile`] is the short-lived mutex behind every multi-step
//! read-modify-write in this crate: the local marker sets and the file
//! key/value store. The lock is released when the guard drops (closing the
//! descriptor releases it too, so a crashed holder never leaves it behind).

use crate::error::{LockError, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};

/// RAII guard over an exclusively `flock`ed file.
#[derive(Debug)]
pub struct ExclusiveFile {
    file: File,
    path: PathBuf,
}

impl ExclusiveFile {
    /// Open (creating if needed) and exclusively lock `path`, blocking until
    /// the lock is granted.
    pub fn acquire<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|e| {
                LockError::Io(format!(
                    "failed to create lock directory '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| {
                LockError::Io(format!(
                    "failed to open lock file '{}': {}",
                    path.display(),
                    e
                ))
            })?;

        file.lock_exclusive().map_err(|e| {
            LockError::Io(format!("failed to lock '{}': {}", path.display(), e))
        })?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the file's content with the holder's PID.
    pub fn record_holder(&mut self, pid: u32) -> Result<()> {
        self.file
            .set_len(0)
            .and_then(|_| self.file.rewind())
            .and_then(|_| self.file.write_all(pid.to_string().as_bytes()))
            .map_err(|e| {
                LockError::Io(format!(
                    "failed to record holder in '{}': {}",
                    self.path.display(),
                    e
                ))
            })
    }
}

impl Drop for ExclusiveFile {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn acquire_creates_parents_and_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a/b/lock");

        let guard = ExclusiveFile::acquire(&path).unwrap();
        assert!(path.exists());
        assert_eq!(guard.path(), path.as_path());
    }

    #[test]
    fn second_handle_cannot_lock_while_held() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("lock");

        let guard = ExclusiveFile::acquire(&path).unwrap();
        let other = File::open(&path).unwrap();
        assert!(other.try_lock_exclusive().is_err());

        drop(guard);
        assert!(other.try_lock_exclusive().is_ok());
    }

    #[test]
    fn record_holder_replaces_content() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("lock");
        std::fs::write(&path, "123456789").unwrap();

        let mut guard = ExclusiveFile::acquire(&path).unwrap();
        guard.record_holder(42).unwrap();
        drop(guard);

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "42");
    }
}
