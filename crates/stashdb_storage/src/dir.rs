//! Engine directory management.
//!
//! On-disk layout of a persistent engine:
//!
//! ```text
//! <path>/
//! ├─ LOCK          # Advisory lock, one engine per directory
//! └─ commits.log   # Append-only commit log
//! ```

use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const COMMIT_LOG_FILE: &str = "commits.log";

/// An engine directory with its exclusive lock held.
///
/// The lock is released when the value is dropped.
#[derive(Debug)]
pub struct EngineDir {
    path: PathBuf,
    _lock_file: File,
}

impl EngineDir {
    /// Opens (creating if needed) the directory at `path` and takes its lock.
    ///
    /// # Errors
    ///
    /// - [`StorageError::InvalidLocation`] if `path` exists but is not a directory
    /// - [`StorageError::Locked`] if another engine holds the lock
    /// - I/O errors (e.g. permission denied)
    pub fn open(path: &Path) -> StorageResult<Self> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        if !path.is_dir() {
            return Err(StorageError::InvalidLocation(format!(
                "not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked {
                path: path.to_path_buf(),
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of the commit log.
    #[must_use]
    pub fn commit_log_path(&self) -> PathBuf {
        self.path.join(COMMIT_LOG_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_missing_directory() {
        let root = tempdir().unwrap();
        let path = root.path().join("nested").join("db");

        let dir = EngineDir::open(&path).unwrap();
        assert!(path.is_dir());
        assert_eq!(dir.commit_log_path(), path.join("commits.log"));
    }

    #[test]
    fn second_open_is_locked() {
        let root = tempdir().unwrap();
        let _first = EngineDir::open(root.path()).unwrap();

        let second = EngineDir::open(root.path());
        assert!(matches!(second, Err(StorageError::Locked { .. })));
    }

    #[test]
    fn lock_released_on_drop() {
        let root = tempdir().unwrap();
        drop(EngineDir::open(root.path()).unwrap());
        assert!(EngineDir::open(root.path()).is_ok());
    }

    #[test]
    fn file_path_is_rejected() {
        let root = tempdir().unwrap();
        let file = root.path().join("plain");
        std::fs::write(&file, b"x").unwrap();

        assert!(matches!(
            EngineDir::open(&file),
            Err(StorageError::InvalidLocation(_))
        ));
    }
}
