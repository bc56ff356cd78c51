//! Repository directory management.
//!
//! This module handles the file system layout of a repository:
//!
//! ```text
//! <repo>/
//! ├─ LOCK              # Advisory lock for single-writer
//! ├─ store.log         # Framed batches of the key-value store
//! └─ objects/          # Content-addressed objects (diffs and file content)
//! ```
//!
//! The LOCK file ensures only one process works on the repository at a
//! time; the lock is held for as long as the [`RepoDir`] lives, which spans
//! any resumable operation run through it.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const STORE_FILE: &str = "store.log";
const OBJECTS_DIR: &str = "objects";

/// An opened repository directory holding the exclusive lock.
#[derive(Debug)]
pub struct RepoDir {
    path: PathBuf,
    _lock_file: File,
}

impl RepoDir {
    /// Opens or creates a repository directory and acquires its lock.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns `RepositoryLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::policy(format!(
                    "repository directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::policy(format!(
                "path is not a directory: {}",
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
            return Err(CoreError::RepositoryLocked);
        }

        fs::create_dir_all(path.join(OBJECTS_DIR))?;

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the repository directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the key-value log.
    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        self.path.join(STORE_FILE)
    }

    /// Path of the object directory.
    #[must_use]
    pub fn objects_path(&self) -> PathBuf {
        self.path.join(OBJECTS_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_layout() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("repo");
        let dir = RepoDir::open(&path, true).unwrap();
        assert!(path.join(LOCK_FILE).exists());
        assert!(dir.objects_path().is_dir());
        assert_eq!(dir.store_path(), path.join(STORE_FILE));
    }

    #[test]
    fn missing_directory_without_create() {
        let temp = tempdir().unwrap();
        let result = RepoDir::open(&temp.path().join("absent"), false);
        assert!(matches!(result, Err(CoreError::Policy { .. })));
    }

    #[test]
    fn second_open_is_locked() {
        let temp = tempdir().unwrap();
        let _first = RepoDir::open(temp.path(), true).unwrap();
        let second = RepoDir::open(temp.path(), true);
        assert!(matches!(second, Err(CoreError::RepositoryLocked)));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        {
            let _dir = RepoDir::open(temp.path(), true).unwrap();
        }
        assert!(RepoDir::open(temp.path(), true).is_ok());
    }
}
