//! Content-addressed object store.
//!
//! Holds file contents under the SHA-256 of their bytes and diff objects
//! (compressed) under the SHA-256 of their uncompressed encoding. Objects
//! are immutable, so inserts are idempotent and need no transaction: an
//! object written by a step that later rolls back is simply unreferenced.

use crate::error::{CoreError, CoreResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use versync_codec::ContentHash;

/// A store of immutable objects addressed by [`ContentHash`].
pub trait ObjectStore: Send + Sync {
    /// Reads an object.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure; a missing object is `Ok(None)`.
    fn get(&self, hash: &ContentHash) -> CoreResult<Option<Vec<u8>>>;

    /// Stores `data` under `hash`. Storing an existing object is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    fn insert(&self, hash: &ContentHash, data: &[u8]) -> CoreResult<()>;

    /// Returns true if the object is present.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    fn contains(&self, hash: &ContentHash) -> CoreResult<bool>;

    /// Lists every stored object.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    fn hashes(&self) -> CoreResult<Vec<ContentHash>>;

    /// Stores raw content under its own hash.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    fn put(&self, data: &[u8]) -> CoreResult<ContentHash> {
        let hash = ContentHash::of(data);
        self.insert(&hash, data)?;
        Ok(hash)
    }

    /// Reads an object that must exist.
    ///
    /// # Errors
    ///
    /// Returns `ObjectMissing` if it does not.
    fn require(&self, hash: &ContentHash) -> CoreResult<Vec<u8>> {
        self.get(hash)?
            .ok_or(CoreError::ObjectMissing { hash: *hash })
    }

    /// Checks whether the file at `path` hashes to `expected`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    fn validate(&self, path: &Path, expected: &ContentHash) -> CoreResult<bool> {
        let data = fs::read(path)?;
        Ok(&ContentHash::of(&data) == expected)
    }
}

/// An in-memory object store. Clones share the same objects.
#[derive(Debug, Default, Clone)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<BTreeMap<ContentHash, Vec<u8>>>>,
}

impl MemoryObjectStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An independent copy of this store.
    #[must_use]
    pub fn deep_clone(&self) -> Self {
        Self {
            objects: Arc::new(RwLock::new(self.objects.read().clone())),
        }
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn get(&self, hash: &ContentHash) -> CoreResult<Option<Vec<u8>>> {
        Ok(self.objects.read().get(hash).cloned())
    }

    fn insert(&self, hash: &ContentHash, data: &[u8]) -> CoreResult<()> {
        self.objects
            .write()
            .entry(*hash)
            .or_insert_with(|| data.to_vec());
        Ok(())
    }

    fn contains(&self, hash: &ContentHash) -> CoreResult<bool> {
        Ok(self.objects.read().contains_key(hash))
    }

    fn hashes(&self) -> CoreResult<Vec<ContentHash>> {
        Ok(self.objects.read().keys().copied().collect())
    }
}

/// Objects stored as files under `<root>/ab/cdef...`.
///
/// Writes go to a temporary file first and are renamed into place, so a
/// crash never leaves a partial object under its final name.
#[derive(Debug, Clone)]
pub struct DirObjectStore {
    root: PathBuf,
}

impl DirObjectStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: &Path) -> CoreResult<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn object_path(&self, hash: &ContentHash) -> PathBuf {
        let hex = hash.to_hex();
        self.root.join(&hex[..2]).join(&hex[2..])
    }
}

impl ObjectStore for DirObjectStore {
    fn get(&self, hash: &ContentHash) -> CoreResult<Option<Vec<u8>>> {
        match fs::read(self.object_path(hash)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn insert(&self, hash: &ContentHash, data: &[u8]) -> CoreResult<()> {
        let path = self.object_path(hash);
        if path.exists() {
            return Ok(());
        }
        let parent = path
            .parent()
            .ok_or_else(|| CoreError::consistency("object path has no parent"))?;
        fs::create_dir_all(parent)?;
        let temp = parent.join(format!(".{}.tmp", &hash.to_hex()[2..]));
        {
            let mut file = fs::File::create(&temp)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &path)?;
        Ok(())
    }

    fn contains(&self, hash: &ContentHash) -> CoreResult<bool> {
        Ok(self.object_path(hash).exists())
    }

    fn hashes(&self) -> CoreResult<Vec<ContentHash>> {
        let mut hashes = Vec::new();
        for shard in fs::read_dir(&self.root)? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            let prefix = shard.file_name().to_string_lossy().into_owned();
            for entry in fs::read_dir(shard.path())? {
                let name = entry?.file_name().to_string_lossy().into_owned();
                if let Ok(hash) = format!("{prefix}{name}").parse::<ContentHash>() {
                    hashes.push(hash);
                }
            }
        }
        hashes.sort();
        Ok(hashes)
    }
}
