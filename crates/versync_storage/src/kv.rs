//! Ordered key-value stores and buffered transactions.

use crate::batch::WriteBatch;
use crate::error::StorageResult;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;

/// An ordered key-value store with atomic batch application.
///
/// # Invariants
///
/// - `apply` makes every operation of the batch visible at once, or none
/// - `scan_prefix` returns pairs in ascending key order
pub trait KvStore: Send + Sync {
    /// Reads the committed value for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Returns every committed pair whose key starts with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Atomically applies a batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch could not be made durable. Nothing of
    /// the batch is visible in that case.
    fn apply(&self, batch: WriteBatch) -> StorageResult<()>;

    /// Starts a transaction over this store.
    fn begin(&self) -> KvTransaction<'_>;
}

/// A transaction buffering writes over a [`KvStore`].
///
/// Reads see the committed state of the store plus the transaction's own
/// writes. Nothing reaches the store until [`KvTransaction::commit`];
/// dropping the transaction discards it.
pub struct KvTransaction<'a> {
    store: &'a dyn KvStore,
    writes: WriteBatch,
}

impl<'a> KvTransaction<'a> {
    /// Creates a transaction over `store`.
    #[must_use]
    pub fn new(store: &'a dyn KvStore) -> Self {
        Self {
            store,
            writes: WriteBatch::new(),
        }
    }

    /// Reads a key, honoring buffered writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        match self.writes.lookup(key) {
            Some(value) => Ok(value.map(<[u8]>::to_vec)),
            None => self.store.get(key),
        }
    }

    /// Buffers a put.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.writes.put(key, value);
    }

    /// Buffers a delete.
    pub fn delete(&mut self, key: Vec<u8>) {
        self.writes.delete(key);
    }

    /// Scans a prefix, merging buffered writes into the committed pairs.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.store.scan_prefix(prefix)?.into_iter().collect();
        for (key, value) in self.writes.scan_prefix(prefix) {
            match value {
                Some(value) => {
                    merged.insert(key.to_vec(), value.to_vec());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    /// Number of buffered operations.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.writes.len()
    }

    /// Applies all buffered writes atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the batch; none of the writes
    /// are applied in that case.
    pub fn commit(self) -> StorageResult<()> {
        if self.writes.is_empty() {
            return Ok(());
        }
        self.store.apply(self.writes)
    }

    /// Discards all buffered writes.
    pub fn rollback(self) {}
}

/// An in-memory ordered store.
#[derive(Debug, Default)]
pub struct MemoryKv {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKv {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys in the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// Returns true if the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Returns a copy of every pair, for state comparisons in tests.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<Vec<u8>, Vec<u8>> {
        self.map.read().clone()
    }

    pub(crate) fn apply_in_memory(&self, batch: &WriteBatch) {
        let mut map = self.map.write();
        for (key, value) in batch.iter() {
            match value {
                Some(value) => {
                    map.insert(key.to_vec(), value.to_vec());
                }
                None => {
                    map.remove(key);
                }
            }
        }
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let map = self.map.read();
        Ok(map
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn apply(&self, batch: WriteBatch) -> StorageResult<()> {
        self.apply_in_memory(&batch);
        Ok(())
    }

    fn begin(&self) -> KvTransaction<'_> {
        KvTransaction::new(self)
    }
}
