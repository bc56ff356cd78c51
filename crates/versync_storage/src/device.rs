//! Log device trait definition.

use crate::error::StorageResult;

/// An append-only byte device backing a durable store.
///
/// Devices are **opaque byte sinks**. They know nothing about frames or
/// batches; [`crate::LogKv`] owns the log format.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_all` returns every byte appended and not truncated
/// - after `sync` returns, appended bytes survive process termination
///
/// # Implementors
///
/// - [`super::MemoryDevice`] - For testing and crash simulation
/// - [`super::FileDevice`] - For persistent repositories
pub trait LogDevice: Send + Sync {
    /// Reads the whole device.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn read_all(&self) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the device.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Returns the current size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Makes all appended data durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Drops everything after `new_size`.
    ///
    /// Used to discard a torn tail left by an interrupted append.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` exceeds the current size or the
    /// truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}
