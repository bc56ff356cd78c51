//! In-memory log device for testing.

use crate::device::LogDevice;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// An in-memory log device.
///
/// Clones share the same buffer, so a test can keep a handle, drop the
/// store that owns the device, and reopen a new store over the surviving
/// bytes to simulate a restart.
///
/// # Example
///
/// ```rust
/// use versync_storage::{LogDevice, MemoryDevice};
///
/// let mut device = MemoryDevice::new();
/// let handle = device.clone();
/// device.append(b"frame").unwrap();
/// assert_eq!(handle.data(), b"frame");
/// ```
#[derive(Debug, Default, Clone)]
pub struct MemoryDevice {
    data: Arc<RwLock<Vec<u8>>>,
}

impl MemoryDevice {
    /// Creates a new empty device.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a device holding pre-existing bytes.
    ///
    /// Useful for replaying damaged logs.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Returns a copy of all bytes on the device.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl LogDevice for MemoryDevice {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        Ok(self.data.read().clone())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let size = data.len() as u64;
        if new_size > size {
            return Err(StorageError::InvalidTruncate {
                requested: new_size,
                size,
            });
        }
        data.truncate(new_size as usize);
        Ok(())
    }
}
