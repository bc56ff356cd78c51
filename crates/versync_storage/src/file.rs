//! File-based log device for persistent repositories.

use crate::device::LogDevice;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A file-based log device.
///
/// # Durability
///
/// `sync()` calls `File::sync_data()`; appended bytes are only guaranteed to
/// survive a crash after it returns.
///
/// # Example
///
/// ```no_run
/// use versync_storage::{FileDevice, LogDevice};
/// use std::path::Path;
///
/// let mut device = FileDevice::open(Path::new("store.log")).unwrap();
/// device.append(b"frame").unwrap();
/// device.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileDevice {
    path: PathBuf,
    file: RwLock<File>,
    size: RwLock<u64>,
}

impl FileDevice {
    /// Opens or creates a log file at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            size: RwLock::new(size),
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogDevice for FileDevice {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let size = *self.size.read();
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(0))?;
        let mut buffer = Vec::with_capacity(size as usize);
        (&mut *file).take(size).read_to_end(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut file = self.file.write();
        let mut size = self.size.write();

        let offset = *size;
        if data.is_empty() {
            return Ok(offset);
        }
        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        *size += data.len() as u64;

        Ok(offset)
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }

    fn sync(&mut self) -> StorageResult<()> {
        let mut file = self.file.write();
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let file = self.file.write();
        let mut size = self.size.write();

        if new_size > *size {
            return Err(StorageError::InvalidTruncate {
                requested: new_size,
                size: *size,
            });
        }

        file.set_len(new_size)?;
        file.sync_all()?;
        *size = new_size;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.log");

        let device = FileDevice::open(&path).unwrap();
        assert_eq!(device.size().unwrap(), 0);
        assert!(path.exists());
        assert_eq!(device.path(), path.as_path());
    }

    #[test]
    fn file_append_and_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.log");

        let mut device = FileDevice::open(&path).unwrap();
        assert_eq!(device.append(b"hello").unwrap(), 0);
        assert_eq!(device.append(b" world").unwrap(), 5);
        device.sync().unwrap();

        assert_eq!(device.read_all().unwrap(), b"hello world");
    }

    #[test]
    fn file_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.log");

        {
            let mut device = FileDevice::open(&path).unwrap();
            device.append(b"durable").unwrap();
            device.sync().unwrap();
        }

        let device = FileDevice::open(&path).unwrap();
        assert_eq!(device.size().unwrap(), 7);
        assert_eq!(device.read_all().unwrap(), b"durable");
    }

    #[test]
    fn file_truncate_drops_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.log");

        let mut device = FileDevice::open(&path).unwrap();
        device.append(b"keep-drop").unwrap();
        device.truncate(4).unwrap();
        assert_eq!(device.read_all().unwrap(), b"keep");
        assert!(device.truncate(100).is_err());
    }
}
