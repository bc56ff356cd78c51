//! Durable key-value store replayed from a framed batch log.
//!
//! Every committed [`WriteBatch`] is appended to a [`LogDevice`] as one frame:
//!
//! ```text
//! | magic (4) | version (2) | payload_len (4) | payload | crc32 (4) |
//! ```
//!
//! The checksum covers everything before it. On open the frames are
//! replayed in order:
//!
//! - an incomplete trailing frame is a torn append and is truncated away
//! - a complete frame with a bad magic or checksum is corruption and fails
//!   the open

use crate::batch::WriteBatch;
use crate::device::LogDevice;
use crate::error::{StorageError, StorageResult};
use crate::kv::{KvStore, KvTransaction, MemoryKv};
use parking_lot::Mutex;

/// The device and whether an append left bytes that could not be removed.
struct Tail {
    device: Box<dyn LogDevice>,
    torn_at: Option<u64>,
}

/// Magic bytes identifying a batch frame.
pub const FRAME_MAGIC: [u8; 4] = *b"VKVB";

/// Current frame format version.
pub const FRAME_VERSION: u16 = 1;

/// magic (4) + version (2) + length (4)
const HEADER_SIZE: usize = 10;

const CRC_SIZE: usize = 4;

/// A key-value store whose committed batches are durable on a [`LogDevice`].
///
/// Reads are served from an in-memory image; the log is only read on open.
pub struct LogKv {
    image: MemoryKv,
    tail: Mutex<Tail>,
    sync_on_commit: bool,
}

impl LogKv {
    /// Opens a store over `device`, replaying every complete frame.
    ///
    /// # Errors
    ///
    /// Returns `ChecksumMismatch` or `Corrupted` if a complete frame is
    /// damaged, or an I/O error from the device.
    pub fn open(mut device: Box<dyn LogDevice>, sync_on_commit: bool) -> StorageResult<Self> {
        let bytes = device.read_all()?;
        let image = MemoryKv::new();
        let valid_len = replay(&bytes, &image)?;
        if (valid_len as usize) < bytes.len() {
            device.truncate(valid_len)?;
        }
        Ok(Self {
            image,
            tail: Mutex::new(Tail {
                device,
                torn_at: None,
            }),
            sync_on_commit,
        })
    }

    /// Number of keys currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.image.len()
    }

    /// Returns true if the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.image.is_empty()
    }
}

impl std::fmt::Debug for LogKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogKv")
            .field("keys", &self.image.len())
            .field("sync_on_commit", &self.sync_on_commit)
            .finish()
    }
}

impl KvStore for LogKv {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.image.get(key)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.image.scan_prefix(prefix)
    }

    fn apply(&self, batch: WriteBatch) -> StorageResult<()> {
        let frame = encode_frame(&batch.encode());
        {
            let mut tail = self.tail.lock();
            if let Some(offset) = tail.torn_at {
                return Err(StorageError::TornTail { offset });
            }
            let start = tail.device.size()?;
            if let Err(err) = write_frame(tail.device.as_mut(), &frame, self.sync_on_commit) {
                // A later frame must never follow a partial one.
                if tail.device.truncate(start).is_err() {
                    tail.torn_at = Some(start);
                }
                return Err(err);
            }
        }
        self.image.apply_in_memory(&batch);
        Ok(())
    }

    fn begin(&self) -> KvTransaction<'_> {
        KvTransaction::new(self)
    }
}

fn write_frame(device: &mut dyn LogDevice, frame: &[u8], sync: bool) -> StorageResult<()> {
    device.append(frame)?;
    if sync {
        device.sync()?;
    }
    Ok(())
}

fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    frame.extend_from_slice(&FRAME_MAGIC);
    frame.extend_from_slice(&FRAME_VERSION.to_le_bytes());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(payload);
    let crc = crc32fast::hash(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// Applies every complete frame to `image`; returns the length of the valid
/// prefix of `bytes`.
fn replay(bytes: &[u8], image: &MemoryKv) -> StorageResult<u64> {
    let mut offset = 0usize;
    while offset < bytes.len() {
        let rest = &bytes[offset..];
        if rest.len() < HEADER_SIZE {
            break;
        }
        if rest[..4] != FRAME_MAGIC {
            return Err(StorageError::corrupted(format!(
                "bad frame magic at offset {offset}"
            )));
        }
        let version = u16::from_le_bytes([rest[4], rest[5]]);
        if version != FRAME_VERSION {
            return Err(StorageError::corrupted(format!(
                "unsupported frame version {version} at offset {offset}"
            )));
        }
        let payload_len = u32::from_le_bytes([rest[6], rest[7], rest[8], rest[9]]) as usize;
        let frame_len = HEADER_SIZE + payload_len + CRC_SIZE;
        if rest.len() < frame_len {
            break;
        }

        let body = &rest[..HEADER_SIZE + payload_len];
        let stored = &rest[HEADER_SIZE + payload_len..frame_len];
        let expected = u32::from_le_bytes([stored[0], stored[1], stored[2], stored[3]]);
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(StorageError::ChecksumMismatch {
                offset: offset as u64,
                expected,
                actual,
            });
        }

        let batch = WriteBatch::decode(&body[HEADER_SIZE..])?;
        image.apply_in_memory(&batch);
        offset += frame_len;
    }
    Ok(offset as u64)
}
