//! # Versync Storage
//!
//! Transactional key-value substrate for Versync.
//!
//! Versync keeps its versioned records in an ordered key-value store and
//! relies on it for one thing above all: a group of writes either becomes
//! durable together or not at all. This crate provides that contract and
//! nothing more. Keys and values are opaque bytes; the record layout is
//! owned by `versync_core`.
//!
//! ## Layers
//!
//! - [`LogDevice`] - append-only byte devices ([`MemoryDevice`], [`FileDevice`])
//! - [`KvStore`] - ordered key-value stores ([`MemoryKv`], [`LogKv`])
//! - [`KvTransaction`] - buffered writes applied as one [`WriteBatch`]
//!
//! [`LogKv`] persists every committed batch as one checksummed frame on a
//! [`LogDevice`] and rebuilds its image by replaying the frames on open.
//!
//! ## Example
//!
//! ```rust
//! use versync_storage::{KvStore, MemoryKv};
//!
//! let store = MemoryKv::new();
//! let mut txn = store.begin();
//! txn.put(b"a".to_vec(), b"1".to_vec());
//! txn.commit().unwrap();
//! assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod device;
mod error;
mod file;
mod kv;
mod log;
mod memory;

pub use batch::WriteBatch;
pub use device::LogDevice;
pub use error::{StorageError, StorageResult};
pub use file::FileDevice;
pub use kv::{KvStore, KvTransaction, MemoryKv};
pub use log::{LogKv, FRAME_MAGIC, FRAME_VERSION};
pub use memory::MemoryDevice;
