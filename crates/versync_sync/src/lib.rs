//! # Versync Sync
//!
//! Replica synchronization over the repository's own history.
//!
//! This crate provides:
//! - The [`Peer`] abstraction and an in-process [`LocalPeer`]
//! - Pull: fetch missing diffs and content, verify them, then merge
//! - Push: send missing objects, then fast-forward the peer
//! - Retry with exponential backoff
//!
//! ## Model
//!
//! Synchronization is pull-then-push. The peer is master during a pull,
//! so its commits stay in place and local commits are replayed on top.
//! A push never merges on the peer's side: it is refused until the
//! local history contains everything the peer has.
//!
//! Every object received from a peer is checked against its address
//! before it is stored.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod state;
mod transport;

pub use config::{RetryConfig, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use state::{SyncCycleResult, SyncEngine, SyncState, SyncStats};
pub use transport::{LocalPeer, Peer};
