//! Peer abstraction for sync exchanges.
//!
//! A [`Peer`] is the remote side of a pull or push. It exposes the remote
//! history and its object store; the [`crate::SyncEngine`] decides what
//! to move. [`LocalPeer`] serves another repository in the same process,
//! which is also how replicas on a shared filesystem are synchronized.

use std::path::Path;
use tracing::debug;
use versync_codec::ContentHash;
use versync_core::{RepoConfig, Repository, TaggedEntry};

use crate::error::{SyncError, SyncResult};

/// The remote side of a sync exchange.
pub trait Peer: Send + Sync {
    /// Complete committed history of the peer, with tags.
    fn history(&self) -> SyncResult<Vec<TaggedEntry>>;

    /// The subset of `hashes` the peer does not hold.
    fn missing(&self, hashes: &[ContentHash]) -> SyncResult<Vec<ContentHash>>;

    /// Stored bytes of `hashes`. Hashes the peer lacks are left out.
    fn fetch(&self, hashes: &[ContentHash]) -> SyncResult<Vec<(ContentHash, Vec<u8>)>>;

    /// Stores objects on the peer under the given addresses.
    fn store(&self, objects: &[(ContentHash, Vec<u8>)]) -> SyncResult<()>;

    /// Appends `entries` to the peer's history. They must continue it.
    fn fast_forward(&self, entries: Vec<TaggedEntry>) -> SyncResult<()>;
}

impl<P: Peer + ?Sized> Peer for &P {
    fn history(&self) -> SyncResult<Vec<TaggedEntry>> {
        (**self).history()
    }

    fn missing(&self, hashes: &[ContentHash]) -> SyncResult<Vec<ContentHash>> {
        (**self).missing(hashes)
    }

    fn fetch(&self, hashes: &[ContentHash]) -> SyncResult<Vec<(ContentHash, Vec<u8>)>> {
        (**self).fetch(hashes)
    }

    fn store(&self, objects: &[(ContentHash, Vec<u8>)]) -> SyncResult<()> {
        (**self).store(objects)
    }

    fn fast_forward(&self, entries: Vec<TaggedEntry>) -> SyncResult<()> {
        (**self).fast_forward(entries)
    }
}

/// A peer backed by a repository in this process.
pub struct LocalPeer {
    repo: Repository,
}

impl LocalPeer {
    /// Wraps an open repository.
    #[must_use]
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Opens the repository at `path`, creating it if `create` is set.
    ///
    /// # Errors
    ///
    /// Returns the repository's open error, e.g. when it is locked.
    pub fn open(path: &Path, create: bool) -> SyncResult<Self> {
        let repo = Repository::open(path, RepoConfig::default().create_if_missing(create))?;
        Ok(Self { repo })
    }

    /// The wrapped repository.
    #[must_use]
    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Unwraps the repository.
    #[must_use]
    pub fn into_inner(self) -> Repository {
        self.repo
    }
}

impl Peer for LocalPeer {
    fn history(&self) -> SyncResult<Vec<TaggedEntry>> {
        Ok(self.repo.tagged_history()?)
    }

    fn missing(&self, hashes: &[ContentHash]) -> SyncResult<Vec<ContentHash>> {
        let mut missing = Vec::new();
        for hash in hashes {
            if !self.repo.objects().contains(hash)? {
                missing.push(*hash);
            }
        }
        Ok(missing)
    }

    fn fetch(&self, hashes: &[ContentHash]) -> SyncResult<Vec<(ContentHash, Vec<u8>)>> {
        let mut objects = Vec::with_capacity(hashes.len());
        for hash in hashes {
            if let Some(data) = self.repo.objects().get(hash)? {
                objects.push((*hash, data));
            }
        }
        Ok(objects)
    }

    fn store(&self, objects: &[(ContentHash, Vec<u8>)]) -> SyncResult<()> {
        for (hash, data) in objects {
            self.repo.objects().insert(hash, data)?;
        }
        debug!(count = objects.len(), "peer stored objects");
        Ok(())
    }

    fn fast_forward(&self, entries: Vec<TaggedEntry>) -> SyncResult<()> {
        let outcome = self.repo.fast_forward(entries)?;
        if outcome.is_completed() {
            Ok(())
        } else {
            Err(SyncError::transport_retryable(format!(
                "peer fast-forward did not complete: {outcome:?}"
            )))
        }
    }
}
