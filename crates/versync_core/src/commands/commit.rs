//! Sealing the working version.

use crate::engine::{Step, StepContext};
use crate::error::CoreResult;
use crate::types::{CommitMeta, HistoryEntry};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use versync_codec::{AttrChanges, Content, Timestamp};

/// Where a commit stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitPhase {
    /// Moving staged content into the object store, bucket by bucket.
    Hash,
    /// Diffing against the previous version and sealing.
    Record,
}

/// Stores pending content, then records `diff(W - 1, W)` as a new version.
///
/// An empty diff is a no-op: the version counter and history stay put.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitCommand {
    /// Current phase.
    pub phase: CommitPhase,
    /// Next staged-content bucket to hash.
    pub bucket: u16,
    /// History metadata of the new version.
    pub meta: CommitMeta,
}

impl CommitCommand {
    /// A commit with the given metadata.
    #[must_use]
    pub fn new(meta: CommitMeta) -> Self {
        Self {
            phase: CommitPhase::Hash,
            bucket: 0,
            meta,
        }
    }

    pub(crate) fn execute(&mut self, ctx: &mut StepContext<'_, '_>) -> CoreResult<Step> {
        match self.phase {
            CommitPhase::Hash => self.hash_staged(ctx),
            CommitPhase::Record => self.record(ctx),
        }
    }

    fn hash_staged(&mut self, ctx: &mut StepContext<'_, '_>) -> CoreResult<Step> {
        let limit = ctx.config.commit_chunk_size;
        let mut hashed = 0;
        while self.bucket <= u16::from(u8::MAX) && hashed < limit {
            let staged = ctx.store.staged_in_bucket(self.bucket as u8)?;
            let whole = staged.len() <= limit - hashed;
            for (id, data) in staged.into_iter().take(limit - hashed) {
                let hash = ctx.objects.put(&data)?;
                let w = ctx.store.working_version();
                let pending = ctx
                    .store
                    .load_inode(&id, w)?
                    .is_some_and(|attrs| attrs.content == Content::Pending);
                if pending {
                    let changes = AttrChanges {
                        content: Some(Content::Hash(hash)),
                        size: Some(data.len() as u64),
                        ..AttrChanges::default()
                    };
                    ctx.store.change_inode(&id, &changes)?;
                }
                ctx.store.clear_staged(&id);
                hashed += 1;
            }
            // Hashed entries are cleared, so a partial bucket is rescanned.
            if !whole {
                break;
            }
            self.bucket += 1;
        }
        if self.bucket > u16::from(u8::MAX) {
            self.phase = CommitPhase::Record;
        }
        debug!(bucket = self.bucket, hashed, "staged content hashed");
        Ok(Step::Again)
    }

    fn record(&mut self, ctx: &mut StepContext<'_, '_>) -> CoreResult<Step> {
        let w = ctx.store.working_version();
        let diff = ctx.store.diff(w - 1, w)?;
        if diff.is_empty() {
            ctx.store.set_dirty(false)?;
            info!(version = w, "nothing to commit");
            return Ok(Step::Done);
        }
        let packed = diff.pack(ctx.config.compression_level)?;
        ctx.objects.insert(&packed.hash, &packed.data)?;
        let entry = HistoryEntry {
            version: w,
            hash: packed.hash,
            author: self
                .meta
                .author
                .clone()
                .unwrap_or_else(|| ctx.config.author.clone()),
            message: self.meta.message.clone(),
            timestamp: self.meta.timestamp.unwrap_or_else(Timestamp::now),
        };
        ctx.store.seal(&entry)?;
        for (key, value) in &self.meta.tags {
            ctx.store.put_tag(w, key, value)?;
        }
        info!(version = w, records = diff.len(), hash = %packed.hash, "committed");
        Ok(Step::Done)
    }
}
