//! Temporal inode/link/history store.
//!
//! A [`VersionedStore`] wraps one [`KvTransaction`] and is bound to the
//! working version `W`, the version currently being written. Committed
//! versions are `1..W`; `W` itself is open and may still change.
//!
//! # Invariants
//!
//! - For one inode id, stored `[vmin, vmax]` intervals never overlap
//! - For one `(dir, name)` key, stored intervals never overlap
//! - Records are changed in place only while `vmin == W`; older records are
//!   narrowed to `W - 1` and superseded by a new record starting at `W`
//!
//! Nothing is visible to other readers until [`VersionedStore::commit`].

mod diff;
mod keys;
mod tree;

pub use tree::VerifyReport;
pub(crate) use keys::{from_cbor, to_cbor};

use crate::error::{CoreError, CoreResult};
use crate::types::{live_at, HistoryEntry, InodeRecord, LinkRecord, Tag, TreeSnapshot, Version};
use keys::{
    bucket_prefix, history_key, inode_prefix, link_dir_prefix, link_name_prefix, meta_key,
    parse_inode_key, parse_link_key, parse_rename_key, parse_tag_key, rename_key, staged_key,
    tag_key, tag_version_prefix, InodeValue, LinkValue, HISTORY, INODE, JOURNAL, LINK, RENAME,
    STAGED, TAG,
};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use tracing::debug;
use versync_codec::{Identifier, InodeAttrs};
use versync_storage::{KvStore, KvTransaction};

const META_WORKING: &str = "working";
const META_DIRTY: &str = "dirty";

/// Transactional view of the versioned store.
pub struct VersionedStore<'a> {
    txn: KvTransaction<'a>,
    working: Version,
}

impl<'a> VersionedStore<'a> {
    /// Starts a transaction over `kv`.
    ///
    /// # Errors
    ///
    /// Returns an error if the working version cannot be read.
    pub fn begin(kv: &'a dyn KvStore) -> CoreResult<Self> {
        let txn = kv.begin();
        let working = match txn.get(&meta_key(META_WORKING))? {
            Some(bytes) => from_cbor(&bytes)?,
            None => 1,
        };
        Ok(Self { txn, working })
    }

    /// Commits every write of this transaction atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the substrate rejects the batch; nothing is
    /// applied in that case.
    pub fn commit(self) -> CoreResult<()> {
        let pending = self.txn.pending();
        self.txn.commit()?;
        debug!(writes = pending, "store transaction committed");
        Ok(())
    }

    /// Discards every write of this transaction.
    pub fn rollback(self) {
        self.txn.rollback();
    }

    /// The version being written.
    #[must_use]
    pub fn working_version(&self) -> Version {
        self.working
    }

    /// The last committed version; 0 when nothing is committed.
    #[must_use]
    pub fn head_version(&self) -> Version {
        self.working - 1
    }

    /// Moves the working version.
    ///
    /// # Errors
    ///
    /// Returns a serialization error.
    pub fn set_working_version(&mut self, version: Version) -> CoreResult<()> {
        self.put_meta(META_WORKING, &version)?;
        self.working = version;
        Ok(())
    }

    // ---- raw helpers ------------------------------------------------------

    fn get_value<T: DeserializeOwned>(&self, key: &[u8]) -> CoreResult<Option<T>> {
        self.txn.get(key)?.map(|bytes| from_cbor(&bytes)).transpose()
    }

    fn put_value<T: Serialize>(&mut self, key: Vec<u8>, value: &T) -> CoreResult<()> {
        let bytes = to_cbor(value)?;
        self.txn.put(key, bytes);
        Ok(())
    }

    /// Reads a meta value.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn meta<T: DeserializeOwned>(&self, name: &str) -> CoreResult<Option<T>> {
        self.get_value(&meta_key(name))
    }

    /// Writes a meta value.
    ///
    /// # Errors
    ///
    /// Returns a serialization error.
    pub fn put_meta<T: Serialize>(&mut self, name: &str, value: &T) -> CoreResult<()> {
        self.put_value(meta_key(name), value)
    }

    /// Whether the working version has uncommitted tree changes.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn is_dirty(&self) -> CoreResult<bool> {
        Ok(self.meta(META_DIRTY)?.unwrap_or(false))
    }

    /// Sets the dirty flag.
    ///
    /// # Errors
    ///
    /// Returns a serialization error.
    pub fn set_dirty(&mut self, dirty: bool) -> CoreResult<()> {
        self.put_meta(META_DIRTY, &dirty)
    }

    // ---- journal ----------------------------------------------------------

    /// Raw bytes of the pending journal entry.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn journal_bytes(&self) -> CoreResult<Option<Vec<u8>>> {
        Ok(self.txn.get(JOURNAL)?)
    }

    /// Replaces the journal entry.
    pub fn put_journal_bytes(&mut self, bytes: Vec<u8>) {
        self.txn.put(JOURNAL.to_vec(), bytes);
    }

    /// Removes the journal entry.
    pub fn clear_journal(&mut self) {
        self.txn.delete(JOURNAL.to_vec());
    }

    // ---- history and tags -------------------------------------------------

    /// Committed history in version order.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn history(&self) -> CoreResult<Vec<HistoryEntry>> {
        self.txn
            .scan_prefix(&[HISTORY])?
            .into_iter()
            .map(|(_, bytes)| from_cbor(&bytes))
            .collect()
    }

    /// History entry of one version.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn history_entry(&self, version: Version) -> CoreResult<Option<HistoryEntry>> {
        self.get_value(&history_key(version))
    }

    /// Records `entry` as the history of the working version and opens the
    /// next one.
    ///
    /// # Errors
    ///
    /// Returns a consistency error if `entry` names a different version.
    pub fn seal(&mut self, entry: &HistoryEntry) -> CoreResult<()> {
        if entry.version != self.working {
            return Err(CoreError::consistency(format!(
                "history entry for version {} cannot seal working version {}",
                entry.version, self.working
            )));
        }
        self.put_value(history_key(entry.version), entry)?;
        self.set_working_version(entry.version + 1)?;
        self.set_dirty(false)?;
        debug!(version = entry.version, hash = %entry.hash, "version sealed");
        Ok(())
    }

    /// Drops history entries and tags after `version`.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn truncate_history(&mut self, version: Version) -> CoreResult<()> {
        for (key, _) in self.txn.scan_prefix(&[HISTORY])? {
            if key[1..] > version.to_be_bytes()[..] {
                self.txn.delete(key);
            }
        }
        for (key, _) in self.txn.scan_prefix(&[TAG])? {
            let (tagged, _) = parse_tag_key(&key)?;
            if tagged > version {
                self.txn.delete(key);
            }
        }
        Ok(())
    }

    /// Attaches a tag to a version.
    ///
    /// # Errors
    ///
    /// Returns a serialization error.
    pub fn put_tag(&mut self, version: Version, key: &str, value: &str) -> CoreResult<()> {
        self.put_value(tag_key(version, key), &value.to_string())
    }

    /// Tags of one version.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn tags(&self, version: Version) -> CoreResult<BTreeMap<String, String>> {
        let mut tags = BTreeMap::new();
        for (key, bytes) in self.txn.scan_prefix(&tag_version_prefix(version))? {
            let (_, name) = parse_tag_key(&key)?;
            tags.insert(name, from_cbor(&bytes)?);
        }
        Ok(tags)
    }

    /// Every tag in version order.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn all_tags(&self) -> CoreResult<Vec<Tag>> {
        let mut tags = Vec::new();
        for (key, bytes) in self.txn.scan_prefix(&[TAG])? {
            let (version, name) = parse_tag_key(&key)?;
            tags.push(Tag {
                version,
                key: name,
                value: from_cbor(&bytes)?,
            });
        }
        Ok(tags)
    }

    // ---- staged content ---------------------------------------------------

    /// Stages new content for an inode of the working version.
    pub fn stage_content(&mut self, id: &Identifier, data: &[u8]) {
        self.txn.put(staged_key(id), data.to_vec());
    }

    /// Staged content of an inode.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn staged_content(&self, id: &Identifier) -> CoreResult<Option<Vec<u8>>> {
        Ok(self.txn.get(&staged_key(id))?)
    }

    /// Staged `(id, content)` pairs whose id falls in `bucket`.
    ///
    /// # Errors
    ///
    /// Returns a storage or consistency error.
    pub fn staged_in_bucket(&self, bucket: u8) -> CoreResult<Vec<(Identifier, Vec<u8>)>> {
        self.txn
            .scan_prefix(&bucket_prefix(STAGED, bucket))?
            .into_iter()
            .map(|(key, data)| {
                Identifier::from_slice(&key[1..])
                    .map(|id| (id, data))
                    .ok_or_else(|| CoreError::consistency("malformed staged key"))
            })
            .collect()
    }

    /// Drops staged content of one inode.
    pub fn clear_staged(&mut self, id: &Identifier) {
        self.txn.delete(staged_key(id));
    }

    /// Drops all staged content.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn clear_all_staged(&mut self) -> CoreResult<()> {
        for (key, _) in self.txn.scan_prefix(&[STAGED])? {
            self.txn.delete(key);
        }
        Ok(())
    }

    // ---- merge rename table ---------------------------------------------

    /// Name a colliding link was renamed to during the current merge.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn rename_for(&self, dir: &Identifier, name: &str) -> CoreResult<Option<String>> {
        self.get_value(&rename_key(dir, name))
    }

    /// Records a collision rename.
    ///
    /// # Errors
    ///
    /// Returns a serialization error.
    pub fn put_rename(&mut self, dir: &Identifier, name: &str, renamed: &str) -> CoreResult<()> {
        self.put_value(rename_key(dir, name), &renamed.to_string())
    }

    /// Forgets a collision rename.
    pub fn remove_rename(&mut self, dir: &Identifier, name: &str) {
        self.txn.delete(rename_key(dir, name));
    }

    /// Every recorded rename as `(dir, original, renamed)`.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn renames(&self) -> CoreResult<Vec<(Identifier, String, String)>> {
        let mut renames = Vec::new();
        for (key, bytes) in self.txn.scan_prefix(&[RENAME])? {
            let (dir, name) = parse_rename_key(&key)?;
            renames.push((dir, name, from_cbor(&bytes)?));
        }
        Ok(renames)
    }

    /// Forgets every rename.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn clear_renames(&mut self) -> CoreResult<()> {
        for (key, _) in self.txn.scan_prefix(&[RENAME])? {
            self.txn.delete(key);
        }
        Ok(())
    }

    // ---- reads --------------------------------------------------------------

    /// Every stored record of one inode, in `vmin` order.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn inode_records(&self, id: &Identifier) -> CoreResult<Vec<InodeRecord>> {
        self.txn
            .scan_prefix(&inode_prefix(id))?
            .into_iter()
            .map(|(key, bytes)| decode_inode(&key, &bytes))
            .collect()
    }

    /// The record of `id` live at `version`.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn inode_record(&self, id: &Identifier, version: Version) -> CoreResult<Option<InodeRecord>> {
        Ok(self
            .inode_records(id)?
            .into_iter()
            .find(|r| live_at(r.vmin, r.vmax, version)))
    }

    /// Attributes of `id` at `version`.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn load_inode(&self, id: &Identifier, version: Version) -> CoreResult<Option<InodeAttrs>> {
        Ok(self.inode_record(id, version)?.map(|r| r.attrs))
    }

    /// Links in `dir` live at `version`, in name order.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn load_links(&self, dir: &Identifier, version: Version) -> CoreResult<Vec<LinkRecord>> {
        let mut links = Vec::new();
        for (key, bytes) in self.txn.scan_prefix(&link_dir_prefix(dir))? {
            let record = decode_link(&key, &bytes)?;
            if live_at(record.vmin, record.vmax, version) {
                links.push(record);
            }
        }
        Ok(links)
    }

    /// The live link record of `(dir, name)` at `version`.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn link_record(&self, dir: &Identifier, name: &str, version: Version) -> CoreResult<Option<LinkRecord>> {
        for (key, bytes) in self.txn.scan_prefix(&link_name_prefix(dir, name))? {
            let record = decode_link(&key, &bytes)?;
            if live_at(record.vmin, record.vmax, version) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// The inode `(dir, name)` resolves to at `version`.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn lookup(&self, dir: &Identifier, name: &str, version: Version) -> CoreResult<Option<Identifier>> {
        Ok(self.link_record(dir, name, version)?.map(|l| l.inode))
    }

    /// Resolves a `/`-separated path from the root at `version`.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn resolve_path(&self, path: &str, version: Version) -> CoreResult<Option<Identifier>> {
        let mut current = Identifier::ROOT;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            match self.lookup(&current, part, version)? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// The smallest version with no history entry.
    #[must_use]
    pub fn first_unused_version(&self) -> Version {
        self.working
    }

    /// The whole visible tree at `version`.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn snapshot(&self, version: Version) -> CoreResult<TreeSnapshot> {
        let mut snapshot = TreeSnapshot::default();
        for (key, bytes) in self.txn.scan_prefix(&[INODE])? {
            let record = decode_inode(&key, &bytes)?;
            if live_at(record.vmin, record.vmax, version) {
                snapshot.inodes.insert(record.id, record.attrs);
            }
        }
        for (key, bytes) in self.txn.scan_prefix(&[LINK])? {
            let record = decode_link(&key, &bytes)?;
            if live_at(record.vmin, record.vmax, version) {
                snapshot.links.insert((record.dir, record.name), record.inode);
            }
        }
        Ok(snapshot)
    }
}

pub(crate) fn decode_inode(key: &[u8], bytes: &[u8]) -> CoreResult<InodeRecord> {
    let (id, vmin) = parse_inode_key(key)?;
    let value: InodeValue = from_cbor(bytes)?;
    Ok(InodeRecord {
        id,
        vmin,
        vmax: value.vmax,
        attrs: value.attrs,
    })
}

pub(crate) fn decode_link(key: &[u8], bytes: &[u8]) -> CoreResult<LinkRecord> {
    let (dir, name, vmin) = parse_link_key(key)?;
    let value: LinkValue = from_cbor(bytes)?;
    Ok(LinkRecord {
        dir,
        name,
        inode: value.inode,
        vmin,
        vmax: value.vmax,
    })
}
