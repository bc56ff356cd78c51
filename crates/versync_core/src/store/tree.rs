//! Inode and link mutators bound to the working version, revert, and the
//! overlap check.

use super::keys::{
    backlink_key, backlink_prefix, bucket_prefix, from_cbor, inode_key, link_key,
    parse_backlink_key, InodeValue, LinkValue, BACKLINK, INODE, LINK,
};
use super::{decode_inode, decode_link, VersionedStore};
use crate::error::{CoreError, CoreResult};
use crate::types::{live_at, Version, OPEN};
use std::collections::BTreeMap;
use tracing::trace;
use versync_codec::{AttrChanges, Identifier, InodeAttrs};

/// Counts gathered by [`VersionedStore::verify`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Distinct inode ids.
    pub inodes: usize,
    /// Inode records.
    pub inode_records: usize,
    /// Distinct `(dir, name)` keys.
    pub links: usize,
    /// Link records.
    pub link_records: usize,
}

impl VersionedStore<'_> {
    fn put_inode(&mut self, id: &Identifier, vmin: Version, vmax: Version, attrs: InodeAttrs) -> CoreResult<()> {
        self.put_value(inode_key(id, vmin), &InodeValue { vmax, attrs })
    }

    fn put_link(&mut self, dir: &Identifier, name: &str, inode: &Identifier, vmin: Version, vmax: Version) -> CoreResult<()> {
        self.put_value(link_key(dir, name, vmin), &LinkValue { vmax, inode: *inode })?;
        self.put_value(backlink_key(inode, dir, name, vmin), &vmax)
    }

    fn delete_link(&mut self, dir: &Identifier, name: &str, inode: &Identifier, vmin: Version) {
        self.txn.delete(link_key(dir, name, vmin));
        self.txn.delete(backlink_key(inode, dir, name, vmin));
    }

    /// Adds a new inode live from the working version on.
    ///
    /// # Errors
    ///
    /// Returns a consistency error if the id is already live.
    pub fn create_inode(&mut self, id: &Identifier, attrs: InodeAttrs) -> CoreResult<()> {
        let w = self.working;
        if self.inode_record(id, w)?.is_some() {
            return Err(CoreError::consistency(format!(
                "inode {id} already exists at version {w}"
            )));
        }
        trace!(%id, version = w, "create inode");
        self.put_inode(id, w, OPEN, attrs)
    }

    /// Replaces the attributes of a live inode.
    ///
    /// # Errors
    ///
    /// Returns `InodeNotFound` if `id` has no live record.
    pub fn set_inode(&mut self, id: &Identifier, attrs: InodeAttrs) -> CoreResult<()> {
        let w = self.working;
        let record = self
            .inode_record(id, w)?
            .ok_or(CoreError::InodeNotFound { id: *id, version: w })?;
        if record.vmin < w {
            self.put_inode(id, record.vmin, w - 1, record.attrs)?;
        }
        self.put_inode(id, w, OPEN, attrs)
    }

    /// Applies a partial attribute update to a live inode.
    ///
    /// # Errors
    ///
    /// Returns `InodeNotFound` if `id` has no live record.
    pub fn change_inode(&mut self, id: &Identifier, changes: &AttrChanges) -> CoreResult<InodeAttrs> {
        let w = self.working;
        let current = self
            .load_inode(id, w)?
            .ok_or(CoreError::InodeNotFound { id: *id, version: w })?;
        let updated = changes.apply_to(&current);
        if updated != current {
            self.set_inode(id, updated.clone())?;
        }
        Ok(updated)
    }

    /// Ends the life of an inode at the working version.
    ///
    /// # Errors
    ///
    /// Returns `InodeNotFound` if `id` has no live record.
    pub fn remove_inode(&mut self, id: &Identifier) -> CoreResult<()> {
        let w = self.working;
        let record = self
            .inode_record(id, w)?
            .ok_or(CoreError::InodeNotFound { id: *id, version: w })?;
        trace!(%id, version = w, "remove inode");
        if record.vmin == w {
            self.txn.delete(inode_key(id, w));
            Ok(())
        } else {
            self.put_inode(id, record.vmin, w - 1, record.attrs)
        }
    }

    /// Adds `name` in `dir` pointing at `inode`.
    ///
    /// # Errors
    ///
    /// - `LinkExists` if the name already resolves
    /// - `InodeNotFound` if the target or the directory is not live
    /// - a consistency error if `dir` is not a directory
    pub fn add_link(&mut self, dir: &Identifier, name: &str, inode: &Identifier) -> CoreResult<()> {
        let w = self.working;
        if self.link_record(dir, name, w)?.is_some() {
            return Err(CoreError::LinkExists {
                dir: *dir,
                name: name.to_string(),
                version: w,
            });
        }
        let parent = self
            .load_inode(dir, w)?
            .ok_or(CoreError::InodeNotFound { id: *dir, version: w })?;
        if !parent.is_dir() {
            return Err(CoreError::consistency(format!(
                "link {dir}/{name} placed in a non-directory"
            )));
        }
        if self.inode_record(inode, w)?.is_none() {
            return Err(CoreError::InodeNotFound {
                id: *inode,
                version: w,
            });
        }
        trace!(%dir, name, %inode, version = w, "add link");
        self.put_link(dir, name, inode, w, OPEN)
    }

    /// Removes `name` from `dir`, returning the inode it named.
    ///
    /// # Errors
    ///
    /// Returns `LinkNotFound` if the name does not resolve.
    pub fn unlink(&mut self, dir: &Identifier, name: &str) -> CoreResult<Identifier> {
        let w = self.working;
        let record = self
            .link_record(dir, name, w)?
            .ok_or_else(|| CoreError::LinkNotFound {
                dir: *dir,
                name: name.to_string(),
                version: w,
            })?;
        trace!(%dir, name, version = w, "unlink");
        if record.vmin == w {
            self.delete_link(dir, name, &record.inode, w);
        } else {
            self.put_link(dir, name, &record.inode, record.vmin, w - 1)?;
        }
        Ok(record.inode)
    }

    /// Points an existing name at a different inode.
    ///
    /// # Errors
    ///
    /// See [`Self::unlink`] and [`Self::add_link`].
    pub fn change_link(&mut self, dir: &Identifier, name: &str, inode: &Identifier) -> CoreResult<()> {
        self.unlink(dir, name)?;
        self.add_link(dir, name, inode)
    }

    /// `(dir, name)` pairs naming `inode` at `version`.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn links_to(&self, inode: &Identifier, version: Version) -> CoreResult<Vec<(Identifier, String)>> {
        let mut names = Vec::new();
        for (key, bytes) in self.txn.scan_prefix(&backlink_prefix(inode))? {
            let (_, dir, name, vmin) = parse_backlink_key(&key)?;
            let vmax: Version = from_cbor(&bytes)?;
            if live_at(vmin, vmax, version) {
                names.push((dir, name));
            }
        }
        Ok(names)
    }

    /// Reverts the records of one identifier bucket to `target`.
    ///
    /// Records created after `target` are deleted; records live at
    /// `target` become live again.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn revert_bucket(&mut self, target: Version, bucket: u8) -> CoreResult<usize> {
        let mut touched = 0;
        for (key, bytes) in self.txn.scan_prefix(&bucket_prefix(INODE, bucket))? {
            let record = decode_inode(&key, &bytes)?;
            if record.vmin > target {
                self.txn.delete(key);
                touched += 1;
            } else if record.vmax >= target && record.vmax != OPEN {
                self.put_inode(&record.id, record.vmin, OPEN, record.attrs)?;
                touched += 1;
            }
        }
        for (key, bytes) in self.txn.scan_prefix(&bucket_prefix(LINK, bucket))? {
            let record = decode_link(&key, &bytes)?;
            if record.vmin > target {
                self.txn.delete(key);
                touched += 1;
            } else if record.vmax >= target && record.vmax != OPEN {
                self.put_value(key, &LinkValue { vmax: OPEN, inode: record.inode })?;
                touched += 1;
            }
        }
        for (key, bytes) in self.txn.scan_prefix(&bucket_prefix(BACKLINK, bucket))? {
            let (_, _, _, vmin) = parse_backlink_key(&key)?;
            let vmax: Version = from_cbor(&bytes)?;
            if vmin > target {
                self.txn.delete(key);
            } else if vmax >= target && vmax != OPEN {
                self.put_value(key, &OPEN)?;
            }
        }
        Ok(touched)
    }

    /// Checks that no two records of one key overlap.
    ///
    /// # Errors
    ///
    /// Returns `Overlap` naming the first offending key, or a consistency
    /// error for an inverted interval.
    pub fn verify(&self) -> CoreResult<VerifyReport> {
        let mut report = VerifyReport::default();

        let mut inode_ranges: BTreeMap<Identifier, Vec<(Version, Version)>> = BTreeMap::new();
        for (key, bytes) in self.txn.scan_prefix(&[INODE])? {
            let record = decode_inode(&key, &bytes)?;
            inode_ranges
                .entry(record.id)
                .or_default()
                .push((record.vmin, record.vmax));
            report.inode_records += 1;
        }
        for (id, ranges) in &inode_ranges {
            check_ranges(&format!("inode {id}"), ranges)?;
        }
        report.inodes = inode_ranges.len();

        let mut link_ranges: BTreeMap<(Identifier, String), Vec<(Version, Version)>> = BTreeMap::new();
        for (key, bytes) in self.txn.scan_prefix(&[LINK])? {
            let record = decode_link(&key, &bytes)?;
            let backlink = self
                .txn
                .get(&backlink_key(&record.inode, &record.dir, &record.name, record.vmin))?;
            if backlink.is_none() {
                return Err(CoreError::consistency(format!(
                    "link {}/{} at {} has no reverse index entry",
                    record.dir, record.name, record.vmin
                )));
            }
            link_ranges
                .entry((record.dir, record.name))
                .or_default()
                .push((record.vmin, record.vmax));
            report.link_records += 1;
        }
        for ((dir, name), ranges) in &link_ranges {
            check_ranges(&format!("link {dir}/{name}"), ranges)?;
        }
        report.links = link_ranges.len();
        Ok(report)
    }
}

/// `ranges` arrive sorted by `vmin` because keys sort that way.
fn check_ranges(what: &str, ranges: &[(Version, Version)]) -> CoreResult<()> {
    for (vmin, vmax) in ranges {
        if vmax < vmin {
            return Err(CoreError::consistency(format!(
                "{what} has inverted range [{vmin}, {vmax}]"
            )));
        }
    }
    for pair in ranges.windows(2) {
        let ((a_min, a_max), (b_min, b_max)) = (pair[0], pair[1]);
        if a_max >= b_min {
            return Err(CoreError::Overlap {
                message: format!("{what}: [{a_min}, {a_max}] and [{b_min}, {b_max}]"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use versync_codec::{ObjectKind, Timestamp};
    use versync_storage::{KvStore, MemoryKv};

    fn dir_attrs() -> InodeAttrs {
        InodeAttrs::new(ObjectKind::Directory, Timestamp::new(1, 0))
    }

    fn file_attrs(size: u64) -> InodeAttrs {
        let mut attrs = InodeAttrs::new(ObjectKind::File, Timestamp::new(1, 0));
        attrs.size = size;
        attrs
    }

    /// Root created at version 1 and sealed.
    fn seeded(kv: &MemoryKv) {
        let mut store = VersionedStore::begin(kv).unwrap();
        store.create_inode(&Identifier::ROOT, dir_attrs()).unwrap();
        store.set_working_version(2).unwrap();
        store.commit().unwrap();
    }

    #[test]
    fn supersede_narrows_old_record() {
        let kv = MemoryKv::new();
        seeded(&kv);
        let id = Identifier::new();
        let mut store = VersionedStore::begin(&kv).unwrap();
        store.create_inode(&id, file_attrs(1)).unwrap();
        store.set_working_version(3).unwrap();
        store.set_inode(&id, file_attrs(2)).unwrap();

        let records = store.inode_records(&id).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!((records[0].vmin, records[0].vmax), (2, 2));
        assert_eq!((records[1].vmin, records[1].vmax), (3, OPEN));
        assert_eq!(store.load_inode(&id, 2).unwrap().unwrap().size, 1);
        assert_eq!(store.load_inode(&id, 3).unwrap().unwrap().size, 2);
        store.verify().unwrap();
    }

    #[test]
    fn change_within_working_version_is_in_place() {
        let kv = MemoryKv::new();
        seeded(&kv);
        let id = Identifier::new();
        let mut store = VersionedStore::begin(&kv).unwrap();
        store.create_inode(&id, file_attrs(1)).unwrap();
        store.set_inode(&id, file_attrs(5)).unwrap();
        assert_eq!(store.inode_records(&id).unwrap().len(), 1);
    }

    #[test]
    fn link_lifecycle() {
        let kv = MemoryKv::new();
        seeded(&kv);
        let id = Identifier::new();
        let root = Identifier::ROOT;
        let mut store = VersionedStore::begin(&kv).unwrap();
        store.create_inode(&id, file_attrs(0)).unwrap();
        store.add_link(&root, "a", &id).unwrap();
        assert!(matches!(
            store.add_link(&root, "a", &id),
            Err(CoreError::LinkExists { .. })
        ));
        assert_eq!(store.lookup(&root, "a", 2).unwrap(), Some(id));
        assert_eq!(store.links_to(&id, 2).unwrap(), vec![(root, "a".to_string())]);

        store.set_working_version(3).unwrap();
        assert_eq!(store.unlink(&root, "a").unwrap(), id);
        assert_eq!(store.lookup(&root, "a", 3).unwrap(), None);
        assert_eq!(store.lookup(&root, "a", 2).unwrap(), Some(id));
        assert!(store.links_to(&id, 3).unwrap().is_empty());
        assert!(matches!(
            store.unlink(&root, "a"),
            Err(CoreError::LinkNotFound { .. })
        ));
    }

    #[test]
    fn link_to_unknown_inode_fails() {
        let kv = MemoryKv::new();
        seeded(&kv);
        let mut store = VersionedStore::begin(&kv).unwrap();
        let err = store
            .add_link(&Identifier::ROOT, "ghost", &Identifier::new())
            .unwrap_err();
        assert!(matches!(err, CoreError::InodeNotFound { .. }));
    }

    #[test]
    fn revert_bucket_restores_target_state() {
        let kv = MemoryKv::new();
        seeded(&kv);
        let keep = Identifier::new();
        let root = Identifier::ROOT;
        let mut store = VersionedStore::begin(&kv).unwrap();
        store.create_inode(&keep, file_attrs(1)).unwrap();
        store.add_link(&root, "keep", &keep).unwrap();
        store.set_working_version(3).unwrap();
        let later = Identifier::new();
        store.create_inode(&later, file_attrs(9)).unwrap();
        store.add_link(&root, "later", &later).unwrap();
        store.set_inode(&keep, file_attrs(2)).unwrap();
        store.unlink(&root, "keep").unwrap();

        for bucket in 0..=u8::MAX {
            store.revert_bucket(2, bucket).unwrap();
        }
        store.set_working_version(3).unwrap();

        assert!(store.inode_records(&later).unwrap().is_empty());
        assert_eq!(store.lookup(&root, "later", 3).unwrap(), None);
        assert_eq!(store.load_inode(&keep, 3).unwrap().unwrap().size, 1);
        assert_eq!(store.lookup(&root, "keep", 3).unwrap(), Some(keep));
        assert_eq!(store.links_to(&keep, 3).unwrap().len(), 1);
        store.verify().unwrap();
    }

    #[test]
    fn verify_detects_overlap() {
        let kv = MemoryKv::new();
        seeded(&kv);
        let id = Identifier::new();
        let mut store = VersionedStore::begin(&kv).unwrap();
        store.put_inode(&id, 1, 5, file_attrs(0)).unwrap();
        store.put_inode(&id, 4, OPEN, file_attrs(1)).unwrap();
        assert!(matches!(store.verify(), Err(CoreError::Overlap { .. })));
    }

    #[test]
    fn rollback_discards_mutations() {
        let kv = MemoryKv::new();
        seeded(&kv);
        let id = Identifier::new();
        let mut store = VersionedStore::begin(&kv).unwrap();
        store.create_inode(&id, file_attrs(0)).unwrap();
        store.rollback();
        let store = VersionedStore::begin(&kv as &dyn KvStore).unwrap();
        assert!(store.inode_records(&id).unwrap().is_empty());
        assert_eq!(store.working_version(), 2);
    }
}
