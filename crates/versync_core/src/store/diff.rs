//! Diffs between two versions of the store.

use super::keys::{bucket_prefix, INODE, LINK};
use super::{decode_inode, decode_link, VersionedStore};
use crate::error::CoreResult;
use crate::types::{live_at, Version};
use std::collections::BTreeMap;
use versync_codec::{AttrChanges, ChangeRecord, Diff, Identifier, InodeAttrs};

impl VersionedStore<'_> {
    /// Change records from `a` to `b` for the ids and directories whose
    /// leading byte is `bucket`, unsorted.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn diff_bucket(&self, a: Version, b: Version, bucket: u8) -> CoreResult<Vec<ChangeRecord>> {
        let mut records = Vec::new();

        let mut before: BTreeMap<Identifier, InodeAttrs> = BTreeMap::new();
        let mut after: BTreeMap<Identifier, InodeAttrs> = BTreeMap::new();
        for (key, bytes) in self.txn.scan_prefix(&bucket_prefix(INODE, bucket))? {
            let record = decode_inode(&key, &bytes)?;
            if live_at(record.vmin, record.vmax, a) {
                before.insert(record.id, record.attrs.clone());
            }
            if live_at(record.vmin, record.vmax, b) {
                after.insert(record.id, record.attrs);
            }
        }
        for (id, new) in &after {
            match before.get(id) {
                None => records.push(ChangeRecord::InodeAdded {
                    id: *id,
                    attrs: new.clone(),
                }),
                Some(old) if old != new => records.push(ChangeRecord::InodeChanged {
                    id: *id,
                    changes: AttrChanges::between(old, new),
                }),
                Some(_) => {}
            }
        }
        for id in before.keys().filter(|id| !after.contains_key(id)) {
            records.push(ChangeRecord::InodeRemoved { id: *id });
        }

        let mut before: BTreeMap<(Identifier, String), Identifier> = BTreeMap::new();
        let mut after: BTreeMap<(Identifier, String), Identifier> = BTreeMap::new();
        for (key, bytes) in self.txn.scan_prefix(&bucket_prefix(LINK, bucket))? {
            let record = decode_link(&key, &bytes)?;
            if live_at(record.vmin, record.vmax, a) {
                before.insert((record.dir, record.name.clone()), record.inode);
            }
            if live_at(record.vmin, record.vmax, b) {
                after.insert((record.dir, record.name), record.inode);
            }
        }
        for ((dir, name), inode) in &after {
            match before.get(&(*dir, name.clone())) {
                None => records.push(ChangeRecord::LinkAdded {
                    dir: *dir,
                    name: name.clone(),
                    inode: *inode,
                }),
                Some(old) if old != inode => records.push(ChangeRecord::LinkChanged {
                    dir: *dir,
                    name: name.clone(),
                    inode: *inode,
                }),
                Some(_) => {}
            }
        }
        for (dir, name) in before.keys().filter(|key| !after.contains_key(*key)) {
            records.push(ChangeRecord::LinkRemoved {
                dir: *dir,
                name: name.clone(),
            });
        }

        Ok(records)
    }

    /// The canonical diff from `a` to `b`.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn diff(&self, a: Version, b: Version) -> CoreResult<Diff> {
        let mut records = Vec::new();
        for bucket in 0..=u8::MAX {
            records.extend(self.diff_bucket(a, b, bucket)?);
        }
        Ok(Diff::new(records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use versync_codec::{ObjectKind, Timestamp};
    use versync_storage::MemoryKv;

    #[test]
    fn diff_reports_every_kind_of_change() {
        let kv = MemoryKv::new();
        let root = Identifier::ROOT;
        let (kept, dropped, added) = (Identifier::new(), Identifier::new(), Identifier::new());
        let file = InodeAttrs::new(ObjectKind::File, Timestamp::new(1, 0));

        let mut store = VersionedStore::begin(&kv).unwrap();
        store
            .create_inode(&root, InodeAttrs::new(ObjectKind::Directory, Timestamp::new(1, 0)))
            .unwrap();
        store.create_inode(&kept, file.clone()).unwrap();
        store.create_inode(&dropped, file.clone()).unwrap();
        store.add_link(&root, "kept", &kept).unwrap();
        store.add_link(&root, "dropped", &dropped).unwrap();
        store.add_link(&root, "moved", &kept).unwrap();
        store.set_working_version(2).unwrap();

        let mut touched = file.clone();
        touched.mtime = Timestamp::new(9, 0);
        store.set_inode(&kept, touched).unwrap();
        store.unlink(&root, "dropped").unwrap();
        store.remove_inode(&dropped).unwrap();
        store.create_inode(&added, file).unwrap();
        store.add_link(&root, "added", &added).unwrap();
        store.change_link(&root, "moved", &added).unwrap();

        let diff = store.diff(1, 2).unwrap();
        let tags: Vec<&str> = diff.records().iter().map(ChangeRecord::tag).collect();
        assert_eq!(tags, vec!["i+", "i!", "l-", "l!", "l+", "i-"]);
        match &diff.records()[1] {
            ChangeRecord::InodeChanged { changes, .. } => {
                assert_eq!(changes.field_names(), vec!["mtime"]);
            }
            other => panic!("unexpected record {other:?}"),
        }
        assert!(store.diff(2, 2).unwrap().is_empty());
    }
}
