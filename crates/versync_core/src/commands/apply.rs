//! Applying a stored diff to the working version.

use crate::engine::{Step, StepContext};
use crate::error::CoreResult;
use crate::store::VersionedStore;
use crate::types::HistoryEntry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, trace};
use versync_codec::{ChangeRecord, ContentHash, DiffReader, Identifier, Phase};

/// Applies a diff in three phases, a chunk of records per step.
///
/// Inode additions and changes go first so links may name inodes added by
/// the same diff; inode removals go last so link removals still see the
/// inode they detach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyCommand {
    /// The diff object.
    pub diff: ContentHash,
    /// Current phase.
    pub phase: Phase,
    /// Next record ordinal within the current phase pass.
    pub ordinal: u64,
    /// Byte offset of record `ordinal` in the unpacked diff.
    #[serde(default)]
    pub offset: u64,
    /// History entry sealing the working version once applied.
    pub seal: Option<HistoryEntry>,
    /// Tags attached to the sealed version.
    pub tags: BTreeMap<String, String>,
    /// Rename link additions that hit an existing name instead of failing.
    pub rename_collisions: bool,
}

impl ApplyCommand {
    /// Applies `diff` without sealing.
    #[must_use]
    pub fn new(diff: ContentHash) -> Self {
        Self {
            diff,
            phase: Phase::Inodes,
            ordinal: 0,
            offset: 0,
            seal: None,
            tags: BTreeMap::new(),
            rename_collisions: false,
        }
    }

    /// Applies `entry`'s diff and seals it as the working version.
    #[must_use]
    pub fn sealing(entry: HistoryEntry, tags: BTreeMap<String, String>) -> Self {
        let mut command = Self::new(entry.hash);
        command.tags = tags;
        command.seal = Some(entry);
        command
    }

    /// Enables collision renaming.
    #[must_use]
    pub fn renaming(mut self) -> Self {
        self.rename_collisions = true;
        self
    }

    pub(crate) fn execute(&mut self, ctx: &mut StepContext<'_, '_>) -> CoreResult<Step> {
        let raw = ctx.unpacked(&self.diff)?;
        let mut reader = DiffReader::resume_at(raw, self.ordinal, self.offset)?;

        let mut scanned = 0;
        while scanned < ctx.config.apply_chunk_size {
            let Some(next) = reader.next() else {
                return self.finish_phase(ctx.store);
            };
            let (_, record) = next?;
            if record.phase() == self.phase {
                apply_record(ctx.store, &record, self.rename_collisions)?;
            }
            scanned += 1;
        }
        self.ordinal = reader.ordinal();
        self.offset = reader.offset();
        trace!(diff = %self.diff, phase = ?self.phase, ordinal = self.ordinal, "apply chunk");
        Ok(Step::Again)
    }

    fn finish_phase(&mut self, store: &mut VersionedStore<'_>) -> CoreResult<Step> {
        if let Some(next) = self.phase.next() {
            self.phase = next;
            self.ordinal = 0;
            self.offset = 0;
            return Ok(Step::Again);
        }
        if let Some(entry) = &self.seal {
            store.seal(entry)?;
            for (key, value) in &self.tags {
                store.put_tag(entry.version, key, value)?;
            }
        } else {
            store.set_dirty(true)?;
        }
        debug!(diff = %self.diff, sealed = self.seal.is_some(), "diff applied");
        Ok(Step::Done)
    }
}

/// Applies one record at the working version.
///
/// # Errors
///
/// Any store error; a record that contradicts the store is a consistency
/// error.
pub fn apply_record(store: &mut VersionedStore<'_>, record: &ChangeRecord, rename_collisions: bool) -> CoreResult<()> {
    match record {
        ChangeRecord::InodeAdded { id, attrs } => store.create_inode(id, attrs.clone()),
        ChangeRecord::InodeChanged { id, changes } => store.change_inode(id, changes).map(|_| ()),
        ChangeRecord::InodeRemoved { id } => store.remove_inode(id),
        ChangeRecord::LinkAdded { dir, name, inode } => {
            let w = store.working_version();
            if rename_collisions && store.lookup(dir, name, w)?.is_some() {
                let renamed = free_name(store, dir, name)?;
                debug!(%dir, name, renamed, "link name collision");
                store.put_rename(dir, name, &renamed)?;
                store.add_link(dir, &renamed, inode)
            } else {
                store.add_link(dir, name, inode)
            }
        }
        ChangeRecord::LinkRemoved { dir, name } => {
            let target = resolve_renamed(store, dir, name, rename_collisions)?;
            if target != *name {
                store.remove_rename(dir, name);
            }
            store.unlink(dir, &target).map(|_| ())
        }
        ChangeRecord::LinkChanged { dir, name, inode } => {
            let target = resolve_renamed(store, dir, name, rename_collisions)?;
            store.change_link(dir, &target, inode)
        }
    }
}

fn resolve_renamed(store: &VersionedStore<'_>, dir: &Identifier, name: &str, rename_collisions: bool) -> CoreResult<String> {
    if rename_collisions {
        if let Some(renamed) = store.rename_for(dir, name)? {
            return Ok(renamed);
        }
    }
    Ok(name.to_string())
}

/// `name~N` with the smallest `N` that is free in `dir`.
pub(crate) fn free_name(store: &VersionedStore<'_>, dir: &Identifier, name: &str) -> CoreResult<String> {
    let w = store.working_version();
    let mut n = 1u64;
    loop {
        let candidate = format!("{name}~{n}");
        if store.lookup(dir, &candidate, w)?.is_none() {
            return Ok(candidate);
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use versync_codec::{InodeAttrs, ObjectKind, Timestamp};
    use versync_storage::MemoryKv;

    fn seeded(kv: &MemoryKv) -> VersionedStore<'_> {
        let mut store = VersionedStore::begin(kv).unwrap();
        store
            .create_inode(&Identifier::ROOT, InodeAttrs::new(ObjectKind::Directory, Timestamp::new(0, 0)))
            .unwrap();
        store.set_working_version(2).unwrap();
        store
    }

    #[test]
    fn colliding_link_is_renamed_and_tracked() {
        let kv = MemoryKv::new();
        let mut store = seeded(&kv);
        let root = Identifier::ROOT;
        let file = InodeAttrs::new(ObjectKind::File, Timestamp::new(0, 0));
        let (a, b, c) = (Identifier::new(), Identifier::new(), Identifier::new());
        for id in [a, b, c] {
            store.create_inode(&id, file.clone()).unwrap();
        }
        store.add_link(&root, "f", &a).unwrap();

        let add = |inode| ChangeRecord::LinkAdded {
            dir: root,
            name: "f".into(),
            inode,
        };
        apply_record(&mut store, &add(b), true).unwrap();
        assert_eq!(store.lookup(&root, "f~1", 2).unwrap(), Some(b));
        assert_eq!(store.rename_for(&root, "f").unwrap().as_deref(), Some("f~1"));

        assert!(matches!(
            apply_record(&mut store, &add(c), false),
            Err(crate::error::CoreError::LinkExists { .. })
        ));

        let remove = ChangeRecord::LinkRemoved {
            dir: root,
            name: "f".into(),
        };
        apply_record(&mut store, &remove, true).unwrap();
        assert_eq!(store.lookup(&root, "f~1", 2).unwrap(), None);
        assert_eq!(store.lookup(&root, "f", 2).unwrap(), Some(a));
        assert!(store.renames().unwrap().is_empty());
    }

    #[test]
    fn free_name_skips_taken_suffixes() {
        let kv = MemoryKv::new();
        let mut store = seeded(&kv);
        let root = Identifier::ROOT;
        let id = Identifier::new();
        store
            .create_inode(&id, InodeAttrs::new(ObjectKind::File, Timestamp::new(0, 0)))
            .unwrap();
        store.add_link(&root, "f~1", &id).unwrap();
        assert_eq!(free_name(&store, &root, "f").unwrap(), "f~2");
    }
}
