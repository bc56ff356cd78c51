//! Replaying one side of a merge and attributing every change to the
//! object it affects.

use crate::error::{CoreError, CoreResult};
use crate::store::VersionedStore;
use crate::types::Version;
use std::collections::{BTreeMap, BTreeSet};
use versync_codec::{ChangeRecord, Diff, Identifier, InodeAttrs};

/// A link key.
pub type LinkKey = (Identifier, String);

/// One side's commits after the common version, with each record paired
/// with the inode it affects.
///
/// `l!` records are split into `l-` and `l+` so every record affects exactly
/// one inode. An `l-` affects whatever inode the name resolved to: first
/// looked up among links this replay already touched, then in the store at
/// the common version.
#[derive(Debug, Clone, Default)]
pub struct MergeHistory {
    common: Version,
    /// Attributed records, one list per commit.
    pub commits: Vec<Vec<(Identifier, ChangeRecord)>>,
    touched: BTreeSet<Identifier>,
    attrs: BTreeMap<Identifier, Option<InodeAttrs>>,
    links: BTreeMap<LinkKey, Option<Identifier>>,
}

impl MergeHistory {
    /// Replays `diffs` on top of the store at `common`.
    ///
    /// # Errors
    ///
    /// Returns a consistency error if a record names a link or inode that
    /// does not exist at that point of the replay.
    pub fn build(store: &VersionedStore<'_>, common: Version, diffs: &[Diff]) -> CoreResult<Self> {
        let mut history = Self {
            common,
            ..Self::default()
        };
        for diff in diffs {
            let mut commit = Vec::new();
            for record in diff.records() {
                history.attribute(store, record.clone(), &mut commit)?;
            }
            history.commits.push(commit);
        }
        Ok(history)
    }

    fn attribute(
        &mut self,
        store: &VersionedStore<'_>,
        record: ChangeRecord,
        out: &mut Vec<(Identifier, ChangeRecord)>,
    ) -> CoreResult<()> {
        match record {
            ChangeRecord::InodeAdded { id, ref attrs } => {
                self.attrs.insert(id, Some(attrs.clone()));
                self.touch(id, record, out);
            }
            ChangeRecord::InodeChanged { id, ref changes } => {
                let current = self.attrs_of(store, &id)?.ok_or(CoreError::InodeNotFound {
                    id,
                    version: self.common,
                })?;
                self.attrs.insert(id, Some(changes.apply_to(&current)));
                self.touch(id, record, out);
            }
            ChangeRecord::InodeRemoved { id } => {
                self.attrs.insert(id, None);
                self.touch(id, record, out);
            }
            ChangeRecord::LinkAdded { dir, ref name, inode } => {
                self.links.insert((dir, name.clone()), Some(inode));
                self.touch(inode, record, out);
            }
            ChangeRecord::LinkRemoved { dir, ref name } => {
                let owner = self.resolve(store, &dir, name)?;
                self.links.insert((dir, name.clone()), None);
                self.touch(owner, record, out);
            }
            ChangeRecord::LinkChanged { dir, name, inode } => {
                self.attribute(
                    store,
                    ChangeRecord::LinkRemoved {
                        dir,
                        name: name.clone(),
                    },
                    out,
                )?;
                self.attribute(store, ChangeRecord::LinkAdded { dir, name, inode }, out)?;
            }
        }
        Ok(())
    }

    fn touch(&mut self, id: Identifier, record: ChangeRecord, out: &mut Vec<(Identifier, ChangeRecord)>) {
        self.touched.insert(id);
        out.push((id, record));
    }

    fn resolve(&self, store: &VersionedStore<'_>, dir: &Identifier, name: &str) -> CoreResult<Identifier> {
        let found = match self.links.get(&(*dir, name.to_string())) {
            Some(session) => *session,
            None => store.lookup(dir, name, self.common)?,
        };
        found.ok_or_else(|| CoreError::LinkNotFound {
            dir: *dir,
            name: name.to_string(),
            version: self.common,
        })
    }

    /// Ids this side touched, in id order.
    #[must_use]
    pub fn touched(&self) -> &BTreeSet<Identifier> {
        &self.touched
    }

    /// Returns true if this side touched `id`.
    #[must_use]
    pub fn touches(&self, id: &Identifier) -> bool {
        self.touched.contains(id)
    }

    /// Attributes of `id` after this side's commits; `None` if it does not
    /// exist.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn attrs_of(&self, store: &VersionedStore<'_>, id: &Identifier) -> CoreResult<Option<InodeAttrs>> {
        match self.attrs.get(id) {
            Some(attrs) => Ok(attrs.clone()),
            None => store.load_inode(id, self.common),
        }
    }

    /// Links naming `id` after this side's commits.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn links_of(&self, store: &VersionedStore<'_>, id: &Identifier) -> CoreResult<BTreeSet<LinkKey>> {
        let mut links: BTreeSet<LinkKey> = store
            .links_to(id, self.common)?
            .into_iter()
            .filter(|key| !self.links.contains_key(key))
            .collect();
        links.extend(
            self.links
                .iter()
                .filter(|(_, target)| **target == Some(*id))
                .map(|(key, _)| key.clone()),
        );
        Ok(links)
    }
}
