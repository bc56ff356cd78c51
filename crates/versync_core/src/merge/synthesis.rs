//! Building the corrective diff and rewriting local commits.

use super::conflict::Conflict;
use super::history::{LinkKey, MergeHistory};
use super::report::Rescue;
use super::resolve::Resolution;
use crate::error::CoreResult;
use crate::store::VersionedStore;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};
use versync_codec::{AttrChanges, ChangeRecord, Diff, Identifier};

/// Output of synthesis.
#[derive(Debug, Clone, Default)]
pub struct Synthesis {
    /// Original id to duplicate id for "both" resolutions.
    pub substitutions: BTreeMap<Identifier, Identifier>,
    /// Records restoring local-resolved objects to their common state and
    /// creating the duplicates of both-resolved objects.
    pub corrective: Diff,
    /// Local commits with master-resolved changes dropped and ids
    /// substituted, one per original commit.
    pub local: Vec<Diff>,
    /// Links into removed directories moved under the root.
    pub rescued: Vec<Rescue>,
}

struct Plan<'h, 's, 'a> {
    store: &'s VersionedStore<'a>,
    master: &'h MergeHistory,
    resolutions: &'h BTreeMap<Identifier, Resolution>,
    /// Keys in removed directories whose link now lives under the root.
    moved: BTreeSet<LinkKey>,
    rescued: Vec<Rescue>,
}

impl Plan<'_, '_, '_> {
    /// A directory master removed that no resolution brings back.
    fn gone(&self, dir: &Identifier) -> CoreResult<bool> {
        if !self.master.touches(dir) || self.resolutions.get(dir) == Some(&Resolution::Local) {
            return Ok(false);
        }
        Ok(self.master.attrs_of(self.store, dir)?.is_none())
    }

    /// Rewrites a link record into a removed directory. Added links move
    /// under the root with the same name so their object stays reachable;
    /// later records on a moved key follow it. Anything else there is gone
    /// with the directory.
    fn relink(&mut self, record: &ChangeRecord) -> CoreResult<Option<ChangeRecord>> {
        let Some((dir, name)) = record.link_key() else {
            return Ok(Some(record.clone()));
        };
        if !self.gone(&dir)? {
            return Ok(Some(record.clone()));
        }
        let key = (dir, name.to_string());
        let rewritten = match record {
            ChangeRecord::LinkAdded { inode, .. } => {
                warn!(%dir, name, %inode, "directory removed by master; entry moved to the root");
                self.moved.insert(key);
                self.rescued.push(Rescue {
                    dir,
                    name: name.to_string(),
                    inode: *inode,
                });
                Some(ChangeRecord::LinkAdded {
                    dir: Identifier::ROOT,
                    name: name.to_string(),
                    inode: *inode,
                })
            }
            ChangeRecord::LinkChanged { inode, .. } if self.moved.contains(&key) => {
                Some(ChangeRecord::LinkChanged {
                    dir: Identifier::ROOT,
                    name: name.to_string(),
                    inode: *inode,
                })
            }
            ChangeRecord::LinkRemoved { .. } if self.moved.remove(&key) => Some(ChangeRecord::LinkRemoved {
                dir: Identifier::ROOT,
                name: name.to_string(),
            }),
            _ => None,
        };
        Ok(rewritten)
    }
}

/// Plans the corrective diff and the rewritten local commits.
///
/// Must run against the store at the common version, before it is
/// reverted or master commits are applied.
///
/// # Errors
///
/// Returns a storage or serialization error.
pub fn synthesize(
    store: &VersionedStore<'_>,
    master: &MergeHistory,
    local: &MergeHistory,
    conflicts: &[Conflict],
    resolutions: &BTreeMap<Identifier, Resolution>,
) -> CoreResult<Synthesis> {
    let mut plan = Plan {
        store,
        master,
        resolutions,
        moved: BTreeSet::new(),
        rescued: Vec::new(),
    };
    let mut synthesis = Synthesis::default();
    let mut corrective = Vec::new();

    for conflict in conflicts {
        let id = conflict.id;
        match resolutions.get(&id) {
            Some(Resolution::Local) => {
                match (&conflict.common, &conflict.master) {
                    (Some(common), Some(theirs)) if common != theirs => {
                        corrective.push(ChangeRecord::InodeChanged {
                            id,
                            changes: AttrChanges::between(theirs, common),
                        });
                    }
                    (Some(common), None) => corrective.push(ChangeRecord::InodeAdded {
                        id,
                        attrs: common.clone(),
                    }),
                    (None, Some(_)) => corrective.push(ChangeRecord::InodeRemoved { id }),
                    _ => {}
                }
                let wanted = if conflict.common.is_some() {
                    conflict.common_links.clone()
                } else {
                    Default::default()
                };
                for (dir, name) in conflict.master_links.difference(&wanted) {
                    corrective.push(ChangeRecord::LinkRemoved {
                        dir: *dir,
                        name: name.clone(),
                    });
                }
                for (dir, name) in wanted.difference(&conflict.master_links) {
                    let record = ChangeRecord::LinkAdded {
                        dir: *dir,
                        name: name.clone(),
                        inode: id,
                    };
                    corrective.extend(plan.relink(&record)?);
                }
            }
            Some(Resolution::Both) => {
                let duplicate = Identifier::new();
                synthesis.substitutions.insert(id, duplicate);
                if let Some(common) = &conflict.common {
                    corrective.push(ChangeRecord::InodeAdded {
                        id: duplicate,
                        attrs: common.clone(),
                    });
                    for (dir, name) in &conflict.common_links {
                        let record = ChangeRecord::LinkAdded {
                            dir: *dir,
                            name: name.clone(),
                            inode: duplicate,
                        };
                        corrective.extend(plan.relink(&record)?);
                    }
                }
                debug!(%id, %duplicate, "object duplicated");
            }
            Some(Resolution::Master) | None => {}
        }
    }
    synthesis.corrective = Diff::new(corrective);

    for commit in &local.commits {
        let mut records = Vec::with_capacity(commit.len());
        for (owner, record) in commit {
            if resolutions.get(owner) == Some(&Resolution::Master) {
                continue;
            }
            if let Some(record) = plan.relink(record)? {
                records.push(substitute(&record, &synthesis.substitutions));
            }
        }
        synthesis.local.push(Diff::new(records));
    }
    synthesis.rescued = plan.rescued;
    Ok(synthesis)
}

/// `record` with every id found in `substitutions` replaced.
#[must_use]
pub fn substitute(record: &ChangeRecord, substitutions: &BTreeMap<Identifier, Identifier>) -> ChangeRecord {
    let map = |id: &Identifier| substitutions.get(id).copied().unwrap_or(*id);
    match record {
        ChangeRecord::InodeAdded { id, attrs } => ChangeRecord::InodeAdded {
            id: map(id),
            attrs: attrs.clone(),
        },
        ChangeRecord::InodeRemoved { id } => ChangeRecord::InodeRemoved { id: map(id) },
        ChangeRecord::InodeChanged { id, changes } => ChangeRecord::InodeChanged {
            id: map(id),
            changes: changes.clone(),
        },
        ChangeRecord::LinkAdded { dir, name, inode } => ChangeRecord::LinkAdded {
            dir: map(dir),
            name: name.clone(),
            inode: map(inode),
        },
        ChangeRecord::LinkRemoved { dir, name } => ChangeRecord::LinkRemoved {
            dir: map(dir),
            name: name.clone(),
        },
        ChangeRecord::LinkChanged { dir, name, inode } => ChangeRecord::LinkChanged {
            dir: map(dir),
            name: name.clone(),
            inode: map(inode),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitute_rewrites_every_id_field() {
        let (from, to, other) = (Identifier::new(), Identifier::new(), Identifier::new());
        let subs = BTreeMap::from([(from, to)]);
        let record = ChangeRecord::LinkAdded {
            dir: other,
            name: "n".into(),
            inode: from,
        };
        assert_eq!(
            substitute(&record, &subs),
            ChangeRecord::LinkAdded {
                dir: other,
                name: "n".into(),
                inode: to,
            }
        );
        let removed = ChangeRecord::InodeRemoved { id: other };
        assert_eq!(substitute(&removed, &subs), removed);
    }
}
