//! Change records and their deterministic order.

use crate::attrs::{AttrChanges, InodeAttrs};
use crate::id::Identifier;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Wire tag of [`ChangeRecord::InodeAdded`].
pub const TAG_INODE_ADDED: &str = "i+";
/// Wire tag of [`ChangeRecord::InodeRemoved`].
pub const TAG_INODE_REMOVED: &str = "i-";
/// Wire tag of [`ChangeRecord::InodeChanged`].
pub const TAG_INODE_CHANGED: &str = "i!";
/// Wire tag of [`ChangeRecord::LinkAdded`].
pub const TAG_LINK_ADDED: &str = "l+";
/// Wire tag of [`ChangeRecord::LinkRemoved`].
pub const TAG_LINK_REMOVED: &str = "l-";
/// Wire tag of [`ChangeRecord::LinkChanged`].
pub const TAG_LINK_CHANGED: &str = "l!";

/// Number of fields following each tag.
#[must_use]
pub fn field_count(tag: &str) -> Option<usize> {
    match tag {
        TAG_INODE_ADDED | TAG_INODE_CHANGED => Some(15),
        TAG_INODE_REMOVED => Some(1),
        TAG_LINK_ADDED | TAG_LINK_CHANGED => Some(3),
        TAG_LINK_REMOVED => Some(2),
        _ => None,
    }
}

/// Application phase of a record.
///
/// Links may reference inodes added by the same diff, and inode removals
/// must not run before the link operations that still observe them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Inode additions and changes.
    Inodes = 0,
    /// Link additions, removals and changes.
    Links = 1,
    /// Inode removals.
    Removals = 2,
}

impl Phase {
    /// All phases in application order.
    pub const ALL: [Self; 3] = [Self::Inodes, Self::Links, Self::Removals];

    /// The phase after this one.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Inodes => Some(Self::Links),
            Self::Links => Some(Self::Removals),
            Self::Removals => None,
        }
    }
}

/// One elementary change between two versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeRecord {
    /// A new inode with its full attributes.
    InodeAdded {
        /// The new inode.
        id: Identifier,
        /// Its attributes.
        attrs: InodeAttrs,
    },
    /// An inode ceased to exist.
    InodeRemoved {
        /// The removed inode.
        id: Identifier,
    },
    /// Some attributes of an inode changed.
    InodeChanged {
        /// The changed inode.
        id: Identifier,
        /// The new values of the changed fields.
        changes: AttrChanges,
    },
    /// A directory entry appeared.
    LinkAdded {
        /// Containing directory.
        dir: Identifier,
        /// Entry name.
        name: String,
        /// Target inode.
        inode: Identifier,
    },
    /// A directory entry disappeared.
    LinkRemoved {
        /// Containing directory.
        dir: Identifier,
        /// Entry name.
        name: String,
    },
    /// A directory entry now names a different inode.
    LinkChanged {
        /// Containing directory.
        dir: Identifier,
        /// Entry name.
        name: String,
        /// New target inode.
        inode: Identifier,
    },
}

impl ChangeRecord {
    /// Wire tag.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::InodeAdded { .. } => TAG_INODE_ADDED,
            Self::InodeRemoved { .. } => TAG_INODE_REMOVED,
            Self::InodeChanged { .. } => TAG_INODE_CHANGED,
            Self::LinkAdded { .. } => TAG_LINK_ADDED,
            Self::LinkRemoved { .. } => TAG_LINK_REMOVED,
            Self::LinkChanged { .. } => TAG_LINK_CHANGED,
        }
    }

    /// Phase in which the record is applied.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        match self {
            Self::InodeAdded { .. } | Self::InodeChanged { .. } => Phase::Inodes,
            Self::LinkAdded { .. } | Self::LinkRemoved { .. } | Self::LinkChanged { .. } => {
                Phase::Links
            }
            Self::InodeRemoved { .. } => Phase::Removals,
        }
    }

    /// Position within the phase; link removals sort before additions so a
    /// name freed by the diff can be reused by it.
    const fn rank(&self) -> u8 {
        match self {
            Self::InodeAdded { .. } | Self::LinkRemoved { .. } | Self::InodeRemoved { .. } => 0,
            Self::InodeChanged { .. } | Self::LinkChanged { .. } => 1,
            Self::LinkAdded { .. } => 2,
        }
    }

    /// The inode a record is about, for inode records.
    #[must_use]
    pub const fn inode_id(&self) -> Option<Identifier> {
        match self {
            Self::InodeAdded { id, .. }
            | Self::InodeRemoved { id }
            | Self::InodeChanged { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// The `(dir, name)` key, for link records.
    #[must_use]
    pub fn link_key(&self) -> Option<(Identifier, &str)> {
        match self {
            Self::LinkAdded { dir, name, .. }
            | Self::LinkRemoved { dir, name }
            | Self::LinkChanged { dir, name, .. } => Some((*dir, name.as_str())),
            _ => None,
        }
    }

    /// Deterministic total order used before serialization.
    #[must_use]
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        (self.phase(), self.rank())
            .cmp(&(other.phase(), other.rank()))
            .then_with(|| match (self.inode_id(), other.inode_id()) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => self.link_key().cmp(&other.link_key()),
            })
    }
}

/// Sorts records into canonical order.
pub fn sort_records(records: &mut [ChangeRecord]) {
    records.sort_by(ChangeRecord::canonical_cmp);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::{ObjectKind, Timestamp};

    #[test]
    fn field_counts_match_wire_table() {
        assert_eq!(field_count("i+"), Some(15));
        assert_eq!(field_count("i!"), Some(15));
        assert_eq!(field_count("i-"), Some(1));
        assert_eq!(field_count("l+"), Some(3));
        assert_eq!(field_count("l!"), Some(3));
        assert_eq!(field_count("l-"), Some(2));
        assert_eq!(field_count("x?"), None);
    }

    #[test]
    fn sorting_orders_phases() {
        let id = Identifier::new();
        let mut records = vec![
            ChangeRecord::InodeRemoved { id },
            ChangeRecord::LinkAdded {
                dir: Identifier::ROOT,
                name: "b".into(),
                inode: id,
            },
            ChangeRecord::LinkRemoved {
                dir: Identifier::ROOT,
                name: "z".into(),
            },
            ChangeRecord::InodeAdded {
                id,
                attrs: InodeAttrs::new(ObjectKind::File, Timestamp::default()),
            },
        ];
        sort_records(&mut records);
        let tags: Vec<_> = records.iter().map(ChangeRecord::tag).collect();
        assert_eq!(tags, vec!["i+", "l-", "l+", "i-"]);
    }

    #[test]
    fn links_sort_by_key_within_rank() {
        let mut records = vec![
            ChangeRecord::LinkAdded {
                dir: Identifier::ROOT,
                name: "b".into(),
                inode: Identifier::new(),
            },
            ChangeRecord::LinkAdded {
                dir: Identifier::ROOT,
                name: "a".into(),
                inode: Identifier::new(),
            },
        ];
        sort_records(&mut records);
        assert_eq!(records[0].link_key().map(|(_, n)| n), Some("a"));
    }

    #[test]
    fn phase_sequence() {
        assert_eq!(Phase::Inodes.next(), Some(Phase::Links));
        assert_eq!(Phase::Links.next(), Some(Phase::Removals));
        assert_eq!(Phase::Removals.next(), None);
    }
}
