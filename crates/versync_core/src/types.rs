//! Core type definitions for Versync.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use versync_codec::{ContentHash, Identifier, InodeAttrs, Timestamp};

/// A version number. Committed versions start at 1.
pub type Version = u64;

/// `vmax` of a record that is still live in the working version.
pub const OPEN: Version = Version::MAX;

/// Committed history entry of one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// The version this entry produced.
    pub version: Version,
    /// Address of the diff that produced the version.
    pub hash: ContentHash,
    /// Who committed it.
    pub author: String,
    /// Commit message.
    pub message: String,
    /// When it was committed.
    pub timestamp: Timestamp,
}

impl fmt::Display for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "v{} {} {} {}",
            self.version,
            &self.hash.to_hex()[..12],
            self.author,
            self.message
        )
    }
}

/// A history entry together with the tags of its version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedEntry {
    /// The history entry.
    pub entry: HistoryEntry,
    /// Tags of `entry.version`.
    pub tags: BTreeMap<String, String>,
}

impl TaggedEntry {
    /// An entry without tags.
    #[must_use]
    pub fn untagged(entry: HistoryEntry) -> Self {
        Self {
            entry,
            tags: BTreeMap::new(),
        }
    }

    /// Metadata that re-commits this entry under a new version number.
    #[must_use]
    pub fn to_meta(&self) -> CommitMeta {
        CommitMeta {
            author: Some(self.entry.author.clone()),
            message: self.entry.message.clone(),
            timestamp: Some(self.entry.timestamp),
            tags: self.tags.clone(),
        }
    }
}

/// Metadata for a commit that is about to happen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMeta {
    /// Author; the repository default when `None`.
    pub author: Option<String>,
    /// Commit message.
    pub message: String,
    /// Timestamp; the current time when `None`.
    pub timestamp: Option<Timestamp>,
    /// Tags attached to the new version.
    pub tags: BTreeMap<String, String>,
}

impl CommitMeta {
    /// Metadata with just a message.
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }
}

/// A `(version, key, value)` annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Annotated version.
    pub version: Version,
    /// Tag key.
    pub key: String,
    /// Tag value.
    pub value: String,
}

/// One stored inode record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeRecord {
    /// The inode.
    pub id: Identifier,
    /// First version the record is live in.
    pub vmin: Version,
    /// Last version the record is live in; [`OPEN`] while live.
    pub vmax: Version,
    /// Attributes.
    pub attrs: InodeAttrs,
}

/// One stored link record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRecord {
    /// Containing directory.
    pub dir: Identifier,
    /// Entry name.
    pub name: String,
    /// Target inode.
    pub inode: Identifier,
    /// First version the record is live in.
    pub vmin: Version,
    /// Last version the record is live in; [`OPEN`] while live.
    pub vmax: Version,
}

/// Returns true if `[vmin, vmax]` contains `version`.
#[must_use]
pub const fn live_at(vmin: Version, vmax: Version, version: Version) -> bool {
    vmin <= version && version <= vmax
}

/// The visible tree at one version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeSnapshot {
    /// Live inodes.
    pub inodes: BTreeMap<Identifier, InodeAttrs>,
    /// Live links keyed by `(dir, name)`.
    pub links: BTreeMap<(Identifier, String), Identifier>,
}

/// Result of a driven operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The operation finished and the journal is gone.
    Completed,
    /// A conflict prompt was aborted; `continue` re-enters it.
    Suspended {
        /// Descriptor of the pending operation.
        operation: String,
    },
    /// The step budget ran out; `continue` resumes.
    Interrupted {
        /// Descriptor of the pending operation.
        operation: String,
    },
}

impl Outcome {
    /// Returns true for [`Outcome::Completed`].
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}
