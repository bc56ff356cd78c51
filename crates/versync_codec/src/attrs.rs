//! Inode attributes and partial attribute changes.

use crate::id::ContentHash;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Type of a filesystem object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
    /// Character device.
    CharDevice,
    /// Block device.
    BlockDevice,
    /// Named pipe.
    Fifo,
    /// Unix socket.
    Socket,
}

impl ObjectKind {
    /// Single-character wire code.
    #[must_use]
    pub const fn code(self) -> char {
        match self {
            Self::File => 'f',
            Self::Directory => 'd',
            Self::Symlink => 'l',
            Self::CharDevice => 'c',
            Self::BlockDevice => 'b',
            Self::Fifo => 'p',
            Self::Socket => 's',
        }
    }

    /// Parses a wire code.
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "f" => Some(Self::File),
            "d" => Some(Self::Directory),
            "l" => Some(Self::Symlink),
            "c" => Some(Self::CharDevice),
            "b" => Some(Self::BlockDevice),
            "p" => Some(Self::Fifo),
            "s" => Some(Self::Socket),
            _ => None,
        }
    }
}

/// A point in time with nanosecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp {
    /// Seconds since the Unix epoch.
    pub secs: i64,
    /// Sub-second component, below 1_000_000_000.
    pub nanos: u32,
}

impl Timestamp {
    /// Creates a timestamp.
    #[must_use]
    pub const fn new(secs: i64, nanos: u32) -> Self {
        Self { secs, nanos }
    }

    /// The current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            secs: elapsed.as_secs() as i64,
            nanos: elapsed.subsec_nanos(),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.secs, self.nanos)
    }
}

/// Content reference of an inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Content {
    /// The object carries no content (directories, devices).
    None,
    /// Content is staged in the working version and not hashed yet.
    Pending,
    /// Content is stored under this hash.
    Hash(ContentHash),
}

impl Content {
    /// Returns the hash if the content is committed.
    #[must_use]
    pub const fn hash(&self) -> Option<ContentHash> {
        match self {
            Self::Hash(hash) => Some(*hash),
            _ => None,
        }
    }
}

/// Full attribute set of an inode record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeAttrs {
    /// Owner.
    pub uid: u32,
    /// Group.
    pub gid: u32,
    /// Permission bits.
    pub mode: u32,
    /// Object type.
    pub kind: ObjectKind,
    /// Content reference.
    pub content: Content,
    /// Symlink target; empty for other kinds.
    pub target: String,
    /// Content size in bytes.
    pub size: u64,
    /// Device major number.
    pub dev_major: u64,
    /// Device minor number.
    pub dev_minor: u64,
    /// Number of links naming this inode.
    pub nlink: u32,
    /// Creation time.
    pub ctime: Timestamp,
    /// Modification time.
    pub mtime: Timestamp,
}

impl InodeAttrs {
    /// Attributes for a fresh object of `kind` created at `now`.
    #[must_use]
    pub fn new(kind: ObjectKind, now: Timestamp) -> Self {
        let mode = match kind {
            ObjectKind::Directory => 0o755,
            ObjectKind::Symlink => 0o777,
            _ => 0o644,
        };
        Self {
            uid: 0,
            gid: 0,
            mode,
            kind,
            content: Content::None,
            target: String::new(),
            size: 0,
            dev_major: 0,
            dev_minor: 0,
            nlink: 1,
            ctime: now,
            mtime: now,
        }
    }

    /// Returns true for directories.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind == ObjectKind::Directory
    }
}

/// A partial update of [`InodeAttrs`]; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct AttrChanges {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub mode: Option<u32>,
    pub kind: Option<ObjectKind>,
    pub content: Option<Content>,
    pub target: Option<String>,
    pub size: Option<u64>,
    pub dev_major: Option<u64>,
    pub dev_minor: Option<u64>,
    pub nlink: Option<u32>,
    pub ctime: Option<Timestamp>,
    pub mtime: Option<Timestamp>,
}

fn changed<T: PartialEq + Clone>(old: &T, new: &T) -> Option<T> {
    (old != new).then(|| new.clone())
}

impl AttrChanges {
    /// The fields that differ from `old` to `new`, carrying `new` values.
    #[must_use]
    pub fn between(old: &InodeAttrs, new: &InodeAttrs) -> Self {
        Self {
            uid: changed(&old.uid, &new.uid),
            gid: changed(&old.gid, &new.gid),
            mode: changed(&old.mode, &new.mode),
            kind: changed(&old.kind, &new.kind),
            content: changed(&old.content, &new.content),
            target: changed(&old.target, &new.target),
            size: changed(&old.size, &new.size),
            dev_major: changed(&old.dev_major, &new.dev_major),
            dev_minor: changed(&old.dev_minor, &new.dev_minor),
            nlink: changed(&old.nlink, &new.nlink),
            ctime: changed(&old.ctime, &new.ctime),
            mtime: changed(&old.mtime, &new.mtime),
        }
    }

    /// Every field set to the value in `attrs`.
    #[must_use]
    pub fn full(attrs: &InodeAttrs) -> Self {
        Self {
            uid: Some(attrs.uid),
            gid: Some(attrs.gid),
            mode: Some(attrs.mode),
            kind: Some(attrs.kind),
            content: Some(attrs.content),
            target: Some(attrs.target.clone()),
            size: Some(attrs.size),
            dev_major: Some(attrs.dev_major),
            dev_minor: Some(attrs.dev_minor),
            nlink: Some(attrs.nlink),
            ctime: Some(attrs.ctime),
            mtime: Some(attrs.mtime),
        }
    }

    /// Returns `attrs` with the set fields replaced.
    #[must_use]
    pub fn apply_to(&self, attrs: &InodeAttrs) -> InodeAttrs {
        InodeAttrs {
            uid: self.uid.unwrap_or(attrs.uid),
            gid: self.gid.unwrap_or(attrs.gid),
            mode: self.mode.unwrap_or(attrs.mode),
            kind: self.kind.unwrap_or(attrs.kind),
            content: self.content.unwrap_or(attrs.content),
            target: self.target.clone().unwrap_or_else(|| attrs.target.clone()),
            size: self.size.unwrap_or(attrs.size),
            dev_major: self.dev_major.unwrap_or(attrs.dev_major),
            dev_minor: self.dev_minor.unwrap_or(attrs.dev_minor),
            nlink: self.nlink.unwrap_or(attrs.nlink),
            ctime: self.ctime.unwrap_or(attrs.ctime),
            mtime: self.mtime.unwrap_or(attrs.mtime),
        }
    }

    /// Folds a later change on top of this one.
    pub fn merge(&mut self, later: &Self) {
        macro_rules! fold {
            ($($field:ident),*) => {
                $(if later.$field.is_some() { self.$field = later.$field.clone(); })*
            };
        }
        fold!(uid, gid, mode, kind, content, target, size, dev_major, dev_minor, nlink, ctime, mtime);
    }

    /// Returns true if no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.field_names().is_empty()
    }

    /// Returns true if at least one field is set and all set fields are
    /// timestamps.
    #[must_use]
    pub fn only_times(&self) -> bool {
        let names = self.field_names();
        !names.is_empty() && names.iter().all(|n| *n == "ctime" || *n == "mtime")
    }

    /// Names of the set fields.
    #[must_use]
    pub fn field_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        macro_rules! collect {
            ($($field:ident),*) => {
                $(if self.$field.is_some() { names.push(stringify!($field)); })*
            };
        }
        collect!(uid, gid, mode, kind, content, target, size, dev_major, dev_minor, nlink, ctime, mtime);
        names
    }
}
