//! Property-based test generators using proptest.
//!
//! Working-tree operations are drawn over a small pool of names so that
//! sequences collide, nest and remove each other's entries.

use proptest::prelude::*;
use versync_codec::Timestamp;
use versync_core::{CoreError, Repository};

/// One mutation of the working version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeOp {
    /// Create a file.
    CreateFile {
        /// Target path.
        path: String,
        /// File content.
        data: Vec<u8>,
    },
    /// Overwrite a file.
    WriteFile {
        /// Target path.
        path: String,
        /// New content.
        data: Vec<u8>,
    },
    /// Create a directory.
    Mkdir {
        /// Target path.
        path: String,
    },
    /// Remove a file or empty directory.
    Remove {
        /// Target path.
        path: String,
    },
    /// Move an entry.
    Rename {
        /// Current path.
        from: String,
        /// New path.
        to: String,
    },
    /// Change permission bits.
    SetMode {
        /// Target path.
        path: String,
        /// New mode.
        mode: u32,
    },
    /// Change the modification time.
    Touch {
        /// Target path.
        path: String,
        /// New mtime in seconds.
        secs: i64,
    },
}

impl TreeOp {
    /// Applies the operation. Requests the tree cannot satisfy, such as
    /// creating an existing name, are policy errors and return `Ok(false)`.
    ///
    /// # Errors
    ///
    /// Returns any error other than a policy error.
    pub fn apply(&self, repo: &Repository) -> Result<bool, CoreError> {
        let result = match self {
            Self::CreateFile { path, data } => repo.create_file(path, data).map(|_| ()),
            Self::WriteFile { path, data } => repo.write_file(path, data),
            Self::Mkdir { path } => repo.mkdir(path).map(|_| ()),
            Self::Remove { path } => repo.remove(path),
            Self::Rename { from, to } => repo.rename(from, to),
            Self::SetMode { path, mode } => repo.set_mode(path, *mode),
            Self::Touch { path, secs } => repo.set_times(path, Timestamp::new(*secs, 0)),
        };
        match result {
            Ok(()) => Ok(true),
            Err(CoreError::Policy { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// The same operation with every path moved under `dir`.
    #[must_use]
    pub fn rooted(&self, dir: &str) -> Self {
        let under = |path: &str| format!("{}{path}", dir.trim_end_matches('/'));
        match self {
            Self::CreateFile { path, data } => Self::CreateFile {
                path: under(path),
                data: data.clone(),
            },
            Self::WriteFile { path, data } => Self::WriteFile {
                path: under(path),
                data: data.clone(),
            },
            Self::Mkdir { path } => Self::Mkdir { path: under(path) },
            Self::Remove { path } => Self::Remove { path: under(path) },
            Self::Rename { from, to } => Self::Rename {
                from: under(from),
                to: under(to),
            },
            Self::SetMode { path, mode } => Self::SetMode {
                path: under(path),
                mode: *mode,
            },
            Self::Touch { path, secs } => Self::Touch {
                path: under(path),
                secs: *secs,
            },
        }
    }
}

/// Applies `ops` in order; returns how many took effect.
///
/// # Errors
///
/// Returns the first error other than a policy error.
pub fn apply_ops(repo: &Repository, ops: &[TreeOp]) -> Result<usize, CoreError> {
    let mut applied = 0;
    for op in ops {
        if op.apply(repo)? {
            applied += 1;
        }
    }
    Ok(applied)
}

/// Strategy for paths over a pool of three names, up to two levels deep.
pub fn path_strategy() -> impl Strategy<Value = String> {
    let name = prop_oneof![Just("a"), Just("b"), Just("c")];
    prop::collection::vec(name, 1..=2).prop_map(|parts| format!("/{}", parts.join("/")))
}

/// Strategy for small file contents.
pub fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..64)
}

/// Strategy for a single operation.
pub fn tree_op_strategy() -> impl Strategy<Value = TreeOp> {
    prop_oneof![
        3 => (path_strategy(), content_strategy())
            .prop_map(|(path, data)| TreeOp::CreateFile { path, data }),
        2 => (path_strategy(), content_strategy())
            .prop_map(|(path, data)| TreeOp::WriteFile { path, data }),
        2 => path_strategy().prop_map(|path| TreeOp::Mkdir { path }),
        1 => path_strategy().prop_map(|path| TreeOp::Remove { path }),
        1 => (path_strategy(), path_strategy()).prop_map(|(from, to)| TreeOp::Rename { from, to }),
        1 => (path_strategy(), 0u32..0o1000).prop_map(|(path, mode)| TreeOp::SetMode { path, mode }),
        1 => (path_strategy(), 1i64..1_000_000).prop_map(|(path, secs)| TreeOp::Touch { path, secs }),
    ]
}

/// Strategy for a sequence of up to `max` operations.
pub fn tree_ops_strategy(max: usize) -> impl Strategy<Value = Vec<TreeOp>> {
    prop::collection::vec(tree_op_strategy(), 0..=max)
}

/// Strategy for a history: operation batches, each committed separately.
pub fn commits_strategy(max_commits: usize, max_ops: usize) -> impl Strategy<Value = Vec<Vec<TreeOp>>> {
    prop::collection::vec(tree_ops_strategy(max_ops), 1..=max_commits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestRepo;

    proptest! {
        #[test]
        fn test_paths_are_absolute(path in path_strategy()) {
            prop_assert!(path.starts_with('/'));
            prop_assert!(path.split('/').count() <= 3);
        }

        #[test]
        fn test_ops_never_fail_hard(ops in tree_ops_strategy(12)) {
            let repo = TestRepo::memory();
            let applied = apply_ops(&repo, &ops).unwrap();
            prop_assert!(applied <= ops.len());
            repo.verify().unwrap();
        }
    }

    #[test]
    fn test_invalid_ops_are_skipped() {
        let repo = TestRepo::memory();
        let op = TreeOp::Remove { path: "/a".into() };
        assert!(!op.apply(&repo).unwrap());
        let op = TreeOp::Mkdir { path: "/a".into() };
        assert!(op.apply(&repo).unwrap());
        assert!(!op.apply(&repo).unwrap());
    }

    #[test]
    fn test_rooted_moves_every_path() {
        let op = TreeOp::Rename {
            from: "/a".into(),
            to: "/b/c".into(),
        };
        assert_eq!(
            op.rooted("/m/"),
            TreeOp::Rename {
                from: "/m/a".into(),
                to: "/m/b/c".into(),
            }
        );
    }
}
