//! Assertions over repository invariants.

use crate::fixtures::all_snapshots;
use versync_core::{Repository, TreeSnapshot};

/// Asserts that no two records of one inode or link overlap in versions
/// and that every live link names a live inode.
pub fn assert_no_overlap(repo: &Repository) {
    if let Err(e) = repo.verify() {
        panic!("repository invariant violated: {e}");
    }
}

/// Asserts that two replicas hold the same history and the same trees at
/// every committed version.
pub fn assert_same_history(a: &Repository, b: &Repository) {
    let history_a: Vec<_> = a
        .history()
        .expect("Failed to read history")
        .into_iter()
        .map(|e| (e.version, e.hash))
        .collect();
    let history_b: Vec<_> = b
        .history()
        .expect("Failed to read history")
        .into_iter()
        .map(|e| (e.version, e.hash))
        .collect();
    assert_eq!(history_a, history_b, "histories differ");
    assert_eq!(all_snapshots(a), all_snapshots(b), "trees differ");
}

/// Asserts that the diff stored for each version takes the previous tree
/// to the next one.
pub fn assert_diffs_match_trees(repo: &Repository) {
    let history = repo.history().expect("Failed to read history");
    for pair in history.windows(2) {
        let (before, after) = (&pair[0], &pair[1]);
        let stored = repo.load_diff(&after.hash).expect("Failed to load diff");
        let computed = repo
            .diff(before.version, after.version)
            .expect("Failed to compute diff");
        assert_eq!(stored, computed, "diff of version {} differs", after.version);
    }
}

/// Asserts that `snapshot` holds no link to a missing inode.
pub fn assert_links_resolve(snapshot: &TreeSnapshot) {
    for ((dir, name), inode) in &snapshot.links {
        assert!(
            snapshot.inodes.contains_key(inode),
            "link {dir}/{name} names missing inode {inode}"
        );
        assert!(
            snapshot.inodes.contains_key(dir),
            "link {dir}/{name} lives in missing directory"
        );
    }
}
