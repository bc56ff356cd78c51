//! Property tests over generated histories.

use proptest::prelude::*;
use proptest::sample::Index;
use versync_core::{NoPrompt, Outcome, RepoConfig};
use versync_testkit::prelude::*;

fn build_history(commits: &[Vec<TreeOp>]) -> TestRepo {
    let repo = TestRepo::memory();
    for (i, ops) in commits.iter().enumerate() {
        apply_ops(&repo, ops).unwrap();
        repo.commit(&format!("commit {i}")).unwrap();
    }
    repo
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn committed_trees_are_stable(commits in commits_strategy(5, 8)) {
        let repo = build_history(&commits);
        let before = all_snapshots(&repo);
        for (_, snapshot) in &before {
            assert_links_resolve(snapshot);
        }
        repo.create_file("/scratch", b"uncommitted").unwrap();
        repo.mkdir("/scratch-dir").unwrap();
        prop_assert_eq!(all_snapshots(&repo), before);
        assert_no_overlap(&repo);
        assert_diffs_match_trees(&repo);
    }

    #[test]
    fn revert_reproduces_the_target(commits in commits_strategy(5, 8), pick in any::<Index>()) {
        let repo = build_history(&commits);
        let before = all_snapshots(&repo);
        let (target, expected) = before[pick.index(before.len())].clone();

        prop_assert_eq!(repo.revert(target).unwrap(), Outcome::Completed);
        prop_assert_eq!(repo.head_version().unwrap(), target);
        prop_assert!(!repo.is_dirty().unwrap());
        prop_assert_eq!(repo.snapshot(target).unwrap(), expected.clone());
        prop_assert_eq!(repo.snapshot(target + 1).unwrap(), expected);
        prop_assert_eq!(&all_snapshots(&repo)[..], &before[..target as usize]);
        assert_no_overlap(&repo);
    }

    #[test]
    fn clones_converge(commits in commits_strategy(4, 8)) {
        let source = build_history(&commits);
        let clone = clone_repo(&source, RepoConfig::default());
        assert_same_history(&source, &clone);
        assert_diffs_match_trees(&clone);
        assert_no_overlap(&clone);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn disjoint_subtrees_merge_cleanly(
        master_commits in commits_strategy(3, 6),
        local_commits in commits_strategy(3, 6),
    ) {
        let master = TestRepo::memory();
        master.mkdir("/m").unwrap();
        master.mkdir("/l").unwrap();
        master.commit("base").unwrap();
        let local = clone_repo(&master, RepoConfig::default());

        for (i, ops) in master_commits.iter().enumerate() {
            let rooted: Vec<_> = ops.iter().map(|op| op.rooted("/m")).collect();
            apply_ops(&master, &rooted).unwrap();
            master.commit(&format!("master {i}")).unwrap();
        }
        for (i, ops) in local_commits.iter().enumerate() {
            let rooted: Vec<_> = ops.iter().map(|op| op.rooted("/l")).collect();
            apply_ops(&local, &rooted).unwrap();
            local.commit(&format!("local {i}")).unwrap();
        }
        let local_files = listing(&local, "/l");

        prop_assert_eq!(pull_from(&local, &master, &mut NoPrompt), Outcome::Completed);
        prop_assert_eq!(listing(&local, "/m"), listing(&master, "/m"));
        prop_assert_eq!(listing(&local, "/l"), local_files);

        let ours = local.history().unwrap();
        let theirs = master.history().unwrap();
        prop_assert!(ours.len() >= theirs.len());
        for (a, b) in ours.iter().zip(&theirs) {
            prop_assert_eq!((a.version, a.hash), (b.version, b.hash));
        }
        assert_no_overlap(&local);
        assert_diffs_match_trees(&local);
    }
}
