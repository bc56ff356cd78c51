//! Interrupted operations recover to the uninterrupted result.

use versync_core::{NoPrompt, RepoConfig, Repository, TaggedEntry};
use versync_testkit::{CrashHarness, CrashRecoveryResult};

fn assert_all_passed(results: &[CrashRecoveryResult]) {
    assert!(!results.is_empty());
    for result in results {
        assert!(result.passed, "{}: {:?}", result.description, result.error);
    }
}

fn copy_into(from: &Repository, to: &Repository) -> versync_core::CoreResult<()> {
    for hash in from.objects().hashes()? {
        to.objects().insert(&hash, &from.objects().require(&hash)?)?;
    }
    Ok(())
}

/// A master with two commits after a shared base, and the history to
/// fork a replica from.
fn master_ahead() -> (Repository, Vec<TaggedEntry>) {
    let master = Repository::open_in_memory(RepoConfig::default());
    master.init().unwrap();
    master.create_file("/f", b"base").unwrap();
    master.mkdir("/dir").unwrap();
    master.commit("base").unwrap();
    let base = master.tagged_history().unwrap();

    master.write_file("/f", b"master edit").unwrap();
    master.commit("edit f").unwrap();
    master.create_file("/dir/m", b"m").unwrap();
    master.commit("add m").unwrap();
    (master, base)
}

#[test]
fn commit_recovers_from_torn_writes() {
    let harness = CrashHarness::prepare(RepoConfig::default(), |repo| {
        repo.init()?;
        repo.mkdir("/src")?;
        for i in 0..4 {
            repo.create_file(&format!("/src/f{i}"), format!("file {i}").as_bytes())?;
        }
        Ok(())
    })
    .unwrap()
    .with_max_points(24);
    assert_all_passed(&harness.torn_writes(&|repo| repo.commit("sources")).unwrap());
}

#[test]
fn revert_recovers_from_torn_writes_and_budgets() {
    let harness = CrashHarness::prepare(RepoConfig::default().revert_buckets_per_step(1), |repo| {
        repo.init()?;
        for i in 0..3 {
            repo.create_file(&format!("/v{i}"), b"x")?;
            repo.commit(&format!("v{i}"))?;
        }
        repo.write_file("/v0", b"changed")?;
        repo.commit("change")?;
        Ok(())
    })
    .unwrap()
    .with_max_points(24);
    let op = |repo: &Repository| repo.revert(2);
    assert_all_passed(&harness.torn_writes(&op).unwrap());
    assert_all_passed(&harness.step_budgets(&op, 8).unwrap());
}

#[test]
fn fast_forward_recovers_from_torn_writes() {
    let (master, _) = master_ahead();
    let entries = master.tagged_history().unwrap();
    let harness = CrashHarness::prepare(RepoConfig::default(), |repo| copy_into(&master, repo))
        .unwrap()
        .with_max_points(24);
    let op = move |repo: &Repository| repo.fast_forward(entries.clone());
    assert_all_passed(&harness.torn_writes(&op).unwrap());
    assert_all_passed(&harness.step_budgets(&op, 6).unwrap());
}

#[test]
fn merge_recovers_from_torn_writes_and_budgets() {
    let (master, base) = master_ahead();
    let master_history = master.tagged_history().unwrap();
    let harness = CrashHarness::prepare(RepoConfig::default(), |repo| {
        copy_into(&master, repo)?;
        repo.fast_forward(base.clone())?;
        repo.create_file("/dir/l", b"l")?;
        repo.commit("add l")?;
        repo.create_file("/g", b"g")?;
        repo.commit("add g")?;
        Ok(())
    })
    .unwrap()
    .with_max_points(32);
    let op = move |repo: &Repository| repo.merge(&master_history, &mut NoPrompt);
    assert_all_passed(&harness.torn_writes(&op).unwrap());
    assert_all_passed(&harness.step_budgets(&op, 12).unwrap());
}
