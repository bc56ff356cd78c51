//! Test fixtures and repository helpers.
//!
//! Provides convenience functions for setting up test repositories
//! and replicas that share history.

use std::collections::BTreeMap;
use std::path::Path;
use tempfile::TempDir;
use versync_codec::ObjectKind;
use versync_core::{Outcome, RepoConfig, Repository, TreeSnapshot, Version};

/// A test repository with automatic cleanup.
pub struct TestRepo {
    /// The repository.
    pub repo: Repository,
    /// Keeps an on-disk repository alive.
    _temp_dir: Option<TempDir>,
}

impl TestRepo {
    /// An initialized in-memory repository.
    pub fn memory() -> Self {
        Self::memory_with(RepoConfig::default())
    }

    /// An initialized in-memory repository with `config`.
    pub fn memory_with(config: RepoConfig) -> Self {
        let repo = Repository::open_in_memory(config);
        repo.init().expect("Failed to initialize repository");
        Self {
            repo,
            _temp_dir: None,
        }
    }

    /// An initialized repository in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let repo = Repository::open(
            &temp_dir.path().join("repo"),
            RepoConfig::default().create_if_missing(true),
        )
        .expect("Failed to open file repository");
        repo.init().expect("Failed to initialize repository");
        Self {
            repo,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the repository path if file-based.
    pub fn path(&self) -> Option<&Path> {
        self.repo.path()
    }
}

impl std::ops::Deref for TestRepo {
    type Target = Repository;

    fn deref(&self) -> &Self::Target {
        &self.repo
    }
}

impl std::ops::DerefMut for TestRepo {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.repo
    }
}

/// Runs a test with a temporary initialized repository.
pub fn with_temp_repo<F, R>(f: F) -> R
where
    F: FnOnce(&Repository) -> R,
{
    let test_repo = TestRepo::memory();
    f(&test_repo.repo)
}

/// Copies every object of `from` into `to`.
pub fn copy_objects(from: &Repository, to: &Repository) {
    for hash in from.objects().hashes().expect("Failed to list objects") {
        let data = from.objects().require(&hash).expect("Failed to read object");
        to.objects().insert(&hash, &data).expect("Failed to store object");
    }
}

/// A new in-memory replica holding the complete history of `source`.
pub fn clone_repo(source: &Repository, config: RepoConfig) -> Repository {
    let repo = Repository::open_in_memory(config);
    copy_objects(source, &repo);
    let outcome = repo
        .fast_forward(source.tagged_history().expect("Failed to read history"))
        .expect("Failed to fast-forward clone");
    assert_eq!(outcome, Outcome::Completed);
    repo
}

/// Copies the objects of `master` into `local` and merges its history.
pub fn pull_from(
    local: &Repository,
    master: &Repository,
    resolver: &mut dyn versync_core::ConflictResolver,
) -> Outcome {
    copy_objects(master, local);
    local
        .merge(&master.tagged_history().expect("Failed to read history"), resolver)
        .expect("Merge failed")
}

/// Snapshots of every committed version.
pub fn all_snapshots(repo: &Repository) -> Vec<(Version, TreeSnapshot)> {
    (1..=repo.head_version().expect("Failed to read head"))
        .map(|v| (v, repo.snapshot(v).expect("Failed to take snapshot")))
        .collect()
}

/// Every entry below `root` in the working version, by path. Directories
/// end in `/` and map to no bytes; symlinks map to their target.
pub fn listing(repo: &Repository, root: &str) -> BTreeMap<String, Vec<u8>> {
    let mut entries = BTreeMap::new();
    let mut pending = vec![root.trim_end_matches('/').to_string()];
    while let Some(dir) = pending.pop() {
        let query = if dir.is_empty() { "/" } else { dir.as_str() };
        for entry in repo.read_dir(query).expect("Failed to read directory") {
            let path = format!("{dir}/{}", entry.name);
            match entry.attrs.kind {
                ObjectKind::Directory => {
                    entries.insert(format!("{path}/"), Vec::new());
                    pending.push(path);
                }
                ObjectKind::File => {
                    let data = repo.read_file(&path).expect("Failed to read file");
                    entries.insert(path, data.to_vec());
                }
                _ => {
                    entries.insert(path, entry.attrs.target.clone().into_bytes());
                }
            }
        }
    }
    entries
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// A repository with `count` files in `/data`, committed one by one.
    pub fn linear_history(count: usize) -> TestRepo {
        let repo = TestRepo::memory();
        repo.mkdir("/data").expect("mkdir failed");
        repo.commit("data dir").expect("commit failed");
        for i in 0..count {
            repo.create_file(&format!("/data/file{i}"), format!("content {i}").as_bytes())
                .expect("create failed");
            repo.commit(&format!("file {i}")).expect("commit failed");
        }
        repo
    }

    /// A master and a replica that diverged from a shared `/f` and `/dir`.
    ///
    /// Master rewrites `/f` and adds `/dir/m`; local adds `/dir/l` and
    /// `/f`'s sibling `/g`. None of the changes conflict.
    pub fn diverged_pair() -> (Repository, Repository) {
        let master = Repository::open_in_memory(RepoConfig::default());
        master.init().expect("init failed");
        master.create_file("/f", b"base").expect("create failed");
        master.mkdir("/dir").expect("mkdir failed");
        master.commit("base").expect("commit failed");
        let local = clone_repo(&master, RepoConfig::default());

        master.write_file("/f", b"master edit").expect("write failed");
        master.commit("edit f").expect("commit failed");
        master.create_file("/dir/m", b"m").expect("create failed");
        master.commit("add m").expect("commit failed");

        local.create_file("/dir/l", b"l").expect("create failed");
        local.commit("add l").expect("commit failed");
        local.create_file("/g", b"g").expect("create failed");
        local.commit("add g").expect("commit failed");
        (master, local)
    }
}
