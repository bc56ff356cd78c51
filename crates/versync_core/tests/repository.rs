//! Integration tests for the repository lifecycle: commits, reverts,
//! applying diffs and fast-forwards.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use tempfile::tempdir;
use versync_codec::{ChangeRecord, ContentHash, Diff, Identifier, InodeAttrs, ObjectKind, Timestamp};
use versync_core::{
    ApplyCommand, Command, CoreError, CoreResult, Engine, NoPrompt, ObjectStore, Outcome,
    RepoConfig, Repository,
};

fn new_repo() -> Repository {
    let repo = Repository::open_in_memory(RepoConfig::default());
    repo.init().unwrap();
    repo
}

fn copy_objects(from: &Repository, to: &Repository) {
    for hash in from.objects().hashes().unwrap() {
        let data = from.objects().require(&hash).unwrap();
        to.objects().insert(&hash, &data).unwrap();
    }
}

fn clone_of(source: &Repository, config: RepoConfig) -> Repository {
    let repo = Repository::open_in_memory(config);
    copy_objects(source, &repo);
    let outcome = repo.fast_forward(source.tagged_history().unwrap()).unwrap();
    assert_eq!(outcome, Outcome::Completed);
    repo
}

/// Counts reads passed through to another store.
struct CountingObjects<'a> {
    inner: &'a dyn ObjectStore,
    reads: AtomicUsize,
}

impl<'a> CountingObjects<'a> {
    fn new(inner: &'a dyn ObjectStore) -> Self {
        Self {
            inner,
            reads: AtomicUsize::new(0),
        }
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl ObjectStore for CountingObjects<'_> {
    fn get(&self, hash: &ContentHash) -> CoreResult<Option<Vec<u8>>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get(hash)
    }

    fn insert(&self, hash: &ContentHash, data: &[u8]) -> CoreResult<()> {
        self.inner.insert(hash, data)
    }

    fn contains(&self, hash: &ContentHash) -> CoreResult<bool> {
        self.inner.contains(hash)
    }

    fn hashes(&self) -> CoreResult<Vec<ContentHash>> {
        self.inner.hashes()
    }
}

fn store_diff(repo: &Repository, diff: &Diff) -> ContentHash {
    let packed = diff.pack(3).unwrap();
    repo.objects().insert(&packed.hash, &packed.data).unwrap();
    packed.hash
}

#[test]
fn init_creates_version_one() {
    let repo = Repository::open_in_memory(RepoConfig::default());
    assert!(!repo.is_initialized().unwrap());
    assert_eq!(repo.init().unwrap(), Outcome::Completed);
    assert!(repo.is_initialized().unwrap());
    assert_eq!(repo.head_version().unwrap(), 1);
    assert_eq!(repo.working_version().unwrap(), 2);
    assert!(matches!(repo.init(), Err(CoreError::AlreadyInitialized)));

    let history = repo.history().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].message, "init");
    let diff = repo.load_diff(&history[0].hash).unwrap();
    assert!(matches!(
        diff.records(),
        [ChangeRecord::InodeAdded { id, .. }] if id.is_root()
    ));
}

#[test]
fn commit_records_diff_and_content() {
    let repo = new_repo();
    repo.mkdir("/src").unwrap();
    repo.create_file("/src/main.rs", b"fn main() {}").unwrap();
    assert!(repo.is_dirty().unwrap());
    repo.commit("add main").unwrap();
    assert!(!repo.is_dirty().unwrap());
    assert_eq!(repo.head_version().unwrap(), 2);

    let entry = &repo.history().unwrap()[1];
    assert_eq!(entry.version, 2);
    assert_eq!(entry.message, "add main");
    let stored = repo.load_diff(&entry.hash).unwrap();
    assert_eq!(stored, repo.diff(1, 2).unwrap());

    let refs = versync_core::content_refs(&stored);
    assert_eq!(refs.len(), 1);
    let hash = *refs.iter().next().unwrap();
    assert_eq!(repo.objects().require(&hash).unwrap(), b"fn main() {}");
}

#[test]
fn empty_commit_is_a_no_op() {
    let repo = new_repo();
    assert_eq!(repo.commit("nothing").unwrap(), Outcome::Completed);
    assert_eq!(repo.head_version().unwrap(), 1);
    assert_eq!(repo.history().unwrap().len(), 1);
}

#[test]
fn commit_carries_author_and_tags() {
    let repo = Repository::open_in_memory(RepoConfig::default().author("ana"));
    repo.init().unwrap();
    repo.create_file("/a", b"a").unwrap();
    let mut meta = versync_core::CommitMeta::message("tagged");
    meta.tags.insert("release".into(), "1.0".into());
    repo.commit_with(meta).unwrap();

    let entry = &repo.history().unwrap()[1];
    assert_eq!(entry.author, "ana");
    assert_eq!(repo.tags(2).unwrap().get("release").map(String::as_str), Some("1.0"));

    repo.tag(1, "origin", "yes").unwrap();
    assert_eq!(repo.all_tags().unwrap().len(), 2);
    assert!(matches!(repo.tag(9, "k", "v"), Err(CoreError::Policy { .. })));
}

#[test]
fn revert_restores_earlier_versions() {
    let repo = new_repo();
    repo.create_file("/notes", b"one").unwrap();
    repo.commit("one").unwrap();
    repo.write_file("/notes", b"two").unwrap();
    repo.create_file("/extra", b"x").unwrap();
    repo.commit("two").unwrap();
    assert_eq!(repo.head_version().unwrap(), 3);

    repo.revert(2).unwrap();
    assert_eq!(repo.head_version().unwrap(), 2);
    assert_eq!(&repo.read_file("/notes").unwrap()[..], b"one");
    assert!(repo.resolve_path("/extra").unwrap().is_none());
    assert_eq!(repo.history().unwrap().len(), 2);
    repo.verify().unwrap();

    // New work continues from the reverted version.
    repo.write_file("/notes", b"three").unwrap();
    repo.commit("three").unwrap();
    assert_eq!(repo.head_version().unwrap(), 3);
    assert_eq!(&repo.read_file("/notes").unwrap()[..], b"three");
    repo.verify().unwrap();
}

#[test]
fn revert_to_head_discards_uncommitted_changes() {
    let repo = new_repo();
    repo.create_file("/f", b"kept").unwrap();
    repo.commit("f").unwrap();
    repo.write_file("/f", b"scratch").unwrap();
    repo.mkdir("/tmp").unwrap();

    repo.revert(2).unwrap();
    assert!(!repo.is_dirty().unwrap());
    assert_eq!(&repo.read_file("/f").unwrap()[..], b"kept");
    assert!(repo.resolve_path("/tmp").unwrap().is_none());
    assert_eq!(repo.snapshot(2).unwrap(), repo.snapshot(3).unwrap());
}

#[test]
fn revert_rejects_uncommitted_targets() {
    let repo = new_repo();
    assert!(matches!(repo.revert(0), Err(CoreError::Policy { .. })));
    assert!(matches!(repo.revert(2), Err(CoreError::Policy { .. })));
}

#[test]
fn apply_links_inodes_added_by_the_same_diff() {
    let repo = new_repo();
    let id = Identifier::new();
    let diff = Diff::new(vec![
        ChangeRecord::LinkAdded {
            dir: Identifier::ROOT,
            name: "pipe".into(),
            inode: id,
        },
        ChangeRecord::InodeAdded {
            id,
            attrs: InodeAttrs::new(ObjectKind::Fifo, Timestamp::new(100, 0)),
        },
    ]);
    let hash = store_diff(&repo, &diff);

    let engine = Engine::new(repo.kv(), repo.objects(), repo.config());
    let outcome = engine
        .start("apply", Command::Apply(ApplyCommand::new(hash)), &mut NoPrompt)
        .unwrap();
    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(repo.resolve_path("/pipe").unwrap(), Some(id));
    assert!(repo.is_dirty().unwrap());

    repo.commit("pipe").unwrap();
    assert_eq!(repo.diff(1, 2).unwrap().len(), 2);
}

#[test]
fn apply_rejects_links_to_unknown_inodes() {
    let repo = new_repo();
    let diff = Diff::new(vec![ChangeRecord::LinkAdded {
        dir: Identifier::ROOT,
        name: "ghost".into(),
        inode: Identifier::new(),
    }]);
    let hash = store_diff(&repo, &diff);

    let engine = Engine::new(repo.kv(), repo.objects(), repo.config());
    let result = engine.start("apply", Command::Apply(ApplyCommand::new(hash)), &mut NoPrompt);
    assert!(matches!(result, Err(CoreError::InodeNotFound { .. })));
    assert_eq!(repo.pending_operation().unwrap().as_deref(), Some("apply"));
    assert!(repo.resolve_path("/ghost").unwrap().is_none());

    assert_eq!(repo.abandon().unwrap(), "apply");
    assert!(repo.pending_operation().unwrap().is_none());
    assert!(matches!(repo.abandon(), Err(CoreError::NoPendingOperation)));
}

#[test]
fn chunked_apply_reads_the_diff_once_per_run() {
    let repo = new_repo();
    let mut records = Vec::new();
    let mut ids = Vec::new();
    for i in 0..6 {
        let id = Identifier::new();
        records.push(ChangeRecord::LinkAdded {
            dir: Identifier::ROOT,
            name: format!("pipe{i}"),
            inode: id,
        });
        records.push(ChangeRecord::InodeAdded {
            id,
            attrs: InodeAttrs::new(ObjectKind::Fifo, Timestamp::new(100, 0)),
        });
        ids.push(id);
    }
    let hash = store_diff(&repo, &Diff::new(records));
    let objects = CountingObjects::new(repo.objects());

    let config = RepoConfig::default().apply_chunk_size(1).step_budget(Some(9));
    let engine = Engine::new(repo.kv(), &objects, &config);
    let outcome = engine
        .start("apply", Command::Apply(ApplyCommand::new(hash)), &mut NoPrompt)
        .unwrap();
    assert!(matches!(outcome, Outcome::Interrupted { .. }));
    assert_eq!(objects.reads(), 1);

    let config = RepoConfig::default().apply_chunk_size(1);
    let engine = Engine::new(repo.kv(), &objects, &config);
    assert_eq!(engine.run(&mut NoPrompt).unwrap(), Outcome::Completed);
    assert_eq!(objects.reads(), 2);
    for (i, id) in ids.iter().enumerate() {
        assert_eq!(repo.resolve_path(&format!("/pipe{i}")).unwrap(), Some(*id));
    }
}

#[test]
fn fast_forward_reproduces_history() {
    let master = new_repo();
    master.mkdir("/docs").unwrap();
    master.create_file("/docs/readme", b"hello").unwrap();
    master.commit("docs").unwrap();
    master.tag(2, "milestone", "m1").unwrap();
    master.rename("/docs/readme", "/README").unwrap();
    master.commit("move").unwrap();

    let replica = clone_of(&master, RepoConfig::default());
    assert_eq!(replica.tagged_history().unwrap(), master.tagged_history().unwrap());
    assert_eq!(replica.snapshot(3).unwrap(), master.snapshot(3).unwrap());
    assert_eq!(&replica.read_file("/README").unwrap()[..], b"hello");
    replica.verify().unwrap();
}

#[test]
fn fast_forward_requires_a_continuation() {
    let master = new_repo();
    master.create_file("/a", b"a").unwrap();
    master.commit("a").unwrap();

    let replica = clone_of(&master, RepoConfig::default());
    let history = master.tagged_history().unwrap();
    assert!(matches!(
        replica.fast_forward(history[1..].to_vec()),
        Err(CoreError::Policy { .. })
    ));
    assert_eq!(replica.fast_forward(Vec::new()).unwrap(), Outcome::Completed);
}

#[test]
fn step_budget_interrupts_and_resumes() {
    let mut repo = new_repo();
    for i in 0..5 {
        repo.create_file(&format!("/f{i}"), format!("{i}").as_bytes()).unwrap();
    }
    repo.config_mut().step_budget = Some(1);
    let mut outcome = repo.commit("five files").unwrap();
    let mut rounds = 1;
    while let Outcome::Interrupted { operation } = outcome {
        assert_eq!(operation, "commit");
        assert!(matches!(repo.mkdir("/blocked"), Err(CoreError::OperationInProgress { .. })));
        outcome = repo.continue_operation(&mut NoPrompt).unwrap();
        rounds += 1;
    }
    assert_eq!(outcome, Outcome::Completed);
    assert!(rounds > 1);
    assert_eq!(repo.head_version().unwrap(), 2);
    assert_eq!(&repo.read_file("/f3").unwrap()[..], b"3");
    assert!(matches!(
        repo.continue_operation(&mut NoPrompt),
        Err(CoreError::NoPendingOperation)
    ));
}

#[test]
fn unrelated_histories_do_not_merge() {
    let a = new_repo();
    thread::sleep(Duration::from_millis(2));
    let b = new_repo();
    copy_objects(&a, &b);
    let result = b.merge(&a.tagged_history().unwrap(), &mut NoPrompt);
    assert!(matches!(result, Err(CoreError::Policy { .. })));
}

#[test]
fn repository_persists_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("repo");
    {
        let repo = Repository::open(&path, RepoConfig::default()).unwrap();
        repo.init().unwrap();
        repo.create_file("/kept", b"durable").unwrap();
        repo.commit("kept").unwrap();
        assert!(matches!(
            Repository::open(&path, RepoConfig::default()),
            Err(CoreError::RepositoryLocked)
        ));
    }
    let repo = Repository::open(&path, RepoConfig::default()).unwrap();
    assert_eq!(repo.head_version().unwrap(), 2);
    assert_eq!(&repo.read_file("/kept").unwrap()[..], b"durable");
    assert_eq!(repo.path(), Some(path.as_path()));
    repo.verify().unwrap();
}
