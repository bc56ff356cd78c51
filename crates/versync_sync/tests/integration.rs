//! End-to-end sync between in-memory and on-disk replicas.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tempfile::tempdir;
use versync_codec::{ContentHash, Timestamp};
use versync_core::{
    NoPrompt, Outcome, RepoConfig, Repository, ResolverAnswer, ScriptedResolver, TaggedEntry,
};
use versync_sync::{
    LocalPeer, Peer, RetryConfig, SyncConfig, SyncEngine, SyncError, SyncResult, SyncState,
};

fn hub_with(files: &[(&str, &[u8])]) -> LocalPeer {
    let repo = Repository::open_in_memory(RepoConfig::default());
    repo.init().unwrap();
    for (path, data) in files {
        repo.create_file(path, data).unwrap();
    }
    repo.commit("seed").unwrap();
    LocalPeer::new(repo)
}

fn fast_retry(attempts: u32) -> SyncConfig {
    SyncConfig::new().with_retry(
        RetryConfig::new(attempts)
            .with_initial_delay(Duration::from_millis(1))
            .without_jitter(),
    )
}

fn clone_from(hub: &LocalPeer) -> Repository {
    let repo = Repository::open_in_memory(RepoConfig::default());
    SyncEngine::new(SyncConfig::new(), &repo, hub).pull(&mut NoPrompt).unwrap();
    repo
}

/// Fails `history` with a transport error a fixed number of times.
struct FlakyPeer {
    inner: LocalPeer,
    failures: AtomicU32,
    retryable: bool,
}

impl Peer for FlakyPeer {
    fn history(&self) -> SyncResult<Vec<TaggedEntry>> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(if self.retryable {
                SyncError::transport_retryable("connection reset")
            } else {
                SyncError::transport_fatal("not a repository")
            });
        }
        self.inner.history()
    }

    fn missing(&self, hashes: &[ContentHash]) -> SyncResult<Vec<ContentHash>> {
        self.inner.missing(hashes)
    }

    fn fetch(&self, hashes: &[ContentHash]) -> SyncResult<Vec<(ContentHash, Vec<u8>)>> {
        self.inner.fetch(hashes)
    }

    fn store(&self, objects: &[(ContentHash, Vec<u8>)]) -> SyncResult<()> {
        self.inner.store(objects)
    }

    fn fast_forward(&self, entries: Vec<TaggedEntry>) -> SyncResult<()> {
        self.inner.fast_forward(entries)
    }
}

/// Flips a byte of every object it serves.
struct CorruptingPeer(LocalPeer);

impl Peer for CorruptingPeer {
    fn history(&self) -> SyncResult<Vec<TaggedEntry>> {
        self.0.history()
    }

    fn missing(&self, hashes: &[ContentHash]) -> SyncResult<Vec<ContentHash>> {
        self.0.missing(hashes)
    }

    fn fetch(&self, hashes: &[ContentHash]) -> SyncResult<Vec<(ContentHash, Vec<u8>)>> {
        let mut objects = self.0.fetch(hashes)?;
        for (_, data) in &mut objects {
            match data.last_mut() {
                Some(byte) => *byte ^= 0xff,
                None => data.push(0),
            }
        }
        Ok(objects)
    }

    fn store(&self, objects: &[(ContentHash, Vec<u8>)]) -> SyncResult<()> {
        self.0.store(objects)
    }

    fn fast_forward(&self, entries: Vec<TaggedEntry>) -> SyncResult<()> {
        self.0.fast_forward(entries)
    }
}

#[test]
fn pull_clones_into_an_empty_repository() {
    let hub = hub_with(&[("/readme", b"hello"), ("/license", b"MIT")]);
    let replica = clone_from(&hub);

    assert_eq!(replica.tagged_history().unwrap(), hub.history().unwrap());
    assert_eq!(&replica.read_file("/readme").unwrap()[..], b"hello");
    assert_eq!(&replica.read_file("/license").unwrap()[..], b"MIT");
    replica.verify().unwrap();
}

#[test]
fn push_into_an_empty_peer() {
    let repo = Repository::open_in_memory(RepoConfig::default());
    repo.init().unwrap();
    repo.mkdir("/docs").unwrap();
    repo.create_file("/docs/a", b"a").unwrap();
    repo.commit("docs").unwrap();

    let peer = LocalPeer::new(Repository::open_in_memory(RepoConfig::default()));
    let engine = SyncEngine::new(SyncConfig::new().with_push_batch_size(1), &repo, &peer);
    let cycle = engine.push().unwrap();
    assert_eq!(cycle.pushed, 2);
    assert_eq!(cycle.objects_sent, 3);
    assert_eq!(engine.state(), SyncState::Synced);

    let remote = peer.repository();
    assert_eq!(remote.tagged_history().unwrap(), repo.tagged_history().unwrap());
    assert_eq!(&remote.read_file("/docs/a").unwrap()[..], b"a");

    assert_eq!(engine.push().unwrap().pushed, 0);
}

#[test]
fn replicas_converge_through_a_hub() {
    let hub = hub_with(&[("/shared", b"shared")]);
    let a = clone_from(&hub);
    let b = clone_from(&hub);

    a.create_file("/from_a", b"a").unwrap();
    a.commit("a adds").unwrap();
    let cycle = SyncEngine::new(SyncConfig::new(), &a, &hub).sync(&mut NoPrompt).unwrap();
    assert_eq!((cycle.pulled, cycle.pushed), (0, 1));

    b.rename("/shared", "/renamed").unwrap();
    b.commit("b renames").unwrap();
    let cycle = SyncEngine::new(SyncConfig::new(), &b, &hub).sync(&mut NoPrompt).unwrap();
    assert_eq!((cycle.pulled, cycle.pushed), (1, 1));
    let report = cycle.report.unwrap();
    assert_eq!(report.local_replayed, 1);
    // Both sides touched the root; only its times differ.
    assert!(report.conflicts.iter().all(|conflict| conflict.automatic));

    let cycle = SyncEngine::new(SyncConfig::new(), &a, &hub).sync(&mut NoPrompt).unwrap();
    assert_eq!((cycle.pulled, cycle.pushed), (1, 0));

    let history = hub.history().unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(a.tagged_history().unwrap(), history);
    assert_eq!(b.tagged_history().unwrap(), history);
    for repo in [&a, &b, hub.repository()] {
        assert!(repo.resolve_path("/shared").unwrap().is_none());
        assert_eq!(&repo.read_file("/renamed").unwrap()[..], b"shared");
        assert_eq!(&repo.read_file("/from_a").unwrap()[..], b"a");
        repo.verify().unwrap();
    }
}

#[test]
fn push_is_refused_until_pulled() {
    let hub = hub_with(&[("/f", b"f")]);
    let a = clone_from(&hub);
    let b = clone_from(&hub);
    a.create_file("/a", b"a").unwrap();
    a.commit("a").unwrap();
    SyncEngine::new(SyncConfig::new(), &a, &hub).push().unwrap();

    b.create_file("/b", b"b").unwrap();
    b.commit("b").unwrap();
    let engine = SyncEngine::new(SyncConfig::new(), &b, &hub);
    assert!(matches!(engine.push(), Err(SyncError::Policy(_))));
    assert_eq!(hub.history().unwrap().len(), 3);

    engine.pull(&mut NoPrompt).unwrap();
    assert_eq!(engine.push().unwrap().pushed, 1);
    assert_eq!(hub.history().unwrap().len(), 4);
}

#[test]
fn suspended_merge_skips_the_push() {
    let hub = hub_with(&[("/f", b"common")]);
    let local = clone_from(&hub);
    hub.repository().write_file("/f", b"rewritten").unwrap();
    hub.repository().commit("rewrite").unwrap();
    local.set_times("/f", Timestamp::new(5, 0)).unwrap();
    local.commit("touch").unwrap();
    let before = hub.history().unwrap();

    let engine = SyncEngine::new(SyncConfig::new(), &local, &hub);
    let cycle = engine.sync(&mut NoPrompt).unwrap();
    assert_eq!(
        cycle.outcome,
        Outcome::Suspended {
            operation: "merge".into()
        }
    );
    assert_eq!(cycle.pushed, 0);
    assert_eq!(engine.state(), SyncState::Idle);
    assert_eq!(hub.history().unwrap(), before);
    assert_eq!(engine.stats().cycles_completed, 0);

    assert!(matches!(engine.sync(&mut NoPrompt), Err(SyncError::Policy(_))));

    let mut resolver = ScriptedResolver::new([ResolverAnswer::Master]);
    assert!(local.continue_operation(&mut resolver).unwrap().is_completed());
    let cycle = engine.sync(&mut NoPrompt).unwrap();
    assert!(cycle.is_completed());
    assert_eq!(local.tagged_history().unwrap(), hub.history().unwrap());
}

#[test]
fn retryable_failures_are_retried() {
    let peer = FlakyPeer {
        inner: hub_with(&[("/f", b"f")]),
        failures: AtomicU32::new(2),
        retryable: true,
    };
    let repo = Repository::open_in_memory(RepoConfig::default());
    let engine = SyncEngine::new(fast_retry(3), &repo, peer);

    let cycle = engine.sync_with_retry(&mut NoPrompt).unwrap();
    assert_eq!(cycle.pulled, 2);
    let stats = engine.stats();
    assert_eq!(stats.retries, 2);
    assert_eq!(stats.cycles_completed, 1);
    assert!(stats.last_error.is_none());
    assert_eq!(&repo.read_file("/f").unwrap()[..], b"f");
}

#[test]
fn fatal_failures_are_not_retried() {
    let peer = FlakyPeer {
        inner: hub_with(&[("/f", b"f")]),
        failures: AtomicU32::new(1),
        retryable: false,
    };
    let repo = Repository::open_in_memory(RepoConfig::default());
    let engine = SyncEngine::new(fast_retry(3), &repo, peer);

    let err = engine.sync_with_retry(&mut NoPrompt).unwrap_err();
    assert!(matches!(err, SyncError::Transport { retryable: false, .. }));
    assert_eq!(engine.stats().retries, 0);
    assert_eq!(engine.state(), SyncState::Error);
}

#[test]
fn corrupted_objects_are_rejected() {
    let peer = CorruptingPeer(hub_with(&[("/f", b"payload")]));
    let repo = Repository::open_in_memory(RepoConfig::default());
    let engine = SyncEngine::new(fast_retry(2), &repo, peer);

    let err = engine.sync_with_retry(&mut NoPrompt).unwrap_err();
    assert!(matches!(err, SyncError::Integrity { .. }));
    assert_eq!(engine.stats().retries, 1);
    assert!(repo.tagged_history().unwrap().is_empty());
    assert!(repo.objects().hashes().unwrap().is_empty());
}

#[test]
fn on_disk_replicas_sync() {
    let dir = tempdir().unwrap();
    let hub = LocalPeer::open(&dir.path().join("hub"), true).unwrap();
    hub.repository().init().unwrap();
    hub.repository().create_file("/disk", b"persisted").unwrap();
    hub.repository().commit("disk").unwrap();

    let replica = Repository::open(
        &dir.path().join("replica"),
        RepoConfig::default().create_if_missing(true),
    )
    .unwrap();
    SyncEngine::new(SyncConfig::new(), &replica, &hub).pull(&mut NoPrompt).unwrap();
    assert_eq!(&replica.read_file("/disk").unwrap()[..], b"persisted");
    assert!(LocalPeer::open(&dir.path().join("missing"), false).is_err());
}
