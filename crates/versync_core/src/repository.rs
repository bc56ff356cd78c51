//! Repository facade.

use crate::commands::{Command, CommitCommand, FastForwardCommand, RevertCommand};
use crate::config::RepoConfig;
#[cfg(feature = "std")]
use crate::dir::RepoDir;
use crate::engine::Engine;
use crate::error::{CoreError, CoreResult};
use crate::merge::{ConflictResolver, MergeCommand, MergeReport, NoPrompt, LAST_MERGE_META};
use crate::objects::{MemoryObjectStore, ObjectStore};
use crate::store::{VerifyReport, VersionedStore};
use crate::types::{CommitMeta, HistoryEntry, Outcome, Tag, TaggedEntry, TreeSnapshot, Version};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::info;
use versync_codec::{
    unpack_verified, ChangeRecord, ContentHash, Diff, Identifier, InodeAttrs, ObjectKind, Timestamp,
};
use versync_storage::{KvStore, MemoryKv};

/// A versioned repository: the store, its objects and the command engine.
///
/// # Opening a Repository
///
/// ```rust,ignore
/// use versync_core::{RepoConfig, Repository};
/// use std::path::Path;
///
/// let repo = Repository::open(Path::new("my_repo"), RepoConfig::default())?;
/// repo.init()?;
/// repo.create_file("/notes.txt", b"hello")?;
/// repo.commit("first notes")?;
/// ```
///
/// # In-Memory Repositories
///
/// ```rust
/// use versync_core::{RepoConfig, Repository};
///
/// let repo = Repository::open_in_memory(RepoConfig::default());
/// repo.init().unwrap();
/// assert_eq!(repo.head_version().unwrap(), 1);
/// ```
pub struct Repository {
    config: RepoConfig,
    #[cfg(feature = "std")]
    _dir: Option<RepoDir>,
    path: Option<PathBuf>,
    kv: Box<dyn KvStore>,
    objects: Box<dyn ObjectStore>,
}

impl Repository {
    /// Opens a repository directory, taking its lock.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another process holds the repository (`RepositoryLocked`)
    /// - The directory is missing and `create_if_missing` is false
    /// - The store log is corrupt
    #[cfg(feature = "std")]
    pub fn open(path: &Path, config: RepoConfig) -> CoreResult<Self> {
        use crate::objects::DirObjectStore;
        use versync_storage::{FileDevice, LogKv};

        let dir = RepoDir::open(path, config.create_if_missing)?;
        let device = FileDevice::open(&dir.store_path())?;
        let kv = LogKv::open(Box::new(device), config.sync_on_commit)?;
        let objects = DirObjectStore::open(&dir.objects_path())?;
        info!(path = %path.display(), "repository opened");
        Ok(Self {
            config,
            path: Some(dir.path().to_path_buf()),
            _dir: Some(dir),
            kv: Box::new(kv),
            objects: Box::new(objects),
        })
    }

    /// An empty in-memory repository.
    #[must_use]
    pub fn open_in_memory(config: RepoConfig) -> Self {
        Self::with_parts(
            Box::new(MemoryKv::new()),
            Box::new(MemoryObjectStore::new()),
            config,
        )
    }

    /// A repository over caller-supplied stores.
    #[must_use]
    pub fn with_parts(kv: Box<dyn KvStore>, objects: Box<dyn ObjectStore>, config: RepoConfig) -> Self {
        Self {
            config,
            #[cfg(feature = "std")]
            _dir: None,
            path: None,
            kv,
            objects,
        }
    }

    /// Repository directory, if on disk.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Configuration.
    #[must_use]
    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    /// Mutable configuration, e.g. to change the step budget between runs.
    pub fn config_mut(&mut self) -> &mut RepoConfig {
        &mut self.config
    }

    /// The key-value substrate.
    #[must_use]
    pub fn kv(&self) -> &dyn KvStore {
        self.kv.as_ref()
    }

    /// The object store.
    #[must_use]
    pub fn objects(&self) -> &dyn ObjectStore {
        self.objects.as_ref()
    }

    fn engine(&self) -> Engine<'_> {
        Engine::new(self.kv.as_ref(), self.objects.as_ref(), &self.config)
    }

    /// Runs `f` on a read-only view of the store.
    pub(crate) fn read<T>(&self, f: impl FnOnce(&VersionedStore<'_>) -> CoreResult<T>) -> CoreResult<T> {
        let store = VersionedStore::begin(self.kv.as_ref())?;
        let result = f(&store);
        store.rollback();
        result
    }

    /// Runs `f` in one transaction, committing only if it succeeds.
    pub(crate) fn write<T>(&self, f: impl FnOnce(&mut VersionedStore<'_>) -> CoreResult<T>) -> CoreResult<T> {
        let mut store = VersionedStore::begin(self.kv.as_ref())?;
        match f(&mut store) {
            Ok(value) => {
                store.commit()?;
                Ok(value)
            }
            Err(err) => {
                store.rollback();
                Err(err)
            }
        }
    }

    pub(crate) fn ensure_idle(&self) -> CoreResult<()> {
        match self.pending_operation()? {
            Some(operation) => Err(CoreError::OperationInProgress { operation }),
            None => Ok(()),
        }
    }

    // ---- lifecycle ----------------------------------------------------------

    /// Returns true once the root directory exists.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn is_initialized(&self) -> CoreResult<bool> {
        self.read(|store| {
            Ok(store
                .load_inode(&Identifier::ROOT, store.working_version())?
                .is_some())
        })
    }

    /// Creates the root directory and commits it as version 1.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyInitialized` if the repository has a root or history.
    pub fn init(&self) -> CoreResult<Outcome> {
        self.ensure_idle()?;
        self.write(|store| {
            if store.head_version() > 0
                || store
                    .load_inode(&Identifier::ROOT, store.working_version())?
                    .is_some()
            {
                return Err(CoreError::AlreadyInitialized);
            }
            store.create_inode(
                &Identifier::ROOT,
                InodeAttrs::new(ObjectKind::Directory, Timestamp::now()),
            )?;
            store.set_dirty(true)
        })?;
        self.commit("init")
    }

    /// Commits the working version with a message.
    ///
    /// # Errors
    ///
    /// See [`Self::commit_with`].
    pub fn commit(&self, message: &str) -> CoreResult<Outcome> {
        self.commit_with(CommitMeta::message(message))
    }

    /// Commits the working version. Committing no changes does nothing.
    ///
    /// # Errors
    ///
    /// Returns `OperationInProgress` if another operation is pending, or a
    /// store error.
    pub fn commit_with(&self, mut meta: CommitMeta) -> CoreResult<Outcome> {
        meta.author.get_or_insert_with(|| self.config.author.clone());
        meta.timestamp.get_or_insert_with(Timestamp::now);
        self.engine().start(
            "commit",
            Command::Commit(CommitCommand::new(meta)),
            &mut NoPrompt,
        )
    }

    /// Reverts to `target`, discarding later versions and uncommitted
    /// changes.
    ///
    /// # Errors
    ///
    /// Returns a policy error unless `1 <= target <= head`.
    pub fn revert(&self, target: Version) -> CoreResult<Outcome> {
        let head = self.head_version()?;
        if target == 0 || target > head {
            return Err(CoreError::policy(format!(
                "cannot revert to version {target}; committed versions are 1..={head}"
            )));
        }
        self.engine().start(
            &format!("revert {target}"),
            Command::Revert(RevertCommand::new(target)),
            &mut NoPrompt,
        )
    }

    /// Appends `entries`, which must continue this repository's history.
    ///
    /// # Errors
    ///
    /// Returns a policy error if the working version has uncommitted
    /// changes or `entries` do not start at the working version.
    pub fn fast_forward(&self, entries: Vec<TaggedEntry>) -> CoreResult<Outcome> {
        self.ensure_clean()?;
        let working = self.working_version()?;
        match entries.first() {
            None => return Ok(Outcome::Completed),
            Some(first) if first.entry.version != working => {
                return Err(CoreError::policy(format!(
                    "fast-forward must start at version {working}, not {}",
                    first.entry.version
                )));
            }
            Some(_) => {}
        }
        self.engine().start(
            "fast-forward",
            Command::FastForward(FastForwardCommand::new(entries)),
            &mut NoPrompt,
        )
    }

    /// Merges `master`, the complete history of another replica, into this
    /// one. Diff and content objects of `master` must already be present.
    ///
    /// # Errors
    ///
    /// Returns a policy error if the working version has uncommitted
    /// changes or the histories share no version while both have commits.
    pub fn merge(&self, master: &[TaggedEntry], resolver: &mut dyn ConflictResolver) -> CoreResult<Outcome> {
        self.ensure_idle()?;
        self.ensure_clean()?;
        let local = self.tagged_history()?;
        let common = common_version(&local, master);
        if common == 0 && !local.is_empty() && !master.is_empty() {
            return Err(CoreError::policy(
                "histories share no common version; clone instead of merging",
            ));
        }
        let split = usize::try_from(common).map_err(|_| CoreError::consistency("version overflow"))?;
        let master_after = master[split..].to_vec();
        if master_after.is_empty() {
            info!(common, "already up to date");
            return Ok(Outcome::Completed);
        }
        let local_after = local[split..].to_vec();
        self.engine().start(
            "merge",
            Command::Merge(Box::new(MergeCommand::new(common, master_after, local_after))),
            resolver,
        )
    }

    /// Resumes the pending operation.
    ///
    /// # Errors
    ///
    /// Returns `NoPendingOperation` if nothing is pending.
    pub fn continue_operation(&self, resolver: &mut dyn ConflictResolver) -> CoreResult<Outcome> {
        self.engine().run(resolver)
    }

    /// Drops the pending operation's journal. Completed steps stay applied.
    ///
    /// # Errors
    ///
    /// Returns `NoPendingOperation` if nothing is pending.
    pub fn abandon(&self) -> CoreResult<String> {
        self.engine().abandon()
    }

    /// Descriptor of the pending operation.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn pending_operation(&self) -> CoreResult<Option<String>> {
        self.engine().pending()
    }

    fn ensure_clean(&self) -> CoreResult<()> {
        if self.is_dirty()? {
            return Err(CoreError::policy(
                "working version has uncommitted changes; commit or revert first",
            ));
        }
        Ok(())
    }

    // ---- queries ------------------------------------------------------------

    /// Committed history.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn history(&self) -> CoreResult<Vec<HistoryEntry>> {
        self.read(|store| store.history())
    }

    /// Committed history with the tags of every version.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn tagged_history(&self) -> CoreResult<Vec<TaggedEntry>> {
        self.read(|store| {
            store
                .history()?
                .into_iter()
                .map(|entry| {
                    let tags = store.tags(entry.version)?;
                    Ok(TaggedEntry { entry, tags })
                })
                .collect()
        })
    }

    /// Last committed version.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn head_version(&self) -> CoreResult<Version> {
        self.read(|store| Ok(store.head_version()))
    }

    /// Version being written.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn working_version(&self) -> CoreResult<Version> {
        self.read(|store| Ok(store.working_version()))
    }

    /// Whether the working version has uncommitted changes.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn is_dirty(&self) -> CoreResult<bool> {
        self.read(|store| store.is_dirty())
    }

    /// Tags of one version.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn tags(&self, version: Version) -> CoreResult<BTreeMap<String, String>> {
        self.read(|store| store.tags(version))
    }

    /// Every tag.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn all_tags(&self) -> CoreResult<Vec<Tag>> {
        self.read(|store| store.all_tags())
    }

    /// Tags a committed version.
    ///
    /// # Errors
    ///
    /// Returns a policy error if `version` is not committed.
    pub fn tag(&self, version: Version, key: &str, value: &str) -> CoreResult<()> {
        self.ensure_idle()?;
        self.write(|store| {
            if version == 0 || version > store.head_version() {
                return Err(CoreError::policy(format!("version {version} is not committed")));
            }
            store.put_tag(version, key, value)
        })
    }

    /// Summary of the last completed merge.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn last_merge_report(&self) -> CoreResult<Option<MergeReport>> {
        self.read(|store| store.meta(LAST_MERGE_META))
    }

    /// Checks the no-overlap invariant over every record.
    ///
    /// # Errors
    ///
    /// Returns `Overlap` or a consistency error on the first violation.
    pub fn verify(&self) -> CoreResult<VerifyReport> {
        self.read(|store| store.verify())
    }

    /// The visible tree at `version`.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn snapshot(&self, version: Version) -> CoreResult<TreeSnapshot> {
        self.read(|store| store.snapshot(version))
    }

    /// The canonical diff from `a` to `b`.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn diff(&self, a: Version, b: Version) -> CoreResult<Diff> {
        self.read(|store| store.diff(a, b))
    }

    /// Loads and parses a stored diff.
    ///
    /// # Errors
    ///
    /// Returns `ObjectMissing`, or a codec error if the object is corrupt.
    pub fn load_diff(&self, hash: &ContentHash) -> CoreResult<Diff> {
        let packed = self.objects.require(hash)?;
        let raw = unpack_verified(&packed, hash)?;
        Ok(Diff::parse(&raw)?)
    }

    /// Objects a replica needs to apply `entries`: each diff and the
    /// content it references. The diffs themselves must be present.
    ///
    /// # Errors
    ///
    /// Returns `ObjectMissing` if a diff is absent.
    pub fn required_objects(&self, entries: &[TaggedEntry]) -> CoreResult<BTreeSet<ContentHash>> {
        let mut hashes = BTreeSet::new();
        for commit in entries {
            hashes.insert(commit.entry.hash);
            hashes.extend(content_refs(&self.load_diff(&commit.entry.hash)?));
        }
        Ok(hashes)
    }
}

/// Length of the longest common prefix of two histories, compared by
/// `(version, diff hash)`.
#[must_use]
pub fn common_version(local: &[TaggedEntry], master: &[TaggedEntry]) -> Version {
    local
        .iter()
        .zip(master)
        .take_while(|(a, b)| a.entry.version == b.entry.version && a.entry.hash == b.entry.hash)
        .count() as Version
}

/// Content hashes referenced by a diff.
#[must_use]
pub fn content_refs(diff: &Diff) -> BTreeSet<ContentHash> {
    diff.records()
        .iter()
        .filter_map(|record| match record {
            ChangeRecord::InodeAdded { attrs, .. } => attrs.content.hash(),
            ChangeRecord::InodeChanged { changes, .. } => changes.content.and_then(|c| c.hash()),
            _ => None,
        })
        .collect()
}
