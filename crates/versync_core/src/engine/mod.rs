//! Resumable command engine.
//!
//! Multi-phase operations run as a stack of command queues persisted in a
//! single journal entry. One [`Engine`] step:
//!
//! 1. Opens a store transaction and loads the journal
//! 2. Executes one step of the head command of the innermost queue
//! 3. Pushes the sub-commands it produced as a new innermost queue
//! 4. Saves the journal in the same transaction and commits
//!
//! A crash therefore either loses the whole step or keeps the whole step.
//! `continue` simply runs the loop again from the saved journal.

mod journal;

pub use journal::JournalEntry;

use crate::commands::Command;
use crate::config::RepoConfig;
use crate::error::{CoreError, CoreResult};
use crate::merge::ConflictResolver;
use crate::objects::ObjectStore;
use crate::store::VersionedStore;
use crate::types::Outcome;
use bytes::Bytes;
use tracing::{debug, info, trace, warn};
use versync_codec::{unpack_verified, ContentHash};
use versync_storage::KvStore;

/// What a command wants after one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The command is finished and leaves the stack.
    Done,
    /// Run the pushed sub-commands (if any), then step this command again.
    Again,
    /// Stop without recording anything; the same step runs on `continue`.
    Suspend,
}

/// Everything one command step may touch.
pub struct StepContext<'s, 'a> {
    /// The store transaction of this step.
    pub store: &'s mut VersionedStore<'a>,
    /// Content-addressed objects.
    pub objects: &'s dyn ObjectStore,
    /// Repository configuration.
    pub config: &'s RepoConfig,
    /// Answers merge conflicts that need a decision.
    pub resolver: &'s mut dyn ConflictResolver,
    diffs: &'s mut DiffCache,
    children: Vec<Command>,
}

impl<'s, 'a> StepContext<'s, 'a> {
    /// Creates a context for one step.
    pub fn new(
        store: &'s mut VersionedStore<'a>,
        objects: &'s dyn ObjectStore,
        config: &'s RepoConfig,
        resolver: &'s mut dyn ConflictResolver,
        diffs: &'s mut DiffCache,
    ) -> Self {
        Self {
            store,
            objects,
            config,
            resolver,
            diffs,
            children: Vec::new(),
        }
    }

    /// The uncompressed, verified bytes of diff object `hash`.
    ///
    /// # Errors
    ///
    /// Returns `ObjectMissing` or a codec error.
    pub fn unpacked(&mut self, hash: &ContentHash) -> CoreResult<Bytes> {
        self.diffs.get(self.objects, hash)
    }

    /// Schedules a sub-command to run before the current command resumes.
    pub fn push(&mut self, command: Command) {
        self.children.push(command);
    }

    fn into_children(self) -> Vec<Command> {
        self.children
    }
}

/// The most recently unpacked diff.
///
/// Chunked commands step through one diff many times in a row; keeping it
/// around saves reading and decompressing it on every step. Objects are
/// immutable, so an entry never goes stale.
#[derive(Debug, Default)]
pub struct DiffCache {
    entry: Option<(ContentHash, Bytes)>,
}

impl DiffCache {
    fn get(&mut self, objects: &dyn ObjectStore, hash: &ContentHash) -> CoreResult<Bytes> {
        if let Some((cached, raw)) = &self.entry {
            if cached == hash {
                return Ok(raw.clone());
            }
        }
        let packed = objects.require(hash)?;
        let raw = unpack_verified(&packed, hash)?;
        trace!(%hash, len = raw.len(), "diff unpacked");
        self.entry = Some((*hash, raw.clone()));
        Ok(raw)
    }
}

/// Drives journaled commands over a key-value store.
pub struct Engine<'r> {
    kv: &'r dyn KvStore,
    objects: &'r dyn ObjectStore,
    config: &'r RepoConfig,
}

impl<'r> Engine<'r> {
    /// Creates an engine.
    pub fn new(kv: &'r dyn KvStore, objects: &'r dyn ObjectStore, config: &'r RepoConfig) -> Self {
        Self { kv, objects, config }
    }

    /// Descriptor of the pending operation, if a journal exists.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn pending(&self) -> CoreResult<Option<String>> {
        let store = VersionedStore::begin(self.kv)?;
        let entry = JournalEntry::load(&store)?;
        store.rollback();
        Ok(entry.map(|e| e.operation))
    }

    /// Journals `command` as a new operation and runs it.
    ///
    /// # Errors
    ///
    /// Returns `OperationInProgress` if another operation is pending, or the
    /// first error a step raises. A failed step is rolled back and the
    /// journal keeps its previous checkpoint.
    pub fn start(
        &self,
        operation: &str,
        command: Command,
        resolver: &mut dyn ConflictResolver,
    ) -> CoreResult<Outcome> {
        let mut store = VersionedStore::begin(self.kv)?;
        if let Some(existing) = JournalEntry::load(&store)? {
            store.rollback();
            return Err(CoreError::OperationInProgress {
                operation: existing.operation,
            });
        }
        JournalEntry::new(operation, command).save(&mut store)?;
        store.commit()?;
        info!(operation, "operation started");
        self.run(resolver)
    }

    /// Runs the journaled operation until it completes, suspends, or the
    /// configured step budget is spent.
    ///
    /// # Errors
    ///
    /// Returns `NoPendingOperation` if there is no journal, or the first
    /// error a step raises.
    pub fn run(&self, resolver: &mut dyn ConflictResolver) -> CoreResult<Outcome> {
        let mut steps = 0usize;
        let mut diffs = DiffCache::default();
        loop {
            let mut store = VersionedStore::begin(self.kv)?;
            let Some(mut entry) = JournalEntry::load(&store)? else {
                store.rollback();
                return if steps == 0 {
                    Err(CoreError::NoPendingOperation)
                } else {
                    Ok(Outcome::Completed)
                };
            };
            entry.prune();
            if entry.is_finished() {
                store.clear_journal();
                store.commit()?;
                info!(operation = %entry.operation, steps, "operation completed");
                return Ok(Outcome::Completed);
            }
            if self.config.step_budget.is_some_and(|budget| steps >= budget) {
                store.rollback();
                info!(operation = %entry.operation, steps, "step budget spent");
                return Ok(Outcome::Interrupted {
                    operation: entry.operation,
                });
            }

            let depth = entry.depth();
            let Some(queue) = entry.stack.last_mut() else {
                return Err(CoreError::consistency("journal stack vanished"));
            };
            let Some(command) = queue.first_mut() else {
                return Err(CoreError::consistency("journal queue vanished"));
            };
            let name = command.name();

            let mut ctx = StepContext::new(&mut store, self.objects, self.config, resolver, &mut diffs);
            let result = command.execute(&mut ctx);
            let children = ctx.into_children();

            let step = match result {
                Ok(step) => step,
                Err(err) => {
                    store.rollback();
                    warn!(command = name, error = %err, "step failed, rolled back");
                    return Err(err);
                }
            };
            debug!(command = name, depth, ?step, children = children.len(), "step");

            match step {
                Step::Suspend => {
                    store.rollback();
                    info!(operation = %entry.operation, "operation suspended");
                    return Ok(Outcome::Suspended {
                        operation: entry.operation,
                    });
                }
                Step::Done => {
                    queue.remove(0);
                }
                Step::Again => {}
            }
            if !children.is_empty() {
                entry.stack.push(children);
            }
            entry.prune();
            entry.save(&mut store)?;
            store.commit()?;
            steps += 1;
        }
    }

    /// Drops the journal without undoing completed steps.
    ///
    /// # Errors
    ///
    /// Returns `NoPendingOperation` if there is no journal.
    pub fn abandon(&self) -> CoreResult<String> {
        let mut store = VersionedStore::begin(self.kv)?;
        let Some(entry) = JournalEntry::load(&store)? else {
            store.rollback();
            return Err(CoreError::NoPendingOperation);
        };
        store.clear_journal();
        store.commit()?;
        warn!(operation = %entry.operation, "operation abandoned");
        Ok(entry.operation)
    }
}
