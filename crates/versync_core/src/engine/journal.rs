//! The persisted command stack.

use crate::commands::Command;
use crate::error::CoreResult;
use crate::store::{from_cbor, to_cbor, VersionedStore};
use serde::{Deserialize, Serialize};

/// Snapshot of an in-progress operation.
///
/// `stack` holds one queue per nesting level; the last queue is the
/// innermost and its head is the next command to step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Descriptor shown to the user, e.g. `merge` or `revert 3`.
    pub operation: String,
    /// Nested command queues.
    pub stack: Vec<Vec<Command>>,
}

impl JournalEntry {
    /// A journal holding a single top-level command.
    #[must_use]
    pub fn new(operation: impl Into<String>, command: Command) -> Self {
        Self {
            operation: operation.into(),
            stack: vec![vec![command]],
        }
    }

    /// Loads the journal entry of `store`, if any.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn load(store: &VersionedStore<'_>) -> CoreResult<Option<Self>> {
        store
            .journal_bytes()?
            .map(|bytes| from_cbor(&bytes))
            .transpose()
    }

    /// Writes this entry into `store`, or removes the journal if the stack
    /// is empty.
    ///
    /// # Errors
    ///
    /// Returns a serialization error.
    pub fn save(&self, store: &mut VersionedStore<'_>) -> CoreResult<()> {
        if self.is_finished() {
            store.clear_journal();
        } else {
            store.put_journal_bytes(to_cbor(self)?);
        }
        Ok(())
    }

    /// Drops drained queues from the top of the stack.
    pub fn prune(&mut self) {
        while self.stack.last().is_some_and(Vec::is_empty) {
            self.stack.pop();
        }
    }

    /// Returns true once every queue is drained.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.stack.iter().all(Vec::is_empty)
    }

    /// Nesting depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}
