//! Appending a strictly newer history.

use super::{ApplyCommand, Command};
use crate::engine::{Step, StepContext};
use crate::error::{CoreError, CoreResult};
use crate::types::TaggedEntry;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Applies remote commits one after another, sealing each with its original
/// history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FastForwardCommand {
    /// Commits to append, oldest first.
    pub entries: Vec<TaggedEntry>,
    /// Index of the next commit to schedule.
    pub next: usize,
}

impl FastForwardCommand {
    /// Fast-forwards over `entries`.
    #[must_use]
    pub fn new(entries: Vec<TaggedEntry>) -> Self {
        Self { entries, next: 0 }
    }

    pub(crate) fn execute(&mut self, ctx: &mut StepContext<'_, '_>) -> CoreResult<Step> {
        let Some(commit) = self.entries.get(self.next) else {
            info!(commits = self.entries.len(), "fast-forward finished");
            return Ok(Step::Done);
        };
        let w = ctx.store.working_version();
        if commit.entry.version != w {
            return Err(CoreError::consistency(format!(
                "fast-forward expected version {w}, got {}",
                commit.entry.version
            )));
        }
        ctx.push(Command::Apply(ApplyCommand::sealing(
            commit.entry.clone(),
            commit.tags.clone(),
        )));
        self.next += 1;
        Ok(Step::Again)
    }
}
