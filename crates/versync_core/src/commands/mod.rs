//! Journaled commands.
//!
//! Every command is a serializable state struct plus a step function. The
//! [`Command`] enum is the tagged union stored in the journal; its `op`
//! field selects the variant on resume.

mod apply;
mod commit;
mod fast_forward;
mod revert;

pub use apply::{apply_record, ApplyCommand};
pub(crate) use apply::free_name;
pub use commit::{CommitCommand, CommitPhase};
pub use fast_forward::FastForwardCommand;
pub use revert::RevertCommand;

use crate::engine::{Step, StepContext};
use crate::error::CoreResult;
use crate::merge::MergeCommand;
use serde::{Deserialize, Serialize};

/// A resumable command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    /// Apply a stored diff.
    Apply(ApplyCommand),
    /// Commit the working version.
    Commit(CommitCommand),
    /// Revert to an earlier version.
    Revert(RevertCommand),
    /// Append newer remote commits.
    FastForward(FastForwardCommand),
    /// Three-way merge with a remote history.
    Merge(Box<MergeCommand>),
}

impl Command {
    /// Operation name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Apply(_) => "apply",
            Self::Commit(_) => "commit",
            Self::Revert(_) => "revert",
            Self::FastForward(_) => "fast_forward",
            Self::Merge(_) => "merge",
        }
    }

    /// Runs one step.
    ///
    /// # Errors
    ///
    /// Returns the first error of the step; the engine rolls the step back.
    pub fn execute(&mut self, ctx: &mut StepContext<'_, '_>) -> CoreResult<Step> {
        match self {
            Self::Apply(command) => command.execute(ctx),
            Self::Commit(command) => command.execute(ctx),
            Self::Revert(command) => command.execute(ctx),
            Self::FastForward(command) => command.execute(ctx),
            Self::Merge(command) => command.execute(ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{from_cbor, to_cbor};
    use crate::types::CommitMeta;
    use versync_codec::ContentHash;

    #[test]
    fn commands_survive_the_journal_encoding() {
        let commands = vec![
            Command::Apply(ApplyCommand::new(ContentHash::of(b"d")).renaming()),
            Command::Commit(CommitCommand::new(CommitMeta::message("m"))),
            Command::Revert(RevertCommand { target: 3, bucket: 17 }),
            Command::FastForward(FastForwardCommand::new(Vec::new())),
        ];
        let bytes = to_cbor(&commands).unwrap();
        let decoded: Vec<Command> = from_cbor(&bytes).unwrap();
        assert_eq!(decoded, commands);
        assert_eq!(decoded[2].name(), "revert");
    }
}
