//! Three-way merge of diverged histories.
//!
//! Given the commits both sides made after their last common version, a
//! merge:
//!
//! 1. Replays each side to attribute every change to the object it affects
//! 2. Treats objects touched by both sides as conflicts and decides each one
//!    automatically, by policy, or through a [`ConflictResolver`]
//! 3. Reverts to the common version and appends the master commits as-is
//! 4. Commits a corrective diff for conflicts kept local or kept on both sides
//! 5. Replays the rewritten local commits as new versions
//!
//! Conflicts are found by object identity, not by name: two objects created
//! independently under the same name are not in conflict; the later one is
//! renamed to `name~N` when its link is replayed.

mod command;
mod conflict;
mod history;
mod report;
mod resolve;
mod synthesis;

pub use command::{MergeCommand, MergePhase, LAST_MERGE_META};
pub use conflict::Conflict;
pub use history::{LinkKey, MergeHistory};
pub use report::{ConflictOutcome, MergeReport, Rename, Rescue};
pub use resolve::{
    ConflictPolicy, ConflictResolver, FixedResolver, NoPrompt, Resolution, ResolverAnswer,
    ScriptedResolver,
};
pub use synthesis::{substitute, synthesize, Synthesis};
