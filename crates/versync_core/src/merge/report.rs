//! User-facing summary of a merge.

use super::resolve::Resolution;
use crate::types::Version;
use serde::{Deserialize, Serialize};
use std::fmt;
use versync_codec::Identifier;

/// How one conflict was decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictOutcome {
    /// The object.
    pub id: Identifier,
    /// Chosen side.
    pub resolution: Resolution,
    /// Decided by the time-only rule rather than by policy or prompt.
    pub automatic: bool,
}

/// A link renamed because its name was taken at the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rename {
    /// Containing directory.
    pub dir: Identifier,
    /// Name the change asked for.
    pub original: String,
    /// Name it received.
    pub renamed: String,
}

/// A local entry whose directory master removed, linked under the root
/// instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rescue {
    /// The removed directory.
    pub dir: Identifier,
    /// Entry name, kept under the root.
    pub name: String,
    /// The linked object.
    pub inode: Identifier,
}

/// Summary of the last merge, stored for `status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    /// Last version both histories agreed on.
    pub common_version: Version,
    /// Whether the merge was a fast-forward.
    pub fast_forward: bool,
    /// Master commits appended.
    pub master_applied: usize,
    /// Local commits replayed.
    pub local_replayed: usize,
    /// Decided conflicts.
    pub conflicts: Vec<ConflictOutcome>,
    /// Collision renames.
    pub renames: Vec<Rename>,
    /// Entries moved out of directories master removed.
    pub rescued: Vec<Rescue>,
}

impl fmt::Display for MergeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fast_forward {
            writeln!(
                f,
                "fast-forward from v{}: {} commit(s)",
                self.common_version, self.master_applied
            )?;
        } else {
            writeln!(
                f,
                "merged at v{}: {} master commit(s), {} local commit(s) replayed",
                self.common_version, self.master_applied, self.local_replayed
            )?;
        }
        for conflict in &self.conflicts {
            let how = if conflict.automatic { " (auto)" } else { "" };
            writeln!(f, "  conflict {}: {}{how}", conflict.id, conflict.resolution)?;
        }
        for rename in &self.renames {
            writeln!(f, "  renamed {} -> {}", rename.original, rename.renamed)?;
        }
        for rescue in &self.rescued {
            writeln!(f, "  moved {} to / (directory {} was removed)", rescue.name, rescue.dir)?;
        }
        Ok(())
    }
}
