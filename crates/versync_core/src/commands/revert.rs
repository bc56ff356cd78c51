//! Reverting the store to an earlier version.

use crate::engine::{Step, StepContext};
use crate::error::CoreResult;
use crate::types::Version;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const BUCKETS: u16 = 256;

/// Drops every record created after `target`, re-opens the records live at
/// `target`, and truncates history so that `target + 1` is the working
/// version.
///
/// Records are reverted a few identifier buckets per step; the final step
/// truncates history and moves the working version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevertCommand {
    /// Version to return to.
    pub target: Version,
    /// Next bucket to revert.
    pub bucket: u16,
}

impl RevertCommand {
    /// Reverts to `target`.
    #[must_use]
    pub fn new(target: Version) -> Self {
        Self { target, bucket: 0 }
    }

    pub(crate) fn execute(&mut self, ctx: &mut StepContext<'_, '_>) -> CoreResult<Step> {
        if self.bucket < BUCKETS {
            let end = (self.bucket as usize + ctx.config.revert_buckets_per_step).min(BUCKETS as usize);
            let mut touched = 0;
            for bucket in self.bucket as usize..end {
                touched += ctx.store.revert_bucket(self.target, bucket as u8)?;
            }
            debug!(from = self.bucket, to = end, touched, "buckets reverted");
            self.bucket = end as u16;
            return Ok(Step::Again);
        }

        ctx.store.truncate_history(self.target)?;
        ctx.store.clear_all_staged()?;
        ctx.store.set_working_version(self.target + 1)?;
        ctx.store.set_dirty(false)?;
        info!(target = self.target, "reverted");
        Ok(Step::Done)
    }
}
