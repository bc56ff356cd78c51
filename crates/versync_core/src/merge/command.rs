//! The merge command.

use super::conflict::Conflict;
use super::history::MergeHistory;
use super::report::{ConflictOutcome, MergeReport, Rename};
use super::resolve::{Resolution, ResolverAnswer};
use super::synthesis::synthesize;
use crate::commands::{ApplyCommand, Command, CommitCommand, FastForwardCommand, RevertCommand};
use crate::engine::{Step, StepContext};
use crate::error::CoreResult;
use crate::objects::ObjectStore;
use crate::store::VersionedStore;
use crate::types::{CommitMeta, TaggedEntry, Version};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use versync_codec::{unpack_verified, ContentHash, Diff, Identifier};

/// Meta key of the last merge report.
pub const LAST_MERGE_META: &str = "last_merge";

/// Where a merge stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergePhase {
    /// Replay both sides and find conflicts.
    Analyze,
    /// Ask for the conflict at `next`.
    Resolve {
        /// Index into the conflict list.
        next: usize,
    },
    /// Build the corrective diff and rewrite local commits.
    Synthesize,
    /// Revert to the common version.
    Revert,
    /// Append the master commit at `next`.
    Master {
        /// Index into the master commits.
        next: usize,
    },
    /// Apply and commit the corrective diff.
    Corrective,
    /// Replay the local commit at `next`.
    Local {
        /// Index into the local commits.
        next: usize,
    },
    /// Record the report.
    Finish,
}

/// Three-way merge of local commits with master commits after a common
/// version.
///
/// Every phase transition is a checkpoint; a conflict prompt that is
/// aborted leaves the phase where it was, so `continue` asks again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeCommand {
    /// Current phase.
    pub phase: MergePhase,
    /// Last version both histories agree on.
    pub common: Version,
    /// Master commits after `common`.
    pub master: Vec<TaggedEntry>,
    /// Local commits after `common`.
    pub local: Vec<TaggedEntry>,
    /// Objects touched by both sides.
    pub conflicts: Vec<Conflict>,
    /// Stored corrective diff, if anything needs correcting.
    pub corrective: Option<ContentHash>,
    /// Stored rewritten local commits; `None` where nothing is left.
    pub rewritten: Vec<Option<ContentHash>>,
    /// Summary built along the way.
    pub report: MergeReport,
}

impl MergeCommand {
    /// A merge of `local` and `master` commits after `common`.
    #[must_use]
    pub fn new(common: Version, master: Vec<TaggedEntry>, local: Vec<TaggedEntry>) -> Self {
        let report = MergeReport {
            common_version: common,
            master_applied: master.len(),
            ..MergeReport::default()
        };
        Self {
            phase: MergePhase::Analyze,
            common,
            master,
            local,
            conflicts: Vec::new(),
            corrective: None,
            rewritten: Vec::new(),
            report,
        }
    }

    pub(crate) fn execute(&mut self, ctx: &mut StepContext<'_, '_>) -> CoreResult<Step> {
        debug!(phase = ?self.phase, "merge step");
        match self.phase {
            MergePhase::Analyze => self.analyze(ctx),
            MergePhase::Resolve { next } => self.resolve(ctx, next),
            MergePhase::Synthesize => self.synthesize(ctx),
            MergePhase::Revert => {
                ctx.push(Command::Revert(RevertCommand::new(self.common)));
                self.phase = MergePhase::Master { next: 0 };
                Ok(Step::Again)
            }
            MergePhase::Master { next } => {
                match self.master.get(next) {
                    Some(commit) => {
                        ctx.push(Command::Apply(ApplyCommand::sealing(
                            commit.entry.clone(),
                            commit.tags.clone(),
                        )));
                        self.phase = MergePhase::Master { next: next + 1 };
                    }
                    None => self.phase = MergePhase::Corrective,
                }
                Ok(Step::Again)
            }
            MergePhase::Corrective => {
                if let Some(hash) = self.corrective {
                    ctx.push(Command::Apply(ApplyCommand::new(hash).renaming()));
                    ctx.push(Command::Commit(CommitCommand::new(CommitMeta::message(
                        "merge: reconcile conflicts",
                    ))));
                }
                self.phase = MergePhase::Local { next: 0 };
                Ok(Step::Again)
            }
            MergePhase::Local { next } => {
                match self.local.get(next) {
                    Some(commit) => {
                        if let Some(hash) = self.rewritten.get(next).copied().flatten() {
                            ctx.push(Command::Apply(ApplyCommand::new(hash).renaming()));
                            ctx.push(Command::Commit(CommitCommand::new(commit.to_meta())));
                            self.report.local_replayed += 1;
                        }
                        self.phase = MergePhase::Local { next: next + 1 };
                    }
                    None => self.phase = MergePhase::Finish,
                }
                Ok(Step::Again)
            }
            MergePhase::Finish => self.finish(ctx),
        }
    }

    fn analyze(&mut self, ctx: &mut StepContext<'_, '_>) -> CoreResult<Step> {
        ctx.store.clear_renames()?;
        if self.local.is_empty() && ctx.config.fast_forward {
            self.report.fast_forward = true;
            ctx.push(Command::FastForward(FastForwardCommand::new(self.master.clone())));
            self.phase = MergePhase::Finish;
            return Ok(Step::Again);
        }

        let (master, local) = self.histories(ctx.store, ctx.objects)?;
        self.conflicts = Conflict::detect(ctx.store, self.common, &master, &local)?;
        let policy = ctx.config.conflict_policy.fixed();
        for conflict in &self.conflicts {
            if let Some(resolution) = conflict.automatic() {
                self.report.conflicts.push(ConflictOutcome {
                    id: conflict.id,
                    resolution,
                    automatic: true,
                });
            } else if let Some(resolution) = policy {
                self.report.conflicts.push(outcome(conflict, resolution));
            }
        }
        info!(
            common = self.common,
            master = self.master.len(),
            local = self.local.len(),
            conflicts = self.conflicts.len(),
            "merge analyzed"
        );
        self.phase = MergePhase::Resolve { next: 0 };
        Ok(Step::Again)
    }

    fn resolve(&mut self, ctx: &mut StepContext<'_, '_>, mut next: usize) -> CoreResult<Step> {
        while let Some(conflict) = self.conflicts.get(next) {
            if self.resolution_of(&conflict.id).is_some() {
                next += 1;
                continue;
            }
            let resolution = match ctx.resolver.resolve(conflict) {
                ResolverAnswer::Abort => {
                    info!(id = %conflict.id, "conflict prompt aborted");
                    return Ok(Step::Suspend);
                }
                ResolverAnswer::Local => Resolution::Local,
                ResolverAnswer::Master => Resolution::Master,
                ResolverAnswer::Both => Resolution::Both,
            };
            let decided = outcome(conflict, resolution);
            debug!(id = %decided.id, resolution = %decided.resolution, "conflict resolved");
            self.report.conflicts.push(decided);
            self.phase = MergePhase::Resolve { next: next + 1 };
            return Ok(Step::Again);
        }
        self.phase = MergePhase::Synthesize;
        Ok(Step::Again)
    }

    fn synthesize(&mut self, ctx: &mut StepContext<'_, '_>) -> CoreResult<Step> {
        let (master, local) = self.histories(ctx.store, ctx.objects)?;
        let resolutions: BTreeMap<Identifier, Resolution> = self
            .report
            .conflicts
            .iter()
            .map(|c| (c.id, c.resolution))
            .collect();
        let synthesis = synthesize(ctx.store, &master, &local, &self.conflicts, &resolutions)?;

        let level = ctx.config.compression_level;
        let store_diff = |diff: &Diff| -> CoreResult<Option<ContentHash>> {
            if diff.is_empty() {
                return Ok(None);
            }
            let packed = diff.pack(level)?;
            ctx.objects.insert(&packed.hash, &packed.data)?;
            Ok(Some(packed.hash))
        };
        self.corrective = store_diff(&synthesis.corrective)?;
        self.report.rescued = synthesis.rescued.clone();
        self.rewritten = synthesis
            .local
            .iter()
            .map(store_diff)
            .collect::<CoreResult<_>>()?;
        debug!(
            corrective = synthesis.corrective.len(),
            duplicates = synthesis.substitutions.len(),
            rescued = synthesis.rescued.len(),
            "merge synthesized"
        );
        self.phase = MergePhase::Revert;
        Ok(Step::Again)
    }

    fn finish(&mut self, ctx: &mut StepContext<'_, '_>) -> CoreResult<Step> {
        self.report.renames = ctx
            .store
            .renames()?
            .into_iter()
            .map(|(dir, original, renamed)| Rename {
                dir,
                original,
                renamed,
            })
            .collect();
        ctx.store.clear_renames()?;
        ctx.store.put_meta(LAST_MERGE_META, &self.report)?;
        info!(
            common = self.common,
            fast_forward = self.report.fast_forward,
            renames = self.report.renames.len(),
            "merge finished"
        );
        Ok(Step::Done)
    }

    fn resolution_of(&self, id: &Identifier) -> Option<Resolution> {
        self.report
            .conflicts
            .iter()
            .find(|c| c.id == *id)
            .map(|c| c.resolution)
    }

    fn histories(
        &self,
        store: &VersionedStore<'_>,
        objects: &dyn ObjectStore,
    ) -> CoreResult<(MergeHistory, MergeHistory)> {
        let master = MergeHistory::build(store, self.common, &load_diffs(objects, &self.master)?)?;
        let local = MergeHistory::build(store, self.common, &load_diffs(objects, &self.local)?)?;
        Ok((master, local))
    }
}

/// A policy or prompt decision; "both" becomes "master" for objects with a
/// single identity.
fn outcome(conflict: &Conflict, resolution: Resolution) -> ConflictOutcome {
    let resolution = if resolution == Resolution::Both && conflict.is_single_identity() {
        warn!(id = %conflict.id, "cannot keep both copies of a directory; keeping master");
        Resolution::Master
    } else {
        resolution
    };
    ConflictOutcome {
        id: conflict.id,
        resolution,
        automatic: false,
    }
}

fn load_diffs(objects: &dyn ObjectStore, commits: &[TaggedEntry]) -> CoreResult<Vec<Diff>> {
    commits
        .iter()
        .map(|commit| {
            let packed = objects.require(&commit.entry.hash)?;
            let raw = unpack_verified(&packed, &commit.entry.hash)?;
            Ok(Diff::parse(&raw)?)
        })
        .collect()
}
