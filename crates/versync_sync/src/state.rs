//! Sync engine state machine.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::Peer;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use versync_codec::{unpack_verified, ContentHash};
use versync_core::{common_version, ConflictResolver, MergeReport, Outcome, Repository};

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Not syncing.
    Idle,
    /// Reading the peer's history.
    Connecting,
    /// Fetching objects and merging.
    Pulling,
    /// Sending objects and fast-forwarding the peer.
    Pushing,
    /// The last cycle completed.
    Synced,
    /// The last cycle failed.
    Error,
    /// Waiting before the next attempt.
    RetryWait,
}

impl SyncState {
    /// Returns true while an exchange is running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Pulling | Self::Pushing)
    }

    /// Returns true if a new exchange may start.
    #[must_use]
    pub fn can_start_sync(&self) -> bool {
        !self.is_active()
    }
}

/// Counters across every exchange of one engine.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Completed sync cycles.
    pub cycles_completed: u64,
    /// Commits received from the peer.
    pub commits_pulled: u64,
    /// Commits sent to the peer.
    pub commits_pushed: u64,
    /// Objects fetched from the peer.
    pub objects_fetched: u64,
    /// Objects stored on the peer.
    pub objects_sent: u64,
    /// Conflicts settled by completed merges.
    pub conflicts_resolved: u64,
    /// Retries made by [`SyncEngine::sync_with_retry`].
    pub retries: u64,
    /// When the last cycle completed.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of a pull, a push or a full cycle.
#[derive(Debug, Clone)]
pub struct SyncCycleResult {
    /// Commits received from the peer.
    pub pulled: u64,
    /// Commits sent to the peer.
    pub pushed: u64,
    /// Objects fetched from the peer.
    pub objects_fetched: u64,
    /// Objects stored on the peer.
    pub objects_sent: u64,
    /// How the local operation ended. A suspended or interrupted merge
    /// is resumed through the repository.
    pub outcome: Outcome,
    /// Report of the merge, when one completed.
    pub report: Option<MergeReport>,
    /// Wall time of the exchange.
    pub duration: Duration,
}

impl SyncCycleResult {
    fn empty() -> Self {
        Self {
            pulled: 0,
            pushed: 0,
            objects_fetched: 0,
            objects_sent: 0,
            outcome: Outcome::Completed,
            report: None,
            duration: Duration::ZERO,
        }
    }

    /// Returns true if the local side finished.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.outcome.is_completed()
    }
}

/// Synchronizes a repository with a [`Peer`].
///
/// Pull fetches the peer's new commits and merges them with the peer as
/// master. Push only fast-forwards the peer, so a replica that is behind
/// must pull first.
pub struct SyncEngine<'r, P: Peer> {
    config: SyncConfig,
    repo: &'r Repository,
    peer: P,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    cancelled: AtomicBool,
}

impl<'r, P: Peer> SyncEngine<'r, P> {
    /// Creates an engine for `repo` and `peer`.
    pub fn new(config: SyncConfig, repo: &'r Repository, peer: P) -> Self {
        Self {
            config,
            repo,
            peer,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// The peer.
    pub fn peer(&self) -> &P {
        &self.peer
    }

    /// Requests cancellation. Checked between batches.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Clears a cancellation request.
    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    fn begin(&self, activity: &str) -> SyncResult<()> {
        let state = self.state();
        if !state.can_start_sync() {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{state:?}"),
                to: activity.to_string(),
            });
        }
        self.check_cancelled()
    }

    fn finish(&self, result: SyncResult<SyncCycleResult>) -> SyncResult<SyncCycleResult> {
        match &result {
            Ok(cycle) => {
                self.set_state(if cycle.is_completed() {
                    SyncState::Synced
                } else {
                    SyncState::Idle
                });
                let mut stats = self.stats.write();
                stats.commits_pulled += cycle.pulled;
                stats.commits_pushed += cycle.pushed;
                stats.objects_fetched += cycle.objects_fetched;
                stats.objects_sent += cycle.objects_sent;
                if let Some(report) = &cycle.report {
                    stats.conflicts_resolved += report.conflicts.len() as u64;
                }
                stats.last_error = None;
            }
            Err(e) => {
                self.set_state(SyncState::Error);
                self.stats.write().last_error = Some(e.to_string());
                warn!(error = %e, "sync failed");
            }
        }
        result
    }

    /// Fetches the peer's new commits with their objects and merges them.
    ///
    /// An uninitialized repository takes the peer's history as is.
    ///
    /// # Errors
    ///
    /// Returns a policy error if a local operation is pending, and the
    /// transport, verification or merge error otherwise.
    pub fn pull(&self, resolver: &mut dyn ConflictResolver) -> SyncResult<SyncCycleResult> {
        self.begin("pull")?;
        let start = Instant::now();
        let result = self.pull_inner(resolver).map(|mut cycle| {
            cycle.duration = start.elapsed();
            cycle
        });
        self.finish(result)
    }

    /// Sends local commits the peer lacks and fast-forwards it.
    ///
    /// # Errors
    ///
    /// Returns a policy error if the peer has commits this replica lacks
    /// or a local operation is pending.
    pub fn push(&self) -> SyncResult<SyncCycleResult> {
        self.begin("push")?;
        let start = Instant::now();
        let result = self.push_inner().map(|mut cycle| {
            cycle.duration = start.elapsed();
            cycle
        });
        self.finish(result)
    }

    /// Pull, then push. The push is skipped when the pull leaves a
    /// merge pending.
    ///
    /// # Errors
    ///
    /// Returns the first error of either half.
    pub fn sync(&self, resolver: &mut dyn ConflictResolver) -> SyncResult<SyncCycleResult> {
        self.begin("sync")?;
        let start = Instant::now();
        let result = self.sync_inner(resolver).map(|mut cycle| {
            cycle.duration = start.elapsed();
            cycle
        });
        let result = self.finish(result);
        if let Ok(cycle) = &result {
            if cycle.is_completed() {
                let mut stats = self.stats.write();
                stats.cycles_completed += 1;
                stats.last_sync_time = Some(Instant::now());
            }
        }
        result
    }

    /// Runs [`SyncEngine::sync`] until it succeeds, fails with a
    /// non-retryable error or runs out of attempts.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt.
    pub fn sync_with_retry(&self, resolver: &mut dyn ConflictResolver) -> SyncResult<SyncCycleResult> {
        let retry = &self.config.retry;
        let attempts = retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                self.set_state(SyncState::RetryWait);
                std::thread::sleep(retry.delay_for_attempt(attempt));
                self.stats.write().retries += 1;
            }
            match self.sync(resolver) {
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    debug!(attempt, error = %e, "retrying sync");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn sync_inner(&self, resolver: &mut dyn ConflictResolver) -> SyncResult<SyncCycleResult> {
        let mut cycle = self.pull_inner(resolver)?;
        if !cycle.is_completed() {
            info!(outcome = ?cycle.outcome, "merge pending, push skipped");
            return Ok(cycle);
        }
        let pushed = self.push_inner()?;
        cycle.pushed = pushed.pushed;
        cycle.objects_sent = pushed.objects_sent;
        Ok(cycle)
    }

    fn ensure_idle_repo(&self) -> SyncResult<()> {
        match self.repo.pending_operation()? {
            Some(operation) => Err(SyncError::policy(format!(
                "finish or abandon the pending {operation} first"
            ))),
            None => Ok(()),
        }
    }

    fn pull_inner(&self, resolver: &mut dyn ConflictResolver) -> SyncResult<SyncCycleResult> {
        self.ensure_idle_repo()?;
        self.set_state(SyncState::Connecting);
        let remote = self.peer.history()?;
        let local = self.repo.tagged_history()?;
        let common = common_version(&local, &remote);
        let split = usize::try_from(common).unwrap_or(usize::MAX).min(remote.len());
        let incoming = &remote[split..];
        let mut cycle = SyncCycleResult::empty();
        if incoming.is_empty() {
            debug!(common, "nothing to pull");
            return Ok(cycle);
        }

        self.set_state(SyncState::Pulling);
        let diffs: Vec<ContentHash> = incoming.iter().map(|commit| commit.entry.hash).collect();
        cycle.objects_fetched += self.fetch_missing(&diffs, true)?;
        let diff_set: BTreeSet<ContentHash> = diffs.into_iter().collect();
        let content: Vec<ContentHash> = self
            .repo
            .required_objects(incoming)?
            .into_iter()
            .filter(|hash| !diff_set.contains(hash))
            .collect();
        cycle.objects_fetched += self.fetch_missing(&content, false)?;
        self.check_cancelled()?;

        cycle.pulled = incoming.len() as u64;
        cycle.outcome = if local.is_empty() {
            self.repo.fast_forward(remote)?
        } else {
            let outcome = self.repo.merge(&remote, resolver)?;
            if outcome.is_completed() {
                cycle.report = self.repo.last_merge_report()?;
            }
            outcome
        };
        info!(
            common,
            pulled = cycle.pulled,
            fetched = cycle.objects_fetched,
            outcome = ?cycle.outcome,
            "pull finished"
        );
        Ok(cycle)
    }

    /// Fetches the hashes this repository lacks, verifying each object
    /// against its address. Returns how many were stored.
    fn fetch_missing(&self, hashes: &[ContentHash], packed: bool) -> SyncResult<u64> {
        let objects = self.repo.objects();
        let mut wanted = Vec::new();
        for hash in hashes {
            if !objects.contains(hash)? {
                wanted.push(*hash);
            }
        }
        let mut stored = 0u64;
        for batch in wanted.chunks(self.config.fetch_batch_size.max(1)) {
            self.check_cancelled()?;
            let received = self.peer.fetch(batch)?;
            for (hash, data) in &received {
                if !batch.contains(hash) {
                    continue;
                }
                let valid = if packed {
                    unpack_verified(data, hash).is_ok()
                } else {
                    ContentHash::of(data) == *hash
                };
                if !valid {
                    return Err(SyncError::Integrity { hash: *hash });
                }
                objects.insert(hash, data)?;
                stored += 1;
            }
            if let Some(hash) = batch.iter().find(|hash| !received.iter().any(|(h, _)| h == *hash)) {
                return Err(SyncError::MissingObject { hash: *hash });
            }
            debug!(batch = batch.len(), "fetched objects");
        }
        Ok(stored)
    }

    fn push_inner(&self) -> SyncResult<SyncCycleResult> {
        self.ensure_idle_repo()?;
        self.set_state(SyncState::Connecting);
        let remote = self.peer.history()?;
        let local = self.repo.tagged_history()?;
        let common = common_version(&local, &remote);
        if remote.len() as u64 > common {
            return Err(SyncError::policy(format!(
                "peer has {} commits this replica lacks; pull first",
                remote.len() as u64 - common
            )));
        }
        let split = usize::try_from(common).unwrap_or(usize::MAX).min(local.len());
        let outgoing = &local[split..];
        let mut cycle = SyncCycleResult::empty();
        if outgoing.is_empty() {
            debug!(common, "nothing to push");
            return Ok(cycle);
        }

        self.set_state(SyncState::Pushing);
        let required: Vec<ContentHash> = self.repo.required_objects(outgoing)?.into_iter().collect();
        let batch_size = self.config.push_batch_size.max(1);
        let mut missing = Vec::new();
        for batch in required.chunks(batch_size) {
            missing.extend(self.peer.missing(batch)?);
        }
        for batch in missing.chunks(batch_size) {
            self.check_cancelled()?;
            let mut objects = Vec::with_capacity(batch.len());
            for hash in batch {
                objects.push((*hash, self.repo.objects().require(hash)?));
            }
            self.peer.store(&objects)?;
            cycle.objects_sent += objects.len() as u64;
        }
        self.check_cancelled()?;
        self.peer.fast_forward(outgoing.to_vec())?;
        cycle.pushed = outgoing.len() as u64;
        info!(common, pushed = cycle.pushed, sent = cycle.objects_sent, "push finished");
        Ok(cycle)
    }
}
