//! Crash recovery testing for Versync.
//!
//! The harness runs an operation from a prepared repository state and
//! compares every interrupted run against one that was never interrupted.
//!
//! ## Test Strategy
//!
//! 1. **Torn log writes** - the store's log device fails after a byte
//!    budget, leaving a partial frame. The repository is reopened from the
//!    device and the pending operation is continued, or started again if
//!    its journal never reached the log.
//! 2. **Step budgets** - the engine stops after `n` steps and is resumed
//!    until done.
//!
//! Either way the result must match the uninterrupted run.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use versync_testkit::crash::CrashHarness;
//!
//! let harness = CrashHarness::prepare(RepoConfig::default(), |repo| {
//!     repo.init()?;
//!     repo.create_file("/a", b"a")?;
//!     Ok(())
//! })?;
//! let results = harness.torn_writes(&|repo| repo.commit("a"))?;
//! assert!(results.iter().all(|r| r.passed));
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use versync_codec::ContentHash;
use versync_core::{
    CoreResult, MemoryObjectStore, NoPrompt, Outcome, RepoConfig, Repository, TreeSnapshot, Version,
};
use versync_storage::{LogDevice, LogKv, MemoryDevice, StorageError, StorageResult};

/// A log device that fails once a byte budget is used up.
///
/// The append that crosses the budget writes its leading bytes and fails,
/// like a process dying in the middle of a write. Every later append or
/// truncate fails, so the torn bytes stay on the device.
pub struct CrashableDevice {
    inner: MemoryDevice,
    crash_after_bytes: usize,
    bytes_written: Arc<AtomicUsize>,
    crashed: Arc<AtomicBool>,
}

impl CrashableDevice {
    /// Wraps `inner`, crashing after `crash_after_bytes` appended bytes.
    pub fn new(inner: MemoryDevice, crash_after_bytes: usize) -> Self {
        Self {
            inner,
            crash_after_bytes,
            bytes_written: Arc::new(AtomicUsize::new(0)),
            crashed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A device that never crashes but counts appended bytes.
    pub fn counting(inner: MemoryDevice) -> Self {
        Self::new(inner, usize::MAX)
    }

    /// Shared counter of appended bytes.
    pub fn bytes_written(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.bytes_written)
    }

    /// Shared crash flag.
    pub fn crashed(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.crashed)
    }

    fn crash(&self, what: &str) -> StorageError {
        self.crashed.store(true, Ordering::SeqCst);
        StorageError::Io(std::io::Error::other(format!("simulated crash during {what}")))
    }
}

impl LogDevice for CrashableDevice {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        self.inner.read_all()
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if self.crashed.load(Ordering::SeqCst) {
            return Err(self.crash("write after crash"));
        }
        let current = self.bytes_written.load(Ordering::SeqCst);
        let left = self.crash_after_bytes.saturating_sub(current);
        if data.len() > left {
            if left > 0 {
                self.inner.append(&data[..left])?;
            }
            self.bytes_written.fetch_add(left, Ordering::SeqCst);
            return Err(self.crash("partial write"));
        }
        self.bytes_written.fetch_add(data.len(), Ordering::SeqCst);
        self.inner.append(data)
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        if self.crashed.load(Ordering::SeqCst) {
            return Err(self.crash("truncate after crash"));
        }
        self.inner.truncate(new_size)
    }
}

/// What must agree between an interrupted and an uninterrupted run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoFingerprint {
    /// `(version, diff hash, message)` of every commit.
    pub history: Vec<(Version, ContentHash, String)>,
    /// The tree at the head version.
    pub head: TreeSnapshot,
    /// Whether the working version has uncommitted changes.
    pub dirty: bool,
    /// Pending operation, if any.
    pub pending: Option<String>,
}

impl RepoFingerprint {
    /// Captures `repo`.
    ///
    /// # Errors
    ///
    /// Returns a storage or consistency error.
    pub fn of(repo: &Repository) -> CoreResult<Self> {
        let history = repo
            .history()?
            .into_iter()
            .map(|entry| (entry.version, entry.hash, entry.message))
            .collect();
        Ok(Self {
            history,
            head: repo.snapshot(repo.head_version()?)?,
            dirty: repo.is_dirty()?,
            pending: repo.pending_operation()?,
        })
    }
}

/// Result of one interrupted run.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether recovery matched the uninterrupted run.
    pub passed: bool,
    /// Where the run was interrupted.
    pub description: String,
    /// Times the operation had to be continued or restarted.
    pub resumes: usize,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    fn pass(description: String, resumes: usize) -> Self {
        Self {
            passed: true,
            description,
            resumes,
            error: None,
        }
    }

    fn fail(description: String, resumes: usize, error: impl Into<String>) -> Self {
        Self {
            passed: false,
            description,
            resumes,
            error: Some(error.into()),
        }
    }
}

/// An operation under test.
pub type Operation<'a> = &'a dyn Fn(&Repository) -> CoreResult<Outcome>;

/// Runs an operation from a fixed repository state, with and without
/// interruptions.
pub struct CrashHarness {
    log: Vec<u8>,
    objects: MemoryObjectStore,
    config: RepoConfig,
    max_points: usize,
    max_resumes: usize,
}

impl CrashHarness {
    /// Captures the state `setup` leaves behind.
    ///
    /// # Errors
    ///
    /// Returns the first error of `setup`.
    pub fn prepare(
        config: RepoConfig,
        setup: impl FnOnce(&Repository) -> CoreResult<()>,
    ) -> CoreResult<Self> {
        let device = MemoryDevice::new();
        let objects = MemoryObjectStore::new();
        let repo = Repository::with_parts(
            Box::new(LogKv::open(Box::new(device.clone()), false)?),
            Box::new(objects.clone()),
            config.clone(),
        );
        setup(&repo)?;
        Ok(Self {
            log: device.data(),
            objects,
            config,
            max_points: 64,
            max_resumes: 10_000,
        })
    }

    /// Caps the number of crash positions tried.
    #[must_use]
    pub fn with_max_points(mut self, points: usize) -> Self {
        self.max_points = points.max(1);
        self
    }

    /// A fresh copy of the prepared state, over `device`.
    fn open(
        &self,
        device: Box<dyn LogDevice>,
        objects: &MemoryObjectStore,
        config: RepoConfig,
    ) -> CoreResult<Repository> {
        Ok(Repository::with_parts(
            Box::new(LogKv::open(device, false)?),
            Box::new(objects.clone()),
            config,
        ))
    }

    /// Runs the operation uninterrupted. Returns the fingerprint and the
    /// number of log bytes the operation wrote.
    ///
    /// # Errors
    ///
    /// Returns the operation's error, or a policy error if it does not
    /// complete.
    pub fn reference(&self, op: Operation<'_>) -> CoreResult<(RepoFingerprint, usize)> {
        let device = CrashableDevice::counting(MemoryDevice::with_data(self.log.clone()));
        let written = device.bytes_written();
        let objects = self.objects.deep_clone();
        let repo = self.open(Box::new(device), &objects, self.config.clone())?;
        let outcome = op(&repo)?;
        if !outcome.is_completed() {
            return Err(versync_core::CoreError::policy(format!(
                "reference run did not complete: {outcome:?}"
            )));
        }
        Ok((RepoFingerprint::of(&repo)?, written.load(Ordering::SeqCst)))
    }

    /// Crashes the log at evenly spread byte positions, recovers each time
    /// and compares with the reference run.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference run fails.
    pub fn torn_writes(&self, op: Operation<'_>) -> CoreResult<Vec<CrashRecoveryResult>> {
        let (expected, total) = self.reference(op)?;
        let step = (total / self.max_points).max(1);
        let mut results = Vec::new();
        let mut position = 0;
        while position < total {
            results.push(self.crash_at(op, &expected, position));
            position += step;
        }
        if total > 0 && (total - 1) % step != 0 {
            results.push(self.crash_at(op, &expected, total - 1));
        }
        Ok(results)
    }

    fn crash_at(&self, op: Operation<'_>, expected: &RepoFingerprint, position: usize) -> CrashRecoveryResult {
        let description = format!("crash after {position} log bytes");
        let memory = MemoryDevice::with_data(self.log.clone());
        let objects = self.objects.deep_clone();

        let run = || -> CoreResult<usize> {
            let device = CrashableDevice::new(memory.clone(), position);
            let crashed = device.crashed();
            let repo = self.open(Box::new(device), &objects, self.config.clone())?;
            let first = op(&repo);
            // Commit timestamps vary in encoded length, so a position close
            // to the end may not be reached.
            let (repo, mut resumes, mut outcome) = if crashed.load(Ordering::SeqCst) {
                drop(repo);
                let repo = self.open(Box::new(memory.clone()), &objects, self.config.clone())?;
                let outcome = if repo.pending_operation()?.is_some() {
                    repo.continue_operation(&mut NoPrompt)?
                } else {
                    op(&repo)?
                };
                (repo, 1, outcome)
            } else {
                (repo, 0, first?)
            };
            while let Outcome::Interrupted { .. } = outcome {
                resumes += 1;
                outcome = repo.continue_operation(&mut NoPrompt)?;
            }
            if !outcome.is_completed() {
                return Err(versync_core::CoreError::consistency(format!(
                    "recovery did not complete: {outcome:?}"
                )));
            }
            repo.verify()?;
            let actual = RepoFingerprint::of(&repo)?;
            if &actual != expected {
                return Err(versync_core::CoreError::consistency(format!(
                    "recovered state differs: expected {expected:?}, got {actual:?}"
                )));
            }
            Ok(resumes)
        };

        match run() {
            Ok(resumes) => CrashRecoveryResult::pass(description, resumes),
            Err(e) => CrashRecoveryResult::fail(description, 0, e.to_string()),
        }
    }

    /// Runs the operation with step budgets `1..=max_budget`, resuming
    /// until done, and compares each with the reference run.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference run fails.
    pub fn step_budgets(&self, op: Operation<'_>, max_budget: usize) -> CoreResult<Vec<CrashRecoveryResult>> {
        let (expected, _) = self.reference(op)?;
        Ok((1..=max_budget)
            .map(|budget| self.run_with_budget(op, &expected, budget))
            .collect())
    }

    fn run_with_budget(&self, op: Operation<'_>, expected: &RepoFingerprint, budget: usize) -> CrashRecoveryResult {
        let description = format!("step budget {budget}");
        let run = || -> CoreResult<usize> {
            let objects = self.objects.deep_clone();
            let config = self.config.clone().step_budget(Some(budget));
            let repo = self.open(
                Box::new(MemoryDevice::with_data(self.log.clone())),
                &objects,
                config,
            )?;
            let mut resumes = 0;
            let mut outcome = op(&repo)?;
            while let Outcome::Interrupted { .. } = outcome {
                resumes += 1;
                if resumes > self.max_resumes {
                    return Err(versync_core::CoreError::consistency("operation never finishes"));
                }
                outcome = repo.continue_operation(&mut NoPrompt)?;
            }
            if !outcome.is_completed() {
                return Err(versync_core::CoreError::consistency(format!(
                    "operation did not complete: {outcome:?}"
                )));
            }
            repo.verify()?;
            let actual = RepoFingerprint::of(&repo)?;
            if &actual != expected {
                return Err(versync_core::CoreError::consistency(format!(
                    "resumed state differs: expected {expected:?}, got {actual:?}"
                )));
            }
            Ok(resumes)
        };

        match run() {
            Ok(resumes) => CrashRecoveryResult::pass(description, resumes),
            Err(e) => CrashRecoveryResult::fail(description, 0, e.to_string()),
        }
    }
}
