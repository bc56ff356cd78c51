//! Repository configuration.

use crate::error::{CoreError, CoreResult};
use crate::merge::ConflictPolicy;
use versync_codec::DEFAULT_COMPRESSION_LEVEL;

/// Environment variable naming the default author.
pub const ENV_AUTHOR: &str = "VERSYNC_AUTHOR";

/// Environment variable naming the conflict policy.
pub const ENV_CONFLICT_POLICY: &str = "VERSYNC_CONFLICT_POLICY";

/// Configuration for opening a repository.
#[derive(Debug, Clone)]
pub struct RepoConfig {
    /// Whether to create the repository directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Author recorded on commits that don't name one.
    pub author: String,

    /// Change records applied per Apply step.
    pub apply_chunk_size: usize,

    /// Staged objects hashed per Commit step.
    pub commit_chunk_size: usize,

    /// Identifier buckets reverted per Revert step.
    pub revert_buckets_per_step: usize,

    /// zstd level for stored diffs.
    pub compression_level: i32,

    /// How merge conflicts without an automatic answer are decided.
    pub conflict_policy: ConflictPolicy,

    /// Whether a merge with no local commits may fast-forward.
    pub fast_forward: bool,

    /// Whether every checkpoint is synced to disk.
    pub sync_on_commit: bool,

    /// Maximum engine steps per invocation; `None` runs to completion.
    ///
    /// An exhausted budget leaves the journal in place for `continue`.
    pub step_budget: Option<usize>,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            author: "unknown".to_string(),
            apply_chunk_size: 1024,
            commit_chunk_size: 64,
            revert_buckets_per_step: 16,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            conflict_policy: ConflictPolicy::Interactive,
            fast_forward: true,
            sync_on_commit: true,
            step_budget: None,
        }
    }
}

impl RepoConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `VERSYNC_AUTHOR` and `VERSYNC_CONFLICT_POLICY`.
    ///
    /// # Errors
    ///
    /// Returns a policy error if the conflict policy variable holds an
    /// unknown value.
    pub fn from_env() -> CoreResult<Self> {
        let mut config = Self::default();
        if let Ok(author) = std::env::var(ENV_AUTHOR) {
            if !author.is_empty() {
                config.author = author;
            }
        }
        if let Ok(policy) = std::env::var(ENV_CONFLICT_POLICY) {
            config.conflict_policy = policy.parse().map_err(|_| {
                CoreError::policy(format!(
                    "{ENV_CONFLICT_POLICY} must be one of local, master, both, interactive; got {policy:?}"
                ))
            })?;
        }
        Ok(config)
    }

    /// Sets whether to create the repository if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the default author.
    #[must_use]
    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    /// Sets the records applied per step.
    #[must_use]
    pub const fn apply_chunk_size(mut self, size: usize) -> Self {
        self.apply_chunk_size = if size == 0 { 1 } else { size };
        self
    }

    /// Sets the staged objects hashed per step.
    #[must_use]
    pub const fn commit_chunk_size(mut self, size: usize) -> Self {
        self.commit_chunk_size = if size == 0 { 1 } else { size };
        self
    }

    /// Sets the buckets reverted per step.
    #[must_use]
    pub const fn revert_buckets_per_step(mut self, buckets: usize) -> Self {
        self.revert_buckets_per_step = if buckets == 0 { 1 } else { buckets };
        self
    }

    /// Sets the zstd level.
    #[must_use]
    pub const fn compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    /// Sets the conflict policy.
    #[must_use]
    pub const fn conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Sets whether merges may fast-forward.
    #[must_use]
    pub const fn fast_forward(mut self, value: bool) -> Self {
        self.fast_forward = value;
        self
    }

    /// Sets whether every checkpoint is synced to disk.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the step budget per invocation.
    #[must_use]
    pub const fn step_budget(mut self, budget: Option<usize>) -> Self {
        self.step_budget = budget;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = RepoConfig::default();
        assert!(config.create_if_missing);
        assert!(config.fast_forward);
        assert_eq!(config.conflict_policy, ConflictPolicy::Interactive);
        assert_eq!(config.step_budget, None);
    }

    #[test]
    fn builder_pattern() {
        let config = RepoConfig::new()
            .author("ana")
            .apply_chunk_size(8)
            .conflict_policy(ConflictPolicy::Master)
            .fast_forward(false)
            .step_budget(Some(3));

        assert_eq!(config.author, "ana");
        assert_eq!(config.apply_chunk_size, 8);
        assert_eq!(config.conflict_policy, ConflictPolicy::Master);
        assert!(!config.fast_forward);
        assert_eq!(config.step_budget, Some(3));
    }

    #[test]
    fn zero_chunk_sizes_are_clamped() {
        let config = RepoConfig::new()
            .apply_chunk_size(0)
            .commit_chunk_size(0)
            .revert_buckets_per_step(0);
        assert_eq!(config.apply_chunk_size, 1);
        assert_eq!(config.commit_chunk_size, 1);
        assert_eq!(config.revert_buckets_per_step, 1);
    }
}
