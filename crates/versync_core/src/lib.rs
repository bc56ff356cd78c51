//! # Versync Core
//!
//! Versioned filesystem store, journaled command engine and three-way
//! merge for Versync.
//!
//! This crate provides:
//! - A temporal store where every inode and link record carries the
//!   version range it is live in
//! - A working-tree API over the working version (files, directories,
//!   links, special objects)
//! - Commit, revert, apply and fast-forward as resumable commands
//! - A three-way merge that detects conflicts by object identity
//! - Content-addressed object stores in memory and on disk
//!
//! ## Versions
//!
//! Version 1 holds the root directory. Mutations always land in the
//! working version `head + 1`; a commit seals it by recording
//! `diff(head, working)` in the history.
//!
//! ## Crash Safety
//!
//! Every long operation runs as a stack of commands persisted in the same
//! transaction as each step's mutations. After a crash, `continue` resumes
//! from the last checkpoint without repeating or skipping work.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod commands;
mod config;
#[cfg(feature = "std")]
mod dir;
mod engine;
mod error;
mod merge;
mod objects;
mod repository;
mod store;
mod types;
mod worktree;

pub use commands::{apply_record, ApplyCommand, Command, CommitCommand, CommitPhase, FastForwardCommand, RevertCommand};
pub use config::{RepoConfig, ENV_AUTHOR, ENV_CONFLICT_POLICY};
#[cfg(feature = "std")]
pub use dir::RepoDir;
pub use engine::{DiffCache, Engine, JournalEntry, Step, StepContext};
pub use error::{CoreError, CoreResult, ErrorCategory};
pub use merge::{
    substitute, synthesize, Conflict, ConflictOutcome, ConflictPolicy, ConflictResolver,
    FixedResolver, LinkKey, MergeCommand, MergeHistory, MergePhase, MergeReport, NoPrompt,
    Rename, Rescue, Resolution, ResolverAnswer, ScriptedResolver, Synthesis, LAST_MERGE_META,
};
pub use objects::{DirObjectStore, MemoryObjectStore, ObjectStore};
pub use repository::{common_version, content_refs, Repository};
pub use store::{VerifyReport, VersionedStore};
pub use types::{
    live_at, CommitMeta, HistoryEntry, InodeRecord, LinkRecord, Outcome, Tag, TaggedEntry,
    TreeSnapshot, Version, OPEN,
};
pub use worktree::DirEntry;
