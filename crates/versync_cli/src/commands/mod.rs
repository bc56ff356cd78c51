//! CLI command implementations.

pub mod files;
pub mod inspect;
pub mod remote;
pub mod repo;

use std::path::Path;
use thiserror::Error;
use tracing::debug;
use versync_core::{CoreError, Outcome, RepoConfig, Repository};

/// Errors reported by CLI commands.
#[derive(Error, Debug)]
pub enum CliError {
    /// Bad arguments or an unsupported request.
    #[error("{0}")]
    Usage(String),

    /// Repository error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Sync error.
    #[error(transparent)]
    Sync(#[from] versync_sync::SyncError),

    /// Local file error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON output error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for CLI commands.
pub type CliResult<T = ()> = Result<T, CliError>;

/// Opens the repository at `path` with configuration from the environment.
pub fn open(path: &Path, create: bool) -> CliResult<Repository> {
    let config = RepoConfig::from_env()?.create_if_missing(create);
    debug!(path = %path.display(), author = %config.author, "opening repository");
    Ok(Repository::open(path, config)?)
}

/// Prints what the user can do about an unfinished operation.
pub fn report_outcome(outcome: &Outcome) {
    match outcome {
        Outcome::Completed => {}
        Outcome::Suspended { operation } => {
            println!("{operation} suspended at a conflict");
            println!("  run `versync continue` to decide, or `versync abandon`");
        }
        Outcome::Interrupted { operation } => {
            println!("{operation} interrupted");
            println!("  run `versync continue` to resume");
        }
    }
}
