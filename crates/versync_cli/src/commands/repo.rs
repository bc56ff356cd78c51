//! Local history commands.

use super::{open, report_outcome, CliError, CliResult};
use crate::commands::remote::StdinResolver;
use std::path::Path;
use versync_core::Version;

/// Runs the init command.
pub fn init(path: &Path) -> CliResult {
    let repo = open(path, true)?;
    repo.init()?;
    println!("Initialized empty repository at {}", path.display());
    Ok(())
}

/// Runs the status command.
pub fn status(path: &Path) -> CliResult {
    let repo = open(path, false)?;
    if !repo.is_initialized()? {
        println!("Repository at {} is not initialized", path.display());
        return Ok(());
    }
    println!("Head version:    {}", repo.head_version()?);
    println!("Working version: {}", repo.working_version()?);
    println!(
        "Working tree:    {}",
        if repo.is_dirty()? { "modified" } else { "clean" }
    );
    if let Some(operation) = repo.pending_operation()? {
        println!("Pending:         {operation}");
    }
    if let Some(report) = repo.last_merge_report()? {
        println!();
        println!("Last merge:");
        for line in report.to_string().lines() {
            println!("  {line}");
        }
    }
    Ok(())
}

/// Runs the log command.
pub fn log(path: &Path, format: &str) -> CliResult {
    let repo = open(path, false)?;
    let history = repo.tagged_history()?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&history)?),
        "text" => {
            for commit in history.iter().rev() {
                println!("{}", commit.entry);
                println!("    {}", commit.entry.timestamp);
                for (key, value) in &commit.tags {
                    println!("    {key} = {value}");
                }
            }
        }
        other => return Err(CliError::Usage(format!("unknown format {other:?}"))),
    }
    Ok(())
}

/// Runs the commit command.
pub fn commit(path: &Path, message: &str) -> CliResult {
    let repo = open(path, false)?;
    if !repo.is_dirty()? {
        println!("Nothing to commit");
        return Ok(());
    }
    let outcome = repo.commit(message)?;
    report_outcome(&outcome);
    if outcome.is_completed() {
        println!("Committed version {}", repo.head_version()?);
    }
    Ok(())
}

/// Runs the revert command.
pub fn revert(path: &Path, version: Version) -> CliResult {
    let repo = open(path, false)?;
    let outcome = repo.revert(version)?;
    report_outcome(&outcome);
    if outcome.is_completed() {
        println!("Reverted to version {version}");
    }
    Ok(())
}

/// Runs the tag command.
pub fn tag(path: &Path, version: Version, key: &str, value: &str) -> CliResult {
    let repo = open(path, false)?;
    repo.tag(version, key, value)?;
    Ok(())
}

/// Runs the continue command.
pub fn resume(path: &Path) -> CliResult {
    let repo = open(path, false)?;
    let outcome = repo.continue_operation(&mut StdinResolver)?;
    report_outcome(&outcome);
    if outcome.is_completed() {
        println!("Done");
    }
    Ok(())
}

/// Runs the abandon command.
pub fn abandon(path: &Path) -> CliResult {
    let repo = open(path, false)?;
    let operation = repo.abandon()?;
    println!("Abandoned {operation}; steps already applied are kept");
    Ok(())
}
