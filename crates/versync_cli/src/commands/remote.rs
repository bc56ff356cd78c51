//! Pull, push and sync against another repository.

use super::{open, report_outcome, CliError, CliResult};
use std::io::{BufRead, Write};
use std::path::Path;
use versync_core::{Conflict, ConflictPolicy, ConflictResolver, Repository, ResolverAnswer};
use versync_sync::{LocalPeer, SyncConfig, SyncCycleResult, SyncEngine};

/// Asks on the terminal how to settle each conflict.
pub struct StdinResolver;

impl ConflictResolver for StdinResolver {
    fn resolve(&mut self, conflict: &Conflict) -> ResolverAnswer {
        println!();
        println!("Conflict on {}", conflict.id);
        println!("  {:<10} {:<24} {:<24} {:<24}", "field", "common", "master", "local");
        for (field, common, master, local) in conflict.table() {
            println!("  {field:<10} {common:<24} {master:<24} {local:<24}");
        }

        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            print!("keep [l]ocal, [m]aster, [b]oth or [a]bort? ");
            if std::io::stdout().flush().is_err() {
                return ResolverAnswer::Abort;
            }
            line.clear();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => return ResolverAnswer::Abort,
                Ok(_) => {}
            }
            if let Some(answer) = parse_answer(&line) {
                return answer;
            }
        }
    }
}

fn parse_answer(line: &str) -> Option<ResolverAnswer> {
    match line.trim().to_ascii_lowercase().as_str() {
        "l" | "local" => Some(ResolverAnswer::Local),
        "m" | "master" => Some(ResolverAnswer::Master),
        "b" | "both" => Some(ResolverAnswer::Both),
        "a" | "abort" => Some(ResolverAnswer::Abort),
        _ => None,
    }
}

fn open_with_policy(path: &Path, policy: Option<&str>) -> CliResult<Repository> {
    let mut repo = open(path, true)?;
    if let Some(policy) = policy {
        let policy: ConflictPolicy = policy
            .parse()
            .map_err(|_| CliError::Usage(format!("unknown conflict policy {policy:?}")))?;
        repo.config_mut().conflict_policy = policy;
    }
    Ok(repo)
}

fn print_cycle(cycle: &SyncCycleResult) {
    println!(
        "pulled {} commits, pushed {} commits ({} objects in, {} out) in {:?}",
        cycle.pulled, cycle.pushed, cycle.objects_fetched, cycle.objects_sent, cycle.duration
    );
    if let Some(report) = &cycle.report {
        print!("{report}");
    }
    report_outcome(&cycle.outcome);
}

/// Runs the pull command.
pub fn pull(path: &Path, peer: &Path, policy: Option<&str>) -> CliResult {
    let repo = open_with_policy(path, policy)?;
    let engine = SyncEngine::new(SyncConfig::new(), &repo, LocalPeer::open(peer, false)?);
    let cycle = engine.pull(&mut StdinResolver)?;
    print_cycle(&cycle);
    Ok(())
}

/// Runs the push command. A missing peer directory is created.
pub fn push(path: &Path, peer: &Path) -> CliResult {
    let repo = open(path, false)?;
    let engine = SyncEngine::new(SyncConfig::new(), &repo, LocalPeer::open(peer, true)?);
    let cycle = engine.push()?;
    print_cycle(&cycle);
    Ok(())
}

/// Runs the sync command.
pub fn sync(path: &Path, peer: &Path, policy: Option<&str>) -> CliResult {
    let repo = open_with_policy(path, policy)?;
    let engine = SyncEngine::new(SyncConfig::new(), &repo, LocalPeer::open(peer, false)?);
    let cycle = engine.sync_with_retry(&mut StdinResolver)?;
    print_cycle(&cycle);
    Ok(())
}
