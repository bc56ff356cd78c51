//! Verify and show-diff command implementations.

use super::{open, CliError, CliResult};
use std::path::Path;
use versync_codec::{AttrChanges, ChangeRecord, Content};
use versync_core::Version;

/// Runs the verify command.
pub fn verify(path: &Path) -> CliResult {
    println!("Verifying repository at {}", path.display());
    println!();
    let repo = open(path, false)?;

    let report = repo.verify()?;
    println!(
        "  inodes: {} ({} records), links: {} ({} records)",
        report.inodes, report.inode_records, report.links, report.link_records
    );

    let history = repo.tagged_history()?;
    let mut missing = Vec::new();
    for hash in repo.required_objects(&history)? {
        if !repo.objects().contains(&hash)? {
            missing.push(hash);
        }
    }
    println!("  versions: {}, missing objects: {}", history.len(), missing.len());
    for hash in &missing {
        println!("    MISSING: {hash}");
    }

    println!();
    if missing.is_empty() {
        println!("✓ Repository verification passed");
        Ok(())
    } else {
        println!("✗ Repository verification failed");
        Err(CliError::Usage("verification failed".into()))
    }
}

/// Runs the show-diff command.
pub fn show_diff(path: &Path, version: Version) -> CliResult {
    let repo = open(path, false)?;
    let history = repo.history()?;
    let entry = history
        .iter()
        .find(|entry| entry.version == version)
        .ok_or_else(|| CliError::Usage(format!("version {version} is not committed")))?;
    println!("{entry}");
    for record in repo.load_diff(&entry.hash)?.records() {
        println!("  {}", record_line(record));
    }
    Ok(())
}

fn content_text(content: &Content) -> String {
    match content {
        Content::None => "-".to_string(),
        Content::Pending => "pending".to_string(),
        Content::Hash(hash) => hash.to_hex()[..12].to_string(),
    }
}

fn changes_text(changes: &AttrChanges) -> String {
    let mut parts = Vec::new();
    if let Some(content) = &changes.content {
        parts.push(format!("content={}", content_text(content)));
    }
    if let Some(size) = changes.size {
        parts.push(format!("size={size}"));
    }
    if let Some(mode) = changes.mode {
        parts.push(format!("mode={mode:04o}"));
    }
    if let Some(target) = &changes.target {
        parts.push(format!("target={target}"));
    }
    if let Some(nlink) = changes.nlink {
        parts.push(format!("nlink={nlink}"));
    }
    if let Some(mtime) = changes.mtime {
        parts.push(format!("mtime={mtime}"));
    }
    for name in changes.field_names() {
        if !matches!(name, "content" | "size" | "mode" | "target" | "nlink" | "mtime") {
            parts.push(name.to_string());
        }
    }
    parts.join(" ")
}

fn record_line(record: &ChangeRecord) -> String {
    match record {
        ChangeRecord::InodeAdded { id, attrs } => format!(
            "i+ {id} {} {:04o} size={} content={}",
            attrs.kind.code(),
            attrs.mode,
            attrs.size,
            content_text(&attrs.content)
        ),
        ChangeRecord::InodeChanged { id, changes } => format!("i! {id} {}", changes_text(changes)),
        ChangeRecord::InodeRemoved { id } => format!("i- {id}"),
        ChangeRecord::LinkAdded { dir, name, inode } => format!("l+ {dir}/{name} -> {inode}"),
        ChangeRecord::LinkChanged { dir, name, inode } => format!("l! {dir}/{name} -> {inode}"),
        ChangeRecord::LinkRemoved { dir, name } => format!("l- {dir}/{name}"),
    }
}
