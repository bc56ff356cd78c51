//! Working-version file commands.

use super::{open, CliResult};
use std::io::Write;
use std::path::Path;
use versync_codec::{InodeAttrs, ObjectKind};

/// Runs the put command. An existing file is overwritten.
pub fn put(path: &Path, name: &str, source: &Path) -> CliResult {
    let data = std::fs::read(source)?;
    let repo = open(path, false)?;
    if repo.resolve_path(name)?.is_some() {
        repo.write_file(name, &data)?;
    } else {
        repo.create_file(name, &data)?;
    }
    println!("{name}: {} bytes", data.len());
    Ok(())
}

/// Runs the cat command.
pub fn cat(path: &Path, name: &str) -> CliResult {
    let repo = open(path, false)?;
    let data = repo.read_file(name)?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&data)?;
    stdout.flush()?;
    Ok(())
}

/// Runs the ls command.
pub fn ls(path: &Path, name: &str) -> CliResult {
    let repo = open(path, false)?;
    for entry in repo.read_dir(name)? {
        println!("{}", list_line(&entry.name, &entry.attrs));
    }
    Ok(())
}

/// Runs the mkdir command.
pub fn mkdir(path: &Path, name: &str) -> CliResult {
    open(path, false)?.mkdir(name)?;
    Ok(())
}

/// Runs the rm command.
pub fn rm(path: &Path, name: &str) -> CliResult {
    open(path, false)?.remove(name)?;
    Ok(())
}

/// Runs the mv command.
pub fn mv(path: &Path, from: &str, to: &str) -> CliResult {
    open(path, false)?.rename(from, to)?;
    Ok(())
}

fn list_line(name: &str, attrs: &InodeAttrs) -> String {
    let suffix = match attrs.kind {
        ObjectKind::Directory => "/".to_string(),
        ObjectKind::Symlink => format!(" -> {}", attrs.target),
        _ => String::new(),
    };
    format!(
        "{}{:04o} {:>5} {:>5} {:>10} {} {name}{suffix}",
        attrs.kind.code(),
        attrs.mode,
        attrs.uid,
        attrs.gid,
        attrs.size,
        attrs.mtime,
    )
}
