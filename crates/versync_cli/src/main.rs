//! Versync CLI
//!
//! Command-line front end for Versync repositories.
//!
//! # Commands
//!
//! - `init`, `status`, `log`, `commit`, `revert`, `tag` - local history
//! - `put`, `cat`, `ls`, `mkdir`, `rm`, `mv` - working version
//! - `pull`, `push`, `sync` - exchange with another repository
//! - `continue`, `abandon` - pending operations
//! - `verify`, `show-diff` - inspection

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Versioned, mergeable file trees.
#[derive(Parser)]
#[command(name = "versync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the repository directory
    #[arg(global = true, short, long, default_value = ".")]
    path: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a repository with an empty root at version 1
    Init,

    /// Show versions, pending work and the last merge
    Status,

    /// List committed versions
    Log {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Commit the working version
    Commit {
        /// Commit message
        #[arg(short, long)]
        message: String,
    },

    /// Return to an earlier version, discarding later commits
    Revert {
        /// Target version
        version: u64,
    },

    /// Annotate a committed version
    Tag {
        /// Version to annotate
        version: u64,
        /// Tag key
        key: String,
        /// Tag value
        value: String,
    },

    /// Store a local file in the working version
    Put {
        /// Path inside the repository
        name: String,
        /// File to read
        source: PathBuf,
    },

    /// Print a file of the working version
    Cat {
        /// Path inside the repository
        name: String,
    },

    /// List a directory of the working version
    Ls {
        /// Path inside the repository
        #[arg(default_value = "/")]
        name: String,
    },

    /// Create a directory
    Mkdir {
        /// Path inside the repository
        name: String,
    },

    /// Remove a file or an empty directory
    Rm {
        /// Path inside the repository
        name: String,
    },

    /// Move or rename an entry
    Mv {
        /// Current path
        from: String,
        /// New path
        to: String,
    },

    /// Merge another repository's history into this one
    Pull {
        /// Path of the other repository
        peer: PathBuf,
        /// Conflict policy (local, master, both, interactive)
        #[arg(long)]
        policy: Option<String>,
    },

    /// Send local commits to another repository
    Push {
        /// Path of the other repository
        peer: PathBuf,
    },

    /// Pull, then push
    Sync {
        /// Path of the other repository
        peer: PathBuf,
        /// Conflict policy (local, master, both, interactive)
        #[arg(long)]
        policy: Option<String>,
    },

    /// Resume a suspended or interrupted operation
    Continue,

    /// Drop the journal of a pending operation
    Abandon,

    /// Check the store and the objects history depends on
    Verify,

    /// Print the diff that produced a version
    ShowDiff {
        /// Version to show
        version: u64,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> commands::CliResult {
    let path = cli.path.as_path();
    match cli.command {
        Commands::Init => commands::repo::init(path),
        Commands::Status => commands::repo::status(path),
        Commands::Log { format } => commands::repo::log(path, &format),
        Commands::Commit { message } => commands::repo::commit(path, &message),
        Commands::Revert { version } => commands::repo::revert(path, version),
        Commands::Tag {
            version,
            key,
            value,
        } => commands::repo::tag(path, version, &key, &value),
        Commands::Put { name, source } => commands::files::put(path, &name, &source),
        Commands::Cat { name } => commands::files::cat(path, &name),
        Commands::Ls { name } => commands::files::ls(path, &name),
        Commands::Mkdir { name } => commands::files::mkdir(path, &name),
        Commands::Rm { name } => commands::files::rm(path, &name),
        Commands::Mv { from, to } => commands::files::mv(path, &from, &to),
        Commands::Pull { peer, policy } => commands::remote::pull(path, &peer, policy.as_deref()),
        Commands::Push { peer } => commands::remote::push(path, &peer),
        Commands::Sync { peer, policy } => commands::remote::sync(path, &peer, policy.as_deref()),
        Commands::Continue => commands::repo::resume(path),
        Commands::Abandon => commands::repo::abandon(path),
        Commands::Verify => commands::inspect::verify(path),
        Commands::ShowDiff { version } => commands::inspect::show_diff(path, version),
    }
}
