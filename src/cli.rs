//! Command-line interface definitions for `dedup`.
//!
//! Every command except `init`, `recent` and `config` works on a workspace
//! file, given with `--workspace` or taken from the recent list.
//!
//! # Example
//!
//! ```bash
//! # Create a workspace with two roots
//! dedup init photos.dedup --dir ~/Pictures --dir /mnt/backup/Pictures
//!
//! # Scan, reusing fingerprints of unchanged files
//! dedup -w photos.dedup scan --skip-hashed
//!
//! # List duplicates as JSON
//! dedup -w photos.dedup duplicates --json
//! ```

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Incremental duplicate file finder with a persistent workspace.
///
/// Files are fingerprinted with XXH64 and duplicates confirmed with BLAKE3.
/// Scan results are kept in a workspace file so later scans only hash what
/// changed.
#[derive(Debug, Parser)]
#[command(name = "dedup")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Configuration file (default: config.toml in the platform config directory)
    #[arg(long, global = true, value_name = "FILE", env = "DEDUP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Report errors as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Workspace file (default: the most recently opened workspace)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub workspace: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create a workspace (or open an existing one) and add roots
    Init(InitArgs),
    /// Manage the directories scanned by a workspace
    #[command(subcommand)]
    Dirs(DirsCommand),
    /// Discover and fingerprint files under the workspace roots
    Scan(ScanArgs),
    /// Report confirmed duplicate groups
    Duplicates(DuplicatesArgs),
    /// Show the workspace summary
    Stats(StatsArgs),
    /// List recently opened workspaces
    Recent(RecentArgs),
    /// Print the effective configuration
    Config,
}

/// Arguments for `init`.
#[derive(Debug, Args)]
pub struct InitArgs {
    /// Workspace file to create
    #[arg(value_name = "FILE")]
    pub path: PathBuf,

    /// Directory to scan (can be specified multiple times)
    #[arg(short, long = "dir", value_name = "PATH")]
    pub directories: Vec<PathBuf>,
}

/// `dirs` subcommands.
#[derive(Debug, Subcommand)]
pub enum DirsCommand {
    /// Add scan roots
    Add {
        /// Directories to add
        #[arg(value_name = "PATH", required = true)]
        paths: Vec<PathBuf>,
    },
    /// Remove scan roots
    Remove {
        /// Directories to remove
        #[arg(value_name = "PATH", required = true)]
        paths: Vec<PathBuf>,
    },
    /// List scan roots
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Arguments for `scan`.
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Reuse stored fingerprints of files whose size and mtime are unchanged
    #[arg(long)]
    pub skip_hashed: bool,

    /// Skip hidden files and directories (starting with .)
    #[arg(long)]
    pub skip_hidden: bool,

    /// Minimum file size to consider (e.g., 1KB, 1MB, 1GB)
    ///
    /// Supports suffixes: B, KB, KiB, MB, MiB, GB, GiB, TB, TiB
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub min_size: Option<u64>,

    /// Gitignore-style patterns to ignore (can be specified multiple times)
    #[arg(short, long = "ignore", value_name = "PATTERN")]
    pub ignore_patterns: Vec<String>,

    /// Directory listing workers
    #[arg(long, value_name = "N")]
    pub scan_workers: Option<usize>,

    /// Hashing workers for small files
    #[arg(long, value_name = "N")]
    pub hash_workers: Option<usize>,
}

/// Arguments for `duplicates`.
#[derive(Debug, Args)]
pub struct DuplicatesArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show at most this many groups
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,
}

/// Arguments for `stats`.
#[derive(Debug, Args)]
pub struct StatsArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `recent`.
#[derive(Debug, Args)]
pub struct RecentArgs {
    /// Forget all recent workspaces
    #[arg(long)]
    pub clear: bool,
}

/// Parse a human-readable size string into bytes.
///
/// Supports suffixes: B, KB, KiB, MB, MiB, GB, GiB, TB, TiB
/// Case-insensitive. Numbers without suffix are treated as bytes.
///
/// # Examples
///
/// ```
/// use dedup::cli::parse_size;
///
/// assert_eq!(parse_size("1024").unwrap(), 1024);
/// assert_eq!(parse_size("1KB").unwrap(), 1000);
/// assert_eq!(parse_size("1MiB").unwrap(), 1_048_576);
/// ```
///
/// # Errors
///
/// Returns an error if the string is empty, contains an invalid number
/// or an unknown size suffix.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Size cannot be empty".to_string());
    }

    let (num_str, suffix) = match s.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(idx) => (&s[..idx], s[idx..].trim().to_uppercase()),
        None => (s, String::new()),
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number: '{num_str}'"))?;

    let multiplier: u64 = match suffix.as_str() {
        "" | "B" => 1,
        "KB" | "K" => 1_000,
        "KIB" => 1_024,
        "MB" | "M" => 1_000_000,
        "MIB" => 1_048_576,
        "GB" | "G" => 1_000_000_000,
        "GIB" => 1_073_741_824,
        "TB" | "T" => 1_000_000_000_000,
        "TIB" => 1_099_511_627_776,
        _ => return Err(format!("Unknown size suffix: '{suffix}'")),
    };

    Ok((num * multiplier as f64) as u64)
}
