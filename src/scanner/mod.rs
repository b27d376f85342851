//! Scanner module for directory traversal and file hashing.
//!
//! This module provides functionality for:
//! - Folder-level work-stealing directory enumeration
//! - Streaming fingerprint (XXH64) and confirmation (BLAKE3) hashes
//!
//! # Architecture
//!
//! The scanner is divided into submodules:
//! - [`walker`]: Folder discovery and parallel per-folder listing
//! - [`hasher`]: Streaming file hashers
//!
//! # Example
//!
//! ```no_run
//! use dedup::scanner::{DirectoryScanner, ScannerConfig};
//! use dedup::progress::SilentObserver;
//! use std::path::PathBuf;
//!
//! let scanner = DirectoryScanner::new(ScannerConfig::default());
//! let output = scanner.scan(&[PathBuf::from(".")], &SilentObserver).unwrap();
//! for file in &output.files {
//!     println!("{}: {} bytes", file.path.display(), file.size);
//! }
//! ```

pub mod hasher;
pub mod walker;

use std::any::Any;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub use hasher::{FileHasher, Hasher, CHUNK_SIZE};
pub use walker::{DirectoryScanner, ScanOutput};

/// A regular file discovered by the scanner.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileEntry {
    /// Path to the file (root-relative paths are joined onto the root)
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Last modification time, whole seconds since the Unix epoch
    pub modified: i64,
}

impl FileEntry {
    /// Create a new FileEntry.
    #[must_use]
    pub fn new(path: PathBuf, size: u64, modified: i64) -> Self {
        Self {
            path,
            size,
            modified,
        }
    }

    /// Build an entry from filesystem metadata.
    #[must_use]
    pub fn from_metadata(path: PathBuf, metadata: &std::fs::Metadata) -> Self {
        let modified = metadata.modified().map(unix_seconds).unwrap_or(0);
        Self::new(path, metadata.len(), modified)
    }
}

/// Whole seconds since the Unix epoch; times before the epoch are negative.
#[must_use]
pub fn unix_seconds(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
        Err(e) => -i64::try_from(e.duration().as_secs()).unwrap_or(i64::MAX),
    }
}

/// Configuration for directory scanning.
#[derive(Debug, Clone, Default)]
pub struct ScannerConfig {
    /// Number of listing workers. `None` uses available concurrency minus one
    /// (minimum 2).
    pub workers: Option<usize>,

    /// Skip hidden files and directories (names starting with `.`).
    pub skip_hidden: bool,

    /// Minimum file size to include (in bytes).
    pub min_size: Option<u64>,

    /// Glob patterns to ignore (gitignore-style), matched relative to each root.
    pub ignore_patterns: Vec<String>,

    /// Interval between progress ticks, in milliseconds. `0` uses the default.
    pub progress_interval_ms: u64,
}

impl ScannerConfig {
    /// Resolved worker count.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers
            .unwrap_or_else(|| available_concurrency().saturating_sub(1))
            .max(2)
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Number of hardware threads, `1` when it cannot be determined.
#[must_use]
pub fn available_concurrency() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

/// Errors that can occur during directory scanning.
///
/// Per-entry failures are never returned from a scan; they are logged and the
/// entry is skipped.
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// The scan was cancelled; partial results were discarded.
    #[error("Scan cancelled")]
    Cancelled,

    /// The specified path was not found.
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    /// The specified path is not a directory.
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// An I/O error occurred while accessing a file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },
}

/// Errors that can occur during file hashing.
#[derive(thiserror::Error, Debug)]
pub enum HashError {
    /// The specified file was not found.
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// Permission was denied when reading the file.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// Hashing stopped because cancellation was requested.
    #[error("Hashing interrupted: {0}")]
    Interrupted(PathBuf),

    /// An I/O error occurred while reading the file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },
}

impl HashError {
    /// Classify an I/O error for `path`.
    #[must_use]
    pub fn from_io(path: &Path, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io {
                path: path.to_path_buf(),
                source,
            },
        }
    }
}
