//! Workspace record definitions.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scanner::FileEntry;

/// Lifecycle state of a stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// Seen by the latest scan that covered it
    #[default]
    Present,
    /// Not rediscovered by a completed scan of its root
    Missing,
    /// Reading or hashing failed; fingerprint is null
    Error,
}

impl FileStatus {
    /// Stored text form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Missing => "missing",
            Self::Error => "error",
        }
    }

    /// Parse the stored text form. Unknown or absent values read as present.
    #[must_use]
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("missing") => Self::Missing,
            Some("error") => Self::Error,
            Some("present") | None => Self::Present,
            Some(other) => {
                log::debug!("Unknown file status '{}', treating as present", other);
                Self::Present
            }
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stored file. The path is the unique key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Absolute path of the file
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// Modification time, whole seconds since the Unix epoch
    pub modified: i64,
    /// Fast content fingerprint, null until hashed
    pub fingerprint: Option<String>,
    /// Strong confirmation hash, null until a fingerprint collision needs it
    pub confirm_hash: Option<String>,
    /// Lifecycle state
    pub status: FileStatus,
}

impl FileRecord {
    /// A freshly discovered file with no hashes yet.
    #[must_use]
    pub fn discovered(entry: &FileEntry) -> Self {
        Self {
            path: entry.path.clone(),
            size: entry.size,
            modified: entry.modified,
            fingerprint: None,
            confirm_hash: None,
            status: FileStatus::Present,
        }
    }

    /// Whether this record already holds a fingerprint for `entry`'s current
    /// content, i.e. size and modification time are unchanged.
    #[must_use]
    pub fn is_current_for(&self, entry: &FileEntry) -> bool {
        self.fingerprint.is_some()
            && self.size == entry.size
            && self.modified == entry.modified
            && self.path == entry.path
    }

    /// Whether the record takes part in duplicate detection.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status != FileStatus::Missing
    }
}

/// Summary row of a workspace, recomputed after scans.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkspaceStats {
    /// Display name of the workspace
    pub workspace_name: String,
    /// When the summary row was first written
    pub created_at: Option<DateTime<Utc>>,
    /// When the summary was last recomputed
    pub last_scan: Option<DateTime<Utc>>,
    /// Number of files not marked missing
    pub total_files: u64,
    /// Total bytes of those files
    pub total_size: u64,
    /// Fingerprints shared by more than one file
    pub duplicate_groups: u64,
}

impl WorkspaceStats {
    /// Zero-valued summary for a workspace that was never scanned.
    #[must_use]
    pub fn empty(workspace_name: impl Into<String>) -> Self {
        Self {
            workspace_name: workspace_name.into(),
            created_at: None,
            last_scan: None,
            total_files: 0,
            total_size: 0,
            duplicate_groups: 0,
        }
    }
}

/// A configured scan root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryEntry {
    /// Root path
    pub path: PathBuf,
    /// When the root was added
    pub added_at: Option<DateTime<Utc>>,
    /// When a scan of this root last completed
    pub last_scanned: Option<DateTime<Utc>>,
}

/// Parse a stored timestamp.
///
/// Accepts RFC 3339 and SQLite's `CURRENT_TIMESTAMP` form
/// (`YYYY-MM-DD HH:MM:SS`, UTC).
#[must_use]
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
