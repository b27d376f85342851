//! Potential and confirmed duplicate groups.
//!
//! # Overview
//!
//! Grouping happens in two steps:
//!
//! 1. **Potential groups**: records sharing a fingerprint. Fingerprints are
//!    cheap and almost always distinct for distinct content, so this removes
//!    nearly every unique file without reading it again.
//! 2. **Confirmed groups**: members of one potential group that also share a
//!    confirmation hash and size. A fingerprint collision between different
//!    contents is split apart here.
//!
//! Every confirmed group is a subset of exactly one potential group.
//!
//! # Example
//!
//! ```
//! use dedup::duplicates::group_by_fingerprint;
//! use dedup::workspace::{FileRecord, FileStatus};
//! use std::path::PathBuf;
//!
//! let record = |path: &str, fp: &str| FileRecord {
//!     path: PathBuf::from(path),
//!     size: 3,
//!     modified: 0,
//!     fingerprint: Some(fp.to_string()),
//!     confirm_hash: None,
//!     status: FileStatus::Present,
//! };
//!
//! let (groups, stats) = group_by_fingerprint(vec![
//!     record("/a", "f00"),
//!     record("/b", "f00"),
//!     record("/c", "ba5"),
//! ]);
//!
//! assert_eq!(groups.len(), 1);
//! assert_eq!(groups[0].len(), 2);
//! assert_eq!(stats.eliminated_unique, 1);
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::workspace::FileRecord;

/// Records sharing one fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PotentialGroup {
    /// The shared fingerprint
    pub fingerprint: String,
    /// Members, at least two
    pub files: Vec<FileRecord>,
}

impl PotentialGroup {
    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check if this group is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Confirmed duplicate group of files.
///
/// Members share size and confirmation hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    /// Shared confirmation hash (hex)
    pub confirm_hash: String,
    /// Size of each member in bytes
    pub size: u64,
    /// Members, at least two, ordered by path
    pub files: Vec<FileRecord>,
}

impl DuplicateGroup {
    /// Number of files in this group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check if this group is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Total size of all files in this group.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.size * self.files.len() as u64
    }

    /// Space held by all copies beyond the first.
    #[must_use]
    pub fn wasted_bytes(&self) -> u64 {
        self.size * self.duplicate_count() as u64
    }

    /// Number of duplicate copies (total - 1 original).
    #[must_use]
    pub fn duplicate_count(&self) -> usize {
        self.files.len().saturating_sub(1)
    }

    /// Get just the paths of files in this group.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }
}

/// Statistics from fingerprint grouping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupingStats {
    /// Records considered (missing ones are never counted)
    pub total_files: usize,
    /// Records without a fingerprint
    pub unhashed: usize,
    /// Fingerprints seen exactly once
    pub eliminated_unique: usize,
    /// Number of potential groups
    pub potential_groups: usize,
    /// Records inside potential groups
    pub potential_files: usize,
}

/// Group records by fingerprint, keeping fingerprints shared by 2+ records.
///
/// Records marked missing and records without a fingerprint are skipped.
/// Groups come back ordered by fingerprint.
#[must_use]
pub fn group_by_fingerprint(
    records: impl IntoIterator<Item = FileRecord>,
) -> (Vec<PotentialGroup>, GroupingStats) {
    let mut stats = GroupingStats::default();
    let mut by_fingerprint: HashMap<String, Vec<FileRecord>> = HashMap::new();

    for record in records {
        if !record.is_active() {
            continue;
        }
        stats.total_files += 1;
        match record.fingerprint.clone() {
            Some(fp) => by_fingerprint.entry(fp).or_default().push(record),
            None => stats.unhashed += 1,
        }
    }

    let mut groups: Vec<PotentialGroup> = by_fingerprint
        .into_iter()
        .filter_map(|(fingerprint, files)| {
            if files.len() > 1 {
                stats.potential_files += files.len();
                Some(PotentialGroup { fingerprint, files })
            } else {
                stats.eliminated_unique += 1;
                None
            }
        })
        .collect();
    groups.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
    stats.potential_groups = groups.len();

    log::debug!(
        "Fingerprint grouping: {} files -> {} potential groups ({} files)",
        stats.total_files,
        stats.potential_groups,
        stats.potential_files
    );

    (groups, stats)
}

/// Split a potential group into confirmed groups.
///
/// Members are partitioned by `(confirm_hash, size)`; members without a
/// confirmation hash are dropped. Only partitions with 2+ members survive.
#[must_use]
pub fn confirm_group(group: PotentialGroup) -> Vec<DuplicateGroup> {
    let mut partitions: HashMap<(String, u64), Vec<FileRecord>> = HashMap::new();
    for file in group.files {
        if let Some(hash) = file.confirm_hash.clone() {
            partitions.entry((hash, file.size)).or_default().push(file);
        }
    }

    partitions
        .into_iter()
        .filter(|(_, files)| files.len() > 1)
        .map(|((confirm_hash, size), mut files)| {
            files.sort_by(|a, b| a.path.cmp(&b.path));
            DuplicateGroup {
                confirm_hash,
                size,
                files,
            }
        })
        .collect()
}

/// Order groups by wasted space, largest first, then by first path.
pub fn sort_groups(groups: &mut [DuplicateGroup]) {
    groups.sort_by(|a, b| {
        b.wasted_bytes()
            .cmp(&a.wasted_bytes())
            .then_with(|| a.files.first().map(|f| &f.path).cmp(&b.files.first().map(|f| &f.path)))
    });
}
