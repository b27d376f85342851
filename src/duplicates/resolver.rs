//! Two-phase duplicate confirmation.
//!
//! # Overview
//!
//! 1. **Potential groups**: every active record is grouped by fingerprint.
//!    Records that still lack a fingerprint are hashed first and the result
//!    persisted.
//! 2. **Confirmed groups**: members of each potential group get a
//!    confirmation hash (computed only when not already stored) and are split
//!    by it. Unique files never pay for the strong hash.
//!
//! Hashes are computed on a dedicated rayon pool with a small, fixed number of
//! threads to avoid disk thrashing. The calling thread persists the results and
//! talks to the observer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;

use super::groups::{confirm_group, group_by_fingerprint, sort_groups, DuplicateGroup};
use super::pipeline::{guarded_hash, HashFailure};
use crate::progress::ScanObserver;
use crate::scanner::FileHasher;
use crate::workspace::{FileRecord, FileStatus, StoreError, WorkspaceStore};

/// Configuration for duplicate resolution.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Threads used for lazy hashing.
    /// Default is 4 to prevent disk thrashing.
    pub io_threads: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self { io_threads: 4 }
    }
}

impl ResolverConfig {
    /// Create a new configuration with custom I/O thread count.
    #[must_use]
    pub fn with_io_threads(mut self, threads: usize) -> Self {
        self.io_threads = threads.max(1);
        self
    }
}

/// Errors that end duplicate resolution.
#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    /// Cancellation was requested.
    #[error("Duplicate search cancelled")]
    Cancelled,

    /// Reading or writing the workspace failed.
    #[error("Workspace error during duplicate search: {0}")]
    Store(#[from] StoreError),
}

/// Result of duplicate resolution.
#[derive(Debug, Clone, Default)]
pub struct ResolveReport {
    /// Confirmed groups, most wasted space first
    pub groups: Vec<DuplicateGroup>,
    /// Number of potential (fingerprint) groups
    pub potential_groups: usize,
    /// Files inside potential groups
    pub potential_files: usize,
    /// Fingerprints computed lazily
    pub fingerprinted: usize,
    /// Confirmation hashes computed
    pub confirm_hashed: usize,
    /// Potential-group members left out of every confirmed group
    pub excluded: usize,
    /// Files whose lazy hash failed
    pub failures: Vec<HashFailure>,
    /// Wall time
    pub duration: Duration,
}

impl ResolveReport {
    /// Total bytes held by copies beyond the first in every group.
    #[must_use]
    pub fn wasted_bytes(&self) -> u64 {
        self.groups.iter().map(DuplicateGroup::wasted_bytes).sum()
    }
}

/// Finds confirmed duplicate groups in a workspace.
pub struct DuplicateResolver {
    config: ResolverConfig,
    hasher: Arc<dyn FileHasher>,
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl std::fmt::Debug for DuplicateResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplicateResolver")
            .field("config", &self.config)
            .field("shutdown_flag", &self.shutdown_flag)
            .finish_non_exhaustive()
    }
}

impl DuplicateResolver {
    /// Create a resolver.
    #[must_use]
    pub fn new(config: ResolverConfig, hasher: Arc<dyn FileHasher>) -> Self {
        Self {
            config,
            hasher,
            shutdown_flag: None,
        }
    }

    /// Set the cancellation flag.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    fn build_pool(&self) -> Option<rayon::ThreadPool> {
        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.io_threads.max(1))
            .build()
        {
            Ok(pool) => Some(pool),
            Err(e) => {
                log::warn!(
                    "Failed to create hashing thread pool ({}), using global pool with {} threads",
                    e,
                    rayon::current_num_threads()
                );
                None
            }
        }
    }

    /// Hash `records` in parallel with `hash`. Cancelled items are dropped.
    fn hash_all<F>(
        &self,
        pool: Option<&rayon::ThreadPool>,
        records: Vec<FileRecord>,
        hash: F,
    ) -> Vec<(FileRecord, Result<String, HashFailure>)>
    where
        F: Fn(&FileRecord) -> Result<String, HashFailure> + Sync,
    {
        let work = || {
            records
                .into_par_iter()
                .filter_map(|record| {
                    if self.is_shutdown_requested() {
                        return None;
                    }
                    let result = hash(&record);
                    Some((record, result))
                })
                .collect()
        };
        match pool {
            Some(pool) => pool.install(work),
            None => work(),
        }
    }

    /// Fingerprint active records that have none yet, persisting the results.
    fn fill_fingerprints(
        &self,
        pool: Option<&rayon::ThreadPool>,
        records: &mut Vec<FileRecord>,
        store: &WorkspaceStore,
        observer: &dyn ScanObserver,
        report: &mut ResolveReport,
    ) -> Result<(), ResolveError> {
        let (unhashed, mut ready): (Vec<_>, Vec<_>) = std::mem::take(records)
            .into_iter()
            .partition(|r| r.fingerprint.is_none());
        if unhashed.is_empty() {
            *records = ready;
            return Ok(());
        }

        observer.on_status(&format!("Fingerprinting {} unhashed files...", unhashed.len()));
        let results = self.hash_all(pool, unhashed, |r| {
            guarded_hash(&r.path, |p| self.hasher.fingerprint(p))
        });
        if self.is_shutdown_requested() {
            return Err(ResolveError::Cancelled);
        }

        let mut updated = Vec::with_capacity(results.len());
        for (mut record, result) in results {
            match result {
                Ok(fingerprint) => {
                    record.fingerprint = Some(fingerprint);
                    record.confirm_hash = None;
                    record.status = FileStatus::Present;
                    report.fingerprinted += 1;
                    ready.push(record.clone());
                }
                Err(failure) => {
                    record.status = FileStatus::Error;
                    report.failures.push(failure);
                }
            }
            updated.push(record);
        }
        store.upsert_files(&updated)?;
        *records = ready;
        Ok(())
    }

    /// Find confirmed duplicate groups among the workspace's records.
    ///
    /// # Errors
    ///
    /// [`ResolveError::Cancelled`] if cancellation was requested,
    /// [`ResolveError::Store`] if the workspace could not be read or written.
    pub fn resolve(
        &self,
        store: &WorkspaceStore,
        observer: &dyn ScanObserver,
    ) -> Result<ResolveReport, ResolveError> {
        let started = Instant::now();
        let mut report = ResolveReport::default();
        let pool = self.build_pool();

        let mut records: Vec<FileRecord> = store
            .get_all_files()?
            .into_iter()
            .filter(FileRecord::is_active)
            .collect();
        log::info!("Resolving duplicates among {} files", records.len());

        // Phase 1: potential groups
        self.fill_fingerprints(pool.as_ref(), &mut records, store, observer, &mut report)?;
        let (potential, stats) = group_by_fingerprint(records);
        report.potential_groups = stats.potential_groups;
        report.potential_files = stats.potential_files;
        observer.on_status(&format!(
            "Found {} potential duplicate groups ({} files)",
            stats.potential_groups, stats.potential_files
        ));

        // Phase 2: confirmation
        let total_groups = potential.len();
        let mut updated: Vec<FileRecord> = Vec::new();
        for (idx, mut group) in potential.into_iter().enumerate() {
            if self.is_shutdown_requested() {
                return Err(ResolveError::Cancelled);
            }

            let (missing, mut members): (Vec<_>, Vec<_>) = std::mem::take(&mut group.files)
                .into_iter()
                .partition(|r| r.confirm_hash.is_none());
            if !missing.is_empty() {
                let results = self.hash_all(pool.as_ref(), missing, |r| {
                    guarded_hash(&r.path, |p| self.hasher.confirm_hash(p))
                });
                if self.is_shutdown_requested() {
                    return Err(ResolveError::Cancelled);
                }
                for (mut record, result) in results {
                    match result {
                        Ok(hash) => {
                            record.confirm_hash = Some(hash);
                            record.status = FileStatus::Present;
                            report.confirm_hashed += 1;
                            updated.push(record.clone());
                            members.push(record);
                        }
                        Err(failure) => {
                            record.status = FileStatus::Error;
                            report.failures.push(failure);
                            updated.push(record);
                        }
                    }
                }
            }

            group.files = members;
            let potential_len = group.len();
            let confirmed = confirm_group(group);
            let kept: usize = confirmed.iter().map(DuplicateGroup::len).sum();
            if kept < potential_len {
                log::debug!(
                    "Fingerprint group split: {} of {} files confirmed",
                    kept,
                    potential_len
                );
            }
            report.excluded += potential_len - kept;
            report.groups.extend(confirmed);
            observer.on_scan_progress(idx + 1, total_groups);
        }

        store.upsert_files(&updated)?;
        sort_groups(&mut report.groups);
        report.duration = started.elapsed();

        observer.on_status(&format!(
            "Found {} duplicate groups ({} reclaimable)",
            report.groups.len(),
            bytesize::ByteSize(report.wasted_bytes())
        ));
        log::info!(
            "Resolution complete: {} potential -> {} confirmed groups, {} confirm hashes ({:.2}s)",
            report.potential_groups,
            report.groups.len(),
            report.confirm_hashed,
            report.duration.as_secs_f64()
        );
        Ok(report)
    }
}
