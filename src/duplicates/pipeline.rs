//! Fingerprint hashing pipeline.
//!
//! # Overview
//!
//! Discovered files are fingerprinted by a pool of worker threads and the
//! results written to the workspace store:
//!
//! 1. **Resume check** (optional): files whose stored record already has a
//!    fingerprint for the same size and modification time are skipped.
//! 2. **Registration** (resume only): every file that needs hashing is
//!    upserted with null hashes first, so a changed file never keeps a stale
//!    fingerprint.
//! 3. **Hashing**: files are split into a small-file queue and a large-file
//!    queue. Each queue has its own pool; once a pool's own queue is empty it
//!    helps drain the other one, so a few huge files cannot hold up thousands
//!    of small ones and no worker sits idle while work remains.
//! 4. **Commit**: workers send outcomes over a channel to the calling thread,
//!    which is the only writer. A resumed run commits in fixed-size
//!    transactions. A full run replaces the file table in one transaction
//!    once every file is hashed, so cancelling it leaves the previous
//!    records in place.
//!
//! A file that cannot be read is stored with a null fingerprint and status
//! `error`; it never aborts the run. A panic while hashing one file is caught
//! and treated the same way. On cancellation the uncommitted outcomes are
//! dropped and [`PipelineError::Cancelled`] is returned.

use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use crossbeam::queue::SegQueue;

use crate::progress::{ScanObserver, WorkerBoard, WorkerState};
use crate::scanner::{available_concurrency, panic_message, FileEntry, FileHasher, HashError};
use crate::workspace::{FileRecord, FileStatus, StoreError, WorkspaceStore};

/// Files at or above this size go to the large-file pool (50 MiB).
pub const DEFAULT_LARGE_FILE_THRESHOLD: u64 = 50 * 1024 * 1024;

/// Records committed per transaction.
pub const DEFAULT_COMMIT_BATCH: usize = 256;

/// Completions between hash progress events.
const PROGRESS_EVERY: usize = 5;

/// Completions between status messages.
const STATUS_EVERY: usize = 100;

/// Configuration for the hashing pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Small-file pool size. `None` uses available concurrency minus one
    /// (minimum 1).
    pub hash_workers: Option<usize>,
    /// Large-file pool size. `None` uses half the small pool, between 1 and 4.
    pub large_file_workers: Option<usize>,
    /// Size in bytes at which a file is routed to the large-file pool.
    pub large_file_threshold: u64,
    /// Skip files whose stored fingerprint is still current.
    pub skip_hashed: bool,
    /// Records per commit transaction.
    pub commit_batch_size: usize,
    /// Interval for worker activity reports, in milliseconds.
    pub progress_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            hash_workers: None,
            large_file_workers: None,
            large_file_threshold: DEFAULT_LARGE_FILE_THRESHOLD,
            skip_hashed: false,
            commit_batch_size: DEFAULT_COMMIT_BATCH,
            progress_interval_ms: 100,
        }
    }
}

impl PipelineConfig {
    /// Resolved small-file pool size.
    #[must_use]
    pub fn small_workers(&self) -> usize {
        self.hash_workers
            .unwrap_or_else(|| available_concurrency().saturating_sub(1))
            .max(1)
    }

    /// Resolved large-file pool size.
    #[must_use]
    pub fn large_workers(&self) -> usize {
        self.large_file_workers
            .unwrap_or_else(|| (self.small_workers() / 2).clamp(1, 4))
            .max(1)
    }

    fn is_large(&self, size: u64) -> bool {
        size >= self.large_file_threshold
    }
}

/// Why a single file has no fingerprint.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HashFailure {
    /// The file could not be read.
    #[error("Failed to read {}: {message}", .path.display())]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        message: String,
    },

    /// The worker faulted while hashing the file.
    #[error("Worker fault while hashing {}: {message}", .path.display())]
    Worker {
        /// File that failed
        path: PathBuf,
        /// Panic message
        message: String,
    },
}

impl HashFailure {
    /// The file this failure belongs to.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Io { path, .. } | Self::Worker { path, .. } => path,
        }
    }
}

/// Errors that end a pipeline run.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// Cancellation was requested; uncommitted results were discarded.
    #[error("Hashing cancelled")]
    Cancelled,

    /// Writing results failed.
    #[error("Failed to store hashing results: {0}")]
    Store(#[from] StoreError),
}

/// Summary of a completed pipeline run.
#[derive(Debug, Clone, Default)]
pub struct HashReport {
    /// Files handed to the pipeline
    pub total: usize,
    /// Files skipped because their fingerprint was current
    pub skipped: usize,
    /// Files fingerprinted successfully
    pub hashed: usize,
    /// Files routed to the large-file pool
    pub large_files: usize,
    /// Per-file failures
    pub failures: Vec<HashFailure>,
    /// Records written by this run, including failed ones
    pub records: Vec<FileRecord>,
    /// Wall time of the run
    pub duration: Duration,
}

struct Outcome {
    entry: FileEntry,
    result: Result<String, HashFailure>,
}

/// Estimated time remaining from throughput so far.
#[must_use]
pub fn estimate_remaining(elapsed: Duration, done: usize, total: usize) -> Option<Duration> {
    let secs = elapsed.as_secs_f64();
    if done == 0 || secs <= 0.0 {
        return None;
    }
    let rate = done as f64 / secs;
    Some(Duration::from_secs_f64(
        total.saturating_sub(done) as f64 / rate,
    ))
}

/// Run one hash function, turning read errors and panics into a [`HashFailure`].
pub(crate) fn guarded_hash<F>(path: &Path, hash: F) -> Result<String, HashFailure>
where
    F: FnOnce(&Path) -> Result<String, HashError>,
{
    match panic::catch_unwind(AssertUnwindSafe(|| hash(path))) {
        Ok(Ok(digest)) => Ok(digest),
        Ok(Err(e @ HashError::Interrupted(_))) => Err(HashFailure::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        }),
        Ok(Err(e)) => {
            log::warn!("Failed to hash {}: {}", path.display(), e);
            Err(HashFailure::Io {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            log::error!("Hash worker fault on {}: {}", path.display(), message);
            Err(HashFailure::Worker {
                path: path.to_path_buf(),
                message,
            })
        }
    }
}

/// Shared state for one hashing run.
struct Pools<'a> {
    small: &'a SegQueue<FileEntry>,
    large: &'a SegQueue<FileEntry>,
    board: &'a WorkerBoard,
    stop: &'a AtomicBool,
}

/// Fingerprints discovered files and writes them to a workspace.
pub struct HashingPipeline {
    config: PipelineConfig,
    hasher: Arc<dyn FileHasher>,
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl std::fmt::Debug for HashingPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashingPipeline")
            .field("config", &self.config)
            .field("hasher", &"<hasher>")
            .field("shutdown_flag", &self.shutdown_flag)
            .finish()
    }
}

impl HashingPipeline {
    /// Create a pipeline using `hasher` for fingerprints.
    #[must_use]
    pub fn new(config: PipelineConfig, hasher: Arc<dyn FileHasher>) -> Self {
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

    /// Split `files` into those needing a hash and records to keep as-is.
    ///
    /// Kept records that were previously marked missing or failed are
    /// returned separately so they can be revived as present.
    fn partition(
        &self,
        files: Vec<FileEntry>,
        store: &WorkspaceStore,
    ) -> Result<(Vec<FileEntry>, usize, Vec<FileRecord>), StoreError> {
        if !self.config.skip_hashed {
            return Ok((files, 0, Vec::new()));
        }

        let mut existing: HashMap<PathBuf, FileRecord> = store
            .get_all_files()?
            .into_iter()
            .map(|r| (r.path.clone(), r))
            .collect();

        let mut pending = Vec::with_capacity(files.len());
        let mut skipped = 0usize;
        let mut revived = Vec::new();
        for entry in files {
            match existing.remove(&entry.path) {
                Some(record) if record.is_current_for(&entry) => {
                    skipped += 1;
                    if record.status != FileStatus::Present {
                        revived.push(FileRecord {
                            status: FileStatus::Present,
                            ..record
                        });
                    }
                }
                _ => pending.push(entry),
            }
        }
        Ok((pending, skipped, revived))
    }

    fn hash_one(&self, path: &Path) -> Result<String, HashFailure> {
        guarded_hash(path, |p| self.hasher.fingerprint(p))
    }

    fn hash_worker(
        &self,
        worker_id: usize,
        large_pool: bool,
        pools: &Pools<'_>,
        tx: Sender<Outcome>,
    ) {
        let (own, other) = if large_pool {
            (pools.large, pools.small)
        } else {
            (pools.small, pools.large)
        };

        loop {
            if self.is_shutdown_requested() || pools.stop.load(Ordering::SeqCst) {
                break;
            }
            let Some(entry) = own.pop().or_else(|| other.pop()) else {
                break;
            };

            let state = if self.config.is_large(entry.size) {
                WorkerState::HashingLarge
            } else {
                WorkerState::HashingSmall
            };
            pools.board.set(worker_id, state, Some(&entry.path));

            let result = self.hash_one(&entry.path);
            let failed = matches!(result, Err(HashFailure::Worker { .. }));
            if tx.send(Outcome { entry, result }).is_err() {
                break;
            }
            pools.board.set(
                worker_id,
                if failed {
                    WorkerState::Failed
                } else {
                    WorkerState::Idle
                },
                None,
            );
        }
        pools.board.set(worker_id, WorkerState::Complete, None);
    }

    fn commit(
        store: &WorkspaceStore,
        batch: &mut Vec<FileRecord>,
        written: &mut Vec<FileRecord>,
    ) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        store.upsert_files(batch)?;
        written.append(batch);
        Ok(())
    }

    /// Fingerprint `files` and store the results.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Cancelled`] if cancellation was requested before the
    /// run finished, [`PipelineError::Store`] if a write failed. Per-file
    /// failures are reported in [`HashReport::failures`] instead.
    pub fn run(
        &self,
        files: Vec<FileEntry>,
        store: &WorkspaceStore,
        observer: &dyn ScanObserver,
    ) -> Result<HashReport, PipelineError> {
        let started = Instant::now();
        let total = files.len();

        let (pending, skipped, revived) = self.partition(files, store)?;
        if self.config.skip_hashed {
            observer.on_status(&format!(
                "Found {} files, {} need hashing (skipped {})",
                total,
                pending.len(),
                skipped
            ));
        }
        if self.is_shutdown_requested() {
            return Err(PipelineError::Cancelled);
        }

        // A full run publishes everything at the end; a resumed run registers
        // pending files first so changed content never keeps an old fingerprint.
        let replace = !self.config.skip_hashed;
        let registered: Vec<FileRecord> = pending.iter().map(FileRecord::discovered).collect();
        if !replace {
            store.upsert_files(&registered)?;
            store.upsert_files(&revived)?;
        }

        let to_hash = pending.len();
        let mut report = HashReport {
            total,
            skipped,
            ..Default::default()
        };
        if to_hash == 0 {
            if replace {
                store.replace_files(&[])?;
            }
            observer.on_hash_progress(0, 0, None);
            report.duration = started.elapsed();
            return Ok(report);
        }

        let small = SegQueue::new();
        let large = SegQueue::new();
        for entry in pending {
            if self.config.is_large(entry.size) {
                report.large_files += 1;
                large.push(entry);
            } else {
                small.push(entry);
            }
        }

        let small_workers = self.config.small_workers();
        let large_workers = if report.large_files > 0 {
            self.config.large_workers()
        } else {
            0
        };
        log::info!(
            "Hashing {} files ({} large) with {} + {} workers",
            to_hash,
            report.large_files,
            small_workers,
            large_workers
        );
        observer.on_status(&format!(
            "Found {} large files and {} small files",
            report.large_files,
            to_hash - report.large_files
        ));
        observer.on_hash_progress(0, to_hash, None);

        let board = WorkerBoard::new(small_workers + large_workers);
        let stop = AtomicBool::new(false);
        let pools = Pools {
            small: &small,
            large: &large,
            board: &board,
            stop: &stop,
        };
        let tick = Duration::from_millis(self.config.progress_interval_ms.max(1));
        let batch_size = self.config.commit_batch_size.max(1);

        let mut batch: Vec<FileRecord> = Vec::with_capacity(batch_size);
        let mut completed = 0usize;
        let mut store_error: Option<StoreError> = None;

        thread::scope(|s| {
            let (tx, rx) = channel::unbounded::<Outcome>();
            let handles: Vec<_> = (0..small_workers + large_workers)
                .map(|id| {
                    let tx = tx.clone();
                    let pools = &pools;
                    s.spawn(move || self.hash_worker(id, id >= small_workers, pools, tx))
                })
                .collect();
            drop(tx);

            let mut last_activity = Instant::now();
            loop {
                if self.is_shutdown_requested() {
                    break;
                }
                match rx.recv_timeout(tick) {
                    Ok(Outcome { entry, result }) => {
                        completed += 1;
                        let mut record = FileRecord::discovered(&entry);
                        match result {
                            Ok(fingerprint) => {
                                record.fingerprint = Some(fingerprint);
                                report.hashed += 1;
                            }
                            Err(failure) => {
                                record.status = FileStatus::Error;
                                report.failures.push(failure);
                            }
                        }
                        batch.push(record);

                        if !replace
                            && batch.len() >= batch_size
                            && !self.is_shutdown_requested()
                        {
                            if let Err(e) = Self::commit(store, &mut batch, &mut report.records) {
                                log::error!("Commit failed, stopping hash workers: {}", e);
                                store_error = Some(e);
                                stop.store(true, Ordering::SeqCst);
                                break;
                            }
                        }
                        if completed % PROGRESS_EVERY == 0 || completed == to_hash {
                            observer.on_hash_progress(
                                completed,
                                to_hash,
                                estimate_remaining(started.elapsed(), completed, to_hash),
                            );
                        }
                        if completed % STATUS_EVERY == 0 {
                            observer.on_status(&format!(
                                "Hashed {}/{} files ({:.1}%)",
                                completed,
                                to_hash,
                                completed as f64 / to_hash as f64 * 100.0
                            ));
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }

                if last_activity.elapsed() >= tick {
                    if let Some(workers) = board.take_if_changed() {
                        observer.on_worker_activity(&workers);
                    }
                    last_activity = Instant::now();
                }
            }
            // Workers only exit through the flags or empty queues
            stop.store(true, Ordering::SeqCst);
            drop(rx);

            for (id, handle) in handles.into_iter().enumerate() {
                if handle.join().is_err() {
                    log::error!("Hash worker {} terminated abnormally", id);
                }
            }
        });

        if let Some(e) = store_error {
            return Err(PipelineError::Store(e));
        }
        if self.is_shutdown_requested() {
            log::info!(
                "Hashing cancelled after {} of {} files; discarding {} uncommitted results",
                completed,
                to_hash,
                batch.len()
            );
            return Err(PipelineError::Cancelled);
        }
        if replace {
            let hashed: HashSet<&Path> = batch.iter().map(|r| r.path.as_path()).collect();
            let unreached: Vec<FileRecord> = registered
                .iter()
                .filter(|r| !hashed.contains(r.path.as_path()))
                .cloned()
                .collect();
            batch.extend(unreached);
            store.replace_files(&batch)?;
            report.records.append(&mut batch);
        } else {
            Self::commit(store, &mut batch, &mut report.records)?;
        }

        if let Some(workers) = board.take_if_changed() {
            observer.on_worker_activity(&workers);
        }
        if completed < to_hash {
            log::warn!(
                "{} files were not hashed and keep a null fingerprint",
                to_hash - completed
            );
        }

        report.duration = started.elapsed();
        log::info!(
            "Hashing complete: {} hashed, {} failed, {} skipped ({:.2}s)",
            report.hashed,
            report.failures.len(),
            report.skipped,
            report.duration.as_secs_f64()
        );
        Ok(report)
    }
}
