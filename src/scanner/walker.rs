//! Folder-level work-stealing directory scanner.
//!
//! # Overview
//!
//! Scanning runs in two phases:
//!
//! 1. **Folder discovery**: every root is walked to completion with
//!    [`walkdir`], collecting each folder that directly contains at least one
//!    file into one shared queue. A single deep subtree therefore becomes many
//!    independent queue items instead of one long job.
//! 2. **Enumeration**: a fixed pool of workers pops folders from the shared
//!    queue and lists only that folder's direct file entries. Whichever worker
//!    is free takes the next folder; nothing is partitioned up front.
//!
//! Workers keep their results locally and merge them into the shared result
//! set once, under a lock. The shared discovery counter is bumped in batches
//! of [`COUNT_BATCH`] files. Progress is reported by the coordinating thread on
//! a timer, so workers never wait on an observer.
//!
//! Failures on individual folders or files (permissions, entries deleted
//! mid-walk) are logged and skipped. A panic while listing one folder is
//! caught; that folder is reported in [`ScanOutput::failed_folders`] and the
//! worker moves on. Cancellation is polled during discovery
//! and between entries while listing; once observed, partial results are
//! discarded and [`ScanError::Cancelled`] is returned.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::queue::SegQueue;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use walkdir::WalkDir;

use super::{panic_message, FileEntry, ScanError, ScannerConfig};
use crate::progress::{ScanObserver, WorkerBoard, WorkerState};

/// Files a worker discovers before publishing them to the shared counter.
pub const COUNT_BATCH: usize = 50;

const DEFAULT_TICK_MS: u64 = 50;

/// One unit of enumeration work.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FolderJob {
    folder: PathBuf,
    root: usize,
}

/// Result of a completed scan.
#[derive(Debug, Clone, Default)]
pub struct ScanOutput {
    /// Discovered files, unordered
    pub files: Vec<FileEntry>,
    /// Number of folders that were enumerated
    pub folders: usize,
    /// Folders whose listing faulted; their files are absent from `files`
    pub failed_folders: Vec<PathBuf>,
    /// Time spent scanning
    pub duration: Duration,
}

/// Hidden/ignore/size filtering shared by both phases.
struct EntryFilter {
    roots: Vec<PathBuf>,
    ignores: Vec<Option<Gitignore>>,
    skip_hidden: bool,
    min_size: Option<u64>,
}

impl EntryFilter {
    fn new(roots: &[PathBuf], config: &ScannerConfig) -> Self {
        let ignores = roots
            .iter()
            .map(|root| build_gitignore(root, &config.ignore_patterns))
            .collect();
        Self {
            roots: roots.to_vec(),
            ignores,
            skip_hidden: config.skip_hidden,
            min_size: config.min_size,
        }
    }

    fn is_hidden(name: &OsStr) -> bool {
        name.to_string_lossy().starts_with('.')
    }

    fn is_ignored(&self, root: usize, path: &Path, is_dir: bool) -> bool {
        let Some(Some(gi)) = self.ignores.get(root) else {
            return false;
        };
        let relative = path.strip_prefix(&self.roots[root]).unwrap_or(path);
        let path_str = relative.to_string_lossy();
        let normalized = if cfg!(windows) {
            path_str.replace('\\', "/")
        } else {
            path_str.into_owned()
        };
        gi.matched(normalized, is_dir).is_ignore()
    }

    fn skip_dir(&self, root: usize, path: &Path, name: &OsStr) -> bool {
        (self.skip_hidden && Self::is_hidden(name)) || self.is_ignored(root, path, true)
    }

    fn skip_file(&self, root: usize, path: &Path, name: &OsStr, size: u64) -> bool {
        if self.skip_hidden && Self::is_hidden(name) {
            return true;
        }
        if self.min_size.is_some_and(|min| size < min) {
            return true;
        }
        self.is_ignored(root, path, false)
    }
}

/// Build a gitignore matcher for `root` from the configured patterns.
fn build_gitignore(root: &Path, patterns: &[String]) -> Option<Gitignore> {
    if patterns.is_empty() {
        return None;
    }
    let mut builder = GitignoreBuilder::new(root);
    for pattern in patterns {
        if let Err(e) = builder.add_line(None, pattern) {
            log::warn!("Invalid ignore pattern '{}': {}", pattern, e);
        }
    }
    match builder.build() {
        Ok(gitignore) if !gitignore.is_empty() => Some(gitignore),
        Ok(_) => None,
        Err(e) => {
            log::warn!("Failed to build ignore patterns: {}", e);
            None
        }
    }
}

/// Shared state for one enumeration run.
struct Shared<'a> {
    queue: &'a SegQueue<FolderJob>,
    filter: &'a EntryFilter,
    results: &'a Mutex<Vec<FileEntry>>,
    failed: &'a Mutex<Vec<PathBuf>>,
    discovered: &'a AtomicUsize,
    folders_done: &'a AtomicUsize,
    board: &'a WorkerBoard,
}

/// Discovers regular files under a set of root directories.
#[derive(Debug, Clone)]
pub struct DirectoryScanner {
    config: ScannerConfig,
    shutdown_flag: Option<Arc<AtomicBool>>,
    #[cfg(test)]
    fault_on: Option<PathBuf>,
}

impl DirectoryScanner {
    /// Create a scanner with the given configuration.
    #[must_use]
    pub fn new(config: ScannerConfig) -> Self {
        Self {
            config,
            shutdown_flag: None,
            #[cfg(test)]
            fault_on: None,
        }
    }

    /// Set the cancellation flag polled by discovery and every worker.
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

    /// Phase 1: collect every folder that directly contains a file.
    ///
    /// Folders are returned in walk order, each at most once per root.
    pub fn discover_folders(&self, roots: &[PathBuf]) -> Result<Vec<PathBuf>, ScanError> {
        let filter = EntryFilter::new(roots, &self.config);
        Ok(self
            .discover_jobs(roots, &filter)?
            .into_iter()
            .map(|job| job.folder)
            .collect())
    }

    fn discover_jobs(
        &self,
        roots: &[PathBuf],
        filter: &EntryFilter,
    ) -> Result<Vec<FolderJob>, ScanError> {
        let mut jobs = Vec::new();

        for (root_idx, root) in roots.iter().enumerate() {
            if self.is_shutdown_requested() {
                return Err(ScanError::Cancelled);
            }

            let mut seen: HashSet<PathBuf> = HashSet::new();
            let walker = WalkDir::new(root)
                .follow_links(false)
                .into_iter()
                .filter_entry(|e| {
                    e.depth() == 0
                        || !e.file_type().is_dir()
                        || !filter.skip_dir(root_idx, e.path(), e.file_name())
                });

            for entry in walker {
                if self.is_shutdown_requested() {
                    log::debug!("Folder discovery: shutdown requested");
                    return Err(ScanError::Cancelled);
                }
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        log::warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                if let Some(parent) = entry.path().parent() {
                    if seen.insert(parent.to_path_buf()) {
                        jobs.push(FolderJob {
                            folder: parent.to_path_buf(),
                            root: root_idx,
                        });
                    }
                }
            }
        }

        Ok(jobs)
    }

    /// List the direct regular-file entries of one folder.
    fn list_folder(&self, job: &FolderJob, filter: &EntryFilter) -> Vec<FileEntry> {
        #[cfg(test)]
        if self.fault_on.as_deref() == Some(job.folder.as_path()) {
            panic!("simulated listing fault");
        }
        let entries = match fs::read_dir(&job.folder) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Cannot read folder {}: {}", job.folder.display(), e);
                return Vec::new();
            }
        };

        let mut files = Vec::new();
        for entry in entries {
            if self.is_shutdown_requested() {
                break;
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::debug!("Skipping entry in {}: {}", job.folder.display(), e);
                    continue;
                }
            };
            // Symlinks are not followed; subfolders are separate queue items
            match entry.file_type() {
                Ok(ft) if ft.is_file() => {}
                Ok(_) => continue,
                Err(e) => {
                    log::debug!("Cannot stat {}: {}", entry.path().display(), e);
                    continue;
                }
            }
            let path = entry.path();
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    log::debug!("Cannot stat {}: {}", path.display(), e);
                    continue;
                }
            };
            if filter.skip_file(job.root, &path, &entry.file_name(), metadata.len()) {
                log::trace!("Filtered: {}", path.display());
                continue;
            }
            files.push(FileEntry::from_metadata(path, &metadata));
        }
        files
    }

    fn scan_worker(&self, worker_id: usize, shared: &Shared<'_>) {
        let mut local = Vec::new();
        let mut unreported = 0usize;
        let mut folders = 0usize;

        while !self.is_shutdown_requested() {
            let Some(job) = shared.queue.pop() else {
                break;
            };
            shared
                .board
                .set(worker_id, WorkerState::Scanning, Some(&job.folder));

            let listed =
                panic::catch_unwind(AssertUnwindSafe(|| self.list_folder(&job, shared.filter)));
            let files = match listed {
                Ok(files) => files,
                Err(payload) => {
                    log::error!(
                        "Scan worker {} fault on {}: {}",
                        worker_id,
                        job.folder.display(),
                        panic_message(payload.as_ref())
                    );
                    shared
                        .board
                        .set(worker_id, WorkerState::Failed, Some(&job.folder));
                    shared
                        .failed
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(job.folder.clone());
                    Vec::new()
                }
            };
            unreported += files.len();
            local.extend(files);
            folders += 1;
            shared.folders_done.fetch_add(1, Ordering::Relaxed);

            if unreported >= COUNT_BATCH {
                shared.discovered.fetch_add(unreported, Ordering::Relaxed);
                unreported = 0;
            }
        }

        if unreported > 0 {
            shared.discovered.fetch_add(unreported, Ordering::Relaxed);
        }
        shared
            .results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(local);
        shared.board.set(worker_id, WorkerState::Complete, None);
        log::debug!("Scan worker {} finished after {} folders", worker_id, folders);
    }

    /// Discover every regular file under `roots`.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Cancelled`] if the shutdown flag was set before the
    /// scan completed. No other error aborts a scan.
    pub fn scan(
        &self,
        roots: &[PathBuf],
        observer: &dyn ScanObserver,
    ) -> Result<ScanOutput, ScanError> {
        let started = Instant::now();
        let filter = EntryFilter::new(roots, &self.config);

        observer.on_status("Discovering all folders...");
        let jobs = self.discover_jobs(roots, &filter)?;
        if jobs.is_empty() {
            observer.on_status("No folders with files found");
            return Ok(ScanOutput {
                duration: started.elapsed(),
                ..Default::default()
            });
        }

        let folder_count = jobs.len();
        let workers = self.config.worker_count();
        log::info!(
            "Discovered {} folders across {} roots; listing with {} workers",
            folder_count,
            roots.len(),
            workers
        );
        observer.on_status(&format!(
            "Found {folder_count} folders. Starting parallel scan with {workers} workers..."
        ));

        let queue = SegQueue::new();
        for job in jobs {
            queue.push(job);
        }
        let results = Mutex::new(Vec::new());
        let failed = Mutex::new(Vec::new());
        let discovered = AtomicUsize::new(0);
        let folders_done = AtomicUsize::new(0);
        let board = WorkerBoard::new(workers);
        let shared = Shared {
            queue: &queue,
            filter: &filter,
            results: &results,
            failed: &failed,
            discovered: &discovered,
            folders_done: &folders_done,
            board: &board,
        };
        let tick = Duration::from_millis(match self.config.progress_interval_ms {
            0 => DEFAULT_TICK_MS,
            ms => ms,
        });

        thread::scope(|s| {
            let handles: Vec<_> = (0..workers)
                .map(|id| {
                    let shared = &shared;
                    s.spawn(move || self.scan_worker(id, shared))
                })
                .collect();

            let mut last_count = usize::MAX;
            let mut last_done = usize::MAX;
            let mut last_folder: Option<PathBuf> = None;
            loop {
                let finished = handles.iter().all(|h| h.is_finished());

                let count = discovered.load(Ordering::Relaxed);
                if count != last_count {
                    observer.on_files_discovered(count);
                    last_count = count;
                }
                let done = folders_done.load(Ordering::Relaxed);
                if done != last_done {
                    observer.on_scan_progress(done, folder_count);
                    last_done = done;
                }
                if let Some(workers) = board.take_if_changed() {
                    let current = workers
                        .iter()
                        .filter(|w| w.state == WorkerState::Scanning)
                        .find_map(|w| w.current_item.clone());
                    if let Some(folder) = current {
                        if last_folder.as_ref() != Some(&folder) {
                            observer.on_folder_changed(&folder);
                            last_folder = Some(folder);
                        }
                    }
                    observer.on_worker_activity(&workers);
                }

                if finished {
                    break;
                }
                thread::sleep(tick);
            }

            for (id, handle) in handles.into_iter().enumerate() {
                if handle.join().is_err() {
                    log::error!("Scan worker {} panicked; its folders were skipped", id);
                }
            }
        });

        if self.is_shutdown_requested() {
            log::info!("Scan cancelled; discarding partial results");
            return Err(ScanError::Cancelled);
        }

        let files = results.into_inner().unwrap_or_else(PoisonError::into_inner);
        let failed_folders = failed.into_inner().unwrap_or_else(PoisonError::into_inner);
        if !failed_folders.is_empty() {
            log::warn!("{} folders could not be listed", failed_folders.len());
        }
        observer.on_files_discovered(files.len());
        observer.on_status(&format!(
            "Discovered {} files in {} folders",
            files.len(),
            folder_count
        ));
        log::info!(
            "Scan complete: {} files in {} folders ({:.2}s)",
            files.len(),
            folder_count,
            started.elapsed().as_secs_f64()
        );

        Ok(ScanOutput {
            files,
            folders: folder_count,
            failed_folders,
            duration: started.elapsed(),
        })
    }
}
