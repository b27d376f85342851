//! Workspace engine.
//!
//! [`Engine`] owns one workspace and runs the pipeline over it:
//!
//! ```text
//! DirectoryScanner ──files──▶ HashingPipeline ──fingerprints──▶ WorkspaceStore
//!                                                                     │
//!                       confirmed groups ◀── DuplicateResolver ◀──────┘
//! ```
//!
//! Progress is reported through a [`ScanObserver`] and cancellation through
//! the engine's [`CancelToken`].
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use dedup::config::EngineConfig;
//! use dedup::engine::Engine;
//! use dedup::progress::SilentObserver;
//!
//! let mut engine = Engine::create(Path::new("photos.dedup"), EngineConfig::default()).unwrap();
//! engine.add_directory(Path::new("/home/user/Pictures")).unwrap();
//! engine.scan_and_hash(&SilentObserver).unwrap();
//! for group in engine.find_duplicates(&SilentObserver).unwrap() {
//!     println!("{} copies of {} bytes", group.len(), group.size);
//! }
//! ```

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam::channel::Receiver;
use serde::Serialize;

use crate::config::EngineConfig;
use crate::duplicates::{
    DuplicateGroup, DuplicateResolver, HashReport, HashingPipeline, PipelineError, ResolveError,
    ResolveReport,
};
use crate::error::ErrorKind;
use crate::progress::{EngineEvent, EventChannel, ScanObserver};
use crate::scanner::{DirectoryScanner, FileHasher, Hasher, ScanError};
use crate::signal::CancelToken;
use crate::workspace::{FileRecord, StoreError, WorkspaceStats, WorkspaceStore};

/// Errors reported by the engine.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// A directory to add does not exist.
    #[error("Directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    /// A path to add exists but is not a directory.
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// The operation cannot run in the current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A path could not be resolved.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path being resolved
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The operation was cancelled; partial results were discarded.
    #[error("Operation cancelled")]
    Cancelled,

    /// Workspace storage failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Directory scanning failed.
    #[error(transparent)]
    Scan(ScanError),
}

impl EngineError {
    /// Category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DirectoryNotFound(_) => ErrorKind::NotFound,
            Self::NotADirectory(_) | Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::Io { .. } => ErrorKind::Io,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Store(e) => e.kind(),
            Self::Scan(e) => e.kind(),
        }
    }

    /// Whether this error is a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<ScanError> for EngineError {
    fn from(e: ScanError) -> Self {
        match e {
            ScanError::Cancelled => Self::Cancelled,
            other => Self::Scan(other),
        }
    }
}

impl From<PipelineError> for EngineError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Cancelled => Self::Cancelled,
            PipelineError::Store(e) => Self::Store(e),
        }
    }
}

impl From<ResolveError> for EngineError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::Cancelled => Self::Cancelled,
            ResolveError::Store(e) => Self::Store(e),
        }
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// What the engine is doing, or how its last operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    /// No operation has run yet.
    #[default]
    Idle,
    /// Discovering files.
    Scanning,
    /// Fingerprinting discovered files.
    Hashing,
    /// Searching for duplicates.
    Resolving,
    /// The last operation finished.
    Completed,
    /// The last operation was cancelled.
    Cancelled,
    /// The last operation failed.
    Failed,
}

impl EngineStatus {
    /// Whether an operation is in progress.
    #[must_use]
    pub fn is_running(self) -> bool {
        matches!(self, Self::Scanning | Self::Hashing | Self::Resolving)
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Hashing => "hashing",
            Self::Resolving => "resolving",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of [`Engine::scan_and_hash`].
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Roots actually walked, after collapsing nested ones
    pub roots: Vec<PathBuf>,
    /// Folders containing files
    pub folders: usize,
    /// Files discovered
    pub discovered: usize,
    /// Hashing summary
    pub hash: HashReport,
    /// Records newly marked missing
    pub missing: usize,
    /// Folders whose listing faulted during discovery
    pub failed_folders: Vec<PathBuf>,
    /// Workspace summary after the scan
    pub stats: WorkspaceStats,
    /// Time spent discovering files
    pub scan_duration: Duration,
    /// Total wall time
    pub duration: Duration,
}

impl ScanReport {
    /// Whether some files could not be hashed or some folders not listed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.hash.failures.is_empty() || !self.failed_folders.is_empty()
    }
}

/// Reduce `dirs` to roots that are not inside another root.
///
/// Order of the surviving roots is preserved.
#[must_use]
pub fn non_overlapping_directories(dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();
    for dir in dirs {
        if result.iter().any(|kept| dir.starts_with(kept)) {
            continue;
        }
        result.retain(|kept| !kept.starts_with(dir));
        result.push(dir.clone());
    }
    result
}

/// A workspace with its configured roots.
pub struct Engine {
    store: WorkspaceStore,
    config: EngineConfig,
    directories: Vec<PathBuf>,
    hasher: Arc<dyn FileHasher>,
    cancel: CancelToken,
    status: Mutex<EngineStatus>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("store", &self.store)
            .field("directories", &self.directories)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create a workspace at `path`, or open it if it already exists.
    ///
    /// # Errors
    ///
    /// Fails if the workspace cannot be created or is corrupt.
    pub fn create(path: &Path, config: EngineConfig) -> EngineResult<Self> {
        Self::with_store(WorkspaceStore::create(path)?, config)
    }

    /// Open an existing workspace.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if nothing exists at `path`,
    /// [`StoreError::Corrupt`] if it is not a readable workspace.
    pub fn open(path: &Path, config: EngineConfig) -> EngineResult<Self> {
        Self::with_store(WorkspaceStore::open(path)?, config)
    }

    /// Wrap an already opened store.
    ///
    /// # Errors
    ///
    /// Fails if the directory list cannot be read.
    pub fn with_store(store: WorkspaceStore, config: EngineConfig) -> EngineResult<Self> {
        let directories = store.load_directories()?;
        let cancel = CancelToken::new();
        let hasher: Arc<dyn FileHasher> =
            Arc::new(Hasher::new().with_shutdown_flag(cancel.flag()));
        log::debug!(
            "Opened workspace '{}' with {} directories",
            store.name(),
            directories.len()
        );
        Ok(Self {
            store,
            config,
            directories,
            hasher,
            cancel,
            status: Mutex::new(EngineStatus::Idle),
        })
    }

    /// Replace the hash implementation.
    #[must_use]
    pub fn with_hasher(mut self, hasher: Arc<dyn FileHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Reuse stored fingerprints of unchanged files on the next scan.
    pub fn set_skip_hashed(&mut self, skip: bool) {
        self.config.skip_hashed = skip;
    }

    /// Token that cancels the running operation.
    ///
    /// The token is reset when an operation starts.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Observer that queues events for another thread, sized by
    /// `event_buffer`. Pass the channel to an operation and drain the receiver.
    #[must_use]
    pub fn event_channel(&self) -> (EventChannel, Receiver<EngineEvent>) {
        EventChannel::bounded(self.config.event_buffer)
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> EngineStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, status: EngineStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    /// Claim the engine for a new operation.
    ///
    /// Check and update happen under one lock, so only one caller wins.
    fn begin(&self, status: EngineStatus) -> EngineResult<()> {
        let mut current = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        if current.is_running() {
            return Err(EngineError::InvalidState(
                "another operation is running".to_string(),
            ));
        }
        *current = status;
        Ok(())
    }

    /// Record how an operation ended.
    fn finish<T>(&self, result: EngineResult<T>) -> EngineResult<T> {
        let status = match &result {
            Ok(_) => EngineStatus::Completed,
            Err(EngineError::Cancelled) => EngineStatus::Cancelled,
            Err(_) => EngineStatus::Failed,
        };
        self.set_status(status);
        if let Err(e) = &result {
            if e.is_cancelled() {
                log::info!("Operation cancelled");
            } else {
                log::error!("Operation failed: {e}");
            }
        }
        result
    }

    /// The workspace file, if the store is file-backed.
    #[must_use]
    pub fn workspace_path(&self) -> Option<&Path> {
        self.store.path()
    }

    /// Configured scan roots.
    #[must_use]
    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }

    /// Add a scan root and persist the directory list.
    ///
    /// Returns `false` if the directory was already configured.
    ///
    /// # Errors
    ///
    /// [`EngineError::DirectoryNotFound`] or [`EngineError::NotADirectory`]
    /// for invalid paths; store errors if saving fails.
    pub fn add_directory(&mut self, path: &Path) -> EngineResult<bool> {
        if !path.exists() {
            return Err(EngineError::DirectoryNotFound(path.to_path_buf()));
        }
        if !path.is_dir() {
            return Err(EngineError::NotADirectory(path.to_path_buf()));
        }
        let canonical = path.canonicalize().map_err(|source| EngineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if self.directories.contains(&canonical) {
            log::debug!("Directory already configured: {}", canonical.display());
            return Ok(false);
        }
        self.directories.push(canonical);
        self.store.save_directories(&self.directories)?;
        log::info!("Added directory: {}", path.display());
        Ok(true)
    }

    /// Remove a scan root and persist the directory list.
    ///
    /// Returns `false` if the directory was not configured.
    ///
    /// # Errors
    ///
    /// Store errors if saving fails.
    pub fn remove_directory(&mut self, path: &Path) -> EngineResult<bool> {
        let target = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let before = self.directories.len();
        self.directories.retain(|d| d != &target && d != path);
        if self.directories.len() == before {
            return Ok(false);
        }
        self.store.save_directories(&self.directories)?;
        log::info!("Removed directory: {}", path.display());
        Ok(true)
    }

    /// Discover files under every root and fingerprint them.
    ///
    /// Without `skip_hashed` the stored file table is replaced by this scan.
    /// With it, unchanged files keep their fingerprints and records under the
    /// scanned roots that were not found again are marked missing.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidState`] with no roots configured,
    /// [`EngineError::Cancelled`] if cancelled, store errors if writing fails.
    pub fn scan_and_hash(&self, observer: &dyn ScanObserver) -> EngineResult<ScanReport> {
        if self.directories.is_empty() {
            return Err(EngineError::InvalidState(
                "no directories configured for scanning".to_string(),
            ));
        }
        self.begin(EngineStatus::Scanning)?;
        self.cancel.reset();
        let result = self.run_scan(observer);
        self.finish(result)
    }

    fn run_scan(&self, observer: &dyn ScanObserver) -> EngineResult<ScanReport> {
        let started = Instant::now();
        let roots = non_overlapping_directories(&self.directories);
        log::info!("Scanning {} directories: {:?}", roots.len(), roots);
        observer.on_status(&format!("Scanning {} directories...", roots.len()));

        let scanner = DirectoryScanner::new(self.config.scanner_config())
            .with_shutdown_flag(self.cancel.flag());
        let output = scanner.scan(&roots, observer)?;
        let scan_duration = started.elapsed();
        let discovered = output.files.len();
        observer.on_status(&format!(
            "Found {} files in {} folders",
            discovered, output.folders
        ));

        let skip_hashed = self.config.skip_hashed;
        let seen: HashSet<PathBuf> = if skip_hashed {
            output.files.iter().map(|f| f.path.clone()).collect()
        } else {
            HashSet::new()
        };
        // Folders that faulted keep their previous records in a full scan too
        let unlisted_records: Vec<FileRecord> = if skip_hashed || output.failed_folders.is_empty()
        {
            Vec::new()
        } else {
            self.store
                .get_all_files()?
                .into_iter()
                .filter(|r| {
                    r.path
                        .parent()
                        .is_some_and(|dir| output.failed_folders.iter().any(|f| f == dir))
                })
                .collect()
        };
        if !skip_hashed {
            log::debug!("Full scan: stored files are replaced once hashing completes");
        }

        self.set_status(EngineStatus::Hashing);
        let pipeline =
            HashingPipeline::new(self.config.pipeline_config(), Arc::clone(&self.hasher))
                .with_shutdown_flag(self.cancel.flag());
        let hash = pipeline.run(output.files, &self.store, observer)?;
        for failure in &hash.failures {
            log::warn!("{failure}");
        }
        self.store.upsert_files(&unlisted_records)?;

        let missing = if skip_hashed {
            self.store
                .mark_missing(&roots, &seen, &output.failed_folders)?
        } else {
            0
        };
        if missing > 0 {
            log::info!("{missing} files no longer exist");
        }

        self.store
            .mark_directories_scanned(&self.directories, Utc::now())?;
        let stats = self.store.recompute_metadata()?;
        observer.on_scan_completed(&hash.records);
        observer.on_status(&format!(
            "Scan complete: {} files, {} hashed, {} skipped",
            discovered, hash.hashed, hash.skipped
        ));

        Ok(ScanReport {
            roots,
            folders: output.folders,
            discovered,
            hash,
            missing,
            failed_folders: output.failed_folders,
            stats,
            scan_duration,
            duration: started.elapsed(),
        })
    }

    /// Find confirmed duplicate groups among the stored files.
    ///
    /// # Errors
    ///
    /// [`EngineError::Cancelled`] if cancelled, store errors otherwise.
    pub fn find_duplicates(
        &self,
        observer: &dyn ScanObserver,
    ) -> EngineResult<Vec<DuplicateGroup>> {
        Ok(self.resolve(observer)?.groups)
    }

    /// Like [`Engine::find_duplicates`], with the full resolution summary.
    ///
    /// # Errors
    ///
    /// See [`Engine::find_duplicates`].
    pub fn resolve(&self, observer: &dyn ScanObserver) -> EngineResult<ResolveReport> {
        self.begin(EngineStatus::Resolving)?;
        self.cancel.reset();
        let result = self.run_resolve(observer);
        self.finish(result)
    }

    fn run_resolve(&self, observer: &dyn ScanObserver) -> EngineResult<ResolveReport> {
        let resolver =
            DuplicateResolver::new(self.config.resolver_config(), Arc::clone(&self.hasher))
                .with_shutdown_flag(self.cancel.flag());
        let report = resolver.resolve(&self.store, observer)?;
        self.store.recompute_metadata()?;
        Ok(report)
    }

    /// Every stored file record.
    ///
    /// # Errors
    ///
    /// Store errors if the workspace cannot be read.
    pub fn get_all_files(&self) -> EngineResult<Vec<FileRecord>> {
        Ok(self.store.get_all_files()?)
    }

    /// Last persisted workspace summary.
    ///
    /// # Errors
    ///
    /// Store errors if the workspace cannot be read.
    pub fn stats(&self) -> EngineResult<WorkspaceStats> {
        Ok(self.store.get_stats()?)
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &WorkspaceStore {
        &self.store
    }

    /// Close the workspace.
    ///
    /// # Errors
    ///
    /// Fails if the database cannot be closed cleanly.
    pub fn close(self) -> EngineResult<()> {
        log::debug!("Closing workspace '{}'", self.store.name());
        Ok(self.store.close()?)
    }
}
