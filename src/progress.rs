//! Progress reporting for scans, hashing and duplicate resolution.
//!
//! The engine reports through the [`ScanObserver`] trait. Observer methods are
//! only ever called from the coordinating thread of an operation, never from
//! pool workers, so a slow observer delays reporting but never stalls hashing.
//!
//! Two implementations ship with the crate:
//! - [`EventChannel`]: forwards events into a bounded channel and drops them
//!   when the consumer falls behind. Suitable for any UI runtime.
//! - [`Progress`]: indicatif progress bars for the command-line binary.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::workspace::FileRecord;

/// Receives progress events from the engine.
///
/// All methods default to no-ops so implementors only handle what they show.
pub trait ScanObserver: Send + Sync {
    /// Overall progress of the current phase.
    fn on_scan_progress(&self, _current: usize, _total: usize) {}

    /// A worker started listing or hashing inside `folder`.
    fn on_folder_changed(&self, _folder: &Path) {}

    /// Running count of discovered files.
    fn on_files_discovered(&self, _count: usize) {}

    /// Human-readable status line.
    fn on_status(&self, _message: &str) {}

    /// Snapshot of every pool worker.
    fn on_worker_activity(&self, _workers: &[WorkerStatus]) {}

    /// Hashing progress with an estimate of the remaining time.
    fn on_hash_progress(&self, _done: usize, _total: usize, _eta: Option<Duration>) {}

    /// Scan finished; `files` are the records hashed during this run.
    fn on_scan_completed(&self, _files: &[FileRecord]) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentObserver;

impl ScanObserver for SilentObserver {}

/// What a pool worker is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Spawned, no work taken yet
    Ready,
    /// Listing a folder
    Scanning,
    /// Hashing a file below the large-file threshold
    HashingSmall,
    /// Hashing a file at or above the large-file threshold
    HashingLarge,
    /// Between items
    Idle,
    /// Queue drained, worker exited
    Complete,
    /// Worker hit an unexpected fault on its last item
    Failed,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Ready => "Ready",
            Self::Scanning => "Scanning",
            Self::HashingSmall => "Hashing (Small)",
            Self::HashingLarge => "Hashing (Large)",
            Self::Idle => "Idle",
            Self::Complete => "Complete",
            Self::Failed => "Failed",
        };
        f.write_str(label)
    }
}

/// Display status of one worker. The index is cosmetic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    /// Worker index within its pool
    pub worker_id: usize,
    /// Current state
    pub state: WorkerState,
    /// Folder or file being processed
    pub current_item: Option<PathBuf>,
}

/// Shared status slots for a worker pool.
///
/// Each worker writes only its own slot; the coordinator reads a snapshot
/// when something changed.
#[derive(Debug)]
pub struct WorkerBoard {
    slots: Mutex<Vec<WorkerStatus>>,
    changed: AtomicBool,
}

impl WorkerBoard {
    /// Create `count` slots in the [`WorkerState::Ready`] state.
    #[must_use]
    pub fn new(count: usize) -> Self {
        let slots = (0..count)
            .map(|worker_id| WorkerStatus {
                worker_id,
                state: WorkerState::Ready,
                current_item: None,
            })
            .collect();
        Self {
            slots: Mutex::new(slots),
            changed: AtomicBool::new(true),
        }
    }

    /// Update one worker's slot. Out-of-range ids are ignored.
    pub fn set(&self, worker_id: usize, state: WorkerState, item: Option<&Path>) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.get_mut(worker_id) {
            slot.state = state;
            slot.current_item = item.map(Path::to_path_buf);
            self.changed.store(true, Ordering::Release);
        }
    }

    /// Copy of all slots.
    #[must_use]
    pub fn snapshot(&self) -> Vec<WorkerStatus> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Snapshot only if a slot changed since the last call.
    #[must_use]
    pub fn take_if_changed(&self) -> Option<Vec<WorkerStatus>> {
        if self.changed.swap(false, Ordering::AcqRel) {
            Some(self.snapshot())
        } else {
            None
        }
    }
}

/// Engine events as plain data, for [`EventChannel`] consumers.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// See [`ScanObserver::on_scan_progress`]
    ScanProgress {
        /// Items processed
        current: usize,
        /// Items in total
        total: usize,
    },
    /// See [`ScanObserver::on_folder_changed`]
    FolderChanged(PathBuf),
    /// See [`ScanObserver::on_files_discovered`]
    FilesDiscovered(usize),
    /// See [`ScanObserver::on_status`]
    Status(String),
    /// See [`ScanObserver::on_worker_activity`]
    WorkerActivity(Vec<WorkerStatus>),
    /// See [`ScanObserver::on_hash_progress`]
    HashProgress {
        /// Files hashed
        done: usize,
        /// Files to hash
        total: usize,
        /// Estimated time remaining
        eta: Option<Duration>,
    },
    /// See [`ScanObserver::on_scan_completed`]
    ScanCompleted(Vec<FileRecord>),
}

/// Observer that forwards events into a bounded channel.
///
/// Progress updates never block: once `capacity` events are queued further
/// updates are dropped and counted. Later updates supersede earlier ones, so
/// dropping them only coarsens the display.
///
/// [`EngineEvent::ScanCompleted`] carries the result and is never dropped.
/// One slot beyond `capacity` is kept for it; sending it blocks only if the
/// previous result has not been received yet.
#[derive(Debug)]
pub struct EventChannel {
    sender: Sender<EngineEvent>,
    capacity: usize,
    dropped: AtomicUsize,
}

impl EventChannel {
    /// Create a channel buffering up to `capacity` events.
    #[must_use]
    pub fn bounded(capacity: usize) -> (Self, Receiver<EngineEvent>) {
        let capacity = capacity.max(1);
        let (sender, receiver) = channel::bounded(capacity + 1);
        (
            Self {
                sender,
                capacity,
                dropped: AtomicUsize::new(0),
            },
            receiver,
        )
    }

    /// Number of events dropped because the buffer was full.
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    fn send(&self, event: EngineEvent) {
        if self.sender.len() >= self.capacity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            // Nobody is listening any more
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

impl ScanObserver for EventChannel {
    fn on_scan_progress(&self, current: usize, total: usize) {
        self.send(EngineEvent::ScanProgress { current, total });
    }

    fn on_folder_changed(&self, folder: &Path) {
        self.send(EngineEvent::FolderChanged(folder.to_path_buf()));
    }

    fn on_files_discovered(&self, count: usize) {
        self.send(EngineEvent::FilesDiscovered(count));
    }

    fn on_status(&self, message: &str) {
        self.send(EngineEvent::Status(message.to_string()));
    }

    fn on_worker_activity(&self, workers: &[WorkerStatus]) {
        self.send(EngineEvent::WorkerActivity(workers.to_vec()));
    }

    fn on_hash_progress(&self, done: usize, total: usize, eta: Option<Duration>) {
        self.send(EngineEvent::HashProgress { done, total, eta });
    }

    fn on_scan_completed(&self, files: &[FileRecord]) {
        // Err only when the receiver is gone
        let _ = self.sender.send(EngineEvent::ScanCompleted(files.to_vec()));
    }
}

/// Progress reporter using indicatif.
///
/// Shows a spinner while files are discovered and a bar while they are hashed.
pub struct Progress {
    multi: MultiProgress,
    discovery: Mutex<Option<ProgressBar>>,
    hashing: Mutex<Option<ProgressBar>>,
    quiet: bool,
}

impl Progress {
    /// Create a new progress reporter.
    ///
    /// # Arguments
    ///
    /// * `quiet` - If true, no progress bars will be displayed.
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            discovery: Mutex::new(None),
            hashing: Mutex::new(None),
            quiet,
        }
    }

    fn discovery_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed_precise}] {pos} files")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
    }

    fn hashing_style() -> ProgressStyle {
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█>-")
    }

    fn with_discovery<F: FnOnce(&ProgressBar)>(&self, f: F) {
        let mut slot = self.discovery.lock().unwrap_or_else(PoisonError::into_inner);
        let pb = slot.get_or_insert_with(|| {
            let pb = self.multi.add(ProgressBar::new_spinner());
            pb.set_style(Self::discovery_style());
            pb.set_message("Discovering files");
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        });
        f(pb);
    }

    /// Finish and clear every bar.
    pub fn finish(&self) {
        for slot in [&self.discovery, &self.hashing] {
            if let Some(pb) = slot.lock().unwrap_or_else(PoisonError::into_inner).take() {
                pb.finish_and_clear();
            }
        }
    }
}

impl ScanObserver for Progress {
    fn on_folder_changed(&self, folder: &Path) {
        if self.quiet {
            return;
        }
        let name = folder
            .file_name()
            .map_or_else(|| folder.display().to_string(), |n| n.to_string_lossy().into_owned());
        self.with_discovery(|pb| pb.set_message(format!("Scanning {name}")));
    }

    fn on_files_discovered(&self, count: usize) {
        if self.quiet {
            return;
        }
        self.with_discovery(|pb| pb.set_position(count as u64));
    }

    fn on_status(&self, message: &str) {
        log::info!("{message}");
    }

    fn on_hash_progress(&self, done: usize, total: usize, eta: Option<Duration>) {
        if self.quiet {
            return;
        }
        if let Some(pb) = self
            .discovery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            pb.finish_and_clear();
        }

        let mut slot = self.hashing.lock().unwrap_or_else(PoisonError::into_inner);
        let pb = slot.get_or_insert_with(|| {
            let pb = self.multi.add(ProgressBar::new(total as u64));
            pb.set_style(Self::hashing_style());
            pb
        });
        pb.set_length(total as u64);
        pb.set_position(done as u64);
        if let Some(eta) = eta {
            pb.set_message(format!("ETA {}s", eta.as_secs()));
        }
    }

    fn on_scan_completed(&self, _files: &[FileRecord]) {
        self.finish();
    }
}
