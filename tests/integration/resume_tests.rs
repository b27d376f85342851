use dedup::config::EngineConfig;
use dedup::engine::Engine;
use dedup::progress::SilentObserver;
use dedup::scanner::{FileHasher, HashError, Hasher};
use dedup::workspace::FileStatus;
use filetime::{set_file_mtime, FileTime};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::{tempdir, TempDir};

/// Counts fingerprint calls and delegates to the real hasher.
#[derive(Default)]
struct CountingHasher {
    inner: Hasher,
    fingerprints: AtomicUsize,
    fail_once: Mutex<HashSet<PathBuf>>,
}

impl CountingHasher {
    fn count(&self) -> usize {
        self.fingerprints.load(Ordering::SeqCst)
    }
}

impl FileHasher for CountingHasher {
    fn fingerprint(&self, path: &Path) -> Result<String, HashError> {
        self.fingerprints.fetch_add(1, Ordering::SeqCst);
        if self.fail_once.lock().unwrap().remove(path) {
            return Err(HashError::PermissionDenied(path.to_path_buf()));
        }
        self.inner.fingerprint(path)
    }

    fn confirm_hash(&self, path: &Path) -> Result<String, HashError> {
        self.inner.confirm_hash(path)
    }
}

fn setup() -> (TempDir, PathBuf) {
    let tmp = tempdir().unwrap();
    let data = tmp.path().join("data");
    fs::create_dir(&data).unwrap();
    fs::write(data.join("a.txt"), "alpha").unwrap();
    fs::write(data.join("b.txt"), "bravo").unwrap();
    fs::write(data.join("c.txt"), "alpha").unwrap();
    (tmp, data)
}

fn engine(tmp: &TempDir, data: &Path, hasher: Arc<CountingHasher>) -> Engine {
    let config = EngineConfig {
        skip_hashed: true,
        ..Default::default()
    };
    let mut engine = Engine::create(&tmp.path().join("ws.dedup"), config)
        .unwrap()
        .with_hasher(hasher);
    engine.add_directory(data).unwrap();
    engine
}

#[test]
fn test_skip_mode_does_not_rehash_unchanged_files() {
    let (tmp, data) = setup();
    let hasher = Arc::new(CountingHasher::default());
    let engine = engine(&tmp, &data, Arc::clone(&hasher));

    let first = engine.scan_and_hash(&SilentObserver).unwrap();
    assert_eq!(first.hash.hashed, 3);
    assert_eq!(hasher.count(), 3);
    let before = engine.get_all_files().unwrap();

    let second = engine.scan_and_hash(&SilentObserver).unwrap();
    assert_eq!(second.hash.skipped, 3);
    assert_eq!(second.hash.hashed, 0);
    assert_eq!(hasher.count(), 3);

    let mut after = engine.get_all_files().unwrap();
    let mut before = before;
    before.sort_by(|a, b| a.path.cmp(&b.path));
    after.sort_by(|a, b| a.path.cmp(&b.path));
    assert_eq!(before, after);
}

#[test]
fn test_changed_mtime_forces_rehash() {
    let (tmp, data) = setup();
    let hasher = Arc::new(CountingHasher::default());
    let engine = engine(&tmp, &data, Arc::clone(&hasher));
    engine.scan_and_hash(&SilentObserver).unwrap();

    set_file_mtime(data.join("b.txt"), FileTime::from_unix_time(1_000_000, 0)).unwrap();
    let report = engine.scan_and_hash(&SilentObserver).unwrap();

    assert_eq!(report.hash.hashed, 1);
    assert_eq!(report.hash.skipped, 2);
    assert_eq!(hasher.count(), 4);
    let record = engine
        .store()
        .get_file(&data.canonicalize().unwrap().join("b.txt"))
        .unwrap()
        .unwrap();
    assert_eq!(record.modified, 1_000_000);
}

#[test]
fn test_changed_size_forces_rehash_and_clears_confirmation() {
    let (tmp, data) = setup();
    let hasher = Arc::new(CountingHasher::default());
    let engine = engine(&tmp, &data, Arc::clone(&hasher));
    engine.scan_and_hash(&SilentObserver).unwrap();
    assert_eq!(engine.find_duplicates(&SilentObserver).unwrap().len(), 1);

    fs::write(data.join("c.txt"), "alpha, but longer now").unwrap();
    engine.scan_and_hash(&SilentObserver).unwrap();

    let path = data.canonicalize().unwrap().join("c.txt");
    let record = engine.store().get_file(&path).unwrap().unwrap();
    assert!(record.confirm_hash.is_none());
    assert!(engine.find_duplicates(&SilentObserver).unwrap().is_empty());
}

#[test]
fn test_full_mode_rehashes_everything() {
    let (tmp, data) = setup();
    let hasher = Arc::new(CountingHasher::default());
    let mut engine = engine(&tmp, &data, Arc::clone(&hasher));
    engine.scan_and_hash(&SilentObserver).unwrap();

    engine.set_skip_hashed(false);
    let report = engine.scan_and_hash(&SilentObserver).unwrap();
    assert_eq!(report.hash.skipped, 0);
    assert_eq!(hasher.count(), 6);
}

#[test]
fn test_deleted_file_marked_missing_then_revived() {
    let (tmp, data) = setup();
    let hasher = Arc::new(CountingHasher::default());
    let engine = engine(&tmp, &data, Arc::clone(&hasher));
    engine.scan_and_hash(&SilentObserver).unwrap();

    let moved = tmp.path().join("c.txt.bak");
    fs::rename(data.join("c.txt"), &moved).unwrap();
    let report = engine.scan_and_hash(&SilentObserver).unwrap();
    assert_eq!(report.missing, 1);
    assert_eq!(report.stats.total_files, 2);

    let path = data.canonicalize().unwrap().join("c.txt");
    let record = engine.store().get_file(&path).unwrap().unwrap();
    assert_eq!(record.status, FileStatus::Missing);
    assert!(record.fingerprint.is_some());
    // Missing files never form groups
    assert!(engine.find_duplicates(&SilentObserver).unwrap().is_empty());

    fs::rename(&moved, data.join("c.txt")).unwrap();
    let report = engine.scan_and_hash(&SilentObserver).unwrap();
    assert_eq!(report.missing, 0);
    assert_eq!(report.hash.hashed, 0);
    let record = engine.store().get_file(&path).unwrap().unwrap();
    assert_eq!(record.status, FileStatus::Present);
    assert_eq!(engine.find_duplicates(&SilentObserver).unwrap().len(), 1);
}

#[test]
fn test_failed_hash_is_retried_next_run() {
    let (tmp, data) = setup();
    let hasher = Arc::new(CountingHasher::default());
    let path = data.canonicalize().unwrap().join("b.txt");
    hasher.fail_once.lock().unwrap().insert(path.clone());
    let engine = engine(&tmp, &data, Arc::clone(&hasher));

    let report = engine.scan_and_hash(&SilentObserver).unwrap();
    assert!(report.has_failures());
    assert_eq!(report.hash.failures[0].path(), path.as_path());
    let record = engine.store().get_file(&path).unwrap().unwrap();
    assert!(record.fingerprint.is_none());
    assert_eq!(record.status, FileStatus::Error);

    let report = engine.scan_and_hash(&SilentObserver).unwrap();
    assert!(!report.has_failures());
    assert_eq!(report.hash.hashed, 1);
    let record = engine.store().get_file(&path).unwrap().unwrap();
    assert!(record.fingerprint.is_some());
    assert_eq!(record.status, FileStatus::Present);
}

#[test]
fn test_resume_across_reopen() {
    let (tmp, data) = setup();
    let hasher = Arc::new(CountingHasher::default());
    let engine = engine(&tmp, &data, Arc::clone(&hasher));
    engine.scan_and_hash(&SilentObserver).unwrap();
    engine.close().unwrap();

    let config = EngineConfig {
        skip_hashed: true,
        ..Default::default()
    };
    let engine = Engine::open(&tmp.path().join("ws.dedup"), config)
        .unwrap()
        .with_hasher(Arc::clone(&hasher) as Arc<dyn FileHasher>);
    assert_eq!(engine.directories().len(), 1);
    let report = engine.scan_and_hash(&SilentObserver).unwrap();
    assert_eq!(report.hash.skipped, 3);
    assert_eq!(hasher.count(), 3);
}
