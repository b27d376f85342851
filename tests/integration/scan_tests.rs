use dedup::config::EngineConfig;
use dedup::engine::Engine;
use dedup::progress::{ScanObserver, SilentObserver};
use dedup::workspace::FileRecord;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn engine_for(tmp: &TempDir, data: &Path) -> Engine {
    let mut engine = Engine::create(&tmp.path().join("ws.dedup"), EngineConfig::default()).unwrap();
    engine.add_directory(data).unwrap();
    engine
}

fn record<'a>(records: &'a [FileRecord], name: &str) -> &'a FileRecord {
    records
        .iter()
        .find(|r| r.path.file_name().unwrap() == name)
        .unwrap()
}

#[derive(Default)]
struct Recorder {
    completed: Mutex<Vec<FileRecord>>,
    hash_progress: Mutex<Vec<(usize, usize)>>,
    discovered: Mutex<usize>,
}

impl ScanObserver for Recorder {
    fn on_files_discovered(&self, count: usize) {
        *self.discovered.lock().unwrap() = count;
    }

    fn on_hash_progress(&self, done: usize, total: usize, _eta: Option<Duration>) {
        self.hash_progress.lock().unwrap().push((done, total));
    }

    fn on_scan_completed(&self, files: &[FileRecord]) {
        self.completed.lock().unwrap().extend_from_slice(files);
    }
}

#[test]
fn test_end_to_end_three_files() {
    let tmp = tempdir().unwrap();
    let data = tmp.path().join("A");
    write(&data.join("f1"), "foo");
    write(&data.join("f2"), "foo");
    write(&data.join("f3"), "bar");

    let engine = engine_for(&tmp, &data);
    engine.scan_and_hash(&SilentObserver).unwrap();

    let records = engine.get_all_files().unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(
        record(&records, "f1").fingerprint,
        record(&records, "f2").fingerprint
    );
    assert_ne!(
        record(&records, "f1").fingerprint,
        record(&records, "f3").fingerprint
    );

    let groups = engine.find_duplicates(&SilentObserver).unwrap();
    assert_eq!(groups.len(), 1);
    let names: Vec<_> = groups[0]
        .files
        .iter()
        .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["f1", "f2"]);

    let records = engine.get_all_files().unwrap();
    let f1 = record(&records, "f1");
    assert!(f1.confirm_hash.is_some());
    assert_eq!(f1.confirm_hash, record(&records, "f2").confirm_hash);
    // Unique files never pay for the strong hash
    assert!(record(&records, "f3").confirm_hash.is_none());
}

#[test]
fn test_rescan_unchanged_tree_is_idempotent() {
    let tmp = tempdir().unwrap();
    let data = tmp.path().join("data");
    write(&data.join("a.txt"), "same");
    write(&data.join("sub/b.txt"), "same");
    write(&data.join("sub/deeper/c.txt"), "other");

    let engine = engine_for(&tmp, &data);
    let snapshot = |engine: &Engine| {
        engine.scan_and_hash(&SilentObserver).unwrap();
        engine.find_duplicates(&SilentObserver).unwrap();
        let mut records: Vec<_> = engine
            .get_all_files()
            .unwrap()
            .into_iter()
            .map(|r| (r.path, r.fingerprint, r.confirm_hash))
            .collect();
        records.sort();
        records
    };

    let first = snapshot(&engine);
    let second = snapshot(&engine);
    assert_eq!(first.len(), 3);
    assert_eq!(first, second);
}

#[test]
fn test_scan_reports_progress_and_completion() {
    let tmp = tempdir().unwrap();
    let data = tmp.path().join("data");
    for i in 0..12 {
        write(&data.join(format!("dir{}/file{i}.txt", i % 3)), &format!("content {i}"));
    }

    let engine = engine_for(&tmp, &data);
    let recorder = Recorder::default();
    let report = engine.scan_and_hash(&recorder).unwrap();

    assert_eq!(report.discovered, 12);
    assert_eq!(report.folders, 3);
    assert_eq!(*recorder.discovered.lock().unwrap(), 12);
    assert_eq!(recorder.completed.lock().unwrap().len(), 12);
    assert_eq!(
        recorder.hash_progress.lock().unwrap().last(),
        Some(&(12, 12))
    );
}

#[test]
fn test_scan_empty_directory() {
    let tmp = tempdir().unwrap();
    let data = tmp.path().join("empty");
    fs::create_dir(&data).unwrap();

    let engine = engine_for(&tmp, &data);
    let report = engine.scan_and_hash(&SilentObserver).unwrap();
    assert_eq!(report.discovered, 0);
    assert_eq!(report.stats.total_files, 0);
    assert!(engine.find_duplicates(&SilentObserver).unwrap().is_empty());
}

#[test]
fn test_stats_after_scan() {
    let tmp = tempdir().unwrap();
    let data = tmp.path().join("data");
    write(&data.join("a"), "12345");
    write(&data.join("b"), "12345");
    write(&data.join("c"), "123");

    let engine = engine_for(&tmp, &data);
    let report = engine.scan_and_hash(&SilentObserver).unwrap();
    assert_eq!(report.stats.total_files, 3);
    assert_eq!(report.stats.total_size, 13);
    assert_eq!(report.stats.duplicate_groups, 1);
    assert!(report.stats.last_scan.is_some());

    let groups = engine.find_duplicates(&SilentObserver).unwrap();
    assert_eq!(groups[0].wasted_bytes(), 5);
    assert_eq!(engine.stats().unwrap(), engine.store().get_stats().unwrap());
}

#[test]
fn test_full_scan_forgets_deleted_files() {
    let tmp = tempdir().unwrap();
    let data = tmp.path().join("data");
    write(&data.join("keep.txt"), "keep");
    write(&data.join("gone.txt"), "gone");

    let engine = engine_for(&tmp, &data);
    engine.scan_and_hash(&SilentObserver).unwrap();
    fs::remove_file(data.join("gone.txt")).unwrap();

    let report = engine.scan_and_hash(&SilentObserver).unwrap();
    assert_eq!(report.missing, 0);
    let records = engine.get_all_files().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].path.file_name().unwrap(), "keep.txt");
}

#[test]
fn test_scan_events_through_channel() {
    use dedup::progress::EngineEvent;

    let tmp = tempdir().unwrap();
    let data = tmp.path().join("data");
    write(&data.join("a.txt"), "same");
    write(&data.join("b.txt"), "same");

    let config = EngineConfig {
        event_buffer: 4096,
        ..Default::default()
    };
    let mut engine = Engine::create(&tmp.path().join("ws.dedup"), config).unwrap();
    engine.add_directory(&data).unwrap();

    let (events, rx) = engine.event_channel();
    let consumer = std::thread::spawn(move || rx.iter().collect::<Vec<_>>());
    engine.scan_and_hash(&events).unwrap();
    assert_eq!(events.dropped(), 0);
    drop(events);

    let received = consumer.join().unwrap();
    assert!(received
        .iter()
        .any(|e| matches!(e, EngineEvent::FilesDiscovered(n) if *n >= 1)));
    assert!(received
        .iter()
        .any(|e| matches!(e, EngineEvent::HashProgress { done: 2, total: 2, .. })));
    let completed = received.iter().find_map(|e| match e {
        EngineEvent::ScanCompleted(files) => Some(files.len()),
        _ => None,
    });
    assert_eq!(completed, Some(2));
}
