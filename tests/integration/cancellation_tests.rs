use dedup::config::EngineConfig;
use dedup::engine::{Engine, EngineError, EngineStatus};
use dedup::error::ErrorKind;
use dedup::progress::{ScanObserver, SilentObserver};
use dedup::signal::CancelToken;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

#[derive(Clone, Copy, PartialEq)]
enum Phase {
    Discovery,
    Hashing,
    Resolving,
}

/// Requests cancellation on the first event of the chosen phase.
struct CancelDuring {
    token: CancelToken,
    phase: Phase,
}

impl ScanObserver for CancelDuring {
    fn on_files_discovered(&self, _count: usize) {
        if self.phase == Phase::Discovery {
            self.token.cancel();
        }
    }

    fn on_hash_progress(&self, _done: usize, _total: usize, _eta: Option<Duration>) {
        if self.phase == Phase::Hashing {
            self.token.cancel();
        }
    }

    fn on_scan_progress(&self, _current: usize, _total: usize) {
        if self.phase == Phase::Resolving {
            self.token.cancel();
        }
    }
}

fn setup(files: usize) -> (TempDir, PathBuf, Engine) {
    let tmp = tempdir().unwrap();
    let data = tmp.path().join("data");
    fs::create_dir_all(&data).unwrap();
    for i in 0..files {
        let dir = data.join(format!("d{}", i % 4));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(format!("{i}.txt")), format!("{}", i % 5)).unwrap();
    }
    let config = EngineConfig {
        // Nothing is committed before the end of the run
        commit_batch_size: 100_000,
        ..Default::default()
    };
    let mut engine = Engine::create(&tmp.path().join("ws.dedup"), config).unwrap();
    engine.add_directory(&data).unwrap();
    (tmp, data, engine)
}

fn cancel_during(engine: &Engine, phase: Phase) -> CancelDuring {
    CancelDuring {
        token: engine.cancel_token(),
        phase,
    }
}

fn assert_cancelled(err: EngineError, engine: &Engine) {
    assert!(err.is_cancelled(), "unexpected error: {err}");
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(engine.status(), EngineStatus::Cancelled);
}

#[test]
fn test_cancel_during_discovery_keeps_previous_results() {
    let (_tmp, _data, engine) = setup(40);
    engine.scan_and_hash(&SilentObserver).unwrap();
    let before = engine.get_all_files().unwrap().len();
    assert_eq!(before, 40);

    let err = engine
        .scan_and_hash(&cancel_during(&engine, Phase::Discovery))
        .unwrap_err();
    assert_cancelled(err, &engine);
    assert_eq!(engine.get_all_files().unwrap().len(), before);
}

#[test]
fn test_cancel_during_hashing_commits_no_fingerprints() {
    let (_tmp, _data, engine) = setup(200);

    let err = engine
        .scan_and_hash(&cancel_during(&engine, Phase::Hashing))
        .unwrap_err();
    assert_cancelled(err, &engine);
    assert!(engine
        .get_all_files()
        .unwrap()
        .iter()
        .all(|r| r.fingerprint.is_none()));
}

#[test]
fn test_cancel_during_resolution() {
    let (_tmp, _data, engine) = setup(40);
    engine.scan_and_hash(&SilentObserver).unwrap();

    let err = engine
        .find_duplicates(&cancel_during(&engine, Phase::Resolving))
        .unwrap_err();
    assert_cancelled(err, &engine);
}

#[test]
fn test_engine_usable_after_cancel() {
    let (_tmp, _data, engine) = setup(40);
    engine
        .scan_and_hash(&cancel_during(&engine, Phase::Hashing))
        .unwrap_err();

    let report = engine.scan_and_hash(&SilentObserver).unwrap();
    assert_eq!(report.hash.hashed, 40);
    assert_eq!(engine.status(), EngineStatus::Completed);
    assert_eq!(engine.find_duplicates(&SilentObserver).unwrap().len(), 5);
}

#[test]
fn test_cancel_token_from_another_thread() {
    let (_tmp, data, engine) = setup(0);
    for i in 0..300 {
        fs::write(data.join(format!("extra{i}.bin")), vec![0u8; 64 * 1024]).unwrap();
    }
    let token = engine.cancel_token();

    std::thread::scope(|s| {
        let handle = s.spawn(|| engine.scan_and_hash(&SilentObserver));
        token.cancel();
        // Either the request lands in time or the scan had already finished
        match handle.join().unwrap() {
            Ok(_) => assert_eq!(engine.status(), EngineStatus::Completed),
            Err(err) => assert_cancelled(err, &engine),
        }
    });
}

#[test]
fn test_cancelled_full_rescan_keeps_stored_fingerprints() {
    let tmp = tempdir().unwrap();
    let data = tmp.path().join("data");
    fs::create_dir_all(&data).unwrap();
    for i in 0..200 {
        fs::write(data.join(format!("{i}.txt")), format!("{}", i % 7)).unwrap();
    }
    let config = EngineConfig {
        commit_batch_size: 1,
        ..Default::default()
    };
    let mut engine = Engine::create(&tmp.path().join("ws.dedup"), config).unwrap();
    engine.add_directory(&data).unwrap();
    engine.scan_and_hash(&SilentObserver).unwrap();
    engine.find_duplicates(&SilentObserver).unwrap();

    let sorted = |engine: &Engine| {
        let mut records = engine.get_all_files().unwrap();
        records.sort_by(|a, b| a.path.cmp(&b.path));
        records
    };
    let before = sorted(&engine);
    assert_eq!(before.len(), 200);
    assert!(before.iter().all(|r| r.fingerprint.is_some()));

    let err = engine
        .scan_and_hash(&cancel_during(&engine, Phase::Hashing))
        .unwrap_err();
    assert_cancelled(err, &engine);
    assert_eq!(sorted(&engine), before);
}
