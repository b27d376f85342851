use dedup::config::EngineConfig;
use dedup::engine::{Engine, EngineError, EngineStatus};
use dedup::error::{ErrorKind, ExitCode};
use dedup::progress::SilentObserver;
use dedup::workspace::{StoreError, WorkspaceStore};
use rusqlite::Connection;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_open_missing_workspace_is_not_found() {
    let tmp = tempdir().unwrap();
    let err = Engine::open(&tmp.path().join("absent.dedup"), EngineConfig::default()).unwrap_err();
    assert!(matches!(err, EngineError::Store(StoreError::NotFound(_))));
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(
        ExitCode::from_error(&anyhow::Error::new(err)),
        ExitCode::WorkspaceError
    );
}

#[test]
fn test_garbage_file_is_corrupt() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("notes.dedup");
    fs::write(&path, "this is not a database, just some text that is long enough").unwrap();

    let err = Engine::open(&path, EngineConfig::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Corrupt);
}

#[test]
fn test_mismatched_schema_is_corrupt() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("other.dedup");
    {
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch("CREATE TABLE files (id INTEGER PRIMARY KEY, name TEXT);")
            .unwrap();
    }
    let err = WorkspaceStore::open(&path).unwrap_err();
    assert!(matches!(err, StoreError::Corrupt(_)));
}

#[test]
fn test_create_is_idempotent_and_keeps_data() {
    let tmp = tempdir().unwrap();
    let data = tmp.path().join("data");
    fs::create_dir(&data).unwrap();
    fs::write(data.join("one"), "1").unwrap();
    let ws = tmp.path().join("nested/dir/ws.dedup");

    let mut engine = Engine::create(&ws, EngineConfig::default()).unwrap();
    engine.add_directory(&data).unwrap();
    engine.scan_and_hash(&SilentObserver).unwrap();
    engine.close().unwrap();

    let engine = Engine::create(&ws, EngineConfig::default()).unwrap();
    assert_eq!(engine.directories(), &[data.canonicalize().unwrap()]);
    assert_eq!(engine.get_all_files().unwrap().len(), 1);
    assert_eq!(engine.stats().unwrap().total_files, 1);
    assert_eq!(engine.stats().unwrap().workspace_name, "ws");
}

#[test]
fn test_stats_default_before_first_scan() {
    let tmp = tempdir().unwrap();
    let engine = Engine::create(&tmp.path().join("fresh.dedup"), EngineConfig::default()).unwrap();
    let stats = engine.stats().unwrap();
    assert_eq!(stats.total_files, 0);
    assert_eq!(stats.total_size, 0);
    assert_eq!(stats.duplicate_groups, 0);
    assert!(stats.last_scan.is_none());
}

#[test]
fn test_scan_without_roots_is_invalid_state() {
    let tmp = tempdir().unwrap();
    let engine = Engine::create(&tmp.path().join("ws.dedup"), EngineConfig::default()).unwrap();

    let err = engine.scan_and_hash(&SilentObserver).unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(engine.status(), EngineStatus::Idle);
}

#[test]
fn test_directory_management_persists() {
    let tmp = tempdir().unwrap();
    let first = tmp.path().join("first");
    let second = tmp.path().join("second");
    fs::create_dir(&first).unwrap();
    fs::create_dir(&second).unwrap();
    let ws = tmp.path().join("ws.dedup");

    let mut engine = Engine::create(&ws, EngineConfig::default()).unwrap();
    assert!(engine.add_directory(&first).unwrap());
    assert!(engine.add_directory(&second).unwrap());
    assert!(!engine.add_directory(&first).unwrap());
    assert!(matches!(
        engine.add_directory(&tmp.path().join("missing")),
        Err(EngineError::DirectoryNotFound(_))
    ));
    assert!(engine.remove_directory(&first).unwrap());
    engine.close().unwrap();

    let engine = Engine::open(&ws, EngineConfig::default()).unwrap();
    assert_eq!(engine.directories(), &[second.canonicalize().unwrap()]);
}

#[test]
fn test_scan_stamps_directories() {
    let tmp = tempdir().unwrap();
    let data = tmp.path().join("data");
    fs::create_dir(&data).unwrap();

    let mut engine = Engine::create(&tmp.path().join("ws.dedup"), EngineConfig::default()).unwrap();
    engine.add_directory(&data).unwrap();
    assert!(engine.store().directory_entries().unwrap()[0]
        .last_scanned
        .is_none());

    engine.scan_and_hash(&SilentObserver).unwrap();
    let entries = engine.store().directory_entries().unwrap();
    assert!(entries[0].last_scanned.is_some());
    assert!(entries[0].added_at.is_some());
}

#[test]
fn test_legacy_workspace_opens_with_roots_and_fingerprints() {
    let tmp = tempdir().unwrap();
    let data = tmp.path().join("data");
    fs::create_dir(&data).unwrap();
    let ws = tmp.path().join("legacy.dedup");
    let root = data.canonicalize().unwrap();
    {
        let conn = Connection::open(&ws).unwrap();
        conn.execute_batch(
            "CREATE TABLE files (
                id INTEGER PRIMARY KEY,
                path TEXT UNIQUE NOT NULL,
                size INTEGER NOT NULL,
                modified INTEGER NOT NULL,
                xxhash TEXT,
                md5 TEXT,
                status TEXT,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE workspace_config (key TEXT PRIMARY KEY, value TEXT);",
        )
        .unwrap();
        conn.execute(
            "INSERT INTO files (path, size, modified, xxhash, md5) VALUES (?1, 3, 10, 'abc', 'old')",
            [root.join("f").to_string_lossy().into_owned()],
        )
        .unwrap();
        let blob = serde_json::to_string(&[root.to_string_lossy()]).unwrap();
        conn.execute(
            "INSERT INTO workspace_config (key, value) VALUES ('directories', ?1)",
            [blob],
        )
        .unwrap();
    }

    let engine = Engine::open(&ws, EngineConfig::default()).unwrap();
    assert_eq!(engine.directories(), &[root.clone()]);
    let records = engine.get_all_files().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].fingerprint.as_deref(), Some("abc"));
    assert!(records[0].confirm_hash.is_none());
}
