use dedup::config::EngineConfig;
use dedup::engine::Engine;
use dedup::progress::SilentObserver;
use std::collections::HashSet;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_scan_two_non_overlapping_directories() {
    let tmp = tempdir().unwrap();
    let left = tmp.path().join("left");
    let right = tmp.path().join("right");
    fs::create_dir(&left).unwrap();
    fs::create_dir(&right).unwrap();
    fs::write(left.join("photo.jpg"), "pixels").unwrap();
    fs::write(right.join("copy.jpg"), "pixels").unwrap();
    fs::write(right.join("other.jpg"), "different").unwrap();

    let mut engine = Engine::create(&tmp.path().join("ws.dedup"), EngineConfig::default()).unwrap();
    engine.add_directory(&left).unwrap();
    engine.add_directory(&right).unwrap();

    let report = engine.scan_and_hash(&SilentObserver).unwrap();
    assert_eq!(report.roots.len(), 2);
    assert_eq!(report.discovered, 3);

    let groups = engine.find_duplicates(&SilentObserver).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].len(), 2);
}

#[test]
fn test_scan_overlapping_directories_counts_files_once() {
    let tmp = tempdir().unwrap();
    let parent = tmp.path().join("parent");
    let child = parent.join("child");
    fs::create_dir_all(&child).unwrap();
    fs::write(parent.join("a.txt"), "same").unwrap();
    fs::write(child.join("b.txt"), "same").unwrap();

    let mut engine = Engine::create(&tmp.path().join("ws.dedup"), EngineConfig::default()).unwrap();
    engine.add_directory(&child).unwrap();
    engine.add_directory(&parent).unwrap();

    let report = engine.scan_and_hash(&SilentObserver).unwrap();
    assert_eq!(report.roots, vec![parent.canonicalize().unwrap()]);
    assert_eq!(report.discovered, 2);

    let records = engine.get_all_files().unwrap();
    let paths: HashSet<_> = records.iter().map(|r| r.path.clone()).collect();
    assert_eq!(paths.len(), records.len());

    let groups = engine.find_duplicates(&SilentObserver).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].len(), 2);

    // Both configured roots are stamped, including the nested one
    let entries = engine.store().directory_entries().unwrap();
    assert!(entries.iter().all(|e| e.last_scanned.is_some()));
}

#[test]
fn test_missing_marking_is_limited_to_scanned_roots() {
    let tmp = tempdir().unwrap();
    let kept = tmp.path().join("kept");
    let dropped = tmp.path().join("dropped");
    fs::create_dir(&kept).unwrap();
    fs::create_dir(&dropped).unwrap();
    fs::write(kept.join("k"), "k").unwrap();
    fs::write(dropped.join("d"), "d").unwrap();

    let config = EngineConfig {
        skip_hashed: true,
        ..Default::default()
    };
    let mut engine = Engine::create(&tmp.path().join("ws.dedup"), config).unwrap();
    engine.add_directory(&kept).unwrap();
    engine.add_directory(&dropped).unwrap();
    engine.scan_and_hash(&SilentObserver).unwrap();

    // Records under a removed root are neither rescanned nor marked missing
    engine.remove_directory(&dropped).unwrap();
    let report = engine.scan_and_hash(&SilentObserver).unwrap();
    assert_eq!(report.missing, 0);
    assert_eq!(engine.get_all_files().unwrap().len(), 2);
}

#[test]
fn test_ignore_patterns_and_hidden_files() {
    let tmp = tempdir().unwrap();
    let data = tmp.path().join("data");
    fs::create_dir_all(data.join(".cache")).unwrap();
    fs::create_dir_all(data.join("build")).unwrap();
    fs::write(data.join("keep.txt"), "keep").unwrap();
    fs::write(data.join("scratch.tmp"), "keep").unwrap();
    fs::write(data.join(".hidden"), "keep").unwrap();
    fs::write(data.join(".cache/blob"), "keep").unwrap();
    fs::write(data.join("build/out.o"), "keep").unwrap();

    let config = EngineConfig {
        skip_hidden: true,
        ignore_patterns: vec!["*.tmp".to_string(), "build/".to_string()],
        ..Default::default()
    };
    let mut engine = Engine::create(&tmp.path().join("ws.dedup"), config).unwrap();
    engine.add_directory(&data).unwrap();

    let report = engine.scan_and_hash(&SilentObserver).unwrap();
    assert_eq!(report.discovered, 1);
    assert!(engine.find_duplicates(&SilentObserver).unwrap().is_empty());
}
