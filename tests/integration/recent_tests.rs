use dedup::config::EngineConfig;
use dedup::engine::Engine;
use dedup::workspace::RecentWorkspaces;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_recent_list_orders_and_caps() {
    let tmp = tempdir().unwrap();
    let recent = RecentWorkspaces::at(tmp.path().join("state/recent.json"));

    let mut paths = Vec::new();
    for i in 0..12 {
        let ws = tmp.path().join(format!("ws{i}.dedup"));
        Engine::create(&ws, EngineConfig::default())
            .unwrap()
            .close()
            .unwrap();
        recent.add(&ws, None).unwrap();
        paths.push(ws.canonicalize().unwrap());
    }

    let list = recent.list().unwrap();
    assert_eq!(list.len(), 10);
    assert_eq!(list[0].path, paths[11]);
    assert_eq!(list[0].name, "ws11");
    assert_eq!(recent.last().unwrap(), Some(paths[11].clone()));

    // Re-adding moves an entry to the front without duplicating it
    recent.add(&paths[5], Some("Photos")).unwrap();
    let list = recent.list().unwrap();
    assert_eq!(list.len(), 10);
    assert_eq!(list[0].path, paths[5]);
    assert_eq!(list[0].name, "Photos");
}

#[test]
fn test_recent_list_prunes_deleted_workspaces() {
    let tmp = tempdir().unwrap();
    let recent = RecentWorkspaces::at(tmp.path().join("recent.json"));
    let ws = tmp.path().join("gone.dedup");
    Engine::create(&ws, EngineConfig::default())
        .unwrap()
        .close()
        .unwrap();
    recent.add(&ws, None).unwrap();

    fs::remove_file(&ws).unwrap();
    assert!(recent.list().unwrap().is_empty());
    assert_eq!(recent.last().unwrap(), None);
}

#[test]
fn test_recent_remove_and_clear() {
    let tmp = tempdir().unwrap();
    let recent = RecentWorkspaces::at(tmp.path().join("recent.json"));
    let a = tmp.path().join("a.dedup");
    let b = tmp.path().join("b.dedup");
    fs::write(&a, "").unwrap();
    fs::write(&b, "").unwrap();
    recent.add(&a, None).unwrap();
    recent.add(&b, None).unwrap();

    recent.remove(&b).unwrap();
    let list = recent.list().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].path, a.canonicalize().unwrap());

    recent.clear().unwrap();
    assert!(recent.list().unwrap().is_empty());
}
