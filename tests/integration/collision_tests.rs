use dedup::config::EngineConfig;
use dedup::duplicates::{group_by_fingerprint, DuplicateResolver, ResolverConfig};
use dedup::engine::Engine;
use dedup::progress::SilentObserver;
use dedup::scanner::{FileHasher, HashError, Hasher};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

/// Fingerprints only by length, so equal-length files always collide.
struct LengthFingerprint {
    inner: Hasher,
}

impl FileHasher for LengthFingerprint {
    fn fingerprint(&self, path: &Path) -> Result<String, HashError> {
        let len = fs::metadata(path)
            .map_err(|e| HashError::from_io(path, e))?
            .len();
        Ok(format!("{len:016x}"))
    }

    fn confirm_hash(&self, path: &Path) -> Result<String, HashError> {
        self.inner.confirm_hash(path)
    }
}

#[test]
fn test_fingerprint_collision_is_excluded_from_confirmed_groups() {
    let tmp = tempdir().unwrap();
    let data = tmp.path().join("data");
    fs::create_dir(&data).unwrap();
    fs::write(data.join("a.txt"), "abcd").unwrap();
    fs::write(data.join("b.txt"), "abcd").unwrap();
    fs::write(data.join("c.txt"), "wxyz").unwrap();

    let mut engine = Engine::create(&tmp.path().join("ws.dedup"), EngineConfig::default())
        .unwrap()
        .with_hasher(Arc::new(LengthFingerprint {
            inner: Hasher::new(),
        }));
    engine.add_directory(&data).unwrap();
    engine.scan_and_hash(&SilentObserver).unwrap();

    let (potential, _) = group_by_fingerprint(engine.get_all_files().unwrap());
    assert_eq!(potential.len(), 1);
    assert_eq!(potential[0].len(), 3);

    let report = engine.resolve(&SilentObserver).unwrap();
    assert_eq!(report.potential_groups, 1);
    assert_eq!(report.excluded, 1);
    assert_eq!(report.groups.len(), 1);

    let confirmed = &report.groups[0];
    assert_eq!(confirmed.len(), 2);
    assert!(confirmed.len() <= potential[0].len());
    assert!(confirmed
        .files
        .iter()
        .all(|f| potential[0].files.iter().any(|p| p.path == f.path)));
    assert!(!confirmed
        .paths()
        .iter()
        .any(|p| p.file_name().unwrap() == "c.txt"));
}

#[test]
fn test_resolver_computes_missing_fingerprints_lazily() {
    let tmp = tempdir().unwrap();
    let store = dedup::workspace::WorkspaceStore::open_in_memory().unwrap();
    for name in ["x", "y"] {
        let path = tmp.path().join(name);
        fs::write(&path, "same bytes").unwrap();
        let entry = dedup::scanner::FileEntry::from_metadata(
            path.clone(),
            &fs::metadata(&path).unwrap(),
        );
        store
            .upsert_file(&dedup::workspace::FileRecord::discovered(&entry))
            .unwrap();
    }

    let resolver = DuplicateResolver::new(ResolverConfig::default(), Arc::new(Hasher::new()));
    let report = resolver.resolve(&store, &SilentObserver).unwrap();
    assert_eq!(report.fingerprinted, 2);
    assert_eq!(report.groups.len(), 1);
    assert!(store
        .get_all_files()
        .unwrap()
        .iter()
        .all(|r| r.fingerprint.is_some() && r.confirm_hash.is_some()));
}
