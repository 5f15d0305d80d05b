use dupindex::index::{ContentIndex, IndexSettings, SqliteIndex};
use dupindex::pipeline::{Pipeline, PipelineConfig, PipelineError};
use dupindex::resolver::{DuplicateResolver, ResolverConfig};
use dupindex::scanner::{Algorithm, Hasher, ScanError, ScannerConfig, DEFAULT_PREFIX_SIZE};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn settings() -> IndexSettings {
    IndexSettings {
        algorithm: Algorithm::Blake3,
        prefix_size: DEFAULT_PREFIX_SIZE,
    }
}

fn pipeline() -> Pipeline {
    Pipeline::new(
        PipelineConfig::new(Hasher::new(Algorithm::Blake3, DEFAULT_PREFIX_SIZE)).with_io_threads(2),
    )
}

fn resolver() -> DuplicateResolver {
    DuplicateResolver::new(ResolverConfig::new(Hasher::new(
        Algorithm::Blake3,
        DEFAULT_PREFIX_SIZE,
    )))
}

fn group_sets(index: &SqliteIndex, confirm: bool) -> BTreeSet<BTreeSet<PathBuf>> {
    let (groups, _) = resolver().find_duplicates(index, confirm).unwrap();
    groups
        .iter()
        .map(|g| g.paths().cloned().collect())
        .collect()
}

/// Index keys are canonical, so expected paths are built from the canonical root.
fn root(dir: &TempDir) -> PathBuf {
    fs::canonicalize(dir.path()).unwrap()
}

fn set(paths: &[&Path]) -> BTreeSet<PathBuf> {
    paths.iter().map(|p| p.to_path_buf()).collect()
}

#[test]
fn test_scenario_hello_world() {
    let dir = TempDir::new().unwrap();
    let a = root(&dir).join("a");
    let b = root(&dir).join("b");
    let c = root(&dir).join("c");
    fs::write(&a, "hello").unwrap();
    fs::write(&b, "hello").unwrap();
    fs::write(&c, "world").unwrap();

    let index = SqliteIndex::open_in_memory(settings()).unwrap();
    let summary = pipeline().sync(dir.path(), ".*", &index).unwrap();
    assert_eq!(summary.inserted, 3);

    let groups = group_sets(&index, true);
    assert_eq!(groups, BTreeSet::from([set(&[&a, &b])]));
    assert!(!groups.iter().any(|g| g.contains(&c)));
}

#[test]
fn test_scenario_shared_prefix_different_tail() {
    let dir = TempDir::new().unwrap();
    let mut content = vec![7u8; 80_000];
    let a = root(&dir).join("a");
    fs::write(&a, &content).unwrap();
    content[70_000] = 8;
    let b = root(&dir).join("b");
    fs::write(&b, &content).unwrap();

    let index = SqliteIndex::open_in_memory(settings()).unwrap();
    pipeline().sync(dir.path(), ".*", &index).unwrap();

    assert_eq!(group_sets(&index, false), BTreeSet::from([set(&[&a, &b])]));
    assert!(group_sets(&index, true).is_empty());
}

#[test]
fn test_scenario_incremental_rescan() {
    let dir = TempDir::new().unwrap();
    let a = root(&dir).join("a");
    let b = root(&dir).join("b");
    fs::write(&a, "hello").unwrap();
    fs::write(&b, "hello").unwrap();

    let index = SqliteIndex::open_in_memory(settings()).unwrap();
    pipeline().sync(dir.path(), ".*", &index).unwrap();
    resolver().find_duplicates(&index, true).unwrap();
    let a_before = index.get(&a).unwrap();
    let b_before = index.get(&b).unwrap();

    let d = root(&dir).join("d");
    fs::write(&d, "hello").unwrap();
    let summary = pipeline().sync(dir.path(), ".*", &index).unwrap();

    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.already_indexed, 2);
    assert_eq!(index.get(&a).unwrap(), a_before);
    assert_eq!(index.get(&b).unwrap(), b_before);
    assert_eq!(group_sets(&index, true), BTreeSet::from([set(&[&a, &b, &d])]));
}

#[test]
fn test_sync_is_idempotent() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(root(&dir).join("sub")).unwrap();
    for (name, content) in [("x", "1"), ("y", "22"), ("sub/z", "1"), ("sub/w", "333")] {
        fs::write(root(&dir).join(name), content).unwrap();
    }

    let index = SqliteIndex::open_in_memory(settings()).unwrap();
    pipeline().sync(dir.path(), ".*", &index).unwrap();
    let first: Vec<_> = ["x", "y", "sub/z", "sub/w"]
        .iter()
        .map(|n| index.get(&root(&dir).join(n)).unwrap())
        .collect();
    let count = index.counts().unwrap();

    let summary = pipeline().sync(dir.path(), ".*", &index).unwrap();
    assert_eq!(summary.inserted, 0);
    assert_eq!(index.counts().unwrap(), count);
    for record in first {
        assert_eq!(index.get(&record.path).unwrap(), record);
    }
}

#[test]
fn test_empty_files_never_indexed() {
    let dir = TempDir::new().unwrap();
    let empty1 = root(&dir).join("empty1");
    let empty2 = root(&dir).join("empty2");
    fs::write(&empty1, "").unwrap();
    fs::write(&empty2, "").unwrap();
    fs::write(root(&dir).join("full"), "content").unwrap();

    let index = SqliteIndex::open_in_memory(settings()).unwrap();
    pipeline().sync(dir.path(), ".*", &index).unwrap();

    assert_eq!(index.counts().unwrap().records, 1);
    assert!(!index.exists(&empty1).unwrap());
    assert!(!index.exists(&empty2).unwrap());
    assert!(group_sets(&index, false).is_empty());
}

#[test]
fn test_pattern_matches_full_path() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(root(&dir).join("videos")).unwrap();
    fs::create_dir(root(&dir).join("docs")).unwrap();
    fs::write(root(&dir).join("videos/one.bin"), "v1").unwrap();
    fs::write(root(&dir).join("docs/two.bin"), "d1").unwrap();

    let index = SqliteIndex::open_in_memory(settings()).unwrap();
    let summary = pipeline().sync(dir.path(), "/videos/", &index).unwrap();

    assert_eq!(summary.inserted, 1);
    assert!(index.exists(&root(&dir).join("videos/one.bin")).unwrap());
}

#[test]
fn test_root_errors() {
    let dir = TempDir::new().unwrap();
    let file = root(&dir).join("file");
    fs::write(&file, "x").unwrap();
    let index = SqliteIndex::open_in_memory(settings()).unwrap();

    let err = pipeline().sync(&file, ".*", &index).unwrap_err();
    assert!(matches!(err, PipelineError::Scan(ScanError::NotADirectory(_))));

    let err = pipeline().sync(dir.path(), "([", &index).unwrap_err();
    assert!(matches!(err, PipelineError::Scan(ScanError::InvalidPattern { .. })));
}

#[cfg(unix)]
#[test]
fn test_traversal_error_fail_fast_and_keep_going() {
    let dir = TempDir::new().unwrap();
    fs::write(root(&dir).join("ok"), "data").unwrap();
    std::os::unix::fs::symlink(root(&dir).join("missing"), root(&dir).join("dangling")).unwrap();

    let follow = ScannerConfig::new(true, false);
    let index = SqliteIndex::open_in_memory(settings()).unwrap();
    let strict = Pipeline::new(PipelineConfig::default().with_scanner_config(follow));
    assert!(matches!(
        strict.sync(dir.path(), ".*", &index),
        Err(PipelineError::Scan(_))
    ));
    assert_eq!(index.counts().unwrap().records, 0);

    let lenient = Pipeline::new(
        PipelineConfig::default().with_scanner_config(ScannerConfig::new(true, true)),
    );
    let summary = lenient.sync(dir.path(), ".*", &index).unwrap();
    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.scan_errors.len(), 1);
}

#[test]
fn test_persistent_index_survives_reopen() {
    let data = TempDir::new().unwrap();
    fs::write(data.path().join("a"), "hello").unwrap();
    fs::write(data.path().join("b"), "hello").unwrap();

    let db_dir = TempDir::new().unwrap();
    let db = db_dir.path().join("files.db");
    {
        let index = SqliteIndex::create(&db, settings()).unwrap();
        pipeline().sync(data.path(), ".*", &index).unwrap();
    }

    let index = SqliteIndex::open_with_settings(&db, settings()).unwrap();
    let summary = pipeline().sync(data.path(), ".*", &index).unwrap();
    assert_eq!(summary.already_indexed, 2);
    assert_eq!(summary.inserted, 0);
    assert_eq!(group_sets(&index, true).len(), 1);
}

#[test]
fn test_aliased_root_does_not_duplicate_records() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(root(&dir).join("data")).unwrap();
    fs::create_dir_all(root(&dir).join("other")).unwrap();
    let only = root(&dir).join("data/only.bin");
    fs::write(&only, "single copy").unwrap();

    let index = SqliteIndex::open_in_memory(settings()).unwrap();
    pipeline().sync(&dir.path().join("data"), ".*", &index).unwrap();
    let summary = pipeline()
        .sync(&dir.path().join("other/../data"), ".*", &index)
        .unwrap();

    assert_eq!(summary.already_indexed, 1);
    assert_eq!(index.counts().unwrap().records, 1);
    assert!(index.exists(&only).unwrap());
    assert!(group_sets(&index, true).is_empty());
}

#[cfg(unix)]
#[test]
fn test_symlinked_root_shares_keys_with_target() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(root(&dir).join("data")).unwrap();
    fs::write(root(&dir).join("data/a"), "hello").unwrap();
    fs::write(root(&dir).join("data/b"), "hello").unwrap();
    std::os::unix::fs::symlink(root(&dir).join("data"), root(&dir).join("link")).unwrap();

    let index = SqliteIndex::open_in_memory(settings()).unwrap();
    pipeline().sync(&root(&dir).join("data"), ".*", &index).unwrap();
    pipeline().sync(&root(&dir).join("link"), ".*", &index).unwrap();

    assert_eq!(index.counts().unwrap().records, 2);
    let a = root(&dir).join("data/a");
    let b = root(&dir).join("data/b");
    assert_eq!(group_sets(&index, true), BTreeSet::from([set(&[&a, &b])]));
}
