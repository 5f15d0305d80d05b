use dupindex::index::{ContentIndex, IndexError, IndexSettings, SqliteIndex};
use dupindex::scanner::{Algorithm, Digest};
use std::path::Path;
use tempfile::TempDir;

fn settings() -> IndexSettings {
    IndexSettings {
        algorithm: Algorithm::Blake3,
        prefix_size: 65536,
    }
}

fn digest(data: &[u8]) -> Digest {
    Digest::of_bytes(Algorithm::Blake3, data)
}

#[test]
fn test_records_persist_across_connections() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("nested").join("files.db");

    {
        let index = SqliteIndex::create(&db, settings()).unwrap();
        index.insert(Path::new("/m/a"), &digest(b"a")).unwrap();
        index.insert(Path::new("/m/b"), &digest(b"a")).unwrap();
        index
            .update_full_digest(Path::new("/m/a"), &digest(b"full"))
            .unwrap();
    }

    let index = SqliteIndex::open(&db).unwrap();
    assert_eq!(index.settings().unwrap(), settings());
    let record = index.get(Path::new("/m/a")).unwrap();
    assert_eq!(record.prefix_digest, digest(b"a"));
    assert_eq!(record.full_digest, Some(digest(b"full")));
    assert_eq!(index.find_by_prefix_collision().unwrap().len(), 2);
}

#[test]
fn test_init_is_idempotent_and_keeps_records() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("files.db");

    let index = SqliteIndex::create(&db, settings()).unwrap();
    index.insert(Path::new("/x"), &digest(b"x")).unwrap();
    drop(index);

    let index = SqliteIndex::create(&db, settings()).unwrap();
    assert_eq!(index.counts().unwrap().records, 1);
}

#[test]
fn test_settings_are_pinned() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("files.db");
    SqliteIndex::create(&db, settings()).unwrap();

    let other = IndexSettings {
        algorithm: Algorithm::Sha256,
        prefix_size: 2048,
    };
    assert!(matches!(
        SqliteIndex::create(&db, other),
        Err(IndexError::SettingsMismatch { .. })
    ));
    match SqliteIndex::open_with_settings(&db, other) {
        Err(IndexError::SettingsMismatch { stored, requested }) => {
            assert_eq!(stored, settings());
            assert_eq!(requested, other);
        }
        other => panic!("Expected SettingsMismatch, got {other:?}"),
    }
}

#[test]
fn test_missing_index_is_not_initialized() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("absent.db");
    assert!(matches!(
        SqliteIndex::open(&db),
        Err(IndexError::NotInitialized(_))
    ));
    assert!(!db.exists());
}

#[test]
fn test_contract_errors() {
    let index = SqliteIndex::open_in_memory(settings()).unwrap();
    let path = Path::new("/only/once");

    assert!(!index.exists(path).unwrap());
    assert!(matches!(index.get(path), Err(IndexError::NotFound(_))));
    assert!(matches!(
        index.update_full_digest(path, &digest(b"f")),
        Err(IndexError::NotFound(_))
    ));

    index.insert(path, &digest(b"p")).unwrap();
    assert!(index.exists(path).unwrap());
    assert!(matches!(
        index.insert(path, &digest(b"q")),
        Err(IndexError::DuplicateKey(_))
    ));
    // The failed insert left the original digest in place.
    assert_eq!(index.get(path).unwrap().prefix_digest, digest(b"p"));
}

#[test]
fn test_collision_groups_are_contiguous() {
    let index = SqliteIndex::open_in_memory(settings()).unwrap();
    for (i, key) in [b"a", b"b", b"a", b"c", b"b", b"a"].iter().enumerate() {
        index
            .insert(Path::new(&format!("/f/{i}")), &digest(*key))
            .unwrap();
    }

    let records = index.find_by_prefix_collision().unwrap();
    assert_eq!(records.len(), 5);

    let mut seen = Vec::new();
    for record in &records {
        if seen.last() != Some(&record.prefix_digest) {
            assert!(!seen.contains(&record.prefix_digest), "group split in output");
            seen.push(record.prefix_digest.clone());
        }
    }
    assert_eq!(seen.len(), 2);
}
