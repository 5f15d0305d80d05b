use clap::Parser;
use dupindex::cli::Cli;
use dupindex::error::ExitCode;
use dupindex::index::{ContentIndex, IndexError, SqliteIndex};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn run(db: &Path, args: &[&str]) -> anyhow::Result<ExitCode> {
    let db = db.to_string_lossy().into_owned();
    let mut argv = vec!["dupindex", "--quiet", "--no-color", "--index", db.as_str()];
    argv.extend_from_slice(args);
    dupindex::run_app(Cli::try_parse_from(argv).unwrap())
}

fn media() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.mkv"), "hello").unwrap();
    fs::write(dir.path().join("b.mkv"), "hello").unwrap();
    fs::write(dir.path().join("c.mkv"), "world").unwrap();
    fs::write(dir.path().join("notes.txt"), "hello").unwrap();
    dir
}

#[test]
fn test_init_scan_duplicates() {
    let data = media();
    let state = TempDir::new().unwrap();
    let db = state.path().join("files.db");
    let root = data.path().to_string_lossy().into_owned();

    assert_eq!(run(&db, &["init"]).unwrap(), ExitCode::Success);
    assert_eq!(run(&db, &["init"]).unwrap(), ExitCode::Success);

    let code = run(&db, &["scan", &root, "--pattern", r"\.mkv$"]).unwrap();
    assert_eq!(code, ExitCode::Success);

    let index = SqliteIndex::open(&db).unwrap();
    assert_eq!(index.counts().unwrap().records, 3);
    assert!(!index.exists(&fs::canonicalize(data.path()).unwrap().join("notes.txt")).unwrap());

    assert_eq!(
        run(&db, &["duplicates", "--output", "json"]).unwrap(),
        ExitCode::Success
    );
    assert_eq!(
        run(&db, &["duplicates", "--confirm", "--output", "csv"]).unwrap(),
        ExitCode::Success
    );
    assert_eq!(index.counts().unwrap().with_full_digest, 2);

    assert_eq!(run(&db, &["stats"]).unwrap(), ExitCode::Success);
    let a = data.path().join("a.mkv").to_string_lossy().into_owned();
    assert_eq!(run(&db, &["show", &a]).unwrap(), ExitCode::Success);
}

#[test]
fn test_duplicates_none_found() {
    let data = TempDir::new().unwrap();
    fs::write(data.path().join("only"), "unique").unwrap();
    let state = TempDir::new().unwrap();
    let db = state.path().join("files.db");
    let root = data.path().to_string_lossy().into_owned();

    run(&db, &["init"]).unwrap();
    run(&db, &["scan", &root]).unwrap();
    assert_eq!(
        run(&db, &["duplicates", "--confirm"]).unwrap(),
        ExitCode::NoDuplicates
    );
}

#[test]
fn test_scan_without_init_fails() {
    let data = media();
    let state = TempDir::new().unwrap();
    let db = state.path().join("files.db");
    let root = data.path().to_string_lossy().into_owned();

    let err = run(&db, &["scan", &root]).unwrap_err();
    assert_eq!(ExitCode::for_error(&err), ExitCode::GeneralError);
    assert!(err
        .chain()
        .any(|c| matches!(c.downcast_ref::<IndexError>(), Some(IndexError::NotInitialized(_)))));
}

#[test]
fn test_scan_with_mismatched_settings_fails() {
    let data = media();
    let state = TempDir::new().unwrap();
    let db = state.path().join("files.db");
    let root = data.path().to_string_lossy().into_owned();

    run(&db, &["init"]).unwrap();
    let err = run(&db, &["--algorithm", "sha256", "scan", &root]).unwrap_err();
    assert!(err.chain().any(|c| matches!(
        c.downcast_ref::<IndexError>(),
        Some(IndexError::SettingsMismatch { .. })
    )));
}

#[test]
fn test_scan_missing_root_fails() {
    let state = TempDir::new().unwrap();
    let db = state.path().join("files.db");
    let missing = state.path().join("missing").to_string_lossy().into_owned();

    run(&db, &["init"]).unwrap();
    let err = run(&db, &["scan", &missing]).unwrap_err();
    assert_eq!(ExitCode::for_error(&err), ExitCode::GeneralError);
    assert!(format!("{err:#}").contains("Scan root not found"));
}

#[test]
fn test_show_unindexed_path_is_not_found() {
    let state = TempDir::new().unwrap();
    let db = state.path().join("files.db");

    run(&db, &["init"]).unwrap();
    let err = run(&db, &["show", "/not/indexed"]).unwrap_err();
    assert!(err
        .chain()
        .any(|c| matches!(c.downcast_ref::<IndexError>(), Some(IndexError::NotFound(_)))));
}

#[test]
fn test_invalid_prefix_size_rejected() {
    let state = TempDir::new().unwrap();
    let db = state.path().join("files.db");
    assert!(run(&db, &["--prefix-size", "0", "init"]).is_err());
}

#[test]
fn test_config_command_needs_no_index() {
    let state = TempDir::new().unwrap();
    let db = state.path().join("files.db");

    assert_eq!(run(&db, &["config"]).unwrap(), ExitCode::Success);
    assert!(!db.exists());
}

#[test]
fn test_show_resolves_aliased_path() {
    let data = media();
    fs::create_dir(data.path().join("sub")).unwrap();
    let state = TempDir::new().unwrap();
    let db = state.path().join("files.db");
    let root = data.path().to_string_lossy().into_owned();

    run(&db, &["init"]).unwrap();
    run(&db, &["scan", &root, "--pattern", r"\.mkv$"]).unwrap();

    let aliased = data.path().join("sub/../a.mkv").to_string_lossy().into_owned();
    assert_eq!(run(&db, &["show", &aliased]).unwrap(), ExitCode::Success);
}

#[test]
fn test_config_save_writes_loadable_file() {
    let state = TempDir::new().unwrap();
    let db = state.path().join("files.db");
    let target = state.path().join("conf").join("config.toml");
    let target_arg = target.to_string_lossy().into_owned();

    let code = run(&db, &["--prefix-size", "4KiB", "config", "--save", &target_arg]).unwrap();
    assert_eq!(code, ExitCode::Success);

    let saved = dupindex::config::Config::load(Some(&target)).unwrap();
    assert_eq!(saved.index_path, db);
    assert_eq!(saved.hash_prefix_size, 4096);
}
