use dupindex::config::{Config, ConfigError};
use dupindex::scanner::Algorithm;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

#[test]
fn test_config_defaults() {
    let figment = Figment::from(Serialized::defaults(Config::default()));
    let config = Config::from_figment(&figment).unwrap();
    assert_eq!(config, Config::default());
    assert_eq!(config.scan_root, None);
}

#[test]
fn test_config_from_toml() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
index_path = "/srv/dupindex/files.db"
scan_root = "/media/videos"
pattern = '\.(mkv|mp4)$'
hash_prefix_size = 2048
algorithm = "sha256"
io_threads = 8
keep_going = true
"#,
    )
    .unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.index_path, PathBuf::from("/srv/dupindex/files.db"));
    assert_eq!(config.scan_root, Some(PathBuf::from("/media/videos")));
    assert_eq!(config.pattern, r"\.(mkv|mp4)$");
    assert_eq!(config.hash_prefix_size, 2048);
    assert_eq!(config.algorithm, Algorithm::Sha256);
    assert!(config.keep_going);
    assert!(!config.follow_symlinks);
}

#[test]
fn test_config_env_overrides_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "io_threads = 8\n").unwrap();

    std::env::set_var("DUPINDEX_TEST_IO_THREADS", "16");
    let figment = Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("DUPINDEX_TEST_").split("__"));
    let config = Config::from_figment(&figment).unwrap();
    std::env::remove_var("DUPINDEX_TEST_IO_THREADS");

    assert_eq!(config.io_threads, 16);
}

#[test]
fn test_config_rejects_invalid_values() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");

    fs::write(&path, "hash_prefix_size = 0\n").unwrap();
    assert!(matches!(
        Config::load(Some(&path)),
        Err(ConfigError::Invalid { field: "hash_prefix_size", .. })
    ));

    fs::write(&path, "algorithm = \"md5\"\n").unwrap();
    assert!(matches!(Config::load(Some(&path)), Err(ConfigError::Load(_))));

    fs::write(&path, "pattern = \"([\"\n").unwrap();
    assert!(matches!(
        Config::load(Some(&path)),
        Err(ConfigError::Invalid { field: "pattern", .. })
    ));
}

#[test]
fn test_config_roundtrips_through_toml() {
    let config = Config {
        io_threads: 2,
        scan_root: Some(PathBuf::from("/data")),
        ..Config::default()
    };
    let text = config.to_toml().unwrap();
    assert!(text.contains("io_threads = 2"));
    assert!(text.contains("algorithm = \"blake3\""));

    let figment = Figment::from(Serialized::defaults(Config::default())).merge(Toml::string(&text));
    assert_eq!(Config::from_figment(&figment).unwrap(), config);
}

#[test]
fn test_saved_config_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");
    let config = Config {
        pattern: r"\.iso$".to_string(),
        keep_going: true,
        ..Config::default()
    };
    config.save(&path).unwrap();

    assert_eq!(Config::load(Some(&path)).unwrap(), config);
}
