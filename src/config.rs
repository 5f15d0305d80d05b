//! Layered application configuration.
//!
//! Values are merged lowest to highest:
//!
//! 1. Built-in defaults ([`Config::default`])
//! 2. A TOML file: `--config PATH`, or `config.toml` in the platform config dir
//! 3. Environment variables prefixed with `DUPINDEX_` (`__` separates nesting)
//! 4. Command-line flags, applied by the binary after loading
//!
//! ```toml
//! index_path = "/var/lib/dupindex/files.db"
//! pattern = '\.(mkv|mp4)$'
//! hash_prefix_size = 65536
//! algorithm = "blake3"
//! io_threads = 8
//! ```

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::index::IndexSettings;
use crate::scanner::{Algorithm, Hasher, ScannerConfig, DEFAULT_PREFIX_SIZE};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "DUPINDEX_";

/// Errors loading or validating configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// An explicitly requested config file does not exist.
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    /// A provider produced a value of the wrong shape.
    #[error("Invalid configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// The configuration could not be rendered as TOML.
    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The configuration file could not be written.
    #[error("Failed to write {path}: {source}")]
    Write {
        /// Destination file
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A value is out of range.
    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Location of the content index database.
    pub index_path: PathBuf,
    /// Default scan root when `scan` is given none.
    pub scan_root: Option<PathBuf>,
    /// Regex matched against each file's full path.
    pub pattern: String,
    /// Bytes hashed for the prefix digest.
    pub hash_prefix_size: u64,
    /// Digest algorithm.
    pub algorithm: Algorithm,
    /// Worker threads for hashing.
    pub io_threads: usize,
    /// Follow symbolic links while scanning.
    pub follow_symlinks: bool,
    /// Skip and count per-file errors instead of stopping.
    pub keep_going: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            index_path: default_index_path(),
            scan_root: None,
            pattern: ".*".to_string(),
            hash_prefix_size: DEFAULT_PREFIX_SIZE,
            algorithm: Algorithm::default(),
            io_threads: 4,
            follow_symlinks: false,
            keep_going: false,
        }
    }
}

impl Config {
    /// Load defaults, the config file and the environment.
    ///
    /// A missing default config file is fine; a missing `explicit` file is not.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file is missing or malformed, or if a
    /// value fails [`Config::validate`].
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match explicit {
            Some(path) if !path.is_file() => {
                return Err(ConfigError::FileNotFound(path.to_path_buf()));
            }
            Some(path) => Some(path.to_path_buf()),
            None => default_config_path(),
        };

        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(file) = file {
            log::debug!("Reading config from {}", file.display());
            figment = figment.merge(Toml::file(file));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        Self::from_figment(&figment)
    }

    /// Extract and validate a config from an assembled figment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on extraction or validation failure.
    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        let config: Config = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges and the path pattern.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hash_prefix_size == 0 {
            return Err(ConfigError::Invalid {
                field: "hash_prefix_size",
                reason: "must be at least 1 byte".to_string(),
            });
        }
        if self.io_threads == 0 {
            return Err(ConfigError::Invalid {
                field: "io_threads",
                reason: "must be at least 1".to_string(),
            });
        }
        if let Err(e) = regex::Regex::new(&self.pattern) {
            return Err(ConfigError::Invalid {
                field: "pattern",
                reason: e.to_string(),
            });
        }
        Ok(())
    }

    /// Digest settings the index must be opened with.
    #[must_use]
    pub fn index_settings(&self) -> IndexSettings {
        IndexSettings {
            algorithm: self.algorithm,
            prefix_size: self.hash_prefix_size,
        }
    }

    /// Hasher configured from these settings.
    #[must_use]
    pub fn hasher(&self) -> Hasher {
        Hasher::new(self.algorithm, self.hash_prefix_size)
    }

    /// Scanner options.
    #[must_use]
    pub fn scanner_config(&self) -> ScannerConfig {
        ScannerConfig::new(self.follow_symlinks, self.keep_going)
    }

    /// Render as a TOML document that [`Config::load`] reads back unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Serialize`] if a value has no TOML form.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write the configuration to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = self.to_toml()?;
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        std::fs::write(path, content).map_err(write_err)
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "dupindex")
}

/// `files.db` in the platform data directory, or in the working directory
/// when no home directory can be determined.
#[must_use]
pub fn default_index_path() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().join("files.db"))
        .unwrap_or_else(|| PathBuf::from("files.db"))
}

/// Where `config.toml` lives in the platform config directory.
#[must_use]
pub fn platform_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
}

/// `config.toml` in the platform config directory, if it exists.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    platform_config_path().filter(|path| path.is_file())
}
