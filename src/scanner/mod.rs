//! Scanner module for directory traversal and file hashing.
//!
//! This module provides functionality for:
//! - Sequential directory walking with a full-path regex filter
//! - Prefix and full-content digests (BLAKE3 or SHA-256)
//!
//! # Architecture
//!
//! The scanner is divided into submodules:
//! - [`walker`]: Directory traversal and candidate discovery
//! - [`hasher`]: Streaming digests over a file prefix or the whole file
//!
//! # Example
//!
//! ```no_run
//! use dupindex::scanner::{HashMode, Hasher, Scanner, ScannerConfig};
//! use std::path::Path;
//!
//! let scanner = Scanner::new(Path::new("/media/videos"), r"\.(mkv|mp4)$", ScannerConfig::default())?;
//! let hasher = Hasher::default();
//!
//! for path in scanner.scan()?.paths {
//!     match hasher.digest(&path, HashMode::Prefix) {
//!         Ok(digest) => println!("{digest}  {}", path.display()),
//!         Err(e) => eprintln!("Warning: {e}"),
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod hasher;
pub mod walker;

use std::path::PathBuf;

// Re-export main types
pub use hasher::{Algorithm, Digest, HashMode, Hasher, DEFAULT_PREFIX_SIZE};
pub use walker::{ScanOutcome, Scanner, ScannerConfig};

/// Errors that can occur during directory scanning.
///
/// Every variant aborts a scan unless the scanner runs in keep-going mode.
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// The scan root does not exist.
    #[error("Scan root not found: {0}")]
    RootNotFound(PathBuf),

    /// The scan root is not a directory.
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// The path filter is not a valid regular expression.
    #[error("Invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        /// The rejected pattern
        pattern: String,
        /// The underlying regex error
        #[source]
        source: regex::Error,
    },

    /// Permission was denied when accessing a file or directory.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// An I/O error occurred while traversing.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Traversal stopped because shutdown was requested.
    #[error("Scan interrupted")]
    Interrupted,
}

/// Errors that can occur during file hashing.
///
/// All of these are recoverable per file: callers log them and move on.
#[derive(thiserror::Error, Debug)]
pub enum HashError {
    /// The file had no bytes to hash in prefix mode.
    #[error("File is empty: {0}")]
    EmptyFile(PathBuf),

    /// The specified file was not found.
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// Permission was denied when reading the file.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// An I/O error occurred while reading the file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Hashing stopped because shutdown was requested.
    #[error("Hashing interrupted: {0}")]
    Interrupted(PathBuf),
}

impl HashError {
    /// Classify an I/O error raised while opening or reading `path`.
    pub(crate) fn from_io(path: PathBuf, error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match error.kind() {
            ErrorKind::NotFound => Self::NotFound(path),
            ErrorKind::PermissionDenied => Self::PermissionDenied(path),
            _ => Self::Io {
                path,
                source: error,
            },
        }
    }

    /// Whether this error means the file had nothing to hash.
    #[must_use]
    pub fn is_empty_file(&self) -> bool {
        matches!(self, Self::EmptyFile(_))
    }
}
