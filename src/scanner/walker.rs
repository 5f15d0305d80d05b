//! Directory walker implementation using walkdir.
//!
//! # Overview
//!
//! This module provides the [`Scanner`] struct, which traverses a directory
//! tree and yields the regular, non-empty files whose *full path* matches a
//! regular expression. Directories are traversed but never yielded.
//!
//! # Error behaviour
//!
//! Traversal is sequential and fail-fast: the first traversal error
//! (permission denied, broken symlink while following links, I/O error)
//! aborts the scan. With [`ScannerConfig::keep_going`] the failing entry is
//! logged and skipped instead. Shutdown requests always abort.
//!
//! # Example
//!
//! ```no_run
//! use dupindex::scanner::{Scanner, ScannerConfig};
//! use std::path::Path;
//!
//! let scanner = Scanner::new(Path::new("."), r"\.rs$", ScannerConfig::default())?;
//! for entry in scanner.walk()? {
//!     println!("{}", entry?.display());
//! }
//! # Ok::<(), dupindex::scanner::ScanError>(())
//! ```

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use regex::Regex;
use walkdir::{DirEntry, WalkDir};

use super::ScanError;
use crate::progress::ProgressCallback;

/// Configuration for directory walking.
#[derive(Debug, Clone, Default)]
pub struct ScannerConfig {
    /// Follow symbolic links during traversal.
    /// Broken links then surface as traversal errors.
    pub follow_symlinks: bool,

    /// Skip entries that fail instead of aborting the scan.
    pub keep_going: bool,
}

impl ScannerConfig {
    /// Create a new configuration.
    #[must_use]
    pub fn new(follow_symlinks: bool, keep_going: bool) -> Self {
        Self {
            follow_symlinks,
            keep_going,
        }
    }
}

/// Result of a materialized scan.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Matching file paths, in traversal order
    pub paths: Vec<PathBuf>,
    /// Errors skipped in keep-going mode (always empty in fail-fast mode)
    pub skipped_errors: Vec<ScanError>,
}

/// Directory scanner yielding candidate file paths.
pub struct Scanner {
    /// Absolute root path to walk
    root: PathBuf,
    /// Filter applied to the full path string
    pattern: Regex,
    /// Walker configuration
    config: ScannerConfig,
    /// Optional shutdown flag for graceful termination
    shutdown_flag: Option<Arc<AtomicBool>>,
    /// Ticked once per file listed by [`Scanner::scan`]
    progress_callback: Option<Arc<dyn ProgressCallback>>,
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("root", &self.root)
            .field("pattern", &self.pattern)
            .field("config", &self.config)
            .field("shutdown_flag", &self.shutdown_flag)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl Scanner {
    /// Create a scanner for `root` filtering paths with `pattern`.
    ///
    /// The root is made absolute here and canonicalized when the walk starts,
    /// so that yielded paths can serve as index keys.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::InvalidPattern`] if `pattern` does not compile.
    pub fn new(root: &Path, pattern: &str, config: ScannerConfig) -> Result<Self, ScanError> {
        let pattern = Regex::new(pattern).map_err(|source| ScanError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        let root = std::path::absolute(root).map_err(|source| ScanError::Io {
            path: root.to_path_buf(),
            source,
        })?;

        Ok(Self {
            root,
            pattern,
            config,
            shutdown_flag: None,
            progress_callback: None,
        })
    }

    /// Set the shutdown flag for graceful termination.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Report each listed file to `callback`.
    #[must_use]
    pub fn with_progress_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// The scan root as given, made absolute.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Check the root and resolve it to its canonical form.
    ///
    /// Yielded paths are index keys, so `..` components and symlinked roots
    /// must not produce a second key for the same file.
    fn resolve_root(&self) -> Result<PathBuf, ScanError> {
        match std::fs::metadata(&self.root) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(ScanError::NotADirectory(self.root.clone())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ScanError::RootNotFound(self.root.clone()))
            }
            Err(e) => return Err(self.convert_io_error(&self.root, e)),
        }
        std::fs::canonicalize(&self.root).map_err(|e| self.convert_io_error(&self.root, e))
    }

    /// Walk the tree lazily.
    ///
    /// Each item is a matching path or a traversal error. After yielding
    /// [`ScanError::Interrupted`] the iterator ends.
    ///
    /// # Errors
    ///
    /// Fails up front if the root is missing or not a directory.
    pub fn walk(&self) -> Result<impl Iterator<Item = Result<PathBuf, ScanError>> + '_, ScanError> {
        let root = self.resolve_root()?;

        let mut entries = WalkDir::new(root)
            .follow_links(self.config.follow_symlinks)
            .sort_by_file_name()
            .into_iter();
        let mut stopped = false;

        Ok(std::iter::from_fn(move || {
            if stopped {
                return None;
            }
            loop {
                if self.is_shutdown_requested() {
                    log::debug!("Scanner: Shutdown requested, stopping iteration");
                    stopped = true;
                    return Some(Err(ScanError::Interrupted));
                }

                let entry = match entries.next()? {
                    Ok(entry) => entry,
                    Err(e) => return Some(Err(self.convert_walk_error(e))),
                };
                if let Some(result) = self.filter_entry(entry) {
                    return Some(result);
                }
            }
        }))
    }

    /// Walk the whole tree and materialize the matching paths.
    ///
    /// A file reached through several links is listed once.
    ///
    /// # Errors
    ///
    /// Returns the first traversal error unless keep-going mode is enabled.
    /// [`ScanError::Interrupted`] is returned in either mode.
    pub fn scan(&self) -> Result<ScanOutcome, ScanError> {
        let mut outcome = ScanOutcome::default();
        let mut seen = HashSet::new();

        for result in self.walk()? {
            match result {
                Ok(path) => {
                    if seen.insert(path.clone()) {
                        if let Some(ref cb) = self.progress_callback {
                            cb.on_progress(outcome.paths.len() + 1, &path.to_string_lossy());
                        }
                        outcome.paths.push(path);
                    }
                }
                Err(ScanError::Interrupted) => return Err(ScanError::Interrupted),
                Err(e) if self.config.keep_going => {
                    log::warn!("Skipping unreadable entry: {}", e);
                    outcome.skipped_errors.push(e);
                }
                Err(e) => return Err(e),
            }
        }

        log::debug!(
            "Scanner: {} matching files under {}",
            outcome.paths.len(),
            self.root.display()
        );
        Ok(outcome)
    }

    /// Decide whether an entry is yielded, skipped, or an error.
    fn filter_entry(&self, entry: DirEntry) -> Option<Result<PathBuf, ScanError>> {
        let file_type = entry.file_type();
        if file_type.is_dir() {
            return None;
        }
        if !file_type.is_file() {
            log::trace!("Skipping non-regular file: {}", entry.path().display());
            return None;
        }

        if !self.pattern.is_match(&entry.path().to_string_lossy()) {
            return None;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => return Some(Err(self.convert_walk_error(e))),
        };
        if metadata.len() == 0 {
            log::debug!("Skipping empty file: {}", entry.path().display());
            return None;
        }

        if self.config.follow_symlinks {
            // Links inside the tree can reach a file by more than one path.
            return Some(
                std::fs::canonicalize(entry.path())
                    .map_err(|e| self.convert_io_error(entry.path(), e)),
            );
        }
        Some(Ok(entry.into_path()))
    }

    fn convert_io_error(&self, path: &Path, error: io::Error) -> ScanError {
        match error.kind() {
            io::ErrorKind::PermissionDenied => ScanError::PermissionDenied(path.to_path_buf()),
            _ => ScanError::Io {
                path: path.to_path_buf(),
                source: error,
            },
        }
    }

    fn convert_walk_error(&self, error: walkdir::Error) -> ScanError {
        let path = error
            .path()
            .map_or_else(|| self.root.clone(), Path::to_path_buf);
        let message = error.to_string();
        log::warn!("Walker error for {}: {}", path.display(), message);

        match error.into_io_error() {
            Some(io_error) => self.convert_io_error(&path, io_error),
            None => ScanError::Io {
                path,
                source: io::Error::other(message),
            },
        }
    }
}
