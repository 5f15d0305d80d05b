//! Incremental pipeline: scanner → index filter → prefix hashing → index.
//!
//! A sync only hashes files the index has never seen. Unchanged files are
//! never re-read, so repeated runs over a large tree cost one directory walk
//! plus one existence check per file.
//!
//! Hashing runs on a bounded rayon pool in chunks; every chunk is written to
//! the index on the calling thread before the next one starts, so an
//! interrupted run keeps everything it finished.
//!
//! # Example
//!
//! ```no_run
//! use dupindex::index::{IndexSettings, SqliteIndex};
//! use dupindex::pipeline::{Pipeline, PipelineConfig};
//! use dupindex::scanner::{Algorithm, Hasher};
//! use std::path::Path;
//!
//! let settings = IndexSettings { algorithm: Algorithm::Blake3, prefix_size: 65536 };
//! let index = SqliteIndex::create(Path::new("files.db"), settings)?;
//!
//! let config = PipelineConfig::new(Hasher::new(settings.algorithm, settings.prefix_size))
//!     .with_io_threads(4);
//! let summary = Pipeline::new(config).sync(Path::new("/media"), r"\.mkv$", &index)?;
//! println!("{} new files indexed", summary.inserted);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::index::{ContentIndex, IndexError};
use crate::progress::{ProgressCallback, PHASE_PREFIX, PHASE_SCAN};
use crate::scanner::{Digest, HashError, HashMode, Hasher, ScanError, Scanner, ScannerConfig};

/// Files hashed between two rounds of index writes.
pub(crate) const INSERT_CHUNK: usize = 256;

/// Errors that stop a sync.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// Traversal failed (fail-fast mode) or the root is unusable.
    #[error("Scan failed: {0}")]
    Scan(#[source] ScanError),

    /// The index could not be read or written.
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// Shutdown was requested before hashing started.
    #[error("Scan interrupted by user")]
    Interrupted,
}

impl PipelineError {
    /// Whether this error was caused by a shutdown request.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted | Self::Scan(ScanError::Interrupted))
    }
}

impl From<ScanError> for PipelineError {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::Interrupted => Self::Interrupted,
            other => Self::Scan(other),
        }
    }
}

/// Pipeline configuration.
#[derive(Clone)]
pub struct PipelineConfig {
    /// Hasher used in prefix mode
    pub hasher: Hasher,
    /// Traversal options
    pub scanner: ScannerConfig,
    /// Worker threads for hashing
    pub io_threads: usize,
    /// Optional shutdown flag for graceful termination
    pub shutdown_flag: Option<Arc<AtomicBool>>,
    /// Optional progress callback
    pub progress_callback: Option<Arc<dyn ProgressCallback>>,
}

impl std::fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("hasher", &self.hasher)
            .field("scanner", &self.scanner)
            .field("io_threads", &self.io_threads)
            .field("shutdown_flag", &self.shutdown_flag)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new(Hasher::default())
    }
}

impl PipelineConfig {
    /// Configuration hashing with `hasher`, 4 threads, fail-fast traversal.
    #[must_use]
    pub fn new(hasher: Hasher) -> Self {
        Self {
            hasher,
            scanner: ScannerConfig::default(),
            io_threads: 4,
            shutdown_flag: None,
            progress_callback: None,
        }
    }

    /// Set the hashing thread count (at least 1).
    #[must_use]
    pub fn with_io_threads(mut self, threads: usize) -> Self {
        self.io_threads = threads.max(1);
        self
    }

    /// Set traversal options.
    #[must_use]
    pub fn with_scanner_config(mut self, config: ScannerConfig) -> Self {
        self.scanner = config;
        self
    }

    /// Set the shutdown flag for graceful termination.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Set the progress callback.
    #[must_use]
    pub fn with_progress_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }
}

/// Counters from one sync.
#[derive(Debug, Default)]
pub struct SyncSummary {
    /// Candidate files yielded by the scanner
    pub scanned: usize,
    /// Candidates skipped because the index already had them
    pub already_indexed: usize,
    /// New records written
    pub inserted: usize,
    /// Files that were empty when hashed
    pub empty_skipped: usize,
    /// Files that could not be hashed or keyed
    pub failed: usize,
    /// Inserts that found the path already present
    pub duplicate_key_races: usize,
    /// Bytes read for prefix digests
    pub bytes_hashed: u64,
    /// Wall time of the sync
    pub duration: Duration,
    /// Whether hashing stopped early on a shutdown request
    pub interrupted: bool,
    /// Traversal errors skipped in keep-going mode
    pub scan_errors: Vec<ScanError>,
}

impl SyncSummary {
    /// `bytes_hashed` as a human-readable string.
    #[must_use]
    pub fn bytes_hashed_display(&self) -> String {
        bytesize::ByteSize::b(self.bytes_hashed).to_string()
    }

    /// Candidates that were new to the index this run.
    #[must_use]
    pub fn new_files(&self) -> usize {
        self.scanned - self.already_indexed
    }
}

/// Orchestrates scanner, hasher and index for incremental indexing.
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a pipeline. The shutdown flag, if any, is also handed to the
    /// hasher so long reads stop between chunks.
    #[must_use]
    pub fn new(mut config: PipelineConfig) -> Self {
        if let Some(ref flag) = config.shutdown_flag {
            config.hasher = config.hasher.clone().with_shutdown_flag(Arc::clone(flag));
        }
        Self { config }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Index every file under `root` matching `pattern` that the index does
    /// not already hold.
    ///
    /// Per-file hashing failures are logged and counted. An interruption
    /// during hashing returns `Ok` with [`SyncSummary::interrupted`] set,
    /// after writing every digest computed so far.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::Scan`] for an unusable root, a bad pattern, or a
    ///   traversal error in fail-fast mode.
    /// - [`PipelineError::Index`] if the index fails for a reason other than
    ///   a duplicate key or an unusable path.
    /// - [`PipelineError::Interrupted`] if shutdown was requested during the
    ///   traversal.
    pub fn sync<I>(&self, root: &Path, pattern: &str, index: &I) -> Result<SyncSummary, PipelineError>
    where
        I: ContentIndex + ?Sized,
    {
        let start = Instant::now();
        let mut summary = SyncSummary::default();

        let mut scanner = Scanner::new(root, pattern, self.config.scanner.clone())?;
        if let Some(ref flag) = self.config.shutdown_flag {
            scanner = scanner.with_shutdown_flag(Arc::clone(flag));
        }
        if let Some(ref cb) = self.config.progress_callback {
            scanner = scanner.with_progress_callback(Arc::clone(cb));
        }

        log::info!("Scanning {}", scanner.root().display());
        self.phase_start(PHASE_SCAN, 0);
        let outcome = scanner.scan();
        self.phase_end(PHASE_SCAN);
        let outcome = outcome?;

        summary.scanned = outcome.paths.len();
        summary.scan_errors = outcome.skipped_errors;

        let pending = self.filter_new(outcome.paths, index, &mut summary)?;
        log::info!(
            "{} candidates, {} already indexed, {} to hash",
            summary.scanned,
            summary.already_indexed,
            pending.len()
        );

        if !pending.is_empty() {
            self.hash_and_insert(&pending, index, &mut summary)?;
        }

        summary.duration = start.elapsed();
        log::info!(
            "Sync finished in {:.2?}: {} inserted, {} empty, {} failed{}",
            summary.duration,
            summary.inserted,
            summary.empty_skipped,
            summary.failed,
            if summary.interrupted { " (interrupted)" } else { "" }
        );
        Ok(summary)
    }

    /// Drop candidates the index already holds.
    fn filter_new<I>(
        &self,
        paths: Vec<PathBuf>,
        index: &I,
        summary: &mut SyncSummary,
    ) -> Result<Vec<PathBuf>, PipelineError>
    where
        I: ContentIndex + ?Sized,
    {
        let mut pending = Vec::new();
        for path in paths {
            match index.exists(&path) {
                Ok(true) => {
                    log::trace!("Already indexed: {}", path.display());
                    summary.already_indexed += 1;
                }
                Ok(false) => pending.push(path),
                Err(IndexError::InvalidPath(p)) => {
                    log::warn!("Skipping path that cannot be indexed: {}", p.display());
                    summary.failed += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(pending)
    }

    /// Hash `pending` in parallel chunks and insert each chunk serially.
    fn hash_and_insert<I>(
        &self,
        pending: &[PathBuf],
        index: &I,
        summary: &mut SyncSummary,
    ) -> Result<(), PipelineError>
    where
        I: ContentIndex + ?Sized,
    {
        let pool = build_pool(self.config.io_threads);
        let counter = AtomicUsize::new(0);
        let hasher = &self.config.hasher;

        self.phase_start(PHASE_PREFIX, pending.len());

        for chunk in pending.chunks(INSERT_CHUNK) {
            let results: Vec<(&PathBuf, Result<(Digest, u64), HashError>)> =
                run_in_pool(pool.as_ref(), || {
                    chunk
                        .par_iter()
                        .map(|path| {
                            if self.config.is_shutdown_requested() {
                                return (path, Err(HashError::Interrupted(path.clone())));
                            }
                            let current = counter.fetch_add(1, Ordering::Relaxed) + 1;
                            if let Some(ref cb) = self.config.progress_callback {
                                cb.on_progress(current, &path.to_string_lossy());
                            }
                            (path, hasher.digest_with_len(path, HashMode::Prefix))
                        })
                        .collect()
                });

            for (path, result) in results {
                match result {
                    Ok((digest, len)) => {
                        summary.bytes_hashed += len;
                        if let Some(ref cb) = self.config.progress_callback {
                            cb.on_item_completed(len);
                        }
                        self.insert_one(index, path, &digest, summary)?;
                    }
                    Err(HashError::Interrupted(_)) => summary.interrupted = true,
                    Err(HashError::EmptyFile(p)) => {
                        log::debug!("Skipping empty file: {}", p.display());
                        summary.empty_skipped += 1;
                    }
                    Err(e) => {
                        log::warn!("Failed to hash {}: {}", path.display(), e);
                        summary.failed += 1;
                    }
                }
            }

            if summary.interrupted || self.config.is_shutdown_requested() {
                summary.interrupted = true;
                log::info!("Hashing interrupted by shutdown signal");
                break;
            }
        }

        self.phase_end(PHASE_PREFIX);
        Ok(())
    }

    fn insert_one<I>(
        &self,
        index: &I,
        path: &Path,
        digest: &Digest,
        summary: &mut SyncSummary,
    ) -> Result<(), PipelineError>
    where
        I: ContentIndex + ?Sized,
    {
        match index.insert(path, digest) {
            Ok(()) => {
                log::trace!("Indexed {} {}", digest, path.display());
                summary.inserted += 1;
                Ok(())
            }
            Err(IndexError::DuplicateKey(p)) => {
                log::debug!("Already inserted by another writer: {}", p.display());
                summary.duplicate_key_races += 1;
                Ok(())
            }
            Err(IndexError::InvalidPath(p)) => {
                log::warn!("Skipping path that cannot be indexed: {}", p.display());
                summary.failed += 1;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn phase_start(&self, phase: &str, total: usize) {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_phase_start(phase, total);
        }
    }

    fn phase_end(&self, phase: &str) {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_phase_end(phase);
        }
    }
}

/// A pool of `io_threads` workers, or `None` to fall back to the global pool.
pub(crate) fn build_pool(io_threads: usize) -> Option<rayon::ThreadPool> {
    match rayon::ThreadPoolBuilder::new()
        .num_threads(io_threads.max(1))
        .build()
    {
        Ok(pool) => Some(pool),
        Err(e) => {
            log::warn!(
                "Failed to create hashing pool ({e}), using global pool with {} threads",
                rayon::current_num_threads()
            );
            None
        }
    }
}

/// Run `op` inside `pool` when there is one.
pub(crate) fn run_in_pool<R, F>(pool: Option<&rayon::ThreadPool>, op: F) -> R
where
    R: Send,
    F: FnOnce() -> R + Send,
{
    match pool {
        Some(pool) => pool.install(op),
        None => op(),
    }
}
