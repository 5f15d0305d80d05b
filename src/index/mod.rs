//! Persistent content index for dupindex.
//!
//! The content index maps an absolute file path to the digests known for it:
//! the prefix digest (always present on a persisted record) and the full
//! digest (computed lazily, only for duplicate candidates).
//!
//! # Architecture
//!
//! * [`ContentIndex`]: the narrow interface the pipeline and resolver use.
//! * [`sqlite`]: the SQLite implementation, one `files` table keyed by path
//!   plus an `index_meta` table pinning the digest settings.
//!
//! Every operation is safe against an index left behind by an interrupted
//! run: records are written one at a time and a record only ever exists
//! with a prefix digest.

pub mod sqlite;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::scanner::{Algorithm, Digest};

pub use sqlite::SqliteIndex;

/// One indexed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    /// Absolute path; unique across the index
    pub path: PathBuf,
    /// Digest of the first `prefix_size` bytes
    pub prefix_digest: Digest,
    /// Digest of the whole content, once computed
    pub full_digest: Option<Digest>,
}

/// Digest settings an index was initialized with.
///
/// Prefix digests are only comparable when computed with identical settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexSettings {
    /// Digest algorithm
    pub algorithm: Algorithm,
    /// Bytes hashed in prefix mode
    pub prefix_size: u64,
}

impl fmt::Display for IndexSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} with {}-byte prefix", self.algorithm, self.prefix_size)
    }
}

/// Record counts for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexCounts {
    /// Number of records
    pub records: usize,
    /// Records whose full digest has been computed
    pub with_full_digest: usize,
}

/// Errors raised by a content index.
#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    /// A record for this path already exists.
    #[error("Path already indexed: {0}")]
    DuplicateKey(PathBuf),

    /// No record exists for this path.
    #[error("Path not in index: {0}")]
    NotFound(PathBuf),

    /// The index file is missing or has no schema.
    #[error("Index not initialized at {0} (run `dupindex init` first)")]
    NotInitialized(PathBuf),

    /// The index was created by an incompatible version.
    #[error("Unsupported index schema version {0}")]
    UnsupportedVersion(i64),

    /// The index was initialized with different digest settings.
    #[error("Index uses {stored}, but {requested} was requested")]
    SettingsMismatch {
        /// Settings stored in the index
        stored: IndexSettings,
        /// Settings the caller asked for
        requested: IndexSettings,
    },

    /// The path cannot be used as an index key.
    #[error("Path is not valid UTF-8: {0}")]
    InvalidPath(PathBuf),

    /// A stored row violates the record invariants.
    #[error("Invalid record for {path}: {reason}")]
    InvalidRecord {
        /// Stored path
        path: String,
        /// What is wrong with it
        reason: String,
    },

    /// Underlying database error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// I/O error preparing the index location.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

/// Result type for index operations.
pub type IndexResult<T> = Result<T, IndexError>;

/// Narrow interface to the persistent content index.
///
/// Implementations are single-writer; callers serialize writes.
pub trait ContentIndex {
    /// Whether a record exists for `path`, with or without a full digest.
    fn exists(&self, path: &Path) -> IndexResult<bool>;

    /// Create a record with only a prefix digest.
    ///
    /// Fails with [`IndexError::DuplicateKey`] if `path` is already indexed.
    fn insert(&self, path: &Path, prefix_digest: &Digest) -> IndexResult<()>;

    /// Set the full digest of an existing record.
    ///
    /// Fails with [`IndexError::NotFound`] if `path` is not indexed.
    fn update_full_digest(&self, path: &Path, full_digest: &Digest) -> IndexResult<()>;

    /// Fetch the record for `path`, or [`IndexError::NotFound`].
    fn get(&self, path: &Path) -> IndexResult<FileRecord>;

    /// All records whose prefix digest is shared with another record.
    ///
    /// Members of one group are contiguous in the result.
    fn find_by_prefix_collision(&self) -> IndexResult<Vec<FileRecord>>;

    /// All records whose full digest is shared with another record.
    ///
    /// Records without a full digest are excluded. Members of one group are
    /// contiguous in the result.
    fn find_by_full_digest_collision(&self) -> IndexResult<Vec<FileRecord>>;

    /// Record counts.
    fn counts(&self) -> IndexResult<IndexCounts>;
}

/// The string key stored for `path`.
pub(crate) fn path_key(path: &Path) -> IndexResult<&str> {
    path.to_str()
        .ok_or_else(|| IndexError::InvalidPath(path.to_path_buf()))
}
