//! SQLite-backed content index.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use super::{
    path_key, ContentIndex, FileRecord, IndexCounts, IndexError, IndexResult, IndexSettings,
};
use crate::scanner::{Algorithm, Digest};

/// Schema version stored in `PRAGMA user_version`.
const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS files (
    path TEXT PRIMARY KEY NOT NULL,
    prefix_digest TEXT,
    full_digest TEXT
);
CREATE INDEX IF NOT EXISTS idx_files_prefix_digest ON files (prefix_digest);
CREATE INDEX IF NOT EXISTS idx_files_full_digest ON files (full_digest);
CREATE TABLE IF NOT EXISTS index_meta (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
";

const PREFIX_COLLISIONS: &str = "
SELECT path, prefix_digest, full_digest FROM files
WHERE prefix_digest IN (
    SELECT prefix_digest FROM files
    WHERE prefix_digest IS NOT NULL
    GROUP BY prefix_digest
    HAVING COUNT(*) > 1
)
ORDER BY prefix_digest, path
";

const FULL_DIGEST_COLLISIONS: &str = "
SELECT path, prefix_digest, full_digest FROM files
WHERE full_digest IN (
    SELECT full_digest FROM files
    WHERE full_digest IS NOT NULL
    GROUP BY full_digest
    HAVING COUNT(*) > 1
)
ORDER BY full_digest, path
";

/// A row as stored, before validation.
type RawRow = (String, Option<String>, Option<String>);

/// Content index stored in a single SQLite database file.
pub struct SqliteIndex {
    conn: Connection,
    location: PathBuf,
}

impl std::fmt::Debug for SqliteIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteIndex")
            .field("location", &self.location)
            .finish()
    }
}

impl SqliteIndex {
    /// Initialize an index at `path`, creating the file if needed.
    ///
    /// Idempotent: an index already initialized with the same settings is
    /// simply opened.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::SettingsMismatch`] if the existing index was
    /// initialized with different settings.
    pub fn create(path: &Path, settings: IndexSettings) -> IndexResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| IndexError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let index = Self::from_connection(Connection::open(path)?, path.to_path_buf())?;
        index.initialize(settings)?;
        Ok(index)
    }

    /// Open an initialized index.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotInitialized`] if the file is missing or has
    /// no schema.
    pub fn open(path: &Path) -> IndexResult<Self> {
        if !path.is_file() {
            return Err(IndexError::NotInitialized(path.to_path_buf()));
        }

        let index = Self::from_connection(Connection::open(path)?, path.to_path_buf())?;
        match index.schema_version()? {
            0 => Err(IndexError::NotInitialized(path.to_path_buf())),
            SCHEMA_VERSION => Ok(index),
            other => Err(IndexError::UnsupportedVersion(other)),
        }
    }

    /// Open an initialized index and check it uses `requested` settings.
    pub fn open_with_settings(path: &Path, requested: IndexSettings) -> IndexResult<Self> {
        let index = Self::open(path)?;
        index.verify_settings(requested)?;
        Ok(index)
    }

    /// Create a throwaway in-memory index.
    pub fn open_in_memory(settings: IndexSettings) -> IndexResult<Self> {
        let index = Self::from_connection(Connection::open_in_memory()?, PathBuf::from(":memory:"))?;
        index.initialize(settings)?;
        Ok(index)
    }

    fn from_connection(conn: Connection, location: PathBuf) -> IndexResult<Self> {
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        log::debug!("Opened index {} (journal mode {})", location.display(), mode);
        Ok(Self { conn, location })
    }

    /// Location of the database file.
    #[must_use]
    pub fn location(&self) -> &Path {
        &self.location
    }

    fn schema_version(&self) -> IndexResult<i64> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    fn initialize(&self, settings: IndexSettings) -> IndexResult<()> {
        match self.schema_version()? {
            0 => {}
            SCHEMA_VERSION => {
                log::info!("Index already initialized at {}", self.location.display());
                return self.verify_settings(settings);
            }
            other => return Err(IndexError::UnsupportedVersion(other)),
        }

        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(SCHEMA)?;
        tx.execute(
            "INSERT OR REPLACE INTO index_meta (key, value) VALUES ('algorithm', ?1)",
            params![settings.algorithm.as_str()],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO index_meta (key, value) VALUES ('prefix_size', ?1)",
            params![settings.prefix_size.to_string()],
        )?;
        tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        tx.commit()?;

        log::info!(
            "Initialized index at {} ({})",
            self.location.display(),
            settings
        );
        Ok(())
    }

    /// Settings this index was initialized with.
    pub fn settings(&self) -> IndexResult<IndexSettings> {
        let meta = |key: &str| -> IndexResult<String> {
            self.conn
                .query_row(
                    "SELECT value FROM index_meta WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| IndexError::InvalidRecord {
                    path: "index_meta".to_string(),
                    reason: format!("missing '{key}'"),
                })
        };

        let algorithm = meta("algorithm")?;
        let algorithm = Algorithm::parse(&algorithm).ok_or_else(|| IndexError::InvalidRecord {
            path: "index_meta".to_string(),
            reason: format!("unknown algorithm '{algorithm}'"),
        })?;
        let prefix_size = meta("prefix_size")?;
        let prefix_size = prefix_size
            .parse()
            .map_err(|_| IndexError::InvalidRecord {
                path: "index_meta".to_string(),
                reason: format!("invalid prefix size '{prefix_size}'"),
            })?;

        Ok(IndexSettings {
            algorithm,
            prefix_size,
        })
    }

    /// Fail with [`IndexError::SettingsMismatch`] unless settings match.
    pub fn verify_settings(&self, requested: IndexSettings) -> IndexResult<()> {
        let stored = self.settings()?;
        if stored == requested {
            Ok(())
        } else {
            Err(IndexError::SettingsMismatch { stored, requested })
        }
    }

    fn query_records(&self, sql: &str) -> IndexResult<Vec<FileRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<Vec<RawRow>, _>>()?;
        rows.into_iter().map(into_record).collect()
    }
}

/// Validate a stored row.
fn into_record((path, prefix, full): RawRow) -> IndexResult<FileRecord> {
    let parse = |value: Option<String>, column: &str| -> IndexResult<Option<Digest>> {
        value
            .map(|hex| {
                Digest::from_hex(&hex).ok_or_else(|| IndexError::InvalidRecord {
                    path: path.clone(),
                    reason: format!("malformed {column} '{hex}'"),
                })
            })
            .transpose()
    };

    let prefix_digest =
        parse(prefix, "prefix digest")?.ok_or_else(|| IndexError::InvalidRecord {
            path: path.clone(),
            reason: "missing prefix digest".to_string(),
        })?;
    let full_digest = parse(full, "full digest")?;

    Ok(FileRecord {
        path: PathBuf::from(path),
        prefix_digest,
        full_digest,
    })
}

impl ContentIndex for SqliteIndex {
    fn exists(&self, path: &Path) -> IndexResult<bool> {
        let key = path_key(path)?;
        Ok(self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM files WHERE path = ?1)",
            params![key],
            |row| row.get(0),
        )?)
    }

    fn insert(&self, path: &Path, prefix_digest: &Digest) -> IndexResult<()> {
        let key = path_key(path)?;
        match self.conn.execute(
            "INSERT INTO files (path, prefix_digest, full_digest) VALUES (?1, ?2, NULL)",
            params![key, prefix_digest.as_str()],
        ) {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(IndexError::DuplicateKey(path.to_path_buf()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn update_full_digest(&self, path: &Path, full_digest: &Digest) -> IndexResult<()> {
        let key = path_key(path)?;
        let changed = self.conn.execute(
            "UPDATE files SET full_digest = ?2 WHERE path = ?1",
            params![key, full_digest.as_str()],
        )?;
        if changed == 0 {
            return Err(IndexError::NotFound(path.to_path_buf()));
        }
        Ok(())
    }

    fn get(&self, path: &Path) -> IndexResult<FileRecord> {
        let key = path_key(path)?;
        let row: Option<RawRow> = self
            .conn
            .query_row(
                "SELECT path, prefix_digest, full_digest FROM files WHERE path = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        match row {
            Some(row) => into_record(row),
            None => Err(IndexError::NotFound(path.to_path_buf())),
        }
    }

    fn find_by_prefix_collision(&self) -> IndexResult<Vec<FileRecord>> {
        self.query_records(PREFIX_COLLISIONS)
    }

    fn find_by_full_digest_collision(&self) -> IndexResult<Vec<FileRecord>> {
        self.query_records(FULL_DIGEST_COLLISIONS)
    }

    fn counts(&self) -> IndexResult<IndexCounts> {
        let (records, with_full_digest): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COUNT(full_digest) FROM files",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(IndexCounts {
            records: usize::try_from(records).unwrap_or_default(),
            with_full_digest: usize::try_from(with_full_digest).unwrap_or_default(),
        })
    }
}
