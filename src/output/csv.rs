//! CSV duplicate report, one row per file.
//!
//! # Columns
//!
//! - `group_id`: 1-based group number
//! - `kind`: `candidate` or `confirmed`
//! - `digest`: digest shared by the group
//! - `path`: file path
//! - `full_digest`: the file's full digest, empty if not computed

use std::io;

use serde::Serialize;
use thiserror::Error;

use crate::resolver::DuplicateGroup;

/// Errors that can occur during CSV output generation.
#[derive(Debug, Error)]
pub enum CsvOutputError {
    /// I/O error during writing.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Error during CSV serialization.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    group_id: usize,
    kind: &'static str,
    digest: &'a str,
    path: String,
    full_digest: &'a str,
}

/// CSV output formatter.
pub struct CsvOutput<'a> {
    groups: &'a [DuplicateGroup],
}

impl<'a> CsvOutput<'a> {
    /// Create a CSV formatter over `groups`.
    #[must_use]
    pub fn new(groups: &'a [DuplicateGroup]) -> Self {
        Self { groups }
    }

    /// Write header and rows.
    ///
    /// # Errors
    ///
    /// Returns `CsvOutputError` if writing or serialization fails.
    pub fn write_to<W: io::Write>(&self, writer: W) -> Result<(), CsvOutputError> {
        let mut csv_writer = csv::Writer::from_writer(writer);

        if self.groups.is_empty() {
            csv_writer.write_record(["group_id", "kind", "digest", "path", "full_digest"])?;
        }

        for (idx, group) in self.groups.iter().enumerate() {
            for record in &group.records {
                csv_writer.serialize(CsvRow {
                    group_id: idx + 1,
                    kind: group.kind.as_str(),
                    digest: group.digest.as_str(),
                    path: record.path.to_string_lossy().into_owned(),
                    full_digest: record.full_digest.as_ref().map_or("", |d| d.as_str()),
                })?;
            }
        }

        csv_writer.flush()?;
        Ok(())
    }

    /// Render to a string.
    ///
    /// # Errors
    ///
    /// Returns `CsvOutputError` if serialization fails.
    pub fn to_string(&self) -> Result<String, CsvOutputError> {
        let mut buffer = Vec::new();
        self.write_to(&mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
