//! JSON duplicate report.
//!
//! # Output Schema
//!
//! ```json
//! {
//!   "approximate": false,
//!   "groups": [
//!     {
//!       "kind": "confirmed",
//!       "digest": "d74981efa70a0c88...",
//!       "files": ["/media/a.mkv", "/media/copy/a.mkv"]
//!     }
//!   ],
//!   "summary": {
//!     "confirmed_mode": true,
//!     "candidate_groups": 3,
//!     "candidate_files": 7,
//!     "full_computed": 5,
//!     "full_reused": 2,
//!     "failures": 0,
//!     "confirmed_groups": 1,
//!     "confirmed_files": 2,
//!     "bytes_hashed": 1048576,
//!     "duration": 0.42
//!   },
//!   "exit_code": 0,
//!   "exit_code_name": "DI000"
//! }
//! ```

use std::io::Write;

use serde::Serialize;

use crate::error::ExitCode;
use crate::resolver::{DuplicateGroup, GroupKind, ResolveSummary};

/// One group in the JSON report.
#[derive(Debug, Clone, Serialize)]
pub struct JsonGroup {
    /// `candidate` or `confirmed`
    pub kind: GroupKind,
    /// Shared digest (hex)
    pub digest: String,
    /// Member paths
    pub files: Vec<String>,
}

impl From<&DuplicateGroup> for JsonGroup {
    fn from(group: &DuplicateGroup) -> Self {
        Self {
            kind: group.kind,
            digest: group.digest.as_str().to_string(),
            files: group
                .paths()
                .map(|p| p.to_string_lossy().into_owned())
                .collect(),
        }
    }
}

/// Complete JSON report.
#[derive(Debug, Clone, Serialize)]
pub struct JsonOutput {
    /// True when groups were not confirmed by full digests
    pub approximate: bool,
    /// Duplicate groups
    pub groups: Vec<JsonGroup>,
    /// Resolution counters
    pub summary: ResolveSummary,
    /// Process exit code for this report
    pub exit_code: i32,
    /// Machine-readable exit code name
    pub exit_code_name: String,
}

impl JsonOutput {
    /// Build the report.
    ///
    /// ```
    /// use dupindex::error::ExitCode;
    /// use dupindex::output::json::JsonOutput;
    /// use dupindex::resolver::ResolveSummary;
    ///
    /// let output = JsonOutput::new(&[], &ResolveSummary::default(), ExitCode::NoDuplicates);
    /// assert!(output.approximate);
    /// assert!(output.to_json().unwrap().contains("\"DI002\""));
    /// ```
    #[must_use]
    pub fn new(groups: &[DuplicateGroup], summary: &ResolveSummary, exit_code: ExitCode) -> Self {
        Self {
            approximate: !summary.confirmed_mode,
            groups: groups.iter().map(JsonGroup::from).collect(),
            summary: summary.clone(),
            exit_code: exit_code.as_i32(),
            exit_code_name: exit_code.code_prefix().to_string(),
        }
    }

    /// Compact JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write the report followed by a newline.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write_to<W: Write>(&self, writer: &mut W, pretty: bool) -> Result<(), JsonOutputError> {
        let json = if pretty {
            self.to_json_pretty()?
        } else {
            self.to_json()?
        };
        writer.write_all(json.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(())
    }
}

/// Errors that can occur during JSON output.
#[derive(thiserror::Error, Debug)]
pub enum JsonOutputError {
    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error during writing
    #[error("I/O error writing JSON: {0}")]
    Io(#[from] std::io::Error),
}
