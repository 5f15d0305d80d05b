//! Report formatters.
//!
//! - text (this module): grouped listing and summaries for terminals
//! - [`json`]: machine-readable duplicate report
//! - [`csv`]: one row per duplicate file
//!
//! Unconfirmed reports are always labelled as approximate, whatever the format.

pub mod csv;
pub mod json;

use std::io::{self, Write};

use yansi::Paint;

use crate::index::{FileRecord, IndexCounts, IndexSettings};
use crate::pipeline::SyncSummary;
use crate::resolver::{DuplicateGroup, GroupKind, ResolveSummary};

pub use self::csv::CsvOutput;
pub use self::json::JsonOutput;

/// Line printed above every unconfirmed report.
pub const APPROXIMATE_NOTICE: &str =
    "Approximate: groups share a prefix digest only and may differ further in. Use --confirm to verify.";

/// Turn terminal colors on or off for everything written afterwards.
pub fn set_color(enabled: bool) {
    if enabled {
        yansi::enable();
    } else {
        yansi::disable();
    }
}

/// Human-readable duplicate report.
pub struct TextOutput<'a> {
    groups: &'a [DuplicateGroup],
    summary: &'a ResolveSummary,
}

impl<'a> TextOutput<'a> {
    /// Create a text report.
    #[must_use]
    pub fn new(groups: &'a [DuplicateGroup], summary: &'a ResolveSummary) -> Self {
        Self { groups, summary }
    }

    /// Write the report.
    ///
    /// # Errors
    ///
    /// Returns any error from `writer`.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        if !self.summary.confirmed_mode {
            writeln!(writer, "{}", APPROXIMATE_NOTICE.yellow())?;
            writeln!(writer)?;
        }

        for (idx, group) in self.groups.iter().enumerate() {
            let label = match group.kind {
                GroupKind::Candidate => group.kind.as_str().yellow(),
                GroupKind::Confirmed => group.kind.as_str().green(),
            };
            writeln!(
                writer,
                "{} ({}, {} files) {}",
                format!("Group {}", idx + 1).bold(),
                label,
                group.len(),
                group.digest.as_str().dim()
            )?;
            for path in group.paths() {
                writeln!(writer, "  {}", path.display())?;
            }
            writeln!(writer)?;
        }

        let files: usize = self.groups.iter().map(DuplicateGroup::len).sum();
        let what = if self.summary.confirmed_mode {
            "confirmed duplicate"
        } else {
            "candidate"
        };
        writeln!(
            writer,
            "{} {} groups, {} files",
            self.groups.len().bold(),
            what,
            files
        )?;
        if self.summary.confirmed_mode {
            writeln!(
                writer,
                "Full digests: {} computed, {} reused, {} failed",
                self.summary.full_computed, self.summary.full_reused, self.summary.failures
            )?;
        }
        Ok(())
    }
}

/// Write the outcome of a sync.
///
/// # Errors
///
/// Returns any error from `writer`.
pub fn write_sync_summary<W: Write>(writer: &mut W, summary: &SyncSummary) -> io::Result<()> {
    let status = if summary.interrupted {
        "Interrupted".yellow().bold()
    } else {
        "Done".green().bold()
    };
    writeln!(
        writer,
        "{status}: {} files matched, {} already indexed, {} inserted",
        summary.scanned, summary.already_indexed, summary.inserted
    )?;
    writeln!(
        writer,
        "  {} empty skipped, {} failed, {} concurrent inserts, {} hashed in {:.2?}",
        summary.empty_skipped,
        summary.failed,
        summary.duplicate_key_races,
        summary.bytes_hashed_display(),
        summary.duration
    )?;
    if !summary.scan_errors.is_empty() {
        writeln!(
            writer,
            "  {} unreadable entries skipped",
            summary.scan_errors.len().red()
        )?;
    }
    Ok(())
}

/// Write one index record.
///
/// # Errors
///
/// Returns any error from `writer`.
pub fn write_record<W: Write>(writer: &mut W, record: &FileRecord) -> io::Result<()> {
    writeln!(writer, "{}", record.path.display().bold())?;
    writeln!(writer, "  prefix digest: {}", record.prefix_digest)?;
    match record.full_digest {
        Some(ref digest) => writeln!(writer, "  full digest:   {digest}"),
        None => writeln!(writer, "  full digest:   {}", "not computed".dim()),
    }
}

/// Index statistics for `stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    /// Digest settings
    pub settings: IndexSettings,
    /// Record counts
    pub counts: IndexCounts,
    /// Candidate sets by prefix digest
    pub candidate_groups: usize,
    /// Records in candidate sets
    pub candidate_files: usize,
    /// Sets already confirmed by stored full digests
    pub confirmed_groups: usize,
    /// Records in confirmed sets
    pub confirmed_files: usize,
}

/// Write index statistics.
///
/// # Errors
///
/// Returns any error from `writer`.
pub fn write_stats<W: Write>(writer: &mut W, location: &str, stats: &IndexStats) -> io::Result<()> {
    writeln!(writer, "Index:            {location}")?;
    writeln!(writer, "Settings:         {}", stats.settings)?;
    writeln!(writer, "Records:          {}", stats.counts.records)?;
    writeln!(writer, "With full digest: {}", stats.counts.with_full_digest)?;
    writeln!(
        writer,
        "Candidates:       {} groups, {} files",
        stats.candidate_groups, stats.candidate_files
    )?;
    writeln!(
        writer,
        "Confirmed:        {} groups, {} files",
        stats.confirmed_groups, stats.confirmed_files
    )
}
