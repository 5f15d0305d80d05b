//! Process exit codes and machine-readable error reports.

use serde::Serialize;

use crate::index::IndexError;
use crate::pipeline::PipelineError;
use crate::resolver::ResolveError;
use crate::scanner::ScanError;

/// Exit codes for the dupindex binary.
///
/// - 0: success
/// - 1: general error (bad root, index failure, fail-fast per-file error)
/// - 2: `duplicates` completed and found nothing
/// - 130: interrupted by Ctrl+C
///
/// Per-file failures skipped under keep-going never change the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Completed normally.
    Success = 0,
    /// An error stopped the command.
    GeneralError = 1,
    /// The duplicate report is empty.
    NoDuplicates = 2,
    /// Stopped by a shutdown request.
    Interrupted = 130,
}

impl ExitCode {
    /// Numeric process exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Stable machine-readable code.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "DI000",
            Self::GeneralError => "DI001",
            Self::NoDuplicates => "DI002",
            Self::Interrupted => "DI130",
        }
    }

    /// Pick the exit code for an error returned by `run_app`.
    #[must_use]
    pub fn for_error(err: &anyhow::Error) -> Self {
        if is_interrupted(err) {
            Self::Interrupted
        } else {
            Self::GeneralError
        }
    }
}

fn is_interrupted(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<PipelineError>()
            .is_some_and(PipelineError::is_interrupted)
            || cause
                .downcast_ref::<ResolveError>()
                .is_some_and(|e| matches!(e, ResolveError::Interrupted))
            || cause
                .downcast_ref::<ScanError>()
                .is_some_and(|e| matches!(e, ScanError::Interrupted))
    })
}

/// Error report written to stderr with `--json-errors`.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// Code such as "DI001"
    pub code: String,
    /// Process exit code
    pub exit_code: i32,
    /// Human-readable message including causes
    pub message: String,
    /// Whether the run was interrupted
    pub interrupted: bool,
    /// Whether the index must be created first
    pub index_missing: bool,
}

impl StructuredError {
    /// Build the report for `err` exiting with `exit_code`.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        let index_missing = err.chain().any(|cause| {
            cause
                .downcast_ref::<IndexError>()
                .is_some_and(|e| matches!(e, IndexError::NotInitialized(_)))
        });
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: format!("{err:#}"),
            interrupted: exit_code == ExitCode::Interrupted,
            index_missing,
        }
    }
}
