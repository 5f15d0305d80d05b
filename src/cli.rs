//! Command-line interface definitions for dupindex.
//!
//! Global options control logging, color, error format and which index and
//! config file to use. Each subcommand works against one content index.
//!
//! # Example
//!
//! ```bash
//! # Create the index (idempotent)
//! dupindex init
//!
//! # Index new video files under a directory
//! dupindex scan /media/videos --pattern '\.(mkv|mp4)$'
//!
//! # Cheap, approximate report from prefix digests
//! dupindex duplicates
//!
//! # Exact report; computes full digests for candidates only
//! dupindex duplicates --confirm --output json
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::Config;
use crate::scanner::Algorithm;

/// Incremental duplicate file finder backed by a persistent content index.
///
/// Files are indexed by a digest of their first bytes. Full-content digests
/// are only computed for files whose prefix collides with another file.
#[derive(Debug, Parser)]
#[command(name = "dupindex")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors and results
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Report fatal errors as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Configuration file (default: config.toml in the platform config dir)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Content index database location
    #[arg(long, value_name = "PATH", global = true)]
    pub index: Option<PathBuf>,

    /// Digest algorithm; must match the one the index was created with
    #[arg(long, value_enum, global = true)]
    pub algorithm: Option<Algorithm>,

    /// Bytes hashed for prefix digests (e.g. 64KiB, 2048)
    #[arg(long, value_name = "SIZE", value_parser = parse_size, global = true)]
    pub prefix_size: Option<u64>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create the content index (no-op if it already exists)
    Init,
    /// Index files under a directory that are not yet indexed
    Scan(ScanArgs),
    /// Report groups of duplicate files from the index
    Duplicates(DuplicatesArgs),
    /// Show the indexed record for one file
    Show(ShowArgs),
    /// Show index statistics
    Stats,
    /// Print the effective configuration as TOML
    Config(ConfigArgs),
}

/// Arguments for `scan`.
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Directory to scan (default: `scan_root` from the config)
    #[arg(value_name = "ROOT")]
    pub root: Option<PathBuf>,

    /// Regex matched against each file's full path
    #[arg(short, long, value_name = "REGEX")]
    pub pattern: Option<String>,

    /// Number of threads hashing files (default: 4)
    #[arg(long, value_name = "N")]
    pub io_threads: Option<usize>,

    /// Follow symbolic links during the scan
    #[arg(long)]
    pub follow_symlinks: bool,

    /// Skip unreadable files and directories instead of stopping
    #[arg(short, long)]
    pub keep_going: bool,
}

/// Arguments for `duplicates`.
#[derive(Debug, Args)]
pub struct DuplicatesArgs {
    /// Confirm candidates with full-content digests
    #[arg(short, long)]
    pub confirm: bool,

    /// Number of threads computing full digests (default: 4)
    #[arg(long, value_name = "N")]
    pub io_threads: Option<usize>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Arguments for `config`.
#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Also write it to PATH (default: the `--config` file, else the
    /// platform config file)
    #[arg(long, value_name = "PATH", num_args = 0..=1)]
    pub save: Option<Option<PathBuf>>,
}

/// Arguments for `show`.
#[derive(Debug, Args)]
pub struct ShowArgs {
    /// File to look up
    #[arg(value_name = "PATH")]
    pub path: PathBuf,
}

/// Output format for duplicate reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable, colored when stdout is a terminal
    Text,
    /// JSON for scripting
    Json,
    /// CSV for spreadsheets
    Csv,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}

impl Cli {
    /// Apply command-line overrides on top of a loaded configuration.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(ref index) = self.index {
            config.index_path = index.clone();
        }
        if let Some(algorithm) = self.algorithm {
            config.algorithm = algorithm;
        }
        if let Some(prefix_size) = self.prefix_size {
            config.hash_prefix_size = prefix_size;
        }

        match self.command {
            Commands::Scan(ref args) => {
                if let Some(ref root) = args.root {
                    config.scan_root = Some(root.clone());
                }
                if let Some(ref pattern) = args.pattern {
                    config.pattern = pattern.clone();
                }
                if let Some(n) = args.io_threads {
                    config.io_threads = n;
                }
                config.follow_symlinks |= args.follow_symlinks;
                config.keep_going |= args.keep_going;
            }
            Commands::Duplicates(ref args) => {
                if let Some(n) = args.io_threads {
                    config.io_threads = n;
                }
            }
            Commands::Init | Commands::Show(_) | Commands::Stats | Commands::Config(_) => {}
        }
    }
}

/// Parse a human-readable size string into bytes.
///
/// Supports suffixes B, K/KB, KiB, M/MB, MiB, G/GB, GiB, case-insensitive.
/// Numbers without suffix are bytes.
///
/// # Examples
///
/// ```
/// use dupindex::cli::parse_size;
///
/// assert_eq!(parse_size("2048").unwrap(), 2048);
/// assert_eq!(parse_size("64KiB").unwrap(), 65_536);
/// assert_eq!(parse_size("1MB").unwrap(), 1_000_000);
/// ```
///
/// # Errors
///
/// Returns an error for an empty string, a bad number, an unknown suffix, or
/// a value that is not a whole number of bytes.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Size cannot be empty".to_string());
    }

    let (num_str, suffix) = match s.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(idx) => (&s[..idx], s[idx..].trim().to_uppercase()),
        None => (s, String::new()),
    };

    let multiplier: u64 = match suffix.as_str() {
        "" | "B" => 1,
        "K" | "KB" => 1_000,
        "KIB" => 1 << 10,
        "M" | "MB" => 1_000_000,
        "MIB" => 1 << 20,
        "G" | "GB" => 1_000_000_000,
        "GIB" => 1 << 30,
        _ => return Err(format!("Unknown size suffix: '{suffix}'")),
    };

    // Exact arithmetic: "1.5KB" is 1500 bytes, "1.5B" is not a whole size.
    let invalid = || format!("Invalid number: '{num_str}'");
    let (int_part, frac_part) = num_str.split_once('.').unwrap_or((num_str, ""));
    let malformed = (int_part.is_empty() && frac_part.is_empty())
        || frac_part.contains('.')
        || frac_part.len() > 9;
    if malformed {
        return Err(invalid());
    }
    let int: u128 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().map_err(|_| invalid())?
    };
    let frac: u128 = if frac_part.is_empty() {
        0
    } else {
        frac_part.parse().map_err(|_| invalid())?
    };
    let scale = 10u128.pow(frac_part.len() as u32);
    let frac_bytes = frac * u128::from(multiplier);
    if frac_bytes % scale != 0 {
        return Err(format!("Size must be a whole number of bytes: '{s}'"));
    }

    int.checked_mul(u128::from(multiplier))
        .map(|whole| whole + frac_bytes / scale)
        .and_then(|bytes| u64::try_from(bytes).ok())
        .ok_or_else(|| format!("Size too large: '{s}'"))
}
