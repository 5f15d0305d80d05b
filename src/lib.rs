//! dupindex - incremental duplicate file detection
//!
//! Files are indexed by a digest of their first bytes in a persistent SQLite
//! index, so repeated scans only read files they have never seen. Full-content
//! digests are computed lazily, only for files whose prefix collides with
//! another file, and only when a confirmed report is requested.
//!
//! The library is usable on its own:
//!
//! - [`scanner`]: directory walking and prefix/full hashing
//! - [`index`]: the [`index::ContentIndex`] trait and its SQLite backend
//! - [`pipeline`]: incremental sync of a directory into an index
//! - [`resolver`]: candidate and confirmed duplicate groups

pub mod cli;
pub mod config;
pub mod error;
pub mod index;
pub mod logging;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod resolver;
pub mod scanner;
pub mod signal;

use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};

use crate::cli::{Cli, Commands, DuplicatesArgs, OutputFormat};
use crate::config::Config;
use crate::error::ExitCode;
use crate::index::{ContentIndex, SqliteIndex};
use crate::output::{CsvOutput, IndexStats, JsonOutput, TextOutput};
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::progress::{Progress, ProgressCallback};
use crate::resolver::{DuplicateResolver, ResolverConfig};
use crate::signal::ShutdownHandler;

/// Run one CLI invocation and return the exit code to use.
///
/// # Errors
///
/// Returns an error for invalid configuration, an unusable scan root or
/// index, or an interruption. Per-file failures are logged and never
/// returned.
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    logging::init_logging(cli.verbose, cli.quiet);
    output::set_color(!cli.no_color && io::stdout().is_terminal());

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply_to(&mut config);
    config.validate().context("Invalid configuration")?;
    log::debug!("Effective configuration: {config:?}");

    let shutdown = signal::install_handler().context("Failed to set up Ctrl+C handling")?;
    let progress: Arc<dyn ProgressCallback> = Arc::new(Progress::new(cli.quiet));

    let stdout = io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Commands::Init => {
            let index = SqliteIndex::create(&config.index_path, config.index_settings())
                .with_context(|| {
                    format!("Failed to initialize index at {}", config.index_path.display())
                })?;
            if !cli.quiet {
                writeln!(
                    out,
                    "Index ready at {} ({})",
                    index.location().display(),
                    config.index_settings()
                )?;
            }
            Ok(ExitCode::Success)
        }
        Commands::Scan(_) => run_scan(&config, &shutdown, progress, cli.quiet, &mut out),
        Commands::Duplicates(ref args) => run_duplicates(&config, args, &shutdown, progress, &mut out),
        Commands::Show(ref args) => {
            let index = open_index(&config.index_path)?;
            let path = index_key(&args.path)?;
            let record = index
                .get(&path)
                .with_context(|| format!("No record for {}", path.display()))?;
            output::write_record(&mut out, &record)?;
            Ok(ExitCode::Success)
        }
        Commands::Stats => {
            let index = open_index(&config.index_path)?;
            let stats = collect_stats(&index)?;
            output::write_stats(&mut out, &index.location().display().to_string(), &stats)?;
            Ok(ExitCode::Success)
        }
        Commands::Config(ref args) => {
            out.write_all(config.to_toml()?.as_bytes())?;
            if let Some(ref target) = args.save {
                let path = target
                    .clone()
                    .or_else(|| cli.config.clone())
                    .or_else(config::platform_config_path)
                    .ok_or_else(|| anyhow!("No config directory found: pass --save PATH"))?;
                config
                    .save(&path)
                    .with_context(|| format!("Failed to save configuration to {}", path.display()))?;
                log::info!("Configuration saved to {}", path.display());
            }
            Ok(ExitCode::Success)
        }
    }
}

fn run_scan<W: Write>(
    config: &Config,
    shutdown: &ShutdownHandler,
    progress: Arc<dyn ProgressCallback>,
    quiet: bool,
    out: &mut W,
) -> Result<ExitCode> {
    let root = config
        .scan_root
        .clone()
        .ok_or_else(|| anyhow!("No scan root given: pass ROOT or set `scan_root` in the config"))?;
    let index = SqliteIndex::open_with_settings(&config.index_path, config.index_settings())
        .with_context(|| format!("Failed to open index at {}", config.index_path.display()))?;

    let pipeline = Pipeline::new(
        PipelineConfig::new(config.hasher())
            .with_scanner_config(config.scanner_config())
            .with_io_threads(config.io_threads)
            .with_shutdown_flag(shutdown.get_flag())
            .with_progress_callback(progress),
    );

    let summary = pipeline
        .sync(&root, &config.pattern, &index)
        .with_context(|| format!("Failed to scan {}", root.display()))?;

    if !quiet {
        output::write_sync_summary(out, &summary)?;
    }

    Ok(if summary.interrupted {
        ExitCode::Interrupted
    } else {
        ExitCode::Success
    })
}

fn run_duplicates<W: Write>(
    config: &Config,
    args: &DuplicatesArgs,
    shutdown: &ShutdownHandler,
    progress: Arc<dyn ProgressCallback>,
    out: &mut W,
) -> Result<ExitCode> {
    let index = SqliteIndex::open_with_settings(&config.index_path, config.index_settings())
        .with_context(|| format!("Failed to open index at {}", config.index_path.display()))?;

    let resolver = DuplicateResolver::new(
        ResolverConfig::new(config.hasher())
            .with_io_threads(config.io_threads)
            .with_shutdown_flag(shutdown.get_flag())
            .with_progress_callback(progress),
    );
    let (groups, summary) = resolver
        .find_duplicates(&index, args.confirm)
        .context("Failed to resolve duplicates")?;

    let exit_code = if groups.is_empty() {
        ExitCode::NoDuplicates
    } else {
        ExitCode::Success
    };

    match args.output {
        OutputFormat::Text => TextOutput::new(&groups, &summary).write_to(out)?,
        OutputFormat::Json => JsonOutput::new(&groups, &summary, exit_code).write_to(out, true)?,
        OutputFormat::Csv => CsvOutput::new(&groups).write_to(out)?,
    }

    Ok(exit_code)
}

/// The key a scan would have stored for `path`.
///
/// Files that no longer exist can still have stale records, so they are
/// looked up by their absolute path instead.
fn index_key(path: &Path) -> Result<PathBuf> {
    match std::fs::canonicalize(path) {
        Ok(canonical) => Ok(canonical),
        Err(e) if e.kind() == io::ErrorKind::NotFound => std::path::absolute(path)
            .with_context(|| format!("Invalid path {}", path.display())),
        Err(e) => Err(e).with_context(|| format!("Cannot resolve {}", path.display())),
    }
}

fn open_index(path: &Path) -> Result<SqliteIndex> {
    SqliteIndex::open(path).with_context(|| format!("Failed to open index at {}", path.display()))
}

fn collect_stats(index: &SqliteIndex) -> Result<IndexStats> {
    let counts = index.counts()?;
    let (_, candidates) = DuplicateResolver::new(ResolverConfig::default())
        .find_duplicates(index, false)
        .context("Failed to list candidates")?;
    let confirmed = resolver::stored_confirmed_groups(index)?;

    Ok(IndexStats {
        settings: index.settings()?,
        counts,
        candidate_groups: candidates.candidate_groups,
        candidate_files: candidates.candidate_files,
        confirmed_groups: confirmed.len(),
        confirmed_files: confirmed.iter().map(resolver::DuplicateGroup::len).sum(),
    })
}
