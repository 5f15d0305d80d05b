//! Progress reporting using indicatif.
//!
//! The pipeline and resolver report through [`ProgressCallback`]; the CLI
//! plugs in [`Progress`], which draws one bar per phase on stderr.
//!
//! Phases, in the order a `scan` followed by `duplicates --confirm` emits them:
//!
//! | phase      | total        | emitted by                  |
//! |------------|--------------|-----------------------------|
//! | `"scan"`   | 0 (spinner)  | [`crate::pipeline::Pipeline`] |
//! | `"prefix"` | new files    | [`crate::pipeline::Pipeline`] |
//! | `"full"`   | candidates   | [`crate::resolver::DuplicateResolver`] |

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Phase name for directory traversal.
pub const PHASE_SCAN: &str = "scan";
/// Phase name for prefix hashing of new files.
pub const PHASE_PREFIX: &str = "prefix";
/// Phase name for full hashing of duplicate candidates.
pub const PHASE_FULL: &str = "full";

/// Receives progress updates from long-running operations.
pub trait ProgressCallback: Send + Sync {
    /// A phase starts with `total` items (0 when unknown).
    fn on_phase_start(&self, phase: &str, total: usize);

    /// Item `current` (1-based) of the running phase is `path`.
    fn on_progress(&self, current: usize, path: &str);

    /// An item finished after reading `bytes` bytes.
    fn on_item_completed(&self, _bytes: u64) {}

    /// The phase finished.
    fn on_phase_end(&self, phase: &str);
}

/// Terminal progress reporter.
pub struct Progress {
    bar: Mutex<Option<ProgressBar>>,
    bytes: Mutex<u64>,
    quiet: bool,
}

impl Progress {
    /// Create a reporter. A quiet reporter draws nothing.
    ///
    /// # Examples
    ///
    /// ```
    /// use dupindex::progress::Progress;
    ///
    /// let progress = Progress::new(true);
    /// ```
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        Self {
            bar: Mutex::new(None),
            bytes: Mutex::new(0),
            quiet,
        }
    }

    fn bar(&self) -> MutexGuard<'_, Option<ProgressBar>> {
        self.bar.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed_precise}] {pos} files")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
    }

    fn bar_style(phase: &str) -> ProgressStyle {
        let color = if phase == PHASE_FULL { "green/blue" } else { "cyan/blue" };
        ProgressStyle::with_template(&format!(
            "[{{elapsed_precise}}] [{{bar:40.{color}}}] {{pos}}/{{len}} ({{percent}}%) {{msg}} (ETA: {{eta}})"
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█>-")
    }

    /// Total bytes reported through `on_item_completed` so far.
    #[must_use]
    pub fn bytes_processed(&self) -> u64 {
        *self.bytes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ProgressCallback for Progress {
    fn on_phase_start(&self, phase: &str, total: usize) {
        *self.bytes.lock().unwrap_or_else(PoisonError::into_inner) = 0;
        if self.quiet {
            return;
        }

        let pb = if phase == PHASE_SCAN {
            let pb = ProgressBar::new_spinner();
            pb.set_style(Self::spinner_style());
            pb.set_message("Scanning");
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        } else {
            let pb = ProgressBar::new(total as u64);
            pb.set_style(Self::bar_style(phase));
            pb.set_message(match phase {
                PHASE_PREFIX => "Prefix hashing".to_string(),
                PHASE_FULL => "Full hashing".to_string(),
                other => other.to_string(),
            });
            pb
        };
        pb.set_draw_target(ProgressDrawTarget::stderr());

        if let Some(previous) = self.bar().replace(pb) {
            previous.finish_and_clear();
        }
    }

    fn on_progress(&self, current: usize, path: &str) {
        if self.quiet {
            return;
        }
        if let Some(ref pb) = *self.bar() {
            pb.set_position(current as u64);
            pb.set_message(truncate_path(path, 40));
        }
    }

    fn on_item_completed(&self, bytes: u64) {
        *self.bytes.lock().unwrap_or_else(PoisonError::into_inner) += bytes;
    }

    fn on_phase_end(&self, phase: &str) {
        if let Some(pb) = self.bar().take() {
            let done = match phase {
                PHASE_SCAN => "Scan complete",
                PHASE_PREFIX => "Prefix hashing complete",
                PHASE_FULL => "Full hashing complete",
                _ => "Done",
            };
            pb.finish_with_message(done);
        }
    }
}

/// Shorten `path` to at most `max_len` characters, keeping the file name.
pub(crate) fn truncate_path(path: &str, max_len: usize) -> String {
    if path.chars().count() <= max_len {
        return path.to_string();
    }

    let file_name = std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let name_len = file_name.chars().count();
    if name_len + 4 > max_len {
        let keep = max_len.saturating_sub(3);
        let tail: String = file_name.chars().skip(name_len.saturating_sub(keep)).collect();
        return format!("...{tail}");
    }

    format!(".../{file_name}")
}
