//! Duplicate resolver: prefix collisions, optionally confirmed by full digests.
//!
//! Without confirmation the resolver reports candidate sets straight from the
//! index. These are approximate: two files sharing a prefix digest may still
//! differ further in.
//!
//! With confirmation every candidate member gets a full digest (reusing one
//! already stored), the new digests are persisted, and candidates are
//! regrouped by full digest. Only that mode says anything about identity.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::Serialize;

use crate::index::{ContentIndex, FileRecord, IndexError};
use crate::pipeline::{build_pool, run_in_pool, INSERT_CHUNK};
use crate::progress::{ProgressCallback, PHASE_FULL};
use crate::scanner::{Digest, HashError, HashMode, Hasher};

/// Errors that stop duplicate resolution.
#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    /// The index could not be read or updated.
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// Shutdown was requested while computing full digests.
    #[error("Duplicate resolution interrupted by user")]
    Interrupted,
}

/// How much a group proves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupKind {
    /// Members share a prefix digest only
    Candidate,
    /// Members share a full-content digest
    Confirmed,
}

impl GroupKind {
    /// Lowercase name used in reports.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Candidate => "candidate",
            Self::Confirmed => "confirmed",
        }
    }
}

/// A set of two or more records sharing a digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    /// Whether `digest` is a prefix or full digest
    pub kind: GroupKind,
    /// The shared digest
    pub digest: Digest,
    /// Members, sorted by path
    pub records: Vec<FileRecord>,
}

impl DuplicateGroup {
    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Always false for groups produced by the resolver.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Member paths.
    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.records.iter().map(|r| &r.path)
    }
}

/// Resolver configuration.
#[derive(Clone)]
pub struct ResolverConfig {
    /// Hasher used in full mode
    pub hasher: Hasher,
    /// Worker threads for full hashing
    pub io_threads: usize,
    /// Optional shutdown flag for graceful termination
    pub shutdown_flag: Option<Arc<AtomicBool>>,
    /// Optional progress callback
    pub progress_callback: Option<Arc<dyn ProgressCallback>>,
}

impl std::fmt::Debug for ResolverConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverConfig")
            .field("hasher", &self.hasher)
            .field("io_threads", &self.io_threads)
            .field("shutdown_flag", &self.shutdown_flag)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self::new(Hasher::default())
    }
}

impl ResolverConfig {
    /// Configuration hashing with `hasher` on 4 threads.
    #[must_use]
    pub fn new(hasher: Hasher) -> Self {
        Self {
            hasher,
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

/// Counters from one resolution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolveSummary {
    /// Whether full digests were used
    pub confirmed_mode: bool,
    /// Sets of records sharing a prefix digest
    pub candidate_groups: usize,
    /// Records in those sets
    pub candidate_files: usize,
    /// Full digests computed this run
    pub full_computed: usize,
    /// Full digests already stored and reused
    pub full_reused: usize,
    /// Candidates whose full digest could not be computed
    pub failures: usize,
    /// Sets sharing a full digest
    pub confirmed_groups: usize,
    /// Records in those sets
    pub confirmed_files: usize,
    /// Bytes read for full digests
    pub bytes_hashed: u64,
    /// Wall time
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

impl ResolveSummary {
    /// Number of groups in the report.
    #[must_use]
    pub fn reported_groups(&self) -> usize {
        if self.confirmed_mode {
            self.confirmed_groups
        } else {
            self.candidate_groups
        }
    }
}

/// Finds duplicate sets in a content index.
pub struct DuplicateResolver {
    config: ResolverConfig,
}

impl DuplicateResolver {
    /// Create a resolver. The shutdown flag, if any, is also handed to the
    /// hasher.
    #[must_use]
    pub fn new(mut config: ResolverConfig) -> Self {
        if let Some(ref flag) = config.shutdown_flag {
            config.hasher = config.hasher.clone().with_shutdown_flag(Arc::clone(flag));
        }
        Self { config }
    }

    /// Report duplicate sets.
    ///
    /// With `confirm == false` the groups are [`GroupKind::Candidate`] and may
    /// contain false positives. With `confirm == true` they are
    /// [`GroupKind::Confirmed`]; members whose file can no longer be hashed are
    /// logged, counted in [`ResolveSummary::failures`] and left out.
    ///
    /// # Errors
    ///
    /// [`ResolveError::Index`] on index failure, [`ResolveError::Interrupted`]
    /// on shutdown. Full digests computed before an interruption are kept in
    /// the index.
    pub fn find_duplicates<I>(
        &self,
        index: &I,
        confirm: bool,
    ) -> Result<(Vec<DuplicateGroup>, ResolveSummary), ResolveError>
    where
        I: ContentIndex + ?Sized,
    {
        let start = Instant::now();
        let mut summary = ResolveSummary {
            confirmed_mode: confirm,
            ..ResolveSummary::default()
        };

        let candidates = group_contiguous(index.find_by_prefix_collision()?, GroupKind::Candidate);
        summary.candidate_groups = candidates.len();
        summary.candidate_files = candidates.iter().map(DuplicateGroup::len).sum();
        log::info!(
            "{} candidate groups with {} files",
            summary.candidate_groups,
            summary.candidate_files
        );

        let groups = if confirm {
            let confirmed = self.confirm(candidates, index, &mut summary)?;
            summary.confirmed_groups = confirmed.len();
            summary.confirmed_files = confirmed.iter().map(DuplicateGroup::len).sum();
            log::info!(
                "{} confirmed groups with {} files ({} digests computed, {} reused, {} failed)",
                summary.confirmed_groups,
                summary.confirmed_files,
                summary.full_computed,
                summary.full_reused,
                summary.failures
            );
            confirmed
        } else {
            candidates
        };

        summary.duration = start.elapsed();
        Ok((groups, summary))
    }

    /// Fill in full digests for all candidate members and regroup by them.
    fn confirm<I>(
        &self,
        candidates: Vec<DuplicateGroup>,
        index: &I,
        summary: &mut ResolveSummary,
    ) -> Result<Vec<DuplicateGroup>, ResolveError>
    where
        I: ContentIndex + ?Sized,
    {
        let members: Vec<FileRecord> = candidates.into_iter().flat_map(|g| g.records).collect();
        let (known, missing): (Vec<FileRecord>, Vec<FileRecord>) =
            members.into_iter().partition(|r| r.full_digest.is_some());
        summary.full_reused = known.len();

        let mut resolved = known;
        resolved.extend(self.compute_full(missing, index, summary)?);

        let mut by_full: BTreeMap<Digest, Vec<FileRecord>> = BTreeMap::new();
        for record in resolved {
            if let Some(digest) = record.full_digest.clone() {
                by_full.entry(digest).or_default().push(record);
            }
        }

        Ok(by_full
            .into_iter()
            .filter(|(_, records)| records.len() > 1)
            .map(|(digest, mut records)| {
                records.sort_by(|a, b| a.path.cmp(&b.path));
                DuplicateGroup {
                    kind: GroupKind::Confirmed,
                    digest,
                    records,
                }
            })
            .collect())
    }

    /// Hash `records` in parallel chunks and persist each chunk's new full
    /// digests before hashing the next one.
    fn compute_full<I>(
        &self,
        records: Vec<FileRecord>,
        index: &I,
        summary: &mut ResolveSummary,
    ) -> Result<Vec<FileRecord>, ResolveError>
    where
        I: ContentIndex + ?Sized,
    {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(ref cb) = self.config.progress_callback {
            cb.on_phase_start(PHASE_FULL, records.len());
        }

        let pool = build_pool(self.config.io_threads);
        let counter = AtomicUsize::new(0);
        let hasher = &self.config.hasher;

        let mut interrupted = false;
        let mut resolved = Vec::with_capacity(records.len());
        for chunk in records.chunks(INSERT_CHUNK) {
            let results: Vec<(&FileRecord, Result<(Digest, u64), HashError>)> =
                run_in_pool(pool.as_ref(), || {
                    chunk
                        .par_iter()
                        .map(|record| {
                            if self.config.is_shutdown_requested() {
                                let err = HashError::Interrupted(record.path.clone());
                                return (record, Err(err));
                            }
                            let current = counter.fetch_add(1, Ordering::Relaxed) + 1;
                            if let Some(ref cb) = self.config.progress_callback {
                                cb.on_progress(current, &record.path.to_string_lossy());
                            }
                            (record, hasher.digest_with_len(&record.path, HashMode::Full))
                        })
                        .collect()
                });

            for (record, result) in results {
                match result {
                    Ok((_, 0)) => {
                        log::warn!("File is empty now, skipping: {}", record.path.display());
                        summary.failures += 1;
                    }
                    Ok((digest, len)) => {
                        summary.bytes_hashed += len;
                        if let Some(ref cb) = self.config.progress_callback {
                            cb.on_item_completed(len);
                        }
                        match index.update_full_digest(&record.path, &digest) {
                            Ok(()) => {}
                            Err(IndexError::NotFound(p)) => {
                                log::warn!("Record vanished from the index: {}", p.display());
                                summary.failures += 1;
                                continue;
                            }
                            Err(e) => return Err(e.into()),
                        }
                        log::trace!("Full digest {} {}", digest, record.path.display());
                        summary.full_computed += 1;
                        resolved.push(FileRecord {
                            full_digest: Some(digest),
                            ..record.clone()
                        });
                    }
                    Err(HashError::Interrupted(_)) => interrupted = true,
                    Err(e) => {
                        log::warn!("Failed to hash {}: {}", record.path.display(), e);
                        summary.failures += 1;
                    }
                }
            }

            if interrupted || self.config.is_shutdown_requested() {
                interrupted = true;
                break;
            }
        }

        if let Some(ref cb) = self.config.progress_callback {
            cb.on_phase_end(PHASE_FULL);
        }

        if interrupted {
            log::info!(
                "Full hashing interrupted; {} digests saved",
                summary.full_computed
            );
            return Err(ResolveError::Interrupted);
        }
        Ok(resolved)
    }
}

/// Split a collision listing, where members of one set are adjacent, into
/// groups keyed by the relevant digest.
fn group_contiguous(records: Vec<FileRecord>, kind: GroupKind) -> Vec<DuplicateGroup> {
    let key = |r: &FileRecord| match kind {
        GroupKind::Candidate => Some(r.prefix_digest.clone()),
        GroupKind::Confirmed => r.full_digest.clone(),
    };

    let mut groups: Vec<DuplicateGroup> = Vec::new();
    for record in records {
        let Some(digest) = key(&record) else {
            continue;
        };
        match groups.last_mut() {
            Some(group) if group.digest == digest => group.records.push(record),
            _ => groups.push(DuplicateGroup {
                kind,
                digest,
                records: vec![record],
            }),
        }
    }

    groups.retain(|g| g.len() > 1);
    for group in &mut groups {
        group.records.sort_by(|a, b| a.path.cmp(&b.path));
    }
    groups
}

/// Groups already confirmed by earlier runs, straight from stored full digests.
///
/// # Errors
///
/// Returns [`ResolveError::Index`] on index failure.
pub fn stored_confirmed_groups<I>(index: &I) -> Result<Vec<DuplicateGroup>, ResolveError>
where
    I: ContentIndex + ?Sized,
{
    Ok(group_contiguous(
        index.find_by_full_digest_collision()?,
        GroupKind::Confirmed,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexSettings, SqliteIndex};
    use crate::scanner::Algorithm;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const PREFIX: u64 = 4;

    fn index() -> SqliteIndex {
        SqliteIndex::open_in_memory(IndexSettings {
            algorithm: Algorithm::Blake3,
            prefix_size: PREFIX,
        })
        .unwrap()
    }

    fn hasher() -> Hasher {
        Hasher::new(Algorithm::Blake3, PREFIX)
    }

    fn add(index: &SqliteIndex, dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        let digest = hasher().digest(&path, HashMode::Prefix).unwrap();
        index.insert(&path, &digest).unwrap();
        path
    }

    fn resolver() -> DuplicateResolver {
        DuplicateResolver::new(ResolverConfig::new(hasher()).with_io_threads(2))
    }

    #[test]
    fn test_unconfirmed_returns_prefix_groups() {
        let dir = TempDir::new().unwrap();
        let index = index();
        let a = add(&index, dir.path(), "a", "same-start-1");
        let b = add(&index, dir.path(), "b", "same-start-2");
        add(&index, dir.path(), "c", "other");

        let (groups, summary) = resolver().find_duplicates(&index, false).unwrap();

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].kind, GroupKind::Candidate);
        assert_eq!(groups[0].paths().cloned().collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(summary.candidate_groups, 1);
        assert_eq!(summary.candidate_files, 2);
        assert_eq!(summary.full_computed, 0);
        assert_eq!(index.counts().unwrap().with_full_digest, 0);
    }

    #[test]
    fn test_confirm_splits_false_positives() {
        let dir = TempDir::new().unwrap();
        let index = index();
        let a = add(&index, dir.path(), "a", "same-start-1");
        add(&index, dir.path(), "b", "same-start-2");
        let c = add(&index, dir.path(), "c", "same-start-1");

        let (groups, summary) = resolver().find_duplicates(&index, true).unwrap();

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].kind, GroupKind::Confirmed);
        assert_eq!(groups[0].paths().cloned().collect::<Vec<_>>(), vec![a.clone(), c]);
        assert_eq!(summary.candidate_files, 3);
        assert_eq!(summary.full_computed, 3);
        assert_eq!(summary.confirmed_groups, 1);
        assert_eq!(summary.confirmed_files, 2);
        assert!(index.get(&a).unwrap().full_digest.is_some());
    }

    #[test]
    fn test_confirm_reuses_stored_digests() {
        let dir = TempDir::new().unwrap();
        let index = index();
        add(&index, dir.path(), "a", "hello");
        add(&index, dir.path(), "b", "hello");

        resolver().find_duplicates(&index, true).unwrap();
        let (groups, summary) = resolver().find_duplicates(&index, true).unwrap();

        assert_eq!(groups.len(), 1);
        assert_eq!(summary.full_reused, 2);
        assert_eq!(summary.full_computed, 0);
        assert_eq!(summary.bytes_hashed, 0);
    }

    #[test]
    fn test_confirm_counts_vanished_files() {
        let dir = TempDir::new().unwrap();
        let index = index();
        let a = add(&index, dir.path(), "a", "hello");
        add(&index, dir.path(), "b", "hello");
        add(&index, dir.path(), "c", "hello");
        fs::remove_file(&a).unwrap();

        let (groups, summary) = resolver().find_duplicates(&index, true).unwrap();

        assert_eq!(summary.failures, 1);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);
        assert!(!groups[0].paths().any(|p| p == &a));
        assert!(index.get(&a).unwrap().full_digest.is_none());
    }

    #[test]
    fn test_confirm_singleton_after_failure_is_dropped() {
        let dir = TempDir::new().unwrap();
        let index = index();
        let a = add(&index, dir.path(), "a", "hello");
        add(&index, dir.path(), "b", "hello");
        fs::remove_file(&a).unwrap();

        let (groups, summary) = resolver().find_duplicates(&index, true).unwrap();
        assert!(groups.is_empty());
        assert_eq!(summary.reported_groups(), 0);
    }

    #[test]
    fn test_confirm_interrupted() {
        let dir = TempDir::new().unwrap();
        let index = index();
        add(&index, dir.path(), "a", "hello");
        add(&index, dir.path(), "b", "hello");

        let flag = Arc::new(AtomicBool::new(true));
        let resolver = DuplicateResolver::new(ResolverConfig::new(hasher()).with_shutdown_flag(flag));

        assert!(matches!(
            resolver.find_duplicates(&index, true),
            Err(ResolveError::Interrupted)
        ));
        // Unconfirmed listing does no hashing and still works.
        assert_eq!(resolver.find_duplicates(&index, false).unwrap().0.len(), 1);
    }

    /// Requests shutdown once `limit` full digests have been reported.
    struct StopAfter {
        limit: usize,
        done: AtomicUsize,
        flag: Arc<AtomicBool>,
    }

    impl ProgressCallback for StopAfter {
        fn on_phase_start(&self, _phase: &str, _total: usize) {}
        fn on_progress(&self, _current: usize, _path: &str) {}
        fn on_item_completed(&self, _bytes: u64) {
            if self.done.fetch_add(1, Ordering::SeqCst) + 1 >= self.limit {
                self.flag.store(true, Ordering::SeqCst);
            }
        }
        fn on_phase_end(&self, _phase: &str) {}
    }

    #[test]
    fn test_confirm_persists_finished_chunks_before_stopping() {
        let dir = TempDir::new().unwrap();
        let index = index();
        for i in 0..INSERT_CHUNK + 40 {
            add(&index, dir.path(), &format!("f{i:04}"), &format!("same-{i}"));
        }

        let flag = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(StopAfter {
            limit: INSERT_CHUNK,
            done: AtomicUsize::new(0),
            flag: Arc::clone(&flag),
        });
        let resolver = DuplicateResolver::new(
            ResolverConfig::new(hasher())
                .with_io_threads(2)
                .with_shutdown_flag(flag)
                .with_progress_callback(stop),
        );

        assert!(matches!(
            resolver.find_duplicates(&index, true),
            Err(ResolveError::Interrupted)
        ));
        assert_eq!(index.counts().unwrap().with_full_digest, INSERT_CHUNK);
    }

    #[test]
    fn test_empty_index() {
        let (groups, summary) = resolver().find_duplicates(&index(), true).unwrap();
        assert!(groups.is_empty());
        assert_eq!(summary.candidate_groups, 0);
    }

    #[test]
    fn test_stored_confirmed_groups() {
        let dir = TempDir::new().unwrap();
        let index = index();
        add(&index, dir.path(), "a", "hello");
        add(&index, dir.path(), "b", "hello");
        assert!(stored_confirmed_groups(&index).unwrap().is_empty());

        resolver().find_duplicates(&index, true).unwrap();
        let stored = stored_confirmed_groups(&index).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].len(), 2);
    }

    #[test]
    fn test_group_contiguous_drops_singletons() {
        let rec = |p: &str, d: &str| FileRecord {
            path: PathBuf::from(p),
            prefix_digest: Digest::from_hex(d).unwrap(),
            full_digest: None,
        };
        let groups = group_contiguous(
            vec![rec("/b", "aa"), rec("/a", "aa"), rec("/c", "bb"), rec("/d", "cc"), rec("/e", "cc")],
            GroupKind::Candidate,
        );
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].records[0].path, PathBuf::from("/a"));
        assert_eq!(groups[1].digest.as_str(), "cc");
    }
}
