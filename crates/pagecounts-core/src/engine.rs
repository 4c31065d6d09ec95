use chrono::NaiveDate;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::aggregate::{DailyAggregator, DayReport, ExclusionReason, SnapshotFile, SnapshotState};
use crate::artifact::ArtifactStore;
use crate::checksum::{verify_against, ChecksumVerifier, VerificationResult};
use crate::config::AppConfig;
use crate::error::{Error, ManifestError, TransferError};
use crate::fetch::{FetchedSnapshot, Fetcher, RetryPolicy};
use crate::progress::PipelineReporter;
use crate::records::RecordFilter;
use crate::snapshot::{MonthBucket, SnapshotId};
use crate::storage::{LocalSnapshot, SnapshotStore};
use crate::transport::{HttpTransport, Transport};

/// Restricts which days a command touches: `None` keeps every day, otherwise
/// the day's `YYYYMMDD` stamp must contain the given text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DayFilter(Option<String>);

impl DayFilter {
    pub fn all() -> Self {
        Self(None)
    }

    pub fn matching(text: impl Into<String>) -> Self {
        let text = text.into();
        if text.trim().is_empty() {
            Self(None)
        } else {
            Self(Some(text.trim().to_string()))
        }
    }

    pub fn accepts(&self, date: NaiveDate) -> bool {
        match &self.0 {
            None => true,
            Some(text) => date.format("%Y%m%d").to_string().contains(text.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum DayOutcome {
    /// Artifact already on disk at start of run; nothing was done.
    AlreadyComplete,
    Persisted { path: PathBuf, report: DayReport },
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct DayResult {
    pub date: NaiveDate,
    pub outcome: DayOutcome,
}

#[derive(Debug, Clone)]
pub struct FetchFailure {
    pub id: SnapshotId,
    pub error: TransferError,
}

#[derive(Debug, Default)]
pub struct FetchSummary {
    pub fetched: Vec<FetchedSnapshot>,
    pub failures: Vec<FetchFailure>,
    pub duration: Duration,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub fetch: FetchSummary,
    pub days: Vec<DayResult>,
    pub aggregate_duration: Duration,
}

impl RunSummary {
    pub fn persisted(&self) -> usize {
        self.count(|o| matches!(o, DayOutcome::Persisted { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, DayOutcome::AlreadyComplete))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, DayOutcome::Failed { .. }))
    }

    /// Persisted days whose report carries warnings.
    pub fn incomplete(&self) -> usize {
        self.count(|o| matches!(o, DayOutcome::Persisted { report, .. } if !report.warnings().is_empty()))
    }

    fn count(&self, pred: impl Fn(&DayOutcome) -> bool) -> usize {
        self.days.iter().filter(|d| pred(&d.outcome)).count()
    }
}

/// Result of a standalone checksum audit of local snapshots.
#[derive(Debug, Default)]
pub struct AuditSummary {
    pub checked: usize,
    pub verified: usize,
    pub corrupted: Vec<String>,
    pub missing_entries: Vec<String>,
    pub unreadable: Vec<String>,
    /// Buckets whose manifest failed; their files were not checked.
    pub manifest_failures: Vec<ManifestError>,
}

impl AuditSummary {
    /// Files known to be bad: digest mismatch or unreadable.
    pub fn bad_files(&self) -> impl Iterator<Item = &String> {
        self.corrupted.iter().chain(self.unreadable.iter())
    }

    pub fn write_bad_list(&self, path: &Path) -> Result<(), Error> {
        let names: Vec<&str> = self.bad_files().map(String::as_str).collect();
        fs::write(path, names.join("\n"))?;
        Ok(())
    }
}

/// Drives fetch → verify → aggregate → persist over a configured date range.
pub struct Pipeline {
    config: AppConfig,
    snapshots: SnapshotStore,
    artifacts: ArtifactStore,
    fetcher: Fetcher,
    retry: RetryPolicy,
    verifier: ChecksumVerifier,
    aggregator: DailyAggregator,
    io_pool: ThreadPool,
}

impl Pipeline {
    pub fn new(config: AppConfig, transport: Arc<dyn Transport>) -> Result<Self, Error> {
        let snapshots = SnapshotStore::new(&config.snapshot_dir);
        let artifacts = ArtifactStore::new(&config.artifact_dir);
        let fetcher = Fetcher::new(
            transport,
            snapshots.clone(),
            config.base_url.clone(),
            config.max_jitter(),
        );
        let retry = RetryPolicy::from_config(&config.retry, config.max_jitter());
        let verifier = ChecksumVerifier::new(fetcher.clone(), retry.clone());
        let aggregator = DailyAggregator::new(RecordFilter::new(config.keep_set()), config.decode_workers)?;
        let io_pool = ThreadPoolBuilder::new()
            .num_threads(config.fetch_workers.max(1))
            .thread_name(|i| format!("fetch-{}", i))
            .build()?;

        Ok(Self {
            config,
            snapshots,
            artifacts,
            fetcher,
            retry,
            verifier,
            aggregator,
            io_pool,
        })
    }

    pub fn with_http(config: AppConfig) -> Result<Self, Error> {
        let transport = HttpTransport::new(config.request_timeout())?;
        Self::new(config, Arc::new(transport))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Full run over the configured range:
    /// 1. Enumerate hours, group by day, drop days whose artifact exists
    /// 2. Fetch every missing snapshot of the remaining days
    /// 3. Verify, aggregate and persist each remaining day
    pub fn run(&self, filter: &DayFilter, reporter: &dyn PipelineReporter) -> Result<RunSummary, Error> {
        let pending = self.pending_days(filter, reporter)?;
        let mut summary = RunSummary {
            days: pending.skipped,
            ..RunSummary::default()
        };

        let missing: Vec<SnapshotId> = pending
            .days
            .values()
            .flatten()
            .filter(|id| !self.snapshots.is_fetched(id))
            .copied()
            .collect();
        info!(
            "{} days to process, {} files to be downloaded...",
            pending.days.len(),
            missing.len()
        );
        summary.fetch = self.fetch_all(&missing, reporter);

        let aggregate_start = Instant::now();
        for (date, ids) in pending.days {
            let locals: Vec<LocalSnapshot> = ids
                .iter()
                .filter(|id| self.snapshots.is_fetched(id))
                .map(|id| LocalSnapshot {
                    id: *id,
                    path: self.snapshots.path_for(id),
                })
                .collect();
            summary.days.push(self.process_day(date, locals, reporter));
        }
        summary.aggregate_duration = aggregate_start.elapsed();
        summary.days.sort_by_key(|d| d.date);

        Ok(summary)
    }

    /// Fetch-only pass over the configured range, skipping completed days.
    pub fn fetch(&self, filter: &DayFilter, reporter: &dyn PipelineReporter) -> Result<FetchSummary, Error> {
        let pending = self.pending_days(filter, reporter)?;
        let missing: Vec<SnapshotId> = pending
            .days
            .values()
            .flatten()
            .filter(|id| !self.snapshots.is_fetched(id))
            .copied()
            .collect();
        info!("{} files to be downloaded...", missing.len());
        Ok(self.fetch_all(&missing, reporter))
    }

    /// Aggregates whatever snapshots are already local, without fetching any.
    pub fn aggregate_local(
        &self,
        filter: &DayFilter,
        reporter: &dyn PipelineReporter,
    ) -> Result<Vec<DayResult>, Error> {
        let mut by_day: BTreeMap<NaiveDate, Vec<LocalSnapshot>> = BTreeMap::new();
        for local in self.snapshots.list_local()? {
            if filter.accepts(local.id.date()) {
                by_day.entry(local.id.date()).or_default().push(local);
            }
        }

        let mut results = Vec::with_capacity(by_day.len());
        for (date, locals) in by_day {
            if self.artifacts.is_complete(date) {
                reporter.on_day_skipped(date);
                results.push(DayResult {
                    date,
                    outcome: DayOutcome::AlreadyComplete,
                });
                continue;
            }
            results.push(self.process_day(date, locals, reporter));
        }
        Ok(results)
    }

    /// Verifies every local snapshot against its month's manifest.
    pub fn audit(&self, filter: &DayFilter, reporter: &dyn PipelineReporter) -> Result<AuditSummary, Error> {
        let locals: Vec<LocalSnapshot> = self
            .snapshots
            .list_local()?
            .into_iter()
            .filter(|local| filter.accepts(local.id.date()))
            .collect();

        info!("Determining required checksum files...");
        let manifests = self.verifier.build_manifests(locals.iter().map(|l| &l.id));
        let mut summary = AuditSummary::default();
        for result in manifests.values() {
            if let Err(e) = result {
                error!("{}", e);
                summary.manifest_failures.push(e.clone());
            }
        }

        let checkable: Vec<LocalSnapshot> = locals
            .into_iter()
            .filter(|local| matches!(manifests.get(&local.id.bucket()), Some(Ok(_))))
            .collect();

        let verify_start = Instant::now();
        let total = checkable.len();
        reporter.on_verify_start(total);
        let done = AtomicUsize::new(0);
        let results: Vec<(LocalSnapshot, Result<VerificationResult, Error>)> = self.io_pool.install(|| {
            checkable
                .into_par_iter()
                .map(|local| {
                    let result = self.verifier.verify(&local);
                    let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                    reporter.on_verify_progress(n, total);
                    (local, result)
                })
                .collect()
        });

        for (local, result) in results {
            summary.checked += 1;
            let name = local.id.file_name();
            match result {
                Ok(VerificationResult::Verified) => summary.verified += 1,
                Ok(VerificationResult::Corrupted { .. }) => summary.corrupted.push(name),
                Ok(VerificationResult::NoManifestEntry) => summary.missing_entries.push(name),
                Err(e) => {
                    warn!("Could not verify {}: {}", name, e);
                    summary.unreadable.push(name);
                }
            }
        }
        reporter.on_verify_complete(
            summary.verified,
            summary.checked - summary.verified,
            verify_start.elapsed().as_secs_f64(),
        );
        Ok(summary)
    }

    fn pending_days(&self, filter: &DayFilter, reporter: &dyn PipelineReporter) -> Result<PendingDays, Error> {
        let range = self.config.time_range()?;
        let mut days: BTreeMap<NaiveDate, Vec<SnapshotId>> = BTreeMap::new();
        for id in range.iter() {
            if filter.accepts(id.date()) {
                days.entry(id.date()).or_default().push(id);
            }
        }

        let mut skipped = Vec::new();
        days.retain(|date, _| {
            if self.artifacts.is_complete(*date) {
                debug!("Artifact for {} exists, skipping", date);
                reporter.on_day_skipped(*date);
                skipped.push(DayResult {
                    date: *date,
                    outcome: DayOutcome::AlreadyComplete,
                });
                false
            } else {
                true
            }
        });

        Ok(PendingDays { days, skipped })
    }

    /// Fetches `ids` on the bounded pool. Every id gets its own result; one
    /// failure never stops the others.
    fn fetch_all(&self, ids: &[SnapshotId], reporter: &dyn PipelineReporter) -> FetchSummary {
        let start = Instant::now();
        reporter.on_fetch_start(ids.len());
        if ids.is_empty() {
            reporter.on_fetch_complete(0, 0, 0.0);
            return FetchSummary::default();
        }

        let done = AtomicUsize::new(0);
        let results: Vec<(SnapshotId, Result<FetchedSnapshot, TransferError>)> = self.io_pool.install(|| {
            ids.par_iter()
                .map(|id| {
                    let result = self.retry.run(&id.file_name(), || self.fetcher.fetch(id));
                    let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                    reporter.on_fetch_progress(n, ids.len());
                    (*id, result)
                })
                .collect()
        });

        let mut summary = FetchSummary::default();
        for (id, result) in results {
            match result {
                Ok(fetched) => summary.fetched.push(fetched),
                Err(TransferError::AlreadyExists { .. }) => {
                    debug!("{} appeared while fetching, keeping it", id.file_name())
                }
                Err(error) => {
                    warn!(file = %id.file_name(), error = %error, "Fetch failed");
                    summary.failures.push(FetchFailure { id, error });
                }
            }
        }
        summary.duration = start.elapsed();
        reporter.on_fetch_complete(
            summary.fetched.len(),
            summary.failures.len(),
            summary.duration.as_secs_f64(),
        );
        info!(
            "Fetched {} files, {} failures in {:.2}s",
            summary.fetched.len(),
            summary.failures.len(),
            summary.duration.as_secs_f64()
        );
        summary
    }

    fn process_day(
        &self,
        date: NaiveDate,
        locals: Vec<LocalSnapshot>,
        reporter: &dyn PipelineReporter,
    ) -> DayResult {
        let failed = |reason: String| {
            reporter.on_day_failed(date, &reason);
            DayResult {
                date,
                outcome: DayOutcome::Failed { reason },
            }
        };

        reporter.on_day_start(date, locals.len());
        info!("Loading {} ({} files)", date, locals.len());

        let files = if self.config.verify_checksums {
            match self.verify_day(MonthBucket::of(date), locals) {
                Ok(files) => files,
                Err(e) => {
                    error!(date = %date, "{}", e);
                    return failed(e.to_string());
                }
            }
        } else {
            locals.into_iter().map(SnapshotFile::unverified).collect()
        };

        let aggregate = self.aggregator.aggregate(date, &files);
        self.quarantine_rejected(&aggregate.report);
        if aggregate.report.merged_hours == 0 {
            warn!(date = %date, "No usable snapshot files, day left pending");
            return failed("no usable snapshot files".to_string());
        }

        match self.artifacts.write(&aggregate.table, &aggregate.report) {
            Ok(path) => {
                let warnings = aggregate.report.warnings();
                if warnings.is_empty() {
                    info!("Loaded and processed data of day {}", date);
                } else {
                    warn!(date = %date, "Persisted with warnings: {}", warnings.join(", "));
                }
                reporter.on_day_complete(&aggregate.report);
                DayResult {
                    date,
                    outcome: DayOutcome::Persisted {
                        path,
                        report: aggregate.report,
                    },
                }
            }
            Err(e) => {
                error!(date = %date, "Could not persist artifact: {}", e);
                failed(e.to_string())
            }
        }
    }

    /// Corrupted and unreadable snapshots are moved aside so a later run
    /// fetches them again. Files without a manifest entry stay in place.
    fn quarantine_rejected(&self, report: &DayReport) {
        for excluded in &report.excluded {
            if excluded.reason == ExclusionReason::NoManifestEntry {
                continue;
            }
            let Some(id) = SnapshotId::from_file_name(&excluded.file) else {
                continue;
            };
            match self.snapshots.quarantine(&id) {
                Ok(path) => info!(file = %excluded.file, "Moved rejected snapshot to {}", path.display()),
                Err(e) => warn!(file = %excluded.file, error = %e, "Could not move rejected snapshot aside"),
            }
        }
    }

    /// The bucket's manifest is loaded (or its failure observed) before any
    /// file of the day is checked.
    fn verify_day(&self, bucket: MonthBucket, locals: Vec<LocalSnapshot>) -> Result<Vec<SnapshotFile>, ManifestError> {
        let manifest = self.verifier.manifest(bucket)?;
        Ok(self.io_pool.install(|| {
            locals
                .into_par_iter()
                .map(|local| {
                    let state = match verify_against(&manifest, &local.id.file_name(), &local.path) {
                        Ok(result) => {
                            if !result.is_verified() {
                                warn!(file = %local.id.file_name(), "Checksum check failed: {:?}", result);
                            }
                            SnapshotState::from(result)
                        }
                        Err(e) => SnapshotState::Unreadable(e.to_string()),
                    };
                    SnapshotFile::new(local, state)
                })
                .collect()
        }))
    }
}

struct PendingDays {
    days: BTreeMap<NaiveDate, Vec<SnapshotId>>,
    skipped: Vec<DayResult>,
}
