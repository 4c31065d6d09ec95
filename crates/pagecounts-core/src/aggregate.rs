use ahash::AHashMap;
use chrono::NaiveDate;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::checksum::VerificationResult;
use crate::error::Error;
use crate::records::{DecodeStats, RecordFilter};
use crate::snapshot::{SnapshotId, HOURS_PER_DAY};
use crate::storage::LocalSnapshot;

pub type TableKey = (String, String);

/// Lifecycle of one snapshot file as seen by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotState {
    Absent,
    Unverified,
    Verified,
    Corrupted { expected: String, actual: String },
    NoManifestEntry,
    /// The digest could not be computed.
    Unreadable(String),
}

impl From<VerificationResult> for SnapshotState {
    fn from(result: VerificationResult) -> Self {
        match result {
            VerificationResult::Verified => SnapshotState::Verified,
            VerificationResult::Corrupted { expected, actual } => {
                SnapshotState::Corrupted { expected, actual }
            }
            VerificationResult::NoManifestEntry => SnapshotState::NoManifestEntry,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFile {
    pub id: SnapshotId,
    pub path: PathBuf,
    pub state: SnapshotState,
}

impl SnapshotFile {
    pub fn new(local: LocalSnapshot, state: SnapshotState) -> Self {
        Self {
            id: local.id,
            path: local.path,
            state,
        }
    }

    pub fn unverified(local: LocalSnapshot) -> Self {
        Self::new(local, SnapshotState::Unverified)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ExclusionReason {
    Corrupted { expected: String, actual: String },
    NoManifestEntry,
    Unreadable { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExcludedFile {
    pub file: String,
    #[serde(flatten)]
    pub reason: ExclusionReason,
}

/// (domain, article) → summed view count for one day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyTable {
    date: NaiveDate,
    counts: BTreeMap<TableKey, u64>,
}

impl DailyTable {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            counts: BTreeMap::new(),
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn get(&self, domain: &str, article: &str) -> Option<u64> {
        self.counts
            .get(&(domain.to_string(), article.to_string()))
            .copied()
    }

    pub fn add(&mut self, domain: &str, article: &str, views: u64) {
        let slot = self
            .counts
            .entry((domain.to_string(), article.to_string()))
            .or_insert(0);
        *slot = slot.saturating_add(views);
    }

    /// Sums `other` into `self`. Merging is commutative and associative.
    pub fn merge(&mut self, other: DailyTable) {
        debug_assert_eq!(self.date, other.date);
        for (key, views) in other.counts {
            let slot = self.counts.entry(key).or_insert(0);
            *slot = slot.saturating_add(views);
        }
    }

    pub fn total_views(&self) -> u64 {
        self.counts.values().fold(0u64, |acc, v| acc.saturating_add(*v))
    }

    /// Rows in (domain, article) order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, u64)> {
        self.counts
            .iter()
            .map(|((domain, article), views)| (domain.as_str(), article.as_str(), *views))
    }

    fn from_partial(date: NaiveDate, partial: AHashMap<TableKey, u64>) -> Self {
        Self {
            date,
            counts: partial.into_iter().collect(),
        }
    }
}

/// Completeness summary persisted next to every artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayReport {
    pub date: String,
    pub expected_hours: usize,
    pub merged_hours: usize,
    pub missing_hours: Vec<u8>,
    pub excluded: Vec<ExcludedFile>,
    pub decode: DecodeStats,
    pub rows: usize,
    pub total_views: u64,
}

impl DayReport {
    pub fn is_complete(&self) -> bool {
        self.merged_hours == self.expected_hours
    }

    pub fn dropped_records(&self) -> u64 {
        self.decode.malformed
    }

    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !self.missing_hours.is_empty() {
            warnings.push(plural(self.missing_hours.len(), "missing hour"));
        }
        if !self.excluded.is_empty() {
            warnings.push(plural(self.excluded.len(), "excluded file"));
        }
        if self.dropped_records() > 0 {
            warnings.push(plural(self.dropped_records() as usize, "dropped record"));
        }
        warnings
    }
}

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("1 {}", noun)
    } else {
        format!("{} {}s", count, noun)
    }
}

#[derive(Debug, Clone)]
pub struct DayAggregate {
    pub table: DailyTable,
    pub report: DayReport,
}

/// Merges one day's snapshot files into a [`DailyTable`] on a bounded pool.
pub struct DailyAggregator {
    filter: RecordFilter,
    pool: Arc<ThreadPool>,
}

impl DailyAggregator {
    pub fn new(filter: RecordFilter, workers: usize) -> Result<Self, Error> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("decode-{}", i))
            .build()?;
        Ok(Self {
            filter,
            pool: Arc::new(pool),
        })
    }

    /// Returns only after every usable file has been decoded and merged.
    /// Corrupted files, files without a manifest entry and unreadable files
    /// are left out of the table and listed in the report.
    pub fn aggregate(&self, day: NaiveDate, files: &[SnapshotFile]) -> DayAggregate {
        let mut excluded = Vec::new();
        let mut seen = BTreeSet::new();
        let mut usable = Vec::new();

        for file in files {
            if file.id.date() != day {
                warn!(date = %day, file = %file.id.file_name(), "Ignoring snapshot from another day");
                continue;
            }
            if file.state == SnapshotState::Absent {
                continue;
            }
            if !seen.insert(file.id) {
                warn!(date = %day, file = %file.id.file_name(), "Ignoring duplicate snapshot");
                continue;
            }
            match &file.state {
                SnapshotState::Corrupted { expected, actual } => excluded.push(ExcludedFile {
                    file: file.id.file_name(),
                    reason: ExclusionReason::Corrupted {
                        expected: expected.clone(),
                        actual: actual.clone(),
                    },
                }),
                SnapshotState::NoManifestEntry => excluded.push(ExcludedFile {
                    file: file.id.file_name(),
                    reason: ExclusionReason::NoManifestEntry,
                }),
                SnapshotState::Unreadable(error) => excluded.push(ExcludedFile {
                    file: file.id.file_name(),
                    reason: ExclusionReason::Unreadable {
                        error: error.clone(),
                    },
                }),
                SnapshotState::Unverified | SnapshotState::Verified => usable.push(file),
                SnapshotState::Absent => {}
            }
        }

        let filter = &self.filter;
        let partial = self.pool.install(|| {
            usable
                .par_iter()
                .fold(PartialDay::default, |mut acc, file| {
                    match decode_file(filter, &file.path) {
                        Ok((counts, stats)) => acc.absorb(file.id, counts, &stats),
                        Err(e) => {
                            warn!(date = %day, file = %file.id.file_name(), error = %e, "Excluding unreadable snapshot");
                            acc.unreadable.push(ExcludedFile {
                                file: file.id.file_name(),
                                reason: ExclusionReason::Unreadable {
                                    error: e.to_string(),
                                },
                            });
                        }
                    }
                    acc
                })
                .reduce(PartialDay::default, PartialDay::merge)
        });
        let PartialDay {
            counts,
            decode,
            merged,
            unreadable,
        } = partial;
        excluded.extend(unreadable);
        excluded.sort_by(|a, b| a.file.cmp(&b.file));

        let table = DailyTable::from_partial(day, counts);
        let present: BTreeSet<u8> = seen.iter().map(SnapshotId::hour).collect();
        let missing_hours: Vec<u8> = (0..HOURS_PER_DAY as u8)
            .filter(|hour| !present.contains(hour))
            .collect();

        let report = DayReport {
            date: day.format("%Y%m%d").to_string(),
            expected_hours: HOURS_PER_DAY,
            merged_hours: merged.len(),
            missing_hours,
            excluded,
            decode,
            rows: table.len(),
            total_views: table.total_views(),
        };

        if !report.is_complete() {
            warn!(
                date = %report.date,
                merged = report.merged_hours,
                missing_hours = report.missing_hours.len(),
                excluded = report.excluded.len(),
                "Only {} of {} hourly files merged for {}",
                report.merged_hours,
                report.expected_hours,
                report.date,
            );
        }
        debug!(
            date = %report.date,
            rows = report.rows,
            dropped = report.decode.malformed,
            "Aggregated day"
        );

        DayAggregate { table, report }
    }
}

/// Running sums of one worker. Each worker holds at most its accumulator and
/// the table of the file it is decoding.
#[derive(Default)]
struct PartialDay {
    counts: AHashMap<TableKey, u64>,
    decode: DecodeStats,
    merged: BTreeSet<u8>,
    unreadable: Vec<ExcludedFile>,
}

impl PartialDay {
    fn absorb(&mut self, id: SnapshotId, counts: AHashMap<TableKey, u64>, stats: &DecodeStats) {
        add_counts(&mut self.counts, counts);
        self.decode.absorb(stats);
        self.merged.insert(id.hour());
    }

    fn merge(mut self, mut other: PartialDay) -> PartialDay {
        if self.counts.len() < other.counts.len() {
            std::mem::swap(&mut self.counts, &mut other.counts);
        }
        add_counts(&mut self.counts, other.counts);
        self.decode.absorb(&other.decode);
        self.merged.extend(other.merged);
        self.unreadable.extend(other.unreadable);
        self
    }
}

fn add_counts(into: &mut AHashMap<TableKey, u64>, from: AHashMap<TableKey, u64>) {
    for (key, views) in from {
        let slot = into.entry(key).or_insert(0);
        *slot = slot.saturating_add(views);
    }
}

fn decode_file(
    filter: &RecordFilter,
    path: &Path,
) -> io::Result<(AHashMap<TableKey, u64>, DecodeStats)> {
    let mut partial: AHashMap<TableKey, u64> = AHashMap::new();
    let mut reader = filter.open(path)?;
    for record in reader.by_ref() {
        let record = record?;
        let slot = partial.entry((record.domain, record.article)).or_insert(0);
        *slot = slot.saturating_add(record.view_count);
    }
    Ok((partial, reader.stats()))
}
