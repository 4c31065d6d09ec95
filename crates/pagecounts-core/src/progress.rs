use chrono::NaiveDate;

use crate::aggregate::DayReport;

/// Trait for reporting pipeline progress.
///
/// The CLI implements it with indicatif bars; tests use [`SilentReporter`].
/// All methods have default no-op implementations.
pub trait PipelineReporter: Send + Sync {
    fn on_fetch_start(&self, _pending: usize) {}
    fn on_fetch_progress(&self, _done: usize, _pending: usize) {}
    fn on_fetch_complete(&self, _fetched: usize, _failed: usize, _duration_secs: f64) {}
    fn on_verify_start(&self, _files: usize) {}
    fn on_verify_progress(&self, _done: usize, _files: usize) {}
    fn on_verify_complete(&self, _verified: usize, _flagged: usize, _duration_secs: f64) {}
    fn on_day_skipped(&self, _date: NaiveDate) {}
    fn on_day_start(&self, _date: NaiveDate, _files: usize) {}
    fn on_day_complete(&self, _report: &DayReport) {}
    fn on_day_failed(&self, _date: NaiveDate, _reason: &str) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl PipelineReporter for SilentReporter {}
