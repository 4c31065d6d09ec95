use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use pagecounts_core::{DayReport, PipelineReporter};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif progress bars.
///
/// - Fetch and verify phases: progress bar (file count known upfront)
/// - Each day's aggregation: spinner, replaced by a ✓ or ! line
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<ProgressBar>> {
        self.bar.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_bar(&self, pb: ProgressBar) {
        let mut guard = self.slot();
        if let Some(old) = guard.take() {
            old.finish_and_clear();
        }
        *guard = Some(pb);
    }

    fn finish_bar(&self) {
        if let Some(pb) = self.slot().take() {
            pb.finish_and_clear();
        }
    }

    fn start_bar(&self, label: &str, total: usize) {
        let pb = ProgressBar::new(total as u64);
        let template = format!(
            "  {{spinner:.cyan}} {} [{{bar:30.cyan/dim}}] {{pos}}/{{len}} files ({{eta}} remaining)",
            label
        );
        pb.set_style(
            ProgressStyle::with_template(&template)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("━╸─")
                .tick_chars(TICK_CHARS),
        );
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn advance(&self, done: usize, total: usize) {
        if let Some(pb) = self.slot().as_ref() {
            if pb.length() != Some(total as u64) {
                pb.set_length(total as u64);
            }
            pb.set_position(done as u64);
        }
    }

    fn start_spinner(&self, message: String) {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars(TICK_CHARS),
        );
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }
}

impl PipelineReporter for CliReporter {
    fn on_fetch_start(&self, pending: usize) {
        if pending > 0 {
            self.start_bar("Fetching", pending);
        }
    }

    fn on_fetch_progress(&self, done: usize, pending: usize) {
        self.advance(done, pending);
    }

    fn on_fetch_complete(&self, fetched: usize, failed: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Fetch complete: {} files, {} failures in {:.2}s",
            fetched, failed, duration_secs
        );
    }

    fn on_verify_start(&self, files: usize) {
        self.start_bar("Verifying", files);
    }

    fn on_verify_progress(&self, done: usize, files: usize) {
        self.advance(done, files);
    }

    fn on_verify_complete(&self, verified: usize, flagged: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Verify complete: {} verified, {} flagged in {:.2}s",
            verified, flagged, duration_secs
        );
    }

    fn on_day_skipped(&self, date: NaiveDate) {
        eprintln!("  \x1b[2m-\x1b[0m {} already aggregated", date.format("%Y%m%d"));
    }

    fn on_day_start(&self, date: NaiveDate, files: usize) {
        self.start_spinner(format!(
            "Aggregating {} ({} files)...",
            date.format("%Y%m%d"),
            files
        ));
    }

    fn on_day_complete(&self, report: &DayReport) {
        self.finish_bar();
        let warnings = report.warnings();
        if warnings.is_empty() {
            eprintln!(
                "  \x1b[32m✓\x1b[0m {}: {} rows, {} views",
                report.date, report.rows, report.total_views
            );
        } else {
            eprintln!(
                "  \x1b[33m!\x1b[0m {}: {} rows, {} views ({})",
                report.date,
                report.rows,
                report.total_views,
                warnings.join(", ")
            );
        }
    }

    fn on_day_failed(&self, date: NaiveDate, reason: &str) {
        self.finish_bar();
        eprintln!("  \x1b[31m✗\x1b[0m {}: {}", date.format("%Y%m%d"), reason);
    }
}
