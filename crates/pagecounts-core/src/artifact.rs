use chrono::NaiveDate;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::aggregate::{DailyTable, DayReport};
use crate::error::Error;
use crate::storage;

const HEADER: [&str; 4] = ["domain", "article", "view_count", "date"];

/// One row of a persisted daily artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRow {
    pub domain: String,
    pub article: String,
    pub view_count: u64,
    pub date: String,
}

/// Directory of per-day artifacts. An artifact at its final name marks the
/// day as done for good.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifact_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("data_{}.csv.gz", date.format("%Y%m%d")))
    }

    pub fn report_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("data_{}.report.json", date.format("%Y%m%d")))
    }

    pub fn is_complete(&self, date: NaiveDate) -> bool {
        self.artifact_path(date).is_file()
    }

    /// Writes the report, then the artifact. Both go through a temporary
    /// name, and the artifact is renamed last.
    pub fn write(&self, table: &DailyTable, report: &DayReport) -> Result<PathBuf, Error> {
        let date = table.date();
        let report_bytes = serde_json::to_vec_pretty(report)?;
        storage::write_atomic(&self.report_path(date), &report_bytes)?;

        let path = self.artifact_path(date);
        storage::write_atomic_with(&path, |file| write_table(file, table))?;
        debug!("Wrote {} rows to {}", table.len(), path.display());
        Ok(path)
    }

    /// Artifacts present in the directory, ordered by date.
    pub fn list(&self) -> Result<Vec<(NaiveDate, PathBuf)>, Error> {
        let dir = self.dir.to_string_lossy();
        let pattern = format!(
            "{}/data_*.csv.gz",
            glob::Pattern::escape(dir.trim_end_matches('/'))
        );

        let paths = glob::glob(&pattern).map_err(|e| Error::Other(e.to_string()))?;
        let mut found = Vec::new();
        for entry in paths {
            let path = entry.map_err(|e| Error::Io(e.into_error()))?;
            let date = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.strip_prefix("data_"))
                .and_then(|name| name.strip_suffix(".csv.gz"))
                .and_then(|stamp| NaiveDate::parse_from_str(stamp, "%Y%m%d").ok());
            match date {
                Some(date) => found.push((date, path)),
                None => trace!("Ignoring {}", path.display()),
            }
        }
        found.sort();
        Ok(found)
    }
}

fn write_table(file: &mut File, table: &DailyTable) -> io::Result<()> {
    let date = table.date().format("%Y%m%d").to_string();
    let encoder = GzEncoder::new(file, Compression::default());
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Necessary)
        .from_writer(encoder);

    writer.write_record(HEADER)?;
    for (domain, article, views) in table.iter() {
        writer.write_record([domain, article, views.to_string().as_str(), date.as_str()])?;
    }
    writer.flush()?;
    let encoder = writer
        .into_inner()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    encoder.finish()?.flush()
}

/// Reads every row of an artifact. Read-only.
pub fn read_rows(path: &Path) -> Result<Vec<ArtifactRow>, Error> {
    let mut rows = Vec::new();
    for_each_row(path, |row| {
        rows.push(row);
        Ok(())
    })?;
    Ok(rows)
}

/// Streams the rows of an artifact through `visit`.
pub fn for_each_row<F>(path: &Path, mut visit: F) -> Result<(), Error>
where
    F: FnMut(ArtifactRow) -> Result<(), Error>,
{
    let file = File::open(path)?;
    let mut reader = csv::Reader::from_reader(GzDecoder::new(file));
    for row in reader.deserialize::<ArtifactRow>() {
        visit(row?)?;
    }
    Ok(())
}
