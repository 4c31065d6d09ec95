use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use std::fmt;

use crate::error::RangeError;

pub const HOURS_PER_DAY: usize = 24;

const FILE_PREFIX: &str = "pagecounts-";
const FILE_SUFFIX: &str = ".gz";

/// One hourly snapshot: a calendar day plus an hour of that day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotId {
    date: NaiveDate,
    hour: u8,
}

impl SnapshotId {
    pub fn new(date: NaiveDate, hour: u8) -> Option<Self> {
        (usize::from(hour) < HOURS_PER_DAY).then_some(Self { date, hour })
    }

    pub fn from_datetime(at: NaiveDateTime) -> Self {
        Self {
            date: at.date(),
            hour: at.hour() as u8,
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn bucket(&self) -> MonthBucket {
        MonthBucket::of(self.date)
    }

    pub fn datetime(&self) -> NaiveDateTime {
        let time = NaiveTime::from_hms_opt(u32::from(self.hour), 0, 0).unwrap_or(NaiveTime::MIN);
        self.date.and_time(time)
    }

    /// `pagecounts-YYYYMMDD-HH0000.gz`, identical locally and remotely.
    pub fn file_name(&self) -> String {
        format!(
            "{}{}-{:02}0000{}",
            FILE_PREFIX,
            self.date.format("%Y%m%d"),
            self.hour,
            FILE_SUFFIX
        )
    }

    pub fn url(&self, base_url: &str) -> String {
        format!("{}{}", self.bucket().url_prefix(base_url), self.file_name())
    }

    /// Inverse of [`SnapshotId::file_name`]. Returns `None` for anything else
    /// (manifests, partial downloads, foreign files).
    pub fn from_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
        let (date, time) = stem.split_once('-')?;
        if date.len() != 8 || time.len() != 6 || !time.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let date = NaiveDate::parse_from_str(date, "%Y%m%d").ok()?;
        if &time[2..] != "0000" {
            return None;
        }
        let hour: u8 = time[..2].parse().ok()?;
        Self::new(date, hour)
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:02}:00", self.date.format("%Y-%m-%d"), self.hour)
    }
}

/// Month-level grouping at which checksum manifests are published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthBucket {
    pub year: i32,
    pub month: u32,
}

impl MonthBucket {
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// `<base>/<YYYY>/<YYYY>-<MM>/`
    pub fn url_prefix(&self, base_url: &str) -> String {
        format!(
            "{}/{}/{}-{:02}/",
            base_url.trim_end_matches('/'),
            self.year,
            self.year,
            self.month
        )
    }

    pub fn manifest_url(&self, base_url: &str) -> String {
        format!("{}md5sums.txt", self.url_prefix(base_url))
    }
}

impl fmt::Display for MonthBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

pub fn parse_day(value: &str) -> Result<NaiveDate, RangeError> {
    let trimmed = value.trim();
    if trimmed.len() != 8 || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RangeError::InvalidDate(value.to_string()));
    }
    NaiveDate::parse_from_str(trimmed, "%Y%m%d").map_err(|_| RangeError::InvalidDate(value.to_string()))
}

/// Inclusive, hour-granular span of snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    start: NaiveDateTime,
    end: NaiveDateTime,
}

impl TimeRange {
    /// Every hour from `start 00:00` through `end 23:00`.
    pub fn from_days(start: NaiveDate, end: NaiveDate) -> Result<Self, RangeError> {
        if end < start {
            return Err(RangeError::EndBeforeStart {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self {
            start: start.and_time(NaiveTime::MIN),
            end: end.and_time(NaiveTime::MIN) + Duration::hours(HOURS_PER_DAY as i64 - 1),
        })
    }

    pub fn from_hours(start: NaiveDateTime, end: NaiveDateTime) -> Result<Self, RangeError> {
        for bound in [start, end] {
            if bound.minute() != 0 || bound.second() != 0 || bound.nanosecond() != 0 {
                return Err(RangeError::NotHourAligned(bound.to_string()));
            }
        }
        if end < start {
            return Err(RangeError::EndBeforeStart {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self { start, end })
    }

    /// Parses `YYYYMMDD` bounds.
    pub fn parse(start: &str, end: &str) -> Result<Self, RangeError> {
        Self::from_days(parse_day(start)?, parse_day(end)?)
    }

    pub fn len(&self) -> usize {
        ((self.end - self.start).num_hours() + 1) as usize
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn first_day(&self) -> NaiveDate {
        self.start.date()
    }

    pub fn last_day(&self) -> NaiveDate {
        self.end.date()
    }

    /// Restartable: each call yields the full sequence again.
    pub fn iter(&self) -> HourIter {
        HourIter {
            next: Some(self.start),
            end: self.end,
        }
    }
}

impl IntoIterator for &TimeRange {
    type Item = SnapshotId;
    type IntoIter = HourIter;

    fn into_iter(self) -> HourIter {
        self.iter()
    }
}

pub struct HourIter {
    next: Option<NaiveDateTime>,
    end: NaiveDateTime,
}

impl Iterator for HourIter {
    type Item = SnapshotId;

    fn next(&mut self) -> Option<SnapshotId> {
        let current = self.next?;
        self.next = current
            .checked_add_signed(Duration::hours(1))
            .filter(|next| *next <= self.end);
        Some(SnapshotId::from_datetime(current))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self
            .next
            .map(|next| ((self.end - next).num_hours() + 1) as usize)
            .unwrap_or(0);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for HourIter {}
