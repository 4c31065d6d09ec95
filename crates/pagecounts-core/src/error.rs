use std::path::PathBuf;
use thiserror::Error;

use crate::snapshot::MonthBucket;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Range(#[from] RangeError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("Artifact error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Report error: {0}")]
    Report(#[from] serde_json::Error),

    #[error("Worker pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("{0}")]
    Other(String),
}

/// Invalid date range input. Raised before any IO happens.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    #[error("invalid date '{0}', expected YYYYMMDD")]
    InvalidDate(String),

    #[error("range end {end} precedes start {start}")]
    EndBeforeStart { start: String, end: String },

    #[error("range bound {0} is not aligned to a whole hour")]
    NotHourAligned(String),
}

/// Failure to obtain one remote file. Recoverable per file.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("no response from {url}: {reason}")]
    NoResponse { url: String, reason: String },

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("refusing to overwrite existing file {}", .path.display())]
    AlreadyExists { path: PathBuf },

    #[error("could not write {}: {reason}", .path.display())]
    Io { path: PathBuf, reason: String },
}

impl TransferError {
    /// Whether a later attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::NoResponse { .. } => true,
            TransferError::Status { status, .. } => *status == 429 || *status >= 500,
            TransferError::AlreadyExists { .. } | TransferError::Io { .. } => false,
        }
    }
}

/// A checksum manifest could not be obtained or parsed. Fatal for every day in the bucket.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
    #[error("malformed checksum manifest for {bucket}, line {line_no}: {line:?}")]
    Parse {
        bucket: MonthBucket,
        line_no: usize,
        line: String,
    },

    #[error("checksum manifest for {bucket} unavailable: {source}")]
    Unavailable {
        bucket: MonthBucket,
        source: TransferError,
    },

    #[error("checksum manifest for {bucket} unreadable: {reason}")]
    Io { bucket: MonthBucket, reason: String },
}

impl ManifestError {
    pub fn bucket(&self) -> MonthBucket {
        match self {
            ManifestError::Parse { bucket, .. }
            | ManifestError::Unavailable { bucket, .. }
            | ManifestError::Io { bucket, .. } => *bucket,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        let status = |status| TransferError::Status {
            url: "u".to_string(),
            status,
        };
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(TransferError::NoResponse {
            url: "u".to_string(),
            reason: "timed out".to_string()
        }
        .is_retryable());
        assert!(!TransferError::AlreadyExists {
            path: PathBuf::from("x")
        }
        .is_retryable());
    }
}
