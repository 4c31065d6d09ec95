use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::trace;

use crate::error::ManifestError;
use crate::snapshot::MonthBucket;

const SEPARATOR: &str = "  ";

/// Remote filename → expected hex digest, for one month bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumManifest {
    bucket: MonthBucket,
    entries: HashMap<String, String>,
}

impl ChecksumManifest {
    /// Parses `md5sum` output: `<hex-digest><two spaces><filename>` per line.
    /// Any malformed line fails the whole manifest. Blank lines are skipped.
    pub fn parse(bucket: MonthBucket, text: &str) -> Result<Self, ManifestError> {
        let mut entries = HashMap::new();

        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let malformed = || ManifestError::Parse {
                bucket,
                line_no: index + 1,
                line: line.to_string(),
            };

            let (digest, file_name) = line.split_once(SEPARATOR).ok_or_else(malformed)?;
            if digest.is_empty() || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(malformed());
            }
            if file_name.is_empty() || file_name.contains(SEPARATOR) || file_name.trim() != file_name {
                return Err(malformed());
            }
            entries.insert(file_name.to_string(), digest.to_ascii_lowercase());
        }

        trace!("Parsed {} manifest entries for {}", entries.len(), bucket);
        Ok(Self { bucket, entries })
    }

    pub fn bucket(&self) -> MonthBucket {
        self.bucket
    }

    pub fn expected(&self, file_name: &str) -> Option<&str> {
        self.entries.get(file_name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub type ManifestResult = Result<Arc<ChecksumManifest>, ManifestError>;

/// Run-scoped bucket → manifest cache. Concurrent first requests for the
/// same bucket run the loader once; the others block until it finishes.
/// Failures are cached too, so a broken bucket fails every caller the same way.
#[derive(Default)]
pub struct ManifestCache {
    slots: DashMap<MonthBucket, Arc<OnceLock<ManifestResult>>>,
}

impl ManifestCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_load<F>(&self, bucket: MonthBucket, load: F) -> ManifestResult
    where
        F: FnOnce() -> ManifestResult,
    {
        // Clone the slot out so the shard lock is released before loading.
        let slot = self.slots.entry(bucket).or_default().value().clone();
        slot.get_or_init(load).clone()
    }

    pub fn loaded(&self) -> usize {
        self.slots.iter().filter(|slot| slot.value().get().is_some()).count()
    }
}
