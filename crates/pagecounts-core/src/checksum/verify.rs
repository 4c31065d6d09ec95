use md5::{Digest, Md5};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::manifest::{ChecksumManifest, ManifestCache, ManifestResult};
use crate::error::{Error, ManifestError};
use crate::fetch::{Fetcher, RetryPolicy};
use crate::snapshot::{MonthBucket, SnapshotId};
use crate::storage::LocalSnapshot;

const READ_BUFFER: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VerificationResult {
    Verified,
    Corrupted { expected: String, actual: String },
    /// The manifest has no line for this file; the manifest is incomplete,
    /// the file is not known to be bad.
    NoManifestEntry,
}

impl VerificationResult {
    pub fn is_verified(&self) -> bool {
        matches!(self, VerificationResult::Verified)
    }
}

/// Compares local snapshot digests to the published monthly manifests.
/// Read-only with respect to snapshot files.
pub struct ChecksumVerifier {
    fetcher: Fetcher,
    retry: RetryPolicy,
    cache: ManifestCache,
}

impl ChecksumVerifier {
    pub fn new(fetcher: Fetcher, retry: RetryPolicy) -> Self {
        Self {
            fetcher,
            retry,
            cache: ManifestCache::new(),
        }
    }

    /// Loads one manifest per distinct month referenced by `ids`.
    pub fn build_manifests<'a, I>(&self, ids: I) -> BTreeMap<MonthBucket, ManifestResult>
    where
        I: IntoIterator<Item = &'a SnapshotId>,
    {
        let mut buckets: Vec<MonthBucket> = ids.into_iter().map(SnapshotId::bucket).collect();
        buckets.sort();
        buckets.dedup();
        buckets
            .into_iter()
            .map(|bucket| (bucket, self.manifest(bucket)))
            .collect()
    }

    pub fn manifest(&self, bucket: MonthBucket) -> ManifestResult {
        self.cache.get_or_load(bucket, || {
            let manifest = self.load_manifest(bucket);
            if let Err(err) = &manifest {
                warn!("Checksum manifest for {} unusable: {}", bucket, err);
            }
            manifest
        })
    }

    /// Reuses an already-downloaded manifest file, otherwise fetches it first.
    fn load_manifest(&self, bucket: MonthBucket) -> ManifestResult {
        let path = self.fetcher.store().manifest_path(&bucket);
        if !path.exists() {
            let url = bucket.manifest_url(self.fetcher.base_url());
            let status = self
                .retry
                .run(&url, || self.fetcher.download(&url, &path))
                .map_err(|source| ManifestError::Unavailable { bucket, source })?;
            info!("Downloaded checksum manifest {} ({})", path.display(), status);
        }

        let bytes = fs::read(&path).map_err(|e| ManifestError::Io {
            bucket,
            reason: e.to_string(),
        })?;
        ChecksumManifest::parse(bucket, &String::from_utf8_lossy(&bytes)).map(Arc::new)
    }

    pub fn verify(&self, snapshot: &LocalSnapshot) -> Result<VerificationResult, Error> {
        let manifest = self.manifest(snapshot.id.bucket())?;
        Ok(verify_against(&manifest, &snapshot.id.file_name(), &snapshot.path)?)
    }
}

pub fn verify_against(
    manifest: &ChecksumManifest,
    file_name: &str,
    path: &Path,
) -> io::Result<VerificationResult> {
    let Some(expected) = manifest.expected(file_name) else {
        debug!("No manifest entry for {}", file_name);
        return Ok(VerificationResult::NoManifestEntry);
    };

    let actual = compute_md5(path)?;
    if actual == expected {
        Ok(VerificationResult::Verified)
    } else {
        Ok(VerificationResult::Corrupted {
            expected: expected.to_string(),
            actual,
        })
    }
}

/// Lowercase hex MD5 of a file, streamed.
pub fn compute_md5(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; READ_BUFFER];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const JAN: MonthBucket = MonthBucket {
        year: 2015,
        month: 1,
    };

    #[test]
    fn test_compute_md5_known_value() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("f");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(compute_md5(&path).unwrap(), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_verify_against_classifies() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("pagecounts-20150101-000000.gz");
        fs::write(&path, b"abc").unwrap();

        let good = ChecksumManifest::parse(
            JAN,
            "900150983cd24fb0d6963f7d28e17f72  pagecounts-20150101-000000.gz",
        )
        .unwrap();
        assert_eq!(
            verify_against(&good, "pagecounts-20150101-000000.gz", &path).unwrap(),
            VerificationResult::Verified
        );

        let bad = ChecksumManifest::parse(JAN, "abc123  pagecounts-20150101-000000.gz").unwrap();
        assert_eq!(
            verify_against(&bad, "pagecounts-20150101-000000.gz", &path).unwrap(),
            VerificationResult::Corrupted {
                expected: "abc123".to_string(),
                actual: "900150983cd24fb0d6963f7d28e17f72".to_string(),
            }
        );

        let other = ChecksumManifest::parse(JAN, "abc123  pagecounts-20150101-010000.gz").unwrap();
        assert_eq!(
            verify_against(&other, "pagecounts-20150101-000000.gz", &path).unwrap(),
            VerificationResult::NoManifestEntry
        );
    }
}
