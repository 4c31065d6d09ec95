pub mod retry;

use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::TransferError;
use crate::snapshot::SnapshotId;
use crate::storage::{self, SnapshotStore};
use crate::transport::Transport;

pub use retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedSnapshot {
    pub id: SnapshotId,
    pub path: PathBuf,
    pub status: u16,
}

/// Downloads remote files into local storage, one attempt per call.
/// Never overwrites: a file already at the destination is an error.
#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    store: SnapshotStore,
    base_url: String,
    max_jitter: Duration,
}

impl Fetcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: SnapshotStore,
        base_url: impl Into<String>,
        max_jitter: Duration,
    ) -> Self {
        Self {
            transport,
            store,
            base_url: base_url.into(),
            max_jitter,
        }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn fetch(&self, id: &SnapshotId) -> Result<FetchedSnapshot, TransferError> {
        let path = self.store.path_for(id);
        let status = self.download(&id.url(&self.base_url), &path)?;
        debug!("Downloaded {} ({})", id.file_name(), status);
        Ok(FetchedSnapshot {
            id: *id,
            path,
            status,
        })
    }

    /// Fetches `url` into `dest`, returning the remote status. Non-2xx
    /// responses leave nothing on disk.
    pub fn download(&self, url: &str, dest: &Path) -> Result<u16, TransferError> {
        if dest.exists() {
            return Err(TransferError::AlreadyExists {
                path: dest.to_path_buf(),
            });
        }

        self.pause();
        trace!("GET {}", url);
        let response = self.transport.get(url)?;
        if !response.is_success() {
            return Err(TransferError::Status {
                url: url.to_string(),
                status: response.status,
            });
        }

        storage::write_atomic(dest, &response.body).map_err(|e| TransferError::Io {
            path: dest.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(response.status)
    }

    // Spreads requests out; the remote answers bursts with 503s.
    fn pause(&self) {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms > 0 {
            let ms = rand::thread_rng().gen_range(0..=max_ms);
            thread::sleep(Duration::from_millis(ms));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RemoteResponse;
    use chrono::NaiveDate;
    use std::fs;
    use tempfile::tempdir;

    struct Canned(Option<RemoteResponse>);

    impl Transport for Canned {
        fn get(&self, url: &str) -> Result<RemoteResponse, TransferError> {
            self.0.clone().ok_or_else(|| TransferError::NoResponse {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            })
        }
    }

    fn fetcher(dir: &Path, response: Option<RemoteResponse>) -> Fetcher {
        Fetcher::new(
            Arc::new(Canned(response)),
            SnapshotStore::new(dir),
            "http://mirror/raw",
            Duration::ZERO,
        )
    }

    fn id() -> SnapshotId {
        SnapshotId::new(NaiveDate::from_ymd_opt(2015, 1, 1).unwrap(), 0).unwrap()
    }

    #[test]
    fn test_fetch_writes_file() {
        let tmp = tempdir().unwrap();
        let response = RemoteResponse {
            status: 200,
            body: b"bytes".to_vec(),
        };
        let fetched = fetcher(tmp.path(), Some(response)).fetch(&id()).unwrap();
        assert_eq!(fetched.status, 200);
        assert_eq!(fetched.path, tmp.path().join("pagecounts-20150101-000000.gz"));
        assert_eq!(fs::read(&fetched.path).unwrap(), b"bytes");
    }

    #[test]
    fn test_fetch_refuses_overwrite() {
        let tmp = tempdir().unwrap();
        let existing = tmp.path().join(id().file_name());
        fs::write(&existing, b"old").unwrap();
        let response = RemoteResponse {
            status: 200,
            body: b"new".to_vec(),
        };
        let err = fetcher(tmp.path(), Some(response)).fetch(&id()).unwrap_err();
        assert_eq!(err, TransferError::AlreadyExists { path: existing.clone() });
        assert_eq!(fs::read(&existing).unwrap(), b"old");
    }

    #[test]
    fn test_error_status_leaves_no_file() {
        let tmp = tempdir().unwrap();
        let response = RemoteResponse {
            status: 404,
            body: b"not found".to_vec(),
        };
        let err = fetcher(tmp.path(), Some(response)).fetch(&id()).unwrap_err();
        assert!(matches!(err, TransferError::Status { status: 404, .. }));
        assert!(!tmp.path().join(id().file_name()).exists());
    }

    #[test]
    fn test_missing_response_is_distinct() {
        let tmp = tempdir().unwrap();
        let err = fetcher(tmp.path(), None).fetch(&id()).unwrap_err();
        assert!(matches!(err, TransferError::NoResponse { .. }));
        assert!(fs::read_dir(tmp.path()).unwrap().next().is_none());
    }
}
