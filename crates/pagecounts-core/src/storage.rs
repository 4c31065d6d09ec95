use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::snapshot::{MonthBucket, SnapshotId};

const PARTIAL_SUFFIX: &str = "part";
const REJECTED_SUFFIX: &str = "corrupt";

/// Directory holding one file per fetched snapshot plus cached manifests.
/// A snapshot file at its final name is the fetch-completion marker.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSnapshot {
    pub id: SnapshotId,
    pub path: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: &SnapshotId) -> PathBuf {
        self.dir.join(id.file_name())
    }

    pub fn is_fetched(&self, id: &SnapshotId) -> bool {
        self.path_for(id).is_file()
    }

    pub fn manifest_path(&self, bucket: &MonthBucket) -> PathBuf {
        self.dir.join(format!("checksums-{}.txt", bucket))
    }

    /// Moves a snapshot the checksum check rejected to `<name>.corrupt`, so
    /// the hour is fetched again by the next run.
    pub fn quarantine(&self, id: &SnapshotId) -> io::Result<PathBuf> {
        let path = self.path_for(id);
        let target = with_suffix(&path, REJECTED_SUFFIX);
        fs::rename(&path, &target)?;
        Ok(target)
    }

    /// Snapshot files present at their final names, in chronological order.
    pub fn list_local(&self) -> io::Result<Vec<LocalSnapshot>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            match SnapshotId::from_file_name(&name.to_string_lossy()) {
                Some(id) => found.push(LocalSnapshot {
                    id,
                    path: entry.path(),
                }),
                None => trace!("Ignoring {}", entry.path().display()),
            }
        }
        found.sort_by_key(|s| s.id);
        debug!("{} snapshot files in {}", found.len(), self.dir.display());
        Ok(found)
    }
}

/// Write `bytes` next to `path` under a temporary name, then rename into place.
/// An interrupted write never leaves anything at `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    write_atomic_with(path, |file| file.write_all(bytes))
}

pub(crate) fn write_atomic_with<F>(path: &Path, write: F) -> io::Result<()>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = partial_path(path);
    let result = File::create(&tmp).and_then(|mut file| {
        write(&mut file)?;
        file.sync_all()
    });
    match result {
        Ok(()) => fs::rename(&tmp, path),
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(e)
        }
    }
}

fn partial_path(path: &Path) -> PathBuf {
    with_suffix(path, PARTIAL_SUFFIX)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    #[test]
    fn test_list_local_skips_foreign_files() {
        let tmp = tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path());
        let date = NaiveDate::from_ymd_opt(2015, 1, 1).unwrap();
        let late = SnapshotId::new(date, 5).unwrap();
        let early = SnapshotId::new(date, 1).unwrap();

        fs::write(store.path_for(&late), b"x").unwrap();
        fs::write(store.path_for(&early), b"x").unwrap();
        fs::write(tmp.path().join("pagecounts-20150101-020000.gz.part"), b"x").unwrap();
        fs::write(store.manifest_path(&late.bucket()), b"x").unwrap();
        fs::write(tmp.path().join("bad_checksums.txt"), b"").unwrap();

        let local = store.list_local().unwrap();
        let ids: Vec<_> = local.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![early, late]);
        assert!(store.is_fetched(&late));
        assert!(!store.is_fetched(&SnapshotId::new(date, 2).unwrap()));
    }

    #[test]
    fn test_quarantine_makes_hour_pending_again() {
        let tmp = tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path());
        let id = SnapshotId::new(NaiveDate::from_ymd_opt(2015, 1, 1).unwrap(), 7).unwrap();
        fs::write(store.path_for(&id), b"damaged").unwrap();

        let moved = store.quarantine(&id).unwrap();
        assert_eq!(moved, tmp.path().join("pagecounts-20150101-070000.gz.corrupt"));
        assert_eq!(fs::read(&moved).unwrap(), b"damaged");
        assert!(!store.is_fetched(&id));
        assert!(store.list_local().unwrap().is_empty());
        assert!(store.quarantine(&id).is_err());
    }

    #[test]
    fn test_list_local_missing_dir_is_empty() {
        let tmp = tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path().join("nope"));
        assert!(store.list_local().unwrap().is_empty());
    }

    #[test]
    fn test_write_atomic_leaves_no_partial() {
        let tmp = tempdir().unwrap();
        let target = tmp.path().join("nested").join("out.bin");
        write_atomic(&target, b"payload").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"payload");
        assert!(!partial_path(&target).exists());

        let failed = tmp.path().join("failed.bin");
        let err = write_atomic_with(&failed, |_| Err(io::Error::new(io::ErrorKind::Other, "boom")));
        assert!(err.is_err());
        assert!(!failed.exists());
        assert!(!partial_path(&failed).exists());
    }
}
