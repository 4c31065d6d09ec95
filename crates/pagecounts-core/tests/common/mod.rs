#![allow(dead_code)]

use chrono::NaiveDate;
use flate2::write::GzEncoder;
use flate2::Compression;
use md5::{Digest, Md5};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use pagecounts_core::config::RetryConfig;
use pagecounts_core::{AppConfig, MonthBucket, RemoteResponse, SnapshotId, Transport, TransferError};

pub const BASE_URL: &str = "http://mirror.test/pagecounts-raw";

/// In-memory remote. Unknown URLs answer 404; `None` bodies simulate a
/// connection that never produced a response.
#[derive(Default)]
pub struct MockTransport {
    responses: Mutex<HashMap<String, Option<RemoteResponse>>>,
    transient: Mutex<HashMap<String, usize>>,
    calls: AtomicUsize,
    requested: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, body: Vec<u8>) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), Some(RemoteResponse { status: 200, body }));
    }

    pub fn drop_connection(&self, url: &str) {
        self.responses.lock().unwrap().insert(url.to_string(), None);
    }

    /// The next `times` requests for `url` answer 503.
    pub fn fail_transiently(&self, url: &str, times: usize) {
        self.transient.lock().unwrap().insert(url.to_string(), times);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

impl Transport for MockTransport {
    fn get(&self, url: &str) -> Result<RemoteResponse, TransferError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().unwrap().push(url.to_string());

        if let Some(remaining) = self.transient.lock().unwrap().get_mut(url) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(RemoteResponse {
                    status: 503,
                    body: b"Service Temporarily Unavailable".to_vec(),
                });
            }
        }

        match self.responses.lock().unwrap().get(url) {
            Some(Some(response)) => Ok(response.clone()),
            Some(None) => Err(TransferError::NoResponse {
                url: url.to_string(),
                reason: "connection reset by peer".to_string(),
            }),
            None => Ok(RemoteResponse {
                status: 404,
                body: Vec::new(),
            }),
        }
    }
}

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn hour(date: NaiveDate, h: u8) -> SnapshotId {
    SnapshotId::new(date, h).unwrap()
}

pub fn gz(text: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

pub fn md5_hex(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

/// Body used for hour `h`: `en Cat` gets 1 view per hour, `en Dog` gets `h`,
/// plus rows that must never survive filtering.
pub fn hourly_body(h: u8) -> String {
    format!(
        "en Cat 1 100\nen Dog {h} 200\nzz Cat 50 1\nen  7 1\nde Hund 2 10\nbroken-row\n"
    )
}

/// Registers snapshots for `hours` of `date` and returns `(file name, digest)` pairs.
pub fn serve_hours(
    transport: &MockTransport,
    date: NaiveDate,
    hours: impl IntoIterator<Item = u8>,
) -> Vec<(String, String)> {
    hours
        .into_iter()
        .map(|h| {
            let id = hour(date, h);
            let body = gz(&hourly_body(h));
            let digest = md5_hex(&body);
            transport.serve(&id.url(BASE_URL), body);
            (id.file_name(), digest)
        })
        .collect()
}

pub fn manifest_text(entries: &[(String, String)]) -> String {
    entries
        .iter()
        .map(|(name, digest)| format!("{}  {}\n", digest, name))
        .collect()
}

pub fn serve_manifest(transport: &MockTransport, bucket: MonthBucket, entries: &[(String, String)]) {
    transport.serve(
        &bucket.manifest_url(BASE_URL),
        manifest_text(entries).into_bytes(),
    );
}

pub fn test_config(root: &Path, start: &str, end: &str) -> AppConfig {
    AppConfig {
        base_url: BASE_URL.to_string(),
        snapshot_dir: root.join("dumps"),
        artifact_dir: root.join("aggreg"),
        keep_domains: vec!["en".to_string(), "de".to_string()],
        start: start.to_string(),
        end: end.to_string(),
        fetch_workers: 4,
        decode_workers: 2,
        max_jitter_ms: 0,
        request_timeout_secs: 5,
        verify_checksums: true,
        retry: RetryConfig {
            max_attempts: 3,
            base_delay_ms: 0,
            max_delay_ms: 0,
        },
    }
}
