use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::RangeError;
use crate::snapshot::TimeRange;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub base_url: String,
    pub snapshot_dir: PathBuf,
    pub artifact_dir: PathBuf,
    pub keep_domains: Vec<String>,
    /// First day of the range, `YYYYMMDD`.
    pub start: String,
    /// Last day of the range (inclusive), `YYYYMMDD`.
    pub end: String,
    pub fetch_workers: usize,
    pub decode_workers: usize,
    /// Upper bound of the random pause taken before every request.
    pub max_jitter_ms: u64,
    pub request_timeout_secs: u64,
    pub verify_checksums: bool,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: "https://dumps.wikimedia.org/other/pagecounts-raw".to_string(),
            snapshot_dir: PathBuf::from("./dumps"),
            artifact_dir: PathBuf::from("./aggreg"),
            keep_domains: ["en", "fr", "de", "es"].iter().map(|d| d.to_string()).collect(),
            start: "20150401".to_string(),
            end: "20150630".to_string(),
            fetch_workers: 3,
            decode_workers: 2,
            max_jitter_ms: 2000,
            request_timeout_secs: 120,
            verify_checksums: true,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl AppConfig {
    pub fn time_range(&self) -> Result<TimeRange, RangeError> {
        TimeRange::parse(&self.start, &self.end)
    }

    pub fn keep_set(&self) -> BTreeSet<String> {
        self.keep_domains
            .iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect()
    }

    pub fn max_jitter(&self) -> Duration {
        Duration::from_millis(self.max_jitter_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// `Config.toml` (optional) overlaid with `PAGECOUNTS_*` environment variables.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(
            Environment::with_prefix("PAGECOUNTS")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("keep_domains")
                .try_parsing(true),
        )
        .build()?;
    builder.try_deserialize::<AppConfig>()
}
