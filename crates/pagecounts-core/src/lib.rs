pub mod aggregate;
pub mod artifact;
pub mod checksum;
pub mod config;
pub mod engine;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod progress;
pub mod records;
pub mod snapshot;
pub mod storage;
pub mod transport;

pub use aggregate::{DailyAggregator, DailyTable, DayReport, SnapshotFile, SnapshotState};
pub use artifact::ArtifactStore;
pub use checksum::{ChecksumManifest, ChecksumVerifier, VerificationResult};
pub use config::AppConfig;
pub use engine::{AuditSummary, DayFilter, DayOutcome, Pipeline, RunSummary};
pub use error::{Error, ManifestError, RangeError, TransferError};
pub use fetch::{Fetcher, RetryPolicy};
pub use progress::{PipelineReporter, SilentReporter};
pub use records::{Record, RecordFilter};
pub use snapshot::{MonthBucket, SnapshotId, TimeRange};
pub use storage::SnapshotStore;
pub use transport::{HttpTransport, RemoteResponse, Transport};
