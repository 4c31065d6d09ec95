pub mod manifest;
pub mod verify;

pub use manifest::{ChecksumManifest, ManifestCache, ManifestResult};
pub use verify::{compute_md5, verify_against, ChecksumVerifier, VerificationResult};
