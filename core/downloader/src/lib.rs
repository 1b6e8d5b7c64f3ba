//! cloudfetch download orchestration
//!
//! Ties credential resolution, provider contexts, metadata inspection,
//! URL signing and the bounded transfer into one operation:
//! - Size limit checked before any link is signed
//! - Context closed exactly once on every path
//! - Retries for transient metadata failures only
//! - One [`DownloadFailed`] error carrying provider, object and stage

pub mod downloader;
pub mod error;
pub mod policy;
pub mod retry;

pub use downloader::{DownloadOutcome, Downloader};
pub use error::{DownloadFailed, DownloadStage};
pub use policy::{
    DownloadPolicy, DEFAULT_MAX_DOWNLOAD_BYTES, DEFAULT_SIGNED_URL_VALIDITY, DEFAULT_STREAM_TIMEOUT,
};
pub use retry::{RetryConfig, RetryExecutor};
