//! Download policy: size limit, link validity, retries and stream timeouts.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use cloudfetch_common::{Error, Result};
use cloudfetch_storage::check_link_validity;

use crate::retry::RetryConfig;

/// Default maximum object size: 1 GiB.
pub const DEFAULT_MAX_DOWNLOAD_BYTES: u64 = 1024 * 1024 * 1024;
/// Default signed link validity.
pub const DEFAULT_SIGNED_URL_VALIDITY: Duration = Duration::from_secs(60);
/// Default connect and per-read timeout for the body stream.
pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Limits and tuning applied to every download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadPolicy {
    /// Largest object accepted, in bytes. An object of exactly this size
    /// is accepted.
    pub max_download_bytes: u64,
    /// How long a signed link stays valid.
    pub signed_url_validity: Duration,
    /// Retries for the metadata lookup.
    pub retry: RetryConfig,
    /// Connect timeout for the body stream.
    pub connect_timeout: Duration,
    /// Maximum wait for each read on the body stream.
    pub read_timeout: Duration,
}

impl DownloadPolicy {
    pub fn with_max_download_bytes(mut self, max_download_bytes: u64) -> Self {
        self.max_download_bytes = max_download_bytes;
        self
    }

    pub fn with_signed_url_validity(mut self, validity: Duration) -> Self {
        self.signed_url_validity = validity;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Check the policy is usable.
    ///
    /// # Errors
    /// - `InvalidInput` if the size limit is zero
    /// - `InvalidInput` if the validity is not whole seconds within
    ///   1 second ..= 7 days
    pub fn validate(&self) -> Result<()> {
        if self.max_download_bytes == 0 {
            return Err(Error::InvalidInput(
                "max_download_bytes must be greater than zero".to_string(),
            ));
        }
        check_link_validity(self.signed_url_validity).map_err(|e| match e {
            Error::Signing(reason) => {
                Error::InvalidInput(format!("Invalid signed_url_validity: {}", reason))
            }
            other => other,
        })
    }

    /// Reject objects larger than the limit.
    pub fn check_size(&self, size: u64) -> Result<()> {
        if size > self.max_download_bytes {
            return Err(Error::SizeLimitExceeded {
                size,
                limit: self.max_download_bytes,
            });
        }
        Ok(())
    }
}

impl Default for DownloadPolicy {
    fn default() -> Self {
        Self {
            max_download_bytes: DEFAULT_MAX_DOWNLOAD_BYTES,
            signed_url_validity: DEFAULT_SIGNED_URL_VALIDITY,
            retry: RetryConfig::default(),
            connect_timeout: DEFAULT_STREAM_TIMEOUT,
            read_timeout: DEFAULT_STREAM_TIMEOUT,
        }
    }
}
