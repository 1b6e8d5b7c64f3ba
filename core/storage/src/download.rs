//! Bounded streaming download of a signed link to local storage.
//!
//! The body is written to a hidden sibling `.part` file and renamed onto
//! the destination only after it has been fully written and synced. Any
//! failure removes the partial file and leaves an existing destination
//! untouched.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header, Client};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use cloudfetch_common::{Error, Result};

use crate::backend::{ByteStream, SignedLink};

/// An opened body stream.
pub struct FetchResponse {
    /// Length announced by the server, if any.
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

/// Opens a signed link for reading.
#[async_trait]
pub trait LinkFetcher: Send + Sync {
    /// Issue the GET and return the body stream.
    ///
    /// # Errors
    /// - `Transfer` if the request fails or the status is not a success
    async fn fetch(&self, link: &SignedLink) -> Result<FetchResponse>;
}

/// reqwest-backed fetcher.
///
/// Applies a connect timeout and a per-read timeout but no timeout on the
/// transfer as a whole.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a fetcher.
    ///
    /// # Errors
    /// - `Network` if the HTTP client cannot be built
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()
            .map_err(|e| Error::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl LinkFetcher for HttpFetcher {
    async fn fetch(&self, link: &SignedLink) -> Result<FetchResponse> {
        tracing::debug!(link = %link.redacted(), "Opening download stream");

        let response = self
            .client
            .get(link.url().clone())
            .send()
            .await
            .map_err(|e| Error::Transfer(format!("Download request failed: {}", e.without_url())))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transfer(format!(
                "Download of {} failed with status {}",
                link.redacted(),
                status
            )));
        }

        let content_length = response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        let body = response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| Error::Transfer(format!("Download stream failed: {}", e.without_url())))
        });

        Ok(FetchResponse {
            content_length,
            body: Box::pin(body),
        })
    }
}

/// Removes the partial file unless the download completed.
struct PartialFile {
    path: PathBuf,
    armed: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove partial download");
                }
            }
        }
    }
}

fn partial_path(destination: &Path) -> Result<PathBuf> {
    let name = destination.file_name().ok_or_else(|| {
        Error::InvalidInput(format!(
            "Destination has no file name: {}",
            destination.display()
        ))
    })?;

    let mut partial = OsString::from(".");
    partial.push(name);
    partial.push(format!(".{}.part", Uuid::new_v4()));
    Ok(destination.with_file_name(partial))
}

/// Stream `link` into `destination`, refusing more than `max_bytes`.
///
/// Returns the number of bytes written. Parent directories are created
/// as needed.
///
/// # Errors
/// - `SizeLimitExceeded` if the declared or streamed length exceeds `max_bytes`
/// - `Transfer` if the request or stream fails
/// - `Io` if the file cannot be written, synced or renamed
/// - `InvalidInput` if `destination` has no file name
pub async fn fetch_to_storage(
    fetcher: &dyn LinkFetcher,
    link: &SignedLink,
    destination: &Path,
    max_bytes: u64,
) -> Result<u64> {
    let temp_path = partial_path(destination)?;

    let response = fetcher.fetch(link).await?;
    if let Some(size) = response.content_length.filter(|&size| size > max_bytes) {
        return Err(Error::SizeLimitExceeded {
            size,
            limit: max_bytes,
        });
    }

    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut guard = PartialFile::new(temp_path);
    let mut file = tokio::fs::File::create(&guard.path).await?;
    let mut body = response.body;
    let mut written: u64 = 0;

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        written += chunk.len() as u64;
        if written > max_bytes {
            return Err(Error::SizeLimitExceeded {
                size: written,
                limit: max_bytes,
            });
        }
        file.write_all(&chunk).await?;
    }

    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&guard.path, destination).await?;
    guard.disarm();

    tracing::debug!(destination = %destination.display(), bytes = written, "Download written");
    Ok(written)
}
