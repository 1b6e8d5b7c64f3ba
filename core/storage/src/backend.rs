//! Storage backend trait definition.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;
use url::Url;

use cloudfetch_common::{Error, ObjectLocator, Provider, Result};

use crate::credentials::Credentials;

/// Metadata for a stored object, fetched without reading its body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// Size in bytes.
    pub size: u64,
    /// ETag or generation tag, when the provider reports one.
    pub etag: Option<String>,
    /// MIME type, when the provider reports one.
    pub content_type: Option<String>,
    /// Last modification time.
    pub updated: Option<DateTime<Utc>>,
}

impl ObjectMetadata {
    /// Metadata carrying only a size.
    pub fn with_size(size: u64) -> Self {
        Self {
            size,
            etag: None,
            content_type: None,
            updated: None,
        }
    }
}

/// A time-limited URL granting direct read access to one object.
///
/// The expiry is encoded into the URL by the provider; `validity` and
/// `issued_at` are kept for diagnostics only.
#[derive(Clone, PartialEq, Eq)]
pub struct SignedLink {
    url: Url,
    validity: Duration,
    issued_at: DateTime<Utc>,
}

impl SignedLink {
    /// Wrap a provider-signed URL.
    pub fn new(url: Url, validity: Duration, issued_at: DateTime<Utc>) -> Self {
        Self {
            url,
            validity,
            issued_at,
        }
    }

    /// The signed URL. Treat as a bearer credential.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Validity window the link was signed for.
    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// When the link was signed.
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// When the provider stops honouring the link.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.issued_at
            + chrono::Duration::from_std(self.validity).unwrap_or_else(|_| chrono::Duration::zero())
    }

    /// Check if the link has expired.
    pub fn is_expired(&self) -> bool {
        self.expires_at() <= Utc::now()
    }

    /// Scheme, host and path only; safe to log.
    pub fn redacted(&self) -> String {
        let mut url = self.url.clone();
        url.set_query(None);
        url.set_fragment(None);
        url.to_string()
    }
}

impl std::fmt::Debug for SignedLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedLink")
            .field("url", &self.redacted())
            .field("validity", &self.validity)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Join an already-encoded object `path` onto `base` and parse the result.
///
/// URL parsing resolves `.` and `..` segments and turns `\` into `/`, so
/// a key containing them would address a different object than the one
/// named. Such paths are rejected instead of rewritten, and the returned
/// URL's path is exactly the one a signer sees.
///
/// # Errors
/// - `InvalidInput` if the URL does not parse or its path would be rewritten
pub(crate) fn object_url(base: &str, path: &str) -> Result<Url> {
    let base = base.trim_end_matches('/');
    let url = Url::parse(&format!("{}{}", base, path))
        .map_err(|e| Error::InvalidInput(format!("Invalid object URL: {}", e)))?;

    let prefix = Url::parse(base)
        .map(|b| b.path().trim_end_matches('/').to_string())
        .unwrap_or_default();
    if url.path() != format!("{}{}", prefix, path) {
        return Err(Error::InvalidInput(format!(
            "Object path {} cannot be addressed by URL; it would be sent as {}",
            path,
            url.path()
        )));
    }
    Ok(url)
}

/// Byte stream type for object body transfers.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Authenticated, provider-specific storage operations.
///
/// One implementation exists per provider; the implementation is chosen
/// once when the context is created.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Provider this backend talks to.
    fn provider(&self) -> Provider;

    /// Fetch object metadata without transferring the body.
    ///
    /// # Errors
    /// - `NotFound` if the object does not exist
    /// - `PermissionDenied` if the credentials lack read access
    /// - `Authentication` if the provider rejects the credentials
    /// - `Network` for transport failures and unexpected responses
    async fn head_object(&self, locator: &ObjectLocator) -> Result<ObjectMetadata>;

    /// Produce a signed GET link valid for `validity`.
    ///
    /// Returns `Ok(None)` when the provider has nothing to sign for.
    async fn sign_get(
        &self,
        locator: &ObjectLocator,
        validity: Duration,
    ) -> Result<Option<SignedLink>>;

    /// Release network and auth resources. Called at most once.
    fn close(&mut self);
}

/// Builds an authenticated backend from resolved credentials.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    /// Perform the provider handshake and return a ready backend.
    ///
    /// # Errors
    /// - `Authentication` if the provider rejects the credentials
    /// - `Network` if the handshake cannot reach the provider
    async fn connect(&self, credentials: &Credentials) -> Result<Box<dyn StorageBackend>>;
}
