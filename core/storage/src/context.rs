//! Scoped storage session.
//!
//! A [`StorageContext`] owns one authenticated backend. Releasing it is
//! idempotent and happens at the latest when the context is dropped, so the
//! backend's `close` runs exactly once on every exit path.

use std::time::Duration;

use cloudfetch_common::{Error, ObjectLocator, Provider, Result};

use crate::backend::{ObjectMetadata, SignedLink, StorageBackend};

/// Shortest validity accepted for a signed link.
pub const MIN_LINK_VALIDITY: Duration = Duration::from_secs(1);
/// Longest validity both providers accept for a signed link (7 days).
pub const MAX_LINK_VALIDITY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Check a signed link validity: whole seconds, 1 second ..= 7 days.
///
/// Providers encode the expiry as an integer number of seconds, so a
/// fractional validity could not be honoured as requested.
///
/// # Errors
/// - `Signing` describing the violated bound
pub fn check_link_validity(validity: Duration) -> Result<()> {
    if validity.subsec_nanos() != 0 {
        return Err(Error::Signing(format!(
            "Link validity must be a whole number of seconds, got {:?}",
            validity
        )));
    }
    if !(MIN_LINK_VALIDITY..=MAX_LINK_VALIDITY).contains(&validity) {
        return Err(Error::Signing(format!(
            "Link validity of {}s is outside the accepted range of {}s to {}s",
            validity.as_secs(),
            MIN_LINK_VALIDITY.as_secs(),
            MAX_LINK_VALIDITY.as_secs()
        )));
    }
    Ok(())
}

/// Authenticated handle bound to one provider and one set of credentials.
///
/// Not shared between operations and not meant to be accessed
/// concurrently.
pub struct StorageContext {
    provider: Provider,
    backend: Option<Box<dyn StorageBackend>>,
}

impl StorageContext {
    /// Wrap an authenticated backend.
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self {
            provider: backend.provider(),
            backend: Some(backend),
        }
    }

    /// Provider this context is bound to.
    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Whether the context has been released.
    pub fn is_closed(&self) -> bool {
        self.backend.is_none()
    }

    fn backend(&self) -> Result<&dyn StorageBackend> {
        self.backend.as_deref().ok_or(Error::ContextClosed)
    }

    /// Fetch object metadata without reading the body.
    pub async fn head_object(&self, locator: &ObjectLocator) -> Result<ObjectMetadata> {
        let backend = self.backend()?;
        tracing::debug!(provider = %self.provider, object = %locator, "Fetching object metadata");
        backend.head_object(locator).await
    }

    /// Sign a GET link for the object.
    ///
    /// # Errors
    /// - `Signing` if `validity` fails [`check_link_validity`]
    /// - `Signing` if the backend produced no link
    /// - `ContextClosed` after [`close`](Self::close)
    pub async fn sign_get(&self, locator: &ObjectLocator, validity: Duration) -> Result<SignedLink> {
        let backend = self.backend()?;
        check_link_validity(validity)?;

        let link = backend.sign_get(locator, validity).await?.ok_or_else(|| {
            Error::Signing(format!(
                "No object found to create signed url, bucket={}, file={}",
                locator.bucket(),
                locator.key()
            ))
        })?;

        tracing::debug!(provider = %self.provider, link = %link.redacted(), "Signed download link");
        Ok(link)
    }

    /// Release the backend.
    ///
    /// Returns `true` if this call performed the release, `false` if the
    /// context was already closed.
    pub fn close(&mut self) -> bool {
        match self.backend.take() {
            Some(mut backend) => {
                backend.close();
                tracing::debug!(provider = %self.provider, "Storage context closed");
                true
            }
            None => false,
        }
    }
}

impl Drop for StorageContext {
    fn drop(&mut self) {
        if self.close() {
            tracing::warn!(provider = %self.provider, "Storage context released on drop");
        }
    }
}

impl std::fmt::Debug for StorageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageContext")
            .field("provider", &self.provider)
            .field("closed", &self.is_closed())
            .finish()
    }
}
