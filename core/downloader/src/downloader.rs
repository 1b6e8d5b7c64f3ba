//! Single-object download pipeline.
//!
//! Resolve credentials, open a context, fetch metadata, enforce the size
//! limit, sign a short-lived link and stream the body to disk. The context
//! is closed exactly once whichever step fails.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cloudfetch_common::{Error, ObjectLocator, Provider, Result};
use cloudfetch_storage::{
    create_default_registry, credentials, fetch_to_storage, HttpFetcher, LinkFetcher,
    ObjectMetadata, ProviderRegistry, ProviderSettings, RawCredentials, SignedLink,
    StorageContext,
};

use crate::error::{DownloadFailed, DownloadStage};
use crate::policy::DownloadPolicy;
use crate::retry::RetryExecutor;

/// A completed download.
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub provider: Provider,
    pub locator: ObjectLocator,
    pub destination: PathBuf,
    /// Bytes written to `destination`.
    pub bytes: u64,
    /// Metadata observed before the transfer.
    pub metadata: ObjectMetadata,
}

/// Downloads objects from one provider with one set of credentials.
pub struct Downloader {
    provider: Provider,
    credentials: RawCredentials,
    registry: ProviderRegistry,
    fetcher: Arc<dyn LinkFetcher>,
    policy: DownloadPolicy,
    retry: RetryExecutor,
}

impl Downloader {
    /// Create a downloader from explicit parts.
    ///
    /// # Errors
    /// - `InvalidInput` if the policy does not validate
    pub fn new(
        provider: Provider,
        credentials: RawCredentials,
        registry: ProviderRegistry,
        fetcher: Arc<dyn LinkFetcher>,
        policy: DownloadPolicy,
    ) -> Result<Self> {
        policy.validate()?;
        let retry = RetryExecutor::new(policy.retry.clone());

        Ok(Self {
            provider,
            credentials,
            registry,
            fetcher,
            policy,
            retry,
        })
    }

    /// Create a downloader using the built-in connectors and an HTTP
    /// fetcher.
    ///
    /// # Errors
    /// - `InvalidInput` if the policy does not validate
    /// - `Network` if the HTTP client cannot be built
    pub fn from_settings(
        provider: Provider,
        credentials: RawCredentials,
        settings: &ProviderSettings,
        policy: DownloadPolicy,
    ) -> Result<Self> {
        let fetcher = HttpFetcher::new(policy.connect_timeout, policy.read_timeout)?;
        Self::new(
            provider,
            credentials,
            create_default_registry(settings),
            Arc::new(fetcher),
            policy,
        )
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn policy(&self) -> &DownloadPolicy {
        &self.policy
    }

    /// Download `bucket/key` to `destination`.
    ///
    /// Nothing is signed unless the object is within the size limit, and
    /// the body is never opened before signing completes. On failure no
    /// destination file is created and an existing one is left untouched.
    pub async fn download(
        &self,
        bucket: &str,
        key: &str,
        destination: impl AsRef<Path>,
    ) -> std::result::Result<DownloadOutcome, DownloadFailed> {
        let destination = destination.as_ref();
        let mut stage = DownloadStage::Init;

        tracing::info!(
            provider = %self.provider,
            bucket = %bucket,
            key = %key,
            destination = %destination.display(),
            "Starting download"
        );

        match self.run_download(bucket, key, destination, &mut stage).await {
            Ok(outcome) => {
                tracing::info!(
                    provider = %self.provider,
                    bucket = %bucket,
                    key = %key,
                    bytes = outcome.bytes,
                    "Download complete"
                );
                Ok(outcome)
            }
            Err(source) => Err(self.failed(bucket, key, stage, source)),
        }
    }

    /// Sign a fresh download link for `bucket/key`, using the configured
    /// validity. The object is not inspected.
    pub async fn signed_link(
        &self,
        bucket: &str,
        key: &str,
    ) -> std::result::Result<SignedLink, DownloadFailed> {
        let mut stage = DownloadStage::Init;

        self.run_signed_link(bucket, key, &mut stage)
            .await
            .map_err(|source| self.failed(bucket, key, stage, source))
    }

    async fn open_context(&self, stage: &mut DownloadStage) -> Result<StorageContext> {
        let credentials = credentials::resolve(self.provider, &self.credentials).await?;
        *stage = DownloadStage::CredentialsResolved;

        let context = self.registry.create_context(self.provider, &credentials).await?;
        *stage = DownloadStage::ContextOpen;
        Ok(context)
    }

    async fn run_download(
        &self,
        bucket: &str,
        key: &str,
        destination: &Path,
        stage: &mut DownloadStage,
    ) -> Result<DownloadOutcome> {
        let locator = ObjectLocator::new(bucket, key)?;
        let mut context = self.open_context(stage).await?;

        let result = self.transfer(&context, &locator, destination, stage).await;
        context.close();

        let (metadata, bytes) = result?;
        Ok(DownloadOutcome {
            provider: self.provider,
            locator,
            destination: destination.to_path_buf(),
            bytes,
            metadata,
        })
    }

    async fn transfer(
        &self,
        context: &StorageContext,
        locator: &ObjectLocator,
        destination: &Path,
        stage: &mut DownloadStage,
    ) -> Result<(ObjectMetadata, u64)> {
        let metadata = self
            .retry
            .execute(|| context.head_object(locator), Error::is_retryable)
            .await?;
        *stage = DownloadStage::MetadataFetched;

        if let Err(e) = self.policy.check_size(metadata.size) {
            *stage = DownloadStage::SizeExceeded;
            tracing::warn!(
                object = %locator,
                size = metadata.size,
                limit = self.policy.max_download_bytes,
                "Object exceeds download limit"
            );
            return Err(e);
        }
        *stage = DownloadStage::SizeOk;

        let link = context
            .sign_get(locator, self.policy.signed_url_validity)
            .await?;
        *stage = DownloadStage::LinkSigned;

        let bytes = fetch_to_storage(
            self.fetcher.as_ref(),
            &link,
            destination,
            self.policy.max_download_bytes,
        )
        .await?;
        *stage = DownloadStage::Downloaded;

        Ok((metadata, bytes))
    }

    async fn run_signed_link(
        &self,
        bucket: &str,
        key: &str,
        stage: &mut DownloadStage,
    ) -> Result<SignedLink> {
        let locator = ObjectLocator::new(bucket, key)?;
        let mut context = self.open_context(stage).await?;

        let result = context
            .sign_get(&locator, self.policy.signed_url_validity)
            .await;
        context.close();

        let link = result?;
        *stage = DownloadStage::LinkSigned;
        Ok(link)
    }

    fn failed(&self, bucket: &str, key: &str, stage: DownloadStage, source: Error) -> DownloadFailed {
        tracing::error!(
            provider = %self.provider,
            bucket = %bucket,
            key = %key,
            stage = %stage,
            kind = %source.kind(),
            error = %source,
            "Download failed"
        );

        DownloadFailed {
            provider: self.provider,
            bucket: bucket.to_string(),
            key: key.to_string(),
            stage,
            source,
        }
    }
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("provider", &self.provider)
            .field("registry", &self.registry)
            .field("policy", &self.policy)
            .finish()
    }
}
