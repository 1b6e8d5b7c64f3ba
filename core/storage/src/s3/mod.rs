//! Amazon S3 (and S3-compatible) backend.
//!
//! Metadata comes from a SigV4-signed `HEAD`; download links are SigV4
//! presigned URLs. There is no session handshake.

pub mod sigv4;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use percent_encoding::utf8_percent_encode;
use reqwest::{header, Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use cloudfetch_common::{Error, ObjectLocator, Provider, Result};

use crate::backend::{object_url, BackendConnector, ObjectMetadata, SignedLink, StorageBackend};
use crate::credentials::Credentials;

pub use sigv4::SigV4Signer;
use sigv4::KEY_ENCODE_SET;

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// S3 connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Settings {
    /// Signing region.
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible services. Defaults to the AWS
    /// regional endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Address buckets as `{endpoint}/{bucket}` instead of
    /// `{bucket}.{endpoint}`.
    #[serde(default)]
    pub path_style: bool,
    /// Timeout for metadata requests, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl S3Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Get the S3 endpoint URL.
    fn endpoint(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://s3.{}.amazonaws.com", self.region),
        }
    }

    /// URL addressing one object.
    ///
    /// # Errors
    /// - `InvalidInput` if the endpoint is not an absolute URL, or the key
    ///   has a `.` or `..` segment that URL parsing would resolve away
    pub fn object_url(&self, locator: &ObjectLocator) -> Result<Url> {
        let endpoint = self.endpoint();
        let key = utf8_percent_encode(locator.key(), KEY_ENCODE_SET);

        if self.path_style {
            object_url(&endpoint, &format!("/{}/{}", locator.bucket(), key))
        } else {
            let (scheme, rest) = endpoint.split_once("://").ok_or_else(|| {
                Error::InvalidInput(format!("S3 endpoint has no scheme: {}", endpoint))
            })?;
            object_url(
                &format!("{}://{}.{}", scheme, locator.bucket(), rest),
                &format!("/{}", key),
            )
        }
    }
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint: None,
            path_style: false,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Builds S3 sessions from access keys.
#[derive(Debug, Clone, Default)]
pub struct S3Connector {
    settings: S3Settings,
}

impl S3Connector {
    pub fn new(settings: S3Settings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl BackendConnector for S3Connector {
    async fn connect(&self, credentials: &Credentials) -> Result<Box<dyn StorageBackend>> {
        let http = Client::builder()
            .build()
            .map_err(|e| Error::Network(format!("Failed to build HTTP client: {}", e)))?;
        let signer = SigV4Signer::new(
            credentials.identity(),
            credentials.secret().clone(),
            self.settings.region.clone(),
        );

        tracing::info!(
            access_key_id = %credentials.identity(),
            region = %self.settings.region,
            "Prepared S3 session"
        );

        Ok(Box::new(S3Backend {
            http,
            settings: self.settings.clone(),
            signer,
        }))
    }
}

/// S3 session bound to one access key.
pub struct S3Backend {
    http: Client,
    settings: S3Settings,
    signer: SigV4Signer,
}

impl S3Backend {
    fn header_str<'a>(headers: &'a header::HeaderMap, name: header::HeaderName) -> Option<&'a str> {
        headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn provider(&self) -> Provider {
        Provider::AwsS3
    }

    async fn head_object(&self, locator: &ObjectLocator) -> Result<ObjectMetadata> {
        let url = self.settings.object_url(locator)?;
        let signed_headers = self.signer.sign_headers("HEAD", &url, Utc::now())?;

        let mut request = self
            .http
            .request(Method::HEAD, url)
            .timeout(self.settings.request_timeout());
        for (name, value) in signed_headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to head object: {}", e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("Object not found: {}", locator)));
        } else if status == StatusCode::FORBIDDEN {
            return Err(Error::PermissionDenied(format!("Access denied: {}", locator)));
        } else if status == StatusCode::UNAUTHORIZED {
            return Err(Error::Authentication(
                "Request signature was rejected".to_string(),
            ));
        } else if !status.is_success() {
            return Err(Error::Network(format!("API error: {}", status)));
        }

        // A HEAD response has no body, so read the header rather than
        // the body length.
        let headers = response.headers();
        let size = Self::header_str(headers, header::CONTENT_LENGTH)
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| {
                Error::Network(format!("Missing Content-Length for {}", locator))
            })?;

        Ok(ObjectMetadata {
            size,
            etag: Self::header_str(headers, header::ETAG).map(str::to_string),
            content_type: Self::header_str(headers, header::CONTENT_TYPE).map(str::to_string),
            updated: Self::header_str(headers, header::LAST_MODIFIED)
                .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
                .map(|t| t.with_timezone(&Utc)),
        })
    }

    async fn sign_get(
        &self,
        locator: &ObjectLocator,
        validity: Duration,
    ) -> Result<Option<SignedLink>> {
        let issued_at = Utc::now();
        let url = self.settings.object_url(locator)?;
        let url = self.signer.presign("GET", url, validity, issued_at)?;

        Ok(Some(SignedLink::new(url, validity, issued_at)))
    }

    fn close(&mut self) {
        tracing::debug!(access_key_id = %self.signer.access_key_id(), "S3 session closed");
    }
}
