//! V4 signed URLs for Google Cloud Storage.
//!
//! Links are path-style (`{endpoint}/{bucket}/{object}`) and signed with
//! `GOOG4-RSA-SHA256` over the service-account key. No request is made.

use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

use cloudfetch_common::{Error, ObjectLocator, Result};

use super::auth::KeySigner;
use crate::backend::object_url;

const SIGNING_ALGORITHM: &str = "GOOG4-RSA-SHA256";

/// https://cloud.google.com/storage/docs/request-endpoints#encoding
const PATH_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'\\')
    .add(b'`')
    .add(b'{')
    .add(b'}');

const QUERY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// A builder for creating signed GET URLs.
pub struct SignedUrlBuilder<'a> {
    locator: &'a ObjectLocator,
    method: &'static str,
    expiration: Duration,
    endpoint: String,
}

impl<'a> SignedUrlBuilder<'a> {
    pub fn new(locator: &'a ObjectLocator) -> Self {
        Self {
            locator,
            method: "GET",
            expiration: Duration::from_secs(60),
            endpoint: "https://storage.googleapis.com".to_string(),
        }
    }

    /// Sets the expiration time for the signed URL. Default is 60 seconds.
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    /// Sets the endpoint. Default is "https://storage.googleapis.com".
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sign the URL as `client_email`, dated `now`.
    ///
    /// # Errors
    /// - `Signing` if the endpoint is not an absolute URL with a host
    /// - `InvalidInput` if the bucket or key has a `.` or `..` segment
    pub fn sign_with(
        self,
        signer: &KeySigner,
        client_email: &str,
        now: DateTime<Utc>,
    ) -> Result<Url> {
        let request = self.canonicalize(client_email, now)?;

        let string_to_sign = request.string_to_sign();
        let signature = hex::encode(signer.sign(string_to_sign.as_bytes()));

        let signed_url = format!(
            "{}{}?{}&X-Goog-Signature={}",
            request.scheme_and_host, request.canonical_uri, request.canonical_query, signature
        );

        Url::parse(&signed_url)
            .map_err(|e| Error::Signing(format!("Failed to assemble signed url: {}", e)))
    }

    fn canonicalize(&self, client_email: &str, now: DateTime<Utc>) -> Result<CanonicalRequest> {
        let endpoint = Url::parse(&self.endpoint)
            .map_err(|e| Error::Signing(format!("Invalid storage endpoint: {}", e)))?;
        let host = match (endpoint.host_str(), endpoint.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(Error::Signing(format!(
                    "Storage endpoint has no host: {}",
                    self.endpoint
                )))
            }
        };

        let canonical_uri = format!(
            "/{}/{}",
            utf8_percent_encode(self.locator.bucket(), PATH_ENCODE_SET),
            utf8_percent_encode(self.locator.key(), PATH_ENCODE_SET)
        );

        let scheme_and_host = format!("{}://{}", endpoint.scheme(), host);
        object_url(&scheme_and_host, &canonical_uri)?;

        let request_timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
        let credential_scope = format!("{}/auto/storage/goog4_request", now.format("%Y%m%d"));

        let mut query_parameters = BTreeMap::new();
        query_parameters.insert("X-Goog-Algorithm", SIGNING_ALGORITHM.to_string());
        query_parameters.insert(
            "X-Goog-Credential",
            format!("{}/{}", client_email, credential_scope),
        );
        query_parameters.insert("X-Goog-Date", request_timestamp.clone());
        query_parameters.insert("X-Goog-Expires", self.expiration.as_secs().to_string());
        query_parameters.insert("X-Goog-SignedHeaders", "host".to_string());

        let canonical_query = query_parameters
            .iter()
            .map(|(k, v)| format!("{}={}", k, utf8_percent_encode(v, QUERY_ENCODE_SET)))
            .collect::<Vec<_>>()
            .join("&");

        Ok(CanonicalRequest {
            method: self.method,
            scheme_and_host,
            host,
            canonical_uri,
            canonical_query,
            request_timestamp,
            credential_scope,
        })
    }
}

struct CanonicalRequest {
    method: &'static str,
    scheme_and_host: String,
    host: String,
    canonical_uri: String,
    canonical_query: String,
    request_timestamp: String,
    credential_scope: String,
}

impl CanonicalRequest {
    fn to_canonical_string(&self) -> String {
        [
            self.method,
            self.canonical_uri.as_str(),
            self.canonical_query.as_str(),
            format!("host:{}\n", self.host).as_str(),
            "host",
            "UNSIGNED-PAYLOAD",
        ]
        .join("\n")
    }

    fn string_to_sign(&self) -> String {
        let canonical_request_hash = hex::encode(Sha256::digest(self.to_canonical_string()));

        [
            SIGNING_ALGORITHM,
            self.request_timestamp.as_str(),
            self.credential_scope.as_str(),
            canonical_request_hash.as_str(),
        ]
        .join("\n")
    }
}
