//! AWS Signature Version 4 for S3.
//!
//! Two forms are supported: header signing (for the metadata `HEAD`) and
//! query presigning (for download links). Payloads are always
//! `UNSIGNED-PAYLOAD`.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};
use std::time::Duration;
use url::Url;

use cloudfetch_common::{Error, Result, Secret};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";
const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// RFC 3986 unreserved characters pass through; everything else is escaped.
const QUERY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Object keys keep their `/` separators.
pub(crate) const KEY_ENCODE_SET: &AsciiSet = &QUERY_ENCODE_SET.remove(b'/');

/// SigV4 signer for one access key in one region.
#[derive(Debug, Clone)]
pub struct SigV4Signer {
    access_key_id: String,
    secret_access_key: Secret,
    region: String,
}

impl SigV4Signer {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: Secret, region: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key,
            region: region.into(),
        }
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    /// Headers authorizing `method` on `url`: `x-amz-date`,
    /// `x-amz-content-sha256` and `authorization`.
    pub fn sign_headers(
        &self,
        method: &str,
        url: &Url,
        now: DateTime<Utc>,
    ) -> Result<Vec<(&'static str, String)>> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let scope = self.credential_scope(now);
        let signed_headers = "host;x-amz-content-sha256;x-amz-date";

        let canonical_headers = format!(
            "host:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n",
            host_header(url)?,
            UNSIGNED_PAYLOAD,
            amz_date
        );
        let canonical_request = [
            method,
            url.path(),
            canonical_query(url).as_str(),
            canonical_headers.as_str(),
            signed_headers,
            UNSIGNED_PAYLOAD,
        ]
        .join("\n");

        let signature = self.signature(&canonical_request, &amz_date, &scope, now)?;
        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, self.access_key_id, scope, signed_headers, signature
        );

        Ok(vec![
            ("x-amz-date", amz_date),
            ("x-amz-content-sha256", UNSIGNED_PAYLOAD.to_string()),
            ("authorization", authorization),
        ])
    }

    /// Presign `method` on `url` for `expires`, signing only `host`.
    pub fn presign(
        &self,
        method: &str,
        mut url: Url,
        expires: Duration,
        now: DateTime<Utc>,
    ) -> Result<Url> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let scope = self.credential_scope(now);

        url.query_pairs_mut()
            .append_pair("X-Amz-Algorithm", ALGORITHM)
            .append_pair(
                "X-Amz-Credential",
                &format!("{}/{}", self.access_key_id, scope),
            )
            .append_pair("X-Amz-Date", &amz_date)
            .append_pair("X-Amz-Expires", &expires.as_secs().to_string())
            .append_pair("X-Amz-SignedHeaders", "host");

        let query = canonical_query(&url);
        let canonical_request = [
            method,
            url.path(),
            query.as_str(),
            format!("host:{}\n", host_header(&url)?).as_str(),
            "host",
            UNSIGNED_PAYLOAD,
        ]
        .join("\n");

        let signature = self.signature(&canonical_request, &amz_date, &scope, now)?;
        url.set_query(Some(&format!("{}&X-Amz-Signature={}", query, signature)));

        Ok(url)
    }

    fn credential_scope(&self, now: DateTime<Utc>) -> String {
        format!(
            "{}/{}/{}/aws4_request",
            now.format("%Y%m%d"),
            self.region,
            SERVICE
        )
    }

    fn signature(
        &self,
        canonical_request: &str,
        amz_date: &str,
        scope: &str,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let k_date = hmac_sha256(
            format!("AWS4{}", self.secret_access_key.expose()).as_bytes(),
            now.format("%Y%m%d").to_string().as_bytes(),
        )?;
        let k_region = hmac_sha256(&k_date, self.region.as_bytes())?;
        let k_service = hmac_sha256(&k_region, SERVICE.as_bytes())?;
        let k_signing = hmac_sha256(&k_service, b"aws4_request")?;

        Ok(hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes())?))
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::Signing(format!("Invalid signing key: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// `host[:port]` as sent in the Host header.
fn host_header(url: &Url) -> Result<String> {
    let host = url
        .host_str()
        .ok_or_else(|| Error::Signing(format!("URL has no host: {}", url)))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Query pairs, re-encoded strictly and sorted by name then value.
fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            (
                utf8_percent_encode(&k, QUERY_ENCODE_SET).to_string(),
                utf8_percent_encode(&v, QUERY_ENCODE_SET).to_string(),
            )
        })
        .collect();
    pairs.sort();

    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}
