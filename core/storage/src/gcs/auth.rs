//! Service-account authentication for Google Cloud Storage.

use base64::prelude::{Engine as _, BASE64_URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, StatusCode};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::RwLock;

use cloudfetch_common::{Error, Result, Secret};

use super::GcsSettings;
use crate::credentials::deserialize_secret;

/// OAuth2 grant type for exchanging a signed JWT.
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Lifetime requested for the JWT assertion.
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Fallback token lifetime when the endpoint omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;
/// Tokens this close to expiry are refreshed before use.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 300;

/// A service-account JSON key document.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    /// Document type; `service_account` when present.
    #[serde(rename = "type", default)]
    pub key_type: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub private_key_id: Option<String>,
    /// PEM-encoded RSA private key.
    #[serde(deserialize_with = "deserialize_secret")]
    pub private_key: Secret,
    /// Service-account email.
    pub client_email: String,
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl ServiceAccountKey {
    /// Parse a key document.
    ///
    /// # Errors
    /// - `CredentialParse` if the document is not valid JSON, is not a
    ///   service-account key, or lacks an email or private key
    pub fn from_json(contents: &str) -> Result<Self> {
        let key: ServiceAccountKey = serde_json::from_str(contents)
            .map_err(|e| Error::CredentialParse(format!("Invalid service account key: {}", e)))?;

        if let Some(key_type) = &key.key_type {
            if key_type != "service_account" {
                return Err(Error::CredentialParse(format!(
                    "Expected a service_account key, found '{}'",
                    key_type
                )));
            }
        }
        if key.client_email.is_empty() {
            return Err(Error::CredentialParse(
                "Service account key has no client_email".to_string(),
            ));
        }
        if key.private_key.is_empty() {
            return Err(Error::CredentialParse(
                "Service account key has no private_key".to_string(),
            ));
        }

        Ok(key)
    }
}

/// RSA-SHA256 (PKCS#1 v1.5) signer over a service-account private key.
pub struct KeySigner {
    key: SigningKey<Sha256>,
}

impl KeySigner {
    /// Decode a PEM private key, PKCS#8 or PKCS#1.
    ///
    /// # Errors
    /// - `CredentialParse` if the PEM does not hold an RSA private key
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| Error::CredentialParse(format!("Invalid RSA private key: {}", e)))?;

        Ok(Self {
            key: SigningKey::<Sha256>::new(key),
        })
    }

    /// Sign `content`, returning the raw signature bytes.
    pub fn sign(&self, content: &[u8]) -> Vec<u8> {
        self.key.sign(content).to_vec()
    }
}

impl std::fmt::Debug for KeySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeySigner([REDACTED])")
    }
}

#[derive(Serialize)]
struct JwsHeader<'a> {
    alg: &'a str,
    typ: &'a str,
}

#[derive(Serialize)]
struct JwsClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// Build a signed JWT assertion for the JWT-bearer grant.
pub fn build_assertion(
    signer: &KeySigner,
    client_email: &str,
    scope: &str,
    audience: &str,
    now: DateTime<Utc>,
) -> Result<String> {
    let header = JwsHeader {
        alg: "RS256",
        typ: "JWT",
    };
    let claims = JwsClaims {
        iss: client_email,
        scope,
        aud: audience,
        iat: now.timestamp(),
        exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
    };

    let header = serde_json::to_vec(&header)
        .map_err(|e| Error::Authentication(format!("Failed to encode JWT header: {}", e)))?;
    let claims = serde_json::to_vec(&claims)
        .map_err(|e| Error::Authentication(format!("Failed to encode JWT claims: {}", e)))?;

    let signing_input = format!(
        "{}.{}",
        BASE64_URL_SAFE_NO_PAD.encode(header),
        BASE64_URL_SAFE_NO_PAD.encode(claims)
    );
    let signature = BASE64_URL_SAFE_NO_PAD.encode(signer.sign(signing_input.as_bytes()));

    Ok(format!("{}.{}", signing_input, signature))
}

/// OAuth2 access token with expiration tracking.
#[derive(Debug, Clone)]
pub struct AccessToken {
    /// Bearer token for API requests.
    pub token: Secret,
    /// When the token expires.
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Check if the token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now() + Duration::seconds(TOKEN_REFRESH_MARGIN_SECS)
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Exchange a signed assertion for an access token.
///
/// # Errors
/// - `Authentication` if the token endpoint rejects the assertion
/// - `Network` on transport failure or an unexpected response
pub async fn exchange_assertion(
    http: &Client,
    settings: &GcsSettings,
    assertion: &str,
) -> Result<AccessToken> {
    let response = http
        .post(&settings.token_uri)
        .timeout(settings.request_timeout())
        .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion)])
        .send()
        .await
        .map_err(|e| Error::Network(format!("Token exchange failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(match status {
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Error::Authentication(format!("Token exchange rejected: {} - {}", status, body))
            }
            _ => Error::Network(format!("Token exchange failed: {} - {}", status, body)),
        });
    }

    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| Error::Network(format!("Failed to parse token response: {}", e)))?;

    let lifetime = token.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);

    Ok(AccessToken {
        token: Secret::new(token.access_token),
        expires_at: Utc::now() + Duration::seconds(lifetime),
    })
}

/// Token manager that fetches and refreshes access tokens for one
/// service account.
pub struct TokenManager {
    http: Client,
    settings: GcsSettings,
    signer: KeySigner,
    client_email: String,
    token: RwLock<Option<AccessToken>>,
}

impl TokenManager {
    /// Create a token manager. No request is made until a token is needed.
    pub fn new(http: Client, settings: GcsSettings, signer: KeySigner, client_email: String) -> Self {
        Self {
            http,
            settings,
            signer,
            client_email,
            token: RwLock::new(None),
        }
    }

    /// Service-account email this manager authenticates as.
    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    /// Signer over the service-account key.
    pub fn signer(&self) -> &KeySigner {
        &self.signer
    }

    /// Get a valid access token, fetching or refreshing if necessary.
    ///
    /// # Errors
    /// - Token exchange failed
    pub async fn get_access_token(&self) -> Result<String> {
        let token = self.token.read().await;

        if let Some(token) = token.as_ref().filter(|t| !t.is_expired()) {
            return Ok(token.token.expose().to_string());
        }

        drop(token);

        let mut token = self.token.write().await;

        // Double-check after acquiring write lock
        if let Some(token) = token.as_ref().filter(|t| !t.is_expired()) {
            return Ok(token.token.expose().to_string());
        }

        tracing::debug!(client_email = %self.client_email, "Requesting access token");

        let assertion = build_assertion(
            &self.signer,
            &self.client_email,
            &self.settings.scope,
            &self.settings.token_uri,
            Utc::now(),
        )?;
        let fresh = exchange_assertion(&self.http, &self.settings, &assertion).await?;
        let value = fresh.token.expose().to_string();
        *token = Some(fresh);

        Ok(value)
    }

    /// Drop the cached token so the next request exchanges a new one.
    /// A no-op while a refresh holds the lock.
    pub fn clear(&self) {
        if let Ok(mut token) = self.token.try_write() {
            *token = None;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use httptest::{matchers::*, responders::*, Expectation, Server};
    use rsa::pkcs1v15::{Signature, VerifyingKey};
    use serde_json::json;
    use rsa::signature::Verifier;

    pub(crate) const TEST_KEY_JSON: &str = include_str!("../../testdata/service-account.json");
    pub(crate) const TEST_CLIENT_EMAIL: &str = "fetcher@cloudfetch-test.iam.gserviceaccount.com";

    pub(crate) fn test_key() -> ServiceAccountKey {
        ServiceAccountKey::from_json(TEST_KEY_JSON).unwrap()
    }

    pub(crate) fn verifying_key() -> VerifyingKey<Sha256> {
        let key = RsaPrivateKey::from_pkcs8_pem(test_key().private_key.expose()).unwrap();
        VerifyingKey::<Sha256>::new(key.to_public_key())
    }

    #[test]
    fn test_parse_service_account_key() {
        let key = test_key();
        assert_eq!(key.client_email, TEST_CLIENT_EMAIL);
        assert_eq!(key.project_id.as_deref(), Some("cloudfetch-test"));
        assert!(!format!("{:?}", key).contains("BEGIN PRIVATE KEY"));
    }

    #[test]
    fn test_reject_non_service_account_document() {
        let err = ServiceAccountKey::from_json(
            r#"{"type": "authorized_user", "client_email": "a@b", "private_key": "x"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::CredentialParse(_)));
    }

    #[test]
    fn test_signer_signature_verifies() {
        let signer = KeySigner::from_pem(test_key().private_key.expose()).unwrap();
        let signature = signer.sign(b"GOOG4-RSA-SHA256\n20240101T000000Z");

        let signature = Signature::try_from(signature.as_slice()).unwrap();
        verifying_key()
            .verify(b"GOOG4-RSA-SHA256\n20240101T000000Z", &signature)
            .unwrap();
    }

    #[test]
    fn test_assertion_structure() {
        let signer = KeySigner::from_pem(test_key().private_key.expose()).unwrap();
        let now = Utc::now();
        let assertion = build_assertion(
            &signer,
            TEST_CLIENT_EMAIL,
            "https://www.googleapis.com/auth/devstorage.read_only",
            "https://oauth2.googleapis.com/token",
            now,
        )
        .unwrap();

        let parts: Vec<&str> = assertion.split('.').collect();
        assert_eq!(parts.len(), 3);

        let header: serde_json::Value =
            serde_json::from_slice(&BASE64_URL_SAFE_NO_PAD.decode(parts[0]).unwrap()).unwrap();
        assert_eq!(header["alg"], "RS256");

        let claims: serde_json::Value =
            serde_json::from_slice(&BASE64_URL_SAFE_NO_PAD.decode(parts[1]).unwrap()).unwrap();
        assert_eq!(claims["iss"], TEST_CLIENT_EMAIL);
        assert_eq!(claims["aud"], "https://oauth2.googleapis.com/token");
        assert_eq!(claims["exp"].as_i64().unwrap() - claims["iat"].as_i64().unwrap(), 3600);

        let signature = BASE64_URL_SAFE_NO_PAD.decode(parts[2]).unwrap();
        let signature = Signature::try_from(signature.as_slice()).unwrap();
        let signing_input = format!("{}.{}", parts[0], parts[1]);
        verifying_key()
            .verify(signing_input.as_bytes(), &signature)
            .unwrap();
    }

    #[test]
    fn test_token_expiration() {
        let expired = AccessToken {
            token: Secret::new("t"),
            expires_at: Utc::now() + Duration::minutes(4),
        };
        assert!(expired.is_expired());

        let valid = AccessToken {
            token: Secret::new("t"),
            expires_at: Utc::now() + Duration::minutes(6),
        };
        assert!(!valid.is_expired());
    }

    #[tokio::test]
    async fn test_exchange_assertion_success() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/token"),
                request::body(url_decoded(contains(("grant_type", JWT_BEARER_GRANT)))),
                request::body(url_decoded(contains(("assertion", "a.b.c")))),
            ])
            .respond_with(json_encoded(json!({
                "access_token": "ya29.test",
                "expires_in": 3599,
                "token_type": "Bearer"
            }))),
        );
        let settings = GcsSettings {
            token_uri: format!("http://{}/token", server.addr()),
            ..GcsSettings::default()
        };

        let token = exchange_assertion(&Client::new(), &settings, "a.b.c")
            .await
            .unwrap();

        assert_eq!(token.token.expose(), "ya29.test");
        assert!(!token.is_expired());
    }

    #[tokio::test]
    async fn test_exchange_assertion_rejected() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/token")).respond_with(
                status_code(400)
                    .insert_header("Content-Type", "application/json")
                    .body(r#"{"error": "invalid_grant"}"#),
            ),
        );
        let settings = GcsSettings {
            token_uri: format!("http://{}/token", server.addr()),
            ..GcsSettings::default()
        };

        let err = exchange_assertion(&Client::new(), &settings, "a.b.c")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
    }

    #[tokio::test]
    async fn test_token_manager_caches_token() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/token"))
                .times(2)
                .respond_with(json_encoded(json!({
                    "access_token": "ya29.cached",
                    "expires_in": 3600
                }))),
        );
        let settings = GcsSettings {
            token_uri: format!("http://{}/token", server.addr()),
            ..GcsSettings::default()
        };
        let signer = KeySigner::from_pem(test_key().private_key.expose()).unwrap();
        let manager =
            TokenManager::new(Client::new(), settings, signer, TEST_CLIENT_EMAIL.to_string());

        assert_eq!(manager.get_access_token().await.unwrap(), "ya29.cached");
        assert_eq!(manager.get_access_token().await.unwrap(), "ya29.cached");

        manager.clear();
        assert!(manager.token.read().await.is_none());
        assert_eq!(manager.get_access_token().await.unwrap(), "ya29.cached");
    }
}
