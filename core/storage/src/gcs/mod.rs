//! Google Cloud Storage backend.
//!
//! - Service-account authentication (JWT-bearer grant) with token caching
//! - Object metadata through the JSON API
//! - V4 signed GET links, computed locally from the account key

pub mod auth;
pub mod client;
pub mod signed_url;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use cloudfetch_common::{Error, ObjectLocator, Provider, Result};

use crate::backend::{BackendConnector, ObjectMetadata, SignedLink, StorageBackend};
use crate::credentials::Credentials;

pub use auth::{KeySigner, ServiceAccountKey, TokenManager};
pub use client::GcsClient;
pub use signed_url::SignedUrlBuilder;

fn default_storage_endpoint() -> String {
    "https://storage.googleapis.com".to_string()
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_scope() -> String {
    "https://www.googleapis.com/auth/devstorage.read_only".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Google Cloud Storage connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcsSettings {
    /// Base URL for the JSON API and for signed links.
    #[serde(default = "default_storage_endpoint")]
    pub storage_endpoint: String,
    /// OAuth2 token endpoint, also the JWT audience.
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    /// OAuth2 scope requested for the access token.
    #[serde(default = "default_scope")]
    pub scope: String,
    /// Timeout for metadata and token requests, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl GcsSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for GcsSettings {
    fn default() -> Self {
        Self {
            storage_endpoint: default_storage_endpoint(),
            token_uri: default_token_uri(),
            scope: default_scope(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Authenticates service accounts against Google Cloud Storage.
#[derive(Debug, Clone, Default)]
pub struct GcsConnector {
    settings: GcsSettings,
}

impl GcsConnector {
    pub fn new(settings: GcsSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl BackendConnector for GcsConnector {
    /// Decode the key and complete the token handshake.
    ///
    /// # Errors
    /// - `CredentialParse` if the secret is not an RSA private key
    /// - `Authentication` if the token endpoint rejects the assertion
    /// - `Network` if the token endpoint cannot be reached
    async fn connect(&self, credentials: &Credentials) -> Result<Box<dyn StorageBackend>> {
        let signer = KeySigner::from_pem(credentials.secret().expose())?;
        let http = Client::builder()
            .build()
            .map_err(|e| Error::Network(format!("Failed to build HTTP client: {}", e)))?;

        let token_manager = Arc::new(TokenManager::new(
            http.clone(),
            self.settings.clone(),
            signer,
            credentials.identity().to_string(),
        ));

        // Fail here on bad credentials rather than on the first request.
        token_manager.get_access_token().await?;

        tracing::info!(identity = %credentials.identity(), "Authenticated with Google Cloud Storage");

        let client = GcsClient::new(http, self.settings.clone(), token_manager.clone());
        Ok(Box::new(GcsBackend {
            settings: self.settings.clone(),
            client,
            token_manager,
        }))
    }
}

/// Authenticated Google Cloud Storage session.
pub struct GcsBackend {
    settings: GcsSettings,
    client: GcsClient,
    token_manager: Arc<TokenManager>,
}

#[async_trait]
impl StorageBackend for GcsBackend {
    fn provider(&self) -> Provider {
        Provider::GoogleCloud
    }

    async fn head_object(&self, locator: &ObjectLocator) -> Result<ObjectMetadata> {
        self.client.get_object(locator).await?.into_metadata()
    }

    async fn sign_get(
        &self,
        locator: &ObjectLocator,
        validity: Duration,
    ) -> Result<Option<SignedLink>> {
        let issued_at = Utc::now();
        let url = SignedUrlBuilder::new(locator)
            .with_expiration(validity)
            .with_endpoint(self.settings.storage_endpoint.clone())
            .sign_with(
                self.token_manager.signer(),
                self.token_manager.client_email(),
                issued_at,
            )?;

        Ok(Some(SignedLink::new(url, validity, issued_at)))
    }

    fn close(&mut self) {
        self.token_manager.clear();
        tracing::debug!(client_email = %self.token_manager.client_email(), "Google Cloud Storage session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcs::auth::tests::{test_key, TEST_CLIENT_EMAIL};
    use httptest::{matchers::*, responders::*, Expectation, Server};
    use serde_json::json;

    fn credentials() -> Credentials {
        Credentials::new(TEST_CLIENT_EMAIL, test_key().private_key)
    }

    fn settings_for(server: &Server) -> GcsSettings {
        GcsSettings {
            storage_endpoint: format!("http://{}", server.addr()),
            token_uri: format!("http://{}/token", server.addr()),
            ..GcsSettings::default()
        }
    }

    fn expect_token(server: &Server) {
        server.expect(
            Expectation::matching(request::method_path("POST", "/token")).respond_with(
                json_encoded(json!({"access_token": "ya29.session", "expires_in": 3600})),
            ),
        );
    }

    #[test]
    fn test_settings_defaults() {
        let settings: GcsSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.storage_endpoint, "https://storage.googleapis.com");
        assert_eq!(settings.token_uri, "https://oauth2.googleapis.com/token");
        assert_eq!(settings.request_timeout(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_connect_performs_handshake() {
        let server = Server::run();
        expect_token(&server);
        let connector = GcsConnector::new(settings_for(&server));

        let backend = connector.connect(&credentials()).await.unwrap();
        assert_eq!(backend.provider(), Provider::GoogleCloud);
    }

    #[tokio::test]
    async fn test_connect_rejected_credentials() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/token")).respond_with(
                status_code(401).body(r#"{"error": "invalid_client"}"#),
            ),
        );
        let connector = GcsConnector::new(settings_for(&server));

        let err = connector.connect(&credentials()).await.err().unwrap();
        assert!(matches!(err, Error::Authentication(_)));
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_key_before_any_request() {
        let server = Server::run();
        let connector = GcsConnector::new(settings_for(&server));
        let creds = Credentials::new(TEST_CLIENT_EMAIL, "not a key".to_string().into());

        let err = connector.connect(&creds).await.err().unwrap();
        assert!(matches!(err, Error::CredentialParse(_)));
    }

    #[tokio::test]
    async fn test_head_and_sign() {
        let server = Server::run();
        expect_token(&server);
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/storage/v1/b/demo_10k/o/account.csv"),
                request::headers(contains(("authorization", "Bearer ya29.session"))),
            ])
            .respond_with(json_encoded(json!({
                "name": "account.csv",
                "bucket": "demo_10k",
                "size": "500",
                "etag": "CJj4"
            }))),
        );
        let connector = GcsConnector::new(settings_for(&server));
        let mut backend = connector.connect(&credentials()).await.unwrap();
        let locator = ObjectLocator::new("demo_10k", "account.csv").unwrap();

        let metadata = backend.head_object(&locator).await.unwrap();
        assert_eq!(metadata.size, 500);
        assert_eq!(metadata.etag.as_deref(), Some("CJj4"));

        // Signing is local; the server expects no further request.
        let link = backend
            .sign_get(&locator, Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        assert!(link
            .url()
            .as_str()
            .starts_with(&format!("http://{}/demo_10k/account.csv?", server.addr())));
        assert_eq!(link.validity(), Duration::from_secs(60));
        backend.close();
    }

    #[tokio::test]
    async fn test_dot_segment_key_is_not_signed() {
        let server = Server::run();
        expect_token(&server);
        let connector = GcsConnector::new(settings_for(&server));
        let backend = connector.connect(&credentials()).await.unwrap();
        let locator = ObjectLocator::new("demo_10k", "reports/../secret.txt").unwrap();

        let err = backend
            .sign_get(&locator, Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
