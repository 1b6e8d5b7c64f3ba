//! Google Cloud Storage JSON API client.

use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use url::Url;

use cloudfetch_common::{Error, ObjectLocator, Result};

use super::auth::TokenManager;
use super::GcsSettings;
use crate::backend::{object_url, ObjectMetadata};

/// Everything except RFC 3986 unreserved characters, `/` included.
const OBJECT_NAME_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Fields requested from the objects.get call.
const OBJECT_FIELDS: &str = "name,bucket,size,etag,contentType,updated";

/// Object resource from the JSON API.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcsObject {
    pub name: String,
    pub bucket: String,
    /// Size in bytes, as a decimal string.
    pub size: String,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
}

impl GcsObject {
    /// Convert to provider-neutral metadata.
    pub fn into_metadata(self) -> Result<ObjectMetadata> {
        let size = self.size.parse().map_err(|_| {
            Error::Network(format!("Invalid object size '{}' for {}", self.size, self.name))
        })?;
        Ok(ObjectMetadata {
            size,
            etag: self.etag,
            content_type: self.content_type,
            updated: self.updated,
        })
    }
}

/// Google Cloud Storage API client.
pub struct GcsClient {
    http: Client,
    settings: GcsSettings,
    token_manager: Arc<TokenManager>,
}

impl GcsClient {
    /// Create a new client.
    pub fn new(http: Client, settings: GcsSettings, token_manager: Arc<TokenManager>) -> Self {
        Self {
            http,
            settings,
            token_manager,
        }
    }

    /// Get authorization header.
    async fn auth_header(&self) -> Result<String> {
        let token = self.token_manager.get_access_token().await?;
        Ok(format!("Bearer {}", token))
    }

    fn object_url(&self, locator: &ObjectLocator) -> Result<Url> {
        object_url(
            &self.settings.storage_endpoint,
            &format!(
                "/storage/v1/b/{}/o/{}",
                utf8_percent_encode(locator.bucket(), OBJECT_NAME_ENCODE_SET),
                utf8_percent_encode(locator.key(), OBJECT_NAME_ENCODE_SET)
            ),
        )
    }

    /// Get object metadata. Never requests the media.
    pub async fn get_object(&self, locator: &ObjectLocator) -> Result<GcsObject> {
        let url = self.object_url(locator)?;
        let auth = self.auth_header().await?;

        let response = self
            .http
            .get(url)
            .header(header::AUTHORIZATION, auth)
            .query(&[("fields", OBJECT_FIELDS)])
            .timeout(self.settings.request_timeout())
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to get object: {}", e)))?;

        self.handle_response(response, locator).await
    }

    /// Handle API response with error checking.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
        locator: &ObjectLocator,
    ) -> Result<T> {
        let status = response.status();

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| Error::Network(format!("Failed to parse response: {}", e)))
        } else if status == StatusCode::NOT_FOUND {
            Err(Error::NotFound(format!("Object not found: {}", locator)))
        } else if status == StatusCode::UNAUTHORIZED {
            // The next call exchanges a new token instead of reusing this one.
            self.token_manager.clear();
            Err(Error::Authentication(
                "Invalid or expired token".to_string(),
            ))
        } else if status == StatusCode::FORBIDDEN {
            Err(Error::PermissionDenied(format!("Access denied: {}", locator)))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(Error::Network(format!("API error: {} - {}", status, body)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcs::auth::tests::{test_key, TEST_CLIENT_EMAIL};
    use crate::gcs::auth::KeySigner;
    use httptest::{matchers::*, responders::*, Expectation, Server};
    use serde_json::json;

    fn client_for(server: &Server) -> GcsClient {
        let settings = GcsSettings {
            storage_endpoint: format!("http://{}", server.addr()),
            token_uri: format!("http://{}/token", server.addr()),
            ..GcsSettings::default()
        };
        let signer = KeySigner::from_pem(test_key().private_key.expose()).unwrap();
        let tokens = Arc::new(TokenManager::new(
            Client::new(),
            settings.clone(),
            signer,
            TEST_CLIENT_EMAIL.to_string(),
        ));
        GcsClient::new(Client::new(), settings, tokens)
    }

    fn expect_token(server: &Server) {
        server.expect(
            Expectation::matching(request::method_path("POST", "/token")).respond_with(
                json_encoded(json!({"access_token": "ya29.test", "expires_in": 3600})),
            ),
        );
    }

    #[test]
    fn test_object_size_parsing() {
        let object: GcsObject = serde_json::from_str(
            r#"{"name": "account.csv", "bucket": "demo_10k", "size": "500", "contentType": "text/csv", "updated": "2024-03-01T10:00:00.000Z"}"#,
        )
        .unwrap();

        let metadata = object.into_metadata().unwrap();
        assert_eq!(metadata.size, 500);
        assert_eq!(metadata.content_type.as_deref(), Some("text/csv"));
        assert!(metadata.updated.is_some());
    }

    #[test]
    fn test_invalid_size_is_rejected() {
        let object = GcsObject {
            name: "x".to_string(),
            bucket: "b".to_string(),
            size: "lots".to_string(),
            etag: None,
            content_type: None,
            updated: None,
        };
        assert!(object.into_metadata().is_err());
    }

    #[tokio::test]
    async fn test_get_object_encodes_name_and_sends_token() {
        let server = Server::run();
        expect_token(&server);
        server.expect(
            Expectation::matching(all_of![
                request::method_path(
                    "GET",
                    "/storage/v1/b/demo_10k/o/exports%2Faccount%20list.csv"
                ),
                request::query(url_decoded(contains(("fields", any())))),
                request::query(url_decoded(not(contains(("alt", any()))))),
                request::headers(contains(("authorization", "Bearer ya29.test"))),
            ])
            .respond_with(json_encoded(json!({
                "name": "exports/account list.csv",
                "bucket": "demo_10k",
                "size": "500"
            }))),
        );
        let client = client_for(&server);
        let locator = ObjectLocator::new("demo_10k", "exports/account list.csv").unwrap();

        let object = client.get_object(&locator).await.unwrap();
        assert_eq!(object.size, "500");
    }

    #[tokio::test]
    async fn test_dot_segments_stay_inside_the_object_name() {
        let server = Server::run();
        expect_token(&server);
        server.expect(
            Expectation::matching(request::method_path(
                "GET",
                "/storage/v1/b/demo_10k/o/reports%2F..%2Fsecret.txt",
            ))
            .respond_with(json_encoded(json!({
                "name": "reports/../secret.txt",
                "bucket": "demo_10k",
                "size": "7"
            }))),
        );
        let client = client_for(&server);
        let locator = ObjectLocator::new("demo_10k", "reports/../secret.txt").unwrap();

        let object = client.get_object(&locator).await.unwrap();
        assert_eq!(object.name, "reports/../secret.txt");

        let bare = ObjectLocator::new("demo_10k", "..").unwrap();
        assert!(matches!(
            client.get_object(&bare).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_status_mapping() {
        for status in [404u16, 403, 401, 503] {
            let server = Server::run();
            expect_token(&server);
            server.expect(
                Expectation::matching(request::method_path(
                    "GET",
                    "/storage/v1/b/demo_10k/o/account.csv",
                ))
                .respond_with(status_code(status).body("{}")),
            );
            let client = client_for(&server);
            let locator = ObjectLocator::new("demo_10k", "account.csv").unwrap();

            let err = client.get_object(&locator).await.unwrap_err();
            match status {
                404 => assert!(matches!(err, Error::NotFound(_))),
                403 => assert!(matches!(err, Error::PermissionDenied(_))),
                401 => assert!(matches!(err, Error::Authentication(_))),
                _ => assert!(matches!(err, Error::Network(_))),
            }
        }
    }

    #[tokio::test]
    async fn test_unauthorized_discards_cached_token() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/token"))
                .times(2)
                .respond_with(cycle(vec![
                    Box::new(json_encoded(
                        json!({"access_token": "ya29.revoked", "expires_in": 3600}),
                    )) as Box<dyn Responder>,
                    Box::new(json_encoded(
                        json!({"access_token": "ya29.fresh", "expires_in": 3600}),
                    )),
                ])),
        );
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/storage/v1/b/demo_10k/o/account.csv"),
                request::headers(contains(("authorization", "Bearer ya29.revoked"))),
            ])
            .respond_with(status_code(401)),
        );
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/storage/v1/b/demo_10k/o/account.csv"),
                request::headers(contains(("authorization", "Bearer ya29.fresh"))),
            ])
            .respond_with(json_encoded(json!({
                "name": "account.csv",
                "bucket": "demo_10k",
                "size": "500"
            }))),
        );
        let client = client_for(&server);
        let locator = ObjectLocator::new("demo_10k", "account.csv").unwrap();

        let err = client.get_object(&locator).await.unwrap_err();
        assert!(err.is_retryable());

        let object = client.get_object(&locator).await.unwrap();
        assert_eq!(object.size, "500");
    }
}
