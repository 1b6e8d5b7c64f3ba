//! In-memory storage backend for testing.
//!
//! Holds objects in process memory and counts every connect, head, sign,
//! fetch and close so callers can assert on the exact sequence of
//! provider operations. Signed links use a `memory://` scheme and are only
//! resolvable through the same store's [`LinkFetcher`] implementation.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use url::Url;
use uuid::Uuid;

use cloudfetch_common::{Error, ObjectLocator, Provider, Result, Secret};

use crate::backend::{BackendConnector, ObjectMetadata, SignedLink, StorageBackend};
use crate::context::StorageContext;
use crate::credentials::Credentials;
use crate::download::{FetchResponse, LinkFetcher};

/// Chunk size used when streaming object bodies.
const CHUNK_SIZE: usize = 256;

const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

/// Operation counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub connects: usize,
    pub heads: usize,
    pub signs: usize,
    pub fetches: usize,
    pub closes: usize,
    /// Validity requested by the most recent sign call.
    pub last_validity: Option<Duration>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    reported_size: Option<u64>,
    updated: DateTime<Utc>,
}

struct State {
    objects: HashMap<(String, String), StoredObject>,
    links: HashMap<String, (String, String)>,
    signing_enabled: bool,
    reject_credentials: bool,
    head_failures: Vec<fn() -> Error>,
    fetch_failure: Option<String>,
    stats: MemoryStats,
}

/// In-memory object store.
///
/// Clones share the same objects and counters.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    /// Create a new empty store with signing enabled.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State {
                objects: HashMap::new(),
                links: HashMap::new(),
                signing_enabled: true,
                reject_credentials: false,
                head_failures: Vec::new(),
                fetch_failure: None,
                stats: MemoryStats::default(),
            })),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Store an object, replacing any previous content.
    pub fn put(&self, bucket: &str, key: &str, data: Vec<u8>) {
        self.with_state(|state| {
            state.objects.insert(
                (bucket.to_string(), key.to_string()),
                StoredObject {
                    data: Bytes::from(data),
                    reported_size: None,
                    updated: Utc::now(),
                },
            );
        });
    }

    /// Make metadata report `size` for an existing object regardless of
    /// its content.
    pub fn set_reported_size(&self, bucket: &str, key: &str, size: u64) {
        self.with_state(|state| {
            if let Some(object) = state.objects.get_mut(&(bucket.to_string(), key.to_string())) {
                object.reported_size = Some(size);
            }
        });
    }

    /// When disabled, signing yields no link.
    pub fn set_signing_enabled(&self, enabled: bool) {
        self.with_state(|state| state.signing_enabled = enabled);
    }

    /// When set, connecting fails with `Authentication`.
    pub fn set_reject_credentials(&self, reject: bool) {
        self.with_state(|state| state.reject_credentials = reject);
    }

    /// Fail the next `count` metadata calls with the error `make` builds.
    pub fn fail_next_heads(&self, count: usize, make: fn() -> Error) {
        self.with_state(|state| state.head_failures.extend(std::iter::repeat(make).take(count)));
    }

    /// Make every fetch fail with a `Transfer` error carrying `message`.
    pub fn set_fetch_failure(&self, message: Option<&str>) {
        self.with_state(|state| state.fetch_failure = message.map(str::to_string));
    }

    /// Snapshot of the operation counters.
    pub fn stats(&self) -> MemoryStats {
        self.with_state(|state| state.stats.clone())
    }

    /// Connector producing backends that report `provider`.
    pub fn connector(&self, provider: Provider) -> MemoryConnector {
        MemoryConnector {
            store: self.clone(),
            provider,
        }
    }

    /// Open a context directly, bypassing credential resolution.
    pub async fn context(&self, provider: Provider) -> Result<StorageContext> {
        let credentials = Credentials::new("memory", Secret::new("memory"));
        let backend = self.connector(provider).connect(&credentials).await?;
        Ok(StorageContext::new(backend))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// [`BackendConnector`] over a [`MemoryStore`].
#[derive(Clone)]
pub struct MemoryConnector {
    store: MemoryStore,
    provider: Provider,
}

#[async_trait]
impl BackendConnector for MemoryConnector {
    async fn connect(&self, credentials: &Credentials) -> Result<Box<dyn StorageBackend>> {
        let reject = self.store.with_state(|state| {
            state.stats.connects += 1;
            state.reject_credentials
        });
        if reject {
            return Err(Error::Authentication(format!(
                "Credentials for '{}' were rejected",
                credentials.identity()
            )));
        }

        Ok(Box::new(MemoryBackend {
            store: self.store.clone(),
            provider: self.provider,
        }))
    }
}

struct MemoryBackend {
    store: MemoryStore,
    provider: Provider,
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn head_object(&self, locator: &ObjectLocator) -> Result<ObjectMetadata> {
        self.store.with_state(|state| -> Result<ObjectMetadata> {
            state.stats.heads += 1;
            if !state.head_failures.is_empty() {
                let make = state.head_failures.remove(0);
                return Err(make());
            }

            let object = state
                .objects
                .get(&(locator.bucket().to_string(), locator.key().to_string()))
                .ok_or_else(|| Error::NotFound(format!("Object not found: {}", locator)))?;

            Ok(ObjectMetadata {
                size: object.reported_size.unwrap_or(object.data.len() as u64),
                etag: None,
                content_type: None,
                updated: Some(object.updated),
            })
        })
    }

    async fn sign_get(
        &self,
        locator: &ObjectLocator,
        validity: Duration,
    ) -> Result<Option<SignedLink>> {
        self.store.with_state(|state| -> Result<Option<SignedLink>> {
            state.stats.signs += 1;
            state.stats.last_validity = Some(validity);

            let id = (locator.bucket().to_string(), locator.key().to_string());
            if !state.signing_enabled || !state.objects.contains_key(&id) {
                return Ok(None);
            }

            let url = Url::parse(&format!(
                "memory://store/{}/{}?token={}",
                utf8_percent_encode(locator.bucket(), KEY_ENCODE_SET),
                utf8_percent_encode(locator.key(), KEY_ENCODE_SET),
                Uuid::new_v4()
            ))
            .map_err(|e| Error::Signing(format!("Invalid memory link: {}", e)))?;

            state.links.insert(url.to_string(), id);
            Ok(Some(SignedLink::new(url, validity, Utc::now())))
        })
    }

    fn close(&mut self) {
        self.store.with_state(|state| state.stats.closes += 1);
    }
}

#[async_trait]
impl LinkFetcher for MemoryStore {
    async fn fetch(&self, link: &SignedLink) -> Result<FetchResponse> {
        let data = self.with_state(|state| {
            state.stats.fetches += 1;
            if let Some(message) = &state.fetch_failure {
                return Err(Error::Transfer(message.clone()));
            }

            state
                .links
                .get(link.url().as_str())
                .and_then(|id| state.objects.get(id))
                .map(|object| object.data.clone())
                .ok_or_else(|| Error::Transfer(format!("Unknown link: {}", link.redacted())))
        })?;

        let chunks: Vec<Result<Bytes>> = (0..data.len())
            .step_by(CHUNK_SIZE)
            .map(|start| Ok(data.slice(start..(start + CHUNK_SIZE).min(data.len()))))
            .collect();

        Ok(FetchResponse {
            content_length: Some(data.len() as u64),
            body: Box::pin(stream::iter(chunks)),
        })
    }
}
