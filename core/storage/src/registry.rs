//! Provider registry: maps each provider to the connector that opens
//! contexts for it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use cloudfetch_common::{Error, Provider, Result};

use crate::backend::BackendConnector;
use crate::context::StorageContext;
use crate::credentials::Credentials;
use crate::gcs::{GcsConnector, GcsSettings};
use crate::s3::{S3Connector, S3Settings};

/// Per-provider connection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub gcs: GcsSettings,
    #[serde(default)]
    pub s3: S3Settings,
}

/// Registry of backend connectors.
///
/// Resolution is by [`Provider`]; a provider without a connector is
/// unsupported in this registry.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    connectors: HashMap<Provider, Arc<dyn BackendConnector>>,
}

impl ProviderRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector.
    ///
    /// # Errors
    /// - Returns error if the provider is already registered
    pub fn register(
        &mut self,
        provider: Provider,
        connector: Arc<dyn BackendConnector>,
    ) -> Result<()> {
        if self.connectors.contains_key(&provider) {
            return Err(Error::InvalidInput(format!(
                "Provider '{}' is already registered",
                provider
            )));
        }
        self.connectors.insert(provider, connector);
        Ok(())
    }

    /// Authenticate and open a context for `provider`.
    ///
    /// # Errors
    /// - `UnsupportedProvider` if no connector is registered
    /// - Any handshake error from the connector
    pub async fn create_context(
        &self,
        provider: Provider,
        credentials: &Credentials,
    ) -> Result<StorageContext> {
        let connector = self.connectors.get(&provider).ok_or_else(|| {
            Error::UnsupportedProvider(format!("Provider '{}' is not registered", provider))
        })?;

        let backend = connector.connect(credentials).await?;
        tracing::debug!(provider = %provider, "Storage context opened");
        Ok(StorageContext::new(backend))
    }

    /// Registered providers, in declaration order.
    pub fn providers(&self) -> Vec<Provider> {
        Provider::ALL
            .iter()
            .copied()
            .filter(|p| self.connectors.contains_key(p))
            .collect()
    }

    /// Check if a provider is registered.
    pub fn has_provider(&self, provider: Provider) -> bool {
        self.connectors.contains_key(&provider)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}

/// Create a registry with the Google Cloud Storage and S3 connectors.
pub fn create_default_registry(settings: &ProviderSettings) -> ProviderRegistry {
    let mut connectors: HashMap<Provider, Arc<dyn BackendConnector>> = HashMap::new();
    for provider in Provider::ALL {
        let connector: Arc<dyn BackendConnector> = match provider {
            Provider::GoogleCloud => Arc::new(GcsConnector::new(settings.gcs.clone())),
            Provider::AwsS3 => Arc::new(S3Connector::new(settings.s3.clone())),
        };
        connectors.insert(provider, connector);
    }

    ProviderRegistry { connectors }
}
