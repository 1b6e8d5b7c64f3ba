//! Common types used throughout cloudfetch.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Blob storage backend a session talks to.
///
/// The set is closed: every variant has exactly one wire identifier and
/// parsing anything else fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    /// Google Cloud Storage.
    #[serde(rename = "google-cloud-storage")]
    GoogleCloud,
    /// Amazon S3.
    #[serde(rename = "aws-s3")]
    AwsS3,
}

impl Provider {
    /// Every supported provider.
    pub const ALL: [Provider; 2] = [Provider::GoogleCloud, Provider::AwsS3];

    /// Provider identifier used on the wire and in configuration.
    pub fn wire_id(&self) -> &'static str {
        match self {
            Provider::GoogleCloud => "google-cloud-storage",
            Provider::AwsS3 => "aws-s3",
        }
    }

    /// Human-readable name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::GoogleCloud => "Google Cloud Storage",
            Provider::AwsS3 => "Amazon S3",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_id())
    }
}

impl FromStr for Provider {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google-cloud-storage" | "gcs" | "gcp" | "google" => Ok(Provider::GoogleCloud),
            "aws-s3" | "s3" | "aws" => Ok(Provider::AwsS3),
            other => Err(crate::Error::UnsupportedProvider(format!(
                "Unknown cloud provider: '{}'",
                other
            ))),
        }
    }
}

/// A single remote object, addressed by bucket and key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectLocator {
    bucket: String,
    key: String,
}

impl ObjectLocator {
    /// Create a new locator.
    ///
    /// # Errors
    /// - Returns error if bucket or key is empty
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> crate::Result<Self> {
        let bucket = bucket.into();
        let key = key.into();
        if bucket.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Bucket name cannot be empty".to_string(),
            ));
        }
        if key.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Object key cannot be empty".to_string(),
            ));
        }
        Ok(Self { bucket, key })
    }

    /// Bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Object key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Last `/`-separated segment of the key.
    pub fn file_name(&self) -> &str {
        self.key
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or(&self.key)
    }
}

impl fmt::Display for ObjectLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Secret key material that zeroizes on drop and never prints itself.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Secret(String);

impl Secret {
    /// Wrap secret material.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the secret value.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Get the length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret([REDACTED; {} bytes])", self.0.len())
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_provider_wire_ids() {
        assert_eq!(Provider::GoogleCloud.wire_id(), "google-cloud-storage");
        assert_eq!(Provider::AwsS3.wire_id(), "aws-s3");
    }

    #[test]
    fn test_provider_round_trips_through_wire_id() {
        for provider in Provider::ALL {
            assert_eq!(provider.wire_id().parse::<Provider>().unwrap(), provider);
        }
    }

    #[test]
    fn test_provider_aliases() {
        assert_eq!("GCP".parse::<Provider>().unwrap(), Provider::GoogleCloud);
        assert_eq!(" s3 ".parse::<Provider>().unwrap(), Provider::AwsS3);
    }

    #[test]
    fn test_unknown_provider_fails_closed() {
        let err = "azureblob".parse::<Provider>().unwrap_err();
        assert!(matches!(err, crate::Error::UnsupportedProvider(_)));
    }

    #[test]
    fn test_provider_serde_uses_wire_id() {
        let json = serde_json::to_string(&Provider::AwsS3).unwrap();
        assert_eq!(json, "\"aws-s3\"");
        let parsed: Provider = serde_json::from_str("\"google-cloud-storage\"").unwrap();
        assert_eq!(parsed, Provider::GoogleCloud);
    }

    #[test]
    fn test_locator_rejects_empty_parts() {
        assert!(ObjectLocator::new("", "account.csv").is_err());
        assert!(ObjectLocator::new("demo_10k", "").is_err());
    }

    #[test]
    fn test_locator_file_name() {
        let locator = ObjectLocator::new("demo_10k", "exports/2024/account.csv").unwrap();
        assert_eq!(locator.file_name(), "account.csv");
        assert_eq!(locator.to_string(), "demo_10k/exports/2024/account.csv");

        let trailing = ObjectLocator::new("b", "dir/").unwrap();
        assert_eq!(trailing.file_name(), "dir");
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = Secret::new("hunter2");
        let printed = format!("{:?}", secret);
        assert!(!printed.contains("hunter2"));
        assert_eq!(secret.expose(), "hunter2");
    }

    proptest! {
        #[test]
        fn prop_unknown_names_never_parse(name in "[a-z]{1,12}") {
            let known = ["gcs", "gcp", "google", "s3", "aws"];
            prop_assume!(!known.contains(&name.as_str()));
            prop_assert!(name.parse::<Provider>().is_err());
        }
    }
}
