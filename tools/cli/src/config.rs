//! Provider, credential and policy options shared by every command.
//!
//! Every option can also come from the environment (or a `.env` file):
//!
//! ```bash
//! CLOUDFETCH_PROVIDER=gcs \
//! GOOGLE_CLOUD_CREDENTIAL_PATH=./service-account.json \
//! cloudfetch download --bucket demo_10k --key account.csv
//! ```

use anyhow::{bail, Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

use cloudfetch_common::{Provider, Secret};
use cloudfetch_downloader::{DownloadPolicy, DEFAULT_MAX_DOWNLOAD_BYTES};
use cloudfetch_storage::{ProviderSettings, RawCredentials, S3Settings};

#[derive(Debug, Clone, Args)]
pub struct ProviderArgs {
    /// Cloud provider: google-cloud-storage (gcs) or aws-s3 (s3).
    #[arg(long, env = "CLOUDFETCH_PROVIDER", global = true)]
    pub provider: Option<String>,

    /// Service-account name (defaults to the key's client_email).
    #[arg(long, env = "GOOGLE_CLOUD_SERVICE_ACCOUNT", global = true)]
    pub service_account: Option<String>,

    /// Path to the service-account JSON key.
    #[arg(long, env = "GOOGLE_CLOUD_CREDENTIAL_PATH", global = true)]
    pub credential_path: Option<PathBuf>,

    /// S3 access key id.
    #[arg(long, env = "AWS_ACCESS_ID", global = true)]
    pub access_id: Option<String>,

    /// S3 secret access key.
    #[arg(long, env = "AWS_ACCESS_SECRET", hide_env_values = true, global = true)]
    pub access_secret: Option<String>,

    /// S3 signing region.
    #[arg(long, env = "AWS_REGION", default_value = "us-east-1", global = true)]
    pub region: String,

    /// Endpoint of an S3-compatible service.
    #[arg(long, env = "S3_ENDPOINT", global = true)]
    pub s3_endpoint: Option<String>,

    /// Use path-style S3 addressing.
    #[arg(long, global = true)]
    pub path_style: bool,

    /// Largest object accepted, in bytes.
    #[arg(
        long,
        env = "CLOUDFETCH_MAX_DOWNLOAD_BYTES",
        default_value_t = DEFAULT_MAX_DOWNLOAD_BYTES,
        global = true
    )]
    pub max_download_bytes: u64,

    /// Validity of signed links, in seconds.
    #[arg(
        long,
        env = "CLOUDFETCH_SIGNED_URL_VALIDITY_SECS",
        default_value_t = 60,
        global = true
    )]
    pub signed_url_validity_secs: u64,
}

impl ProviderArgs {
    pub fn provider(&self) -> Result<Provider> {
        let Some(name) = self.provider.as_deref() else {
            bail!("No provider configured; pass --provider or set CLOUDFETCH_PROVIDER");
        };
        name.parse().context("Invalid provider")
    }

    pub fn credentials(&self, provider: Provider) -> Result<RawCredentials> {
        match provider {
            Provider::GoogleCloud => {
                let key_path = self.credential_path.clone().context(
                    "Google Cloud Storage needs --credential-path or GOOGLE_CLOUD_CREDENTIAL_PATH",
                )?;
                Ok(RawCredentials::ServiceAccountKeyFile {
                    identity: self.service_account.clone(),
                    key_path,
                })
            }
            Provider::AwsS3 => {
                let (Some(access_key_id), Some(secret)) = (&self.access_id, &self.access_secret)
                else {
                    bail!("S3 needs --access-id and --access-secret (AWS_ACCESS_ID, AWS_ACCESS_SECRET)");
                };
                Ok(RawCredentials::AccessKey {
                    access_key_id: access_key_id.clone(),
                    secret_access_key: Secret::new(secret.clone()),
                })
            }
        }
    }

    pub fn settings(&self) -> ProviderSettings {
        ProviderSettings {
            s3: S3Settings {
                region: self.region.clone(),
                endpoint: self.s3_endpoint.clone(),
                path_style: self.path_style,
                ..S3Settings::default()
            },
            ..ProviderSettings::default()
        }
    }

    pub fn policy(&self) -> DownloadPolicy {
        DownloadPolicy::default()
            .with_max_download_bytes(self.max_download_bytes)
            .with_signed_url_validity(Duration::from_secs(self.signed_url_validity_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: ProviderArgs,
    }

    fn parse(argv: &[&str]) -> ProviderArgs {
        let mut full = vec!["cloudfetch"];
        full.extend_from_slice(argv);
        TestCli::try_parse_from(full).unwrap().args
    }

    #[test]
    fn test_gcs_credentials() {
        let args = parse(&[
            "--provider",
            "gcs",
            "--credential-path",
            "/etc/cloudfetch/key.json",
            "--service-account",
            "fetcher@demo.iam.gserviceaccount.com",
        ]);

        let provider = args.provider().unwrap();
        assert_eq!(provider, Provider::GoogleCloud);
        match args.credentials(provider).unwrap() {
            RawCredentials::ServiceAccountKeyFile { identity, key_path } => {
                assert_eq!(identity.as_deref(), Some("fetcher@demo.iam.gserviceaccount.com"));
                assert_eq!(key_path, PathBuf::from("/etc/cloudfetch/key.json"));
            }
            other => panic!("unexpected credentials: {:?}", other),
        }
    }

    #[test]
    fn test_s3_requires_both_key_parts() {
        let args = parse(&["--provider", "s3", "--access-id", "AKIA"]);
        let provider = args.provider().unwrap();
        assert!(args.credentials(provider).is_err());
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        let args = parse(&["--provider", "azure"]);
        assert!(args.provider().is_err());
    }

    #[test]
    fn test_policy_from_flags() {
        let args = parse(&[
            "--max-download-bytes",
            "500",
            "--signed-url-validity-secs",
            "120",
        ]);
        let policy = args.policy();
        assert_eq!(policy.max_download_bytes, 500);
        assert_eq!(policy.signed_url_validity, Duration::from_secs(120));
    }

    #[test]
    fn test_s3_settings_from_flags() {
        let args = parse(&[
            "--s3-endpoint",
            "http://localhost:9000",
            "--path-style",
            "--region",
            "eu-central-1",
        ]);
        let settings = args.settings();
        assert_eq!(settings.s3.endpoint.as_deref(), Some("http://localhost:9000"));
        assert!(settings.s3.path_style);
        assert_eq!(settings.s3.region, "eu-central-1");
    }
}
