//! Download failure reporting.

use std::fmt;

use cloudfetch_common::{Error, ErrorKind, Provider};

/// Progress of one download through the pipeline.
///
/// ```text
/// Init -> CredentialsResolved -> ContextOpen -> MetadataFetched
///      -> SizeOk -> LinkSigned -> Downloaded
///      -> SizeExceeded
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DownloadStage {
    Init,
    CredentialsResolved,
    ContextOpen,
    MetadataFetched,
    SizeOk,
    SizeExceeded,
    LinkSigned,
    Downloaded,
}

impl fmt::Display for DownloadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DownloadStage::Init => "init",
            DownloadStage::CredentialsResolved => "credentials-resolved",
            DownloadStage::ContextOpen => "context-open",
            DownloadStage::MetadataFetched => "metadata-fetched",
            DownloadStage::SizeOk => "size-ok",
            DownloadStage::SizeExceeded => "size-exceeded",
            DownloadStage::LinkSigned => "link-signed",
            DownloadStage::Downloaded => "downloaded",
        };
        f.write_str(name)
    }
}

/// A download or signing request that did not complete.
///
/// `stage` is the last stage reached before the failure.
#[derive(Debug, thiserror::Error)]
#[error("Failed to fetch {bucket}/{key} from {provider} (after stage {stage})")]
pub struct DownloadFailed {
    pub provider: Provider,
    pub bucket: String,
    pub key: String,
    pub stage: DownloadStage,
    #[source]
    pub source: Error,
}

impl DownloadFailed {
    /// Classification of the underlying error.
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_failure_exposes_kind_and_source() {
        let failure = DownloadFailed {
            provider: Provider::GoogleCloud,
            bucket: "demo_10k".to_string(),
            key: "account.csv".to_string(),
            stage: DownloadStage::SizeExceeded,
            source: Error::SizeLimitExceeded {
                size: 501,
                limit: 500,
            },
        };

        assert_eq!(failure.kind(), ErrorKind::SizeLimitExceeded);
        assert_eq!(
            failure.to_string(),
            "Failed to fetch demo_10k/account.csv from google-cloud-storage (after stage size-exceeded)"
        );
        assert!(failure
            .source()
            .unwrap()
            .to_string()
            .contains("exceeds limit of 500 bytes"));
    }
}
