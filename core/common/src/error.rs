//! Common error types for cloudfetch.

use std::fmt;

use thiserror::Error;

/// Top-level error type for storage and transfer operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Credential material is missing, unreadable or malformed.
    #[error("Credential error: {0}")]
    CredentialParse(String),

    /// The provider selector is not one this build knows how to serve.
    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    /// The provider rejected our identity.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Object or bucket not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Credentials are valid but lack access to the resource.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Transport-level or unexpected provider response failure.
    #[error("Network error: {0}")]
    Network(String),

    /// Object is larger than the configured download limit.
    #[error("Object size {size} bytes exceeds limit of {limit} bytes")]
    SizeLimitExceeded { size: u64, limit: u64 },

    /// A signed link could not be produced.
    #[error("Signing failed: {0}")]
    Signing(String),

    /// The body transfer failed after the link was issued.
    #[error("Transfer failed: {0}")]
    Transfer(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The storage context was used after it had been released.
    #[error("Storage context is closed")]
    ContextClosed,
}

/// Coarse classification of an [`Error`], stable across variants that
/// describe the same failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    CredentialParse,
    UnsupportedProvider,
    Authentication,
    ObjectNotFound,
    Authorization,
    ProviderRequest,
    SizeLimitExceeded,
    Signing,
    TransferIo,
    InvalidInput,
    ContextClosed,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::CredentialParse(_) => ErrorKind::CredentialParse,
            Error::UnsupportedProvider(_) => ErrorKind::UnsupportedProvider,
            Error::Authentication(_) => ErrorKind::Authentication,
            Error::NotFound(_) => ErrorKind::ObjectNotFound,
            Error::PermissionDenied(_) => ErrorKind::Authorization,
            Error::Network(_) => ErrorKind::ProviderRequest,
            Error::SizeLimitExceeded { .. } => ErrorKind::SizeLimitExceeded,
            Error::Signing(_) => ErrorKind::Signing,
            Error::Transfer(_) | Error::Io(_) => ErrorKind::TransferIo,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::ContextClosed => ErrorKind::ContextClosed,
        }
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Only transient provider requests and authentication handshakes
    /// qualify. Policy and configuration errors never do.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::ProviderRequest | ErrorKind::Authentication)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::CredentialParse => "credential-parse",
            ErrorKind::UnsupportedProvider => "unsupported-provider",
            ErrorKind::Authentication => "authentication",
            ErrorKind::ObjectNotFound => "object-not-found",
            ErrorKind::Authorization => "authorization",
            ErrorKind::ProviderRequest => "provider-request",
            ErrorKind::SizeLimitExceeded => "size-limit-exceeded",
            ErrorKind::Signing => "signing",
            ErrorKind::TransferIo => "transfer-io",
            ErrorKind::InvalidInput => "invalid-input",
            ErrorKind::ContextClosed => "context-closed",
        };
        f.write_str(name)
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_classify_as_transfer() {
        let err: Error = std::io::Error::other("disk full").into();
        assert_eq!(err.kind(), ErrorKind::TransferIo);
        assert_eq!(Error::Transfer("reset".into()).kind(), ErrorKind::TransferIo);
    }

    #[test]
    fn test_only_transient_errors_are_retryable() {
        assert!(Error::Network("timeout".into()).is_retryable());
        assert!(Error::Authentication("token".into()).is_retryable());

        assert!(!Error::SizeLimitExceeded { size: 2, limit: 1 }.is_retryable());
        assert!(!Error::UnsupportedProvider("azure".into()).is_retryable());
        assert!(!Error::NotFound("x".into()).is_retryable());
        assert!(!Error::Signing("x".into()).is_retryable());
    }

    #[test]
    fn test_size_limit_message() {
        let err = Error::SizeLimitExceeded { size: 11, limit: 10 };
        assert_eq!(
            err.to_string(),
            "Object size 11 bytes exceeds limit of 10 bytes"
        );
    }
}
