//! Storage backend abstraction for cloudfetch.
//!
//! This module provides a trait-based interface over blob storage providers
//! (Google Cloud Storage, Amazon S3) and the pieces of the single-object
//! download pipeline that sit on top of it.
//!
//! # Design Principles
//! - Provider isolation: provider-specific auth, metadata and signing live
//!   behind [`StorageBackend`]
//! - Scoped sessions: a [`StorageContext`] is released exactly once
//! - Streaming: object bodies are never buffered whole in memory
//! - Unified error semantics: consistent error kinds across providers

pub mod backend;
pub mod context;
pub mod credentials;
pub mod download;
pub mod gcs;
pub mod memory;
pub mod registry;
pub mod s3;


pub use backend::{BackendConnector, ByteStream, ObjectMetadata, SignedLink, StorageBackend};
pub use context::{check_link_validity, StorageContext, MAX_LINK_VALIDITY, MIN_LINK_VALIDITY};
pub use credentials::{resolve, Credentials, RawCredentials};
pub use download::{fetch_to_storage, FetchResponse, HttpFetcher, LinkFetcher};
pub use gcs::{GcsConnector, GcsSettings};
pub use memory::{MemoryConnector, MemoryStats, MemoryStore};
pub use registry::{create_default_registry, ProviderRegistry, ProviderSettings};
pub use s3::{S3Connector, S3Settings};
