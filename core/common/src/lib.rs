//! Common utilities and types shared across the cloudfetch crates.
//!
//! This module provides the error taxonomy and the small value types
//! (provider selector, object locator, secrets) that every layer of the
//! download pipeline speaks.

pub mod error;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use types::{ObjectLocator, Provider, Secret};
