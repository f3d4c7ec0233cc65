//! Secret storage abstraction.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`SecretStore`] - Trait for secret storage backends
//! - [`MemoryStore`] - In-memory implementation for testing
//! - [`KeyringStore`] - OS keyring implementation (with `keyring-store` feature)
//! - [`detect_backend`] - Picks a usable persistent backend
//!
//! # Storage Key Convention
//!
//! Keys follow the pattern: `{service}/{account}`, for example
//! `avocavo-nutrition/default`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

mod memory;
#[cfg(feature = "keyring-store")]
mod keyring;

pub use memory::MemoryStore;
#[cfg(feature = "keyring-store")]
pub use keyring::KeyringStore;

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value,
/// and the buffer is wiped when the secret is dropped.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Consume the secret and return the inner value.
    pub fn into_inner(mut self) -> String {
        std::mem::take(&mut self.0)
    }

    /// First `visible` characters followed by `...`, for display.
    pub fn masked(&self, visible: usize) -> String {
        let prefix: String = self.0.chars().take(visible).collect();
        format!("{prefix}...")
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// Error type for secret store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Access to the secret was denied.
    #[error("access denied to secret: {key}")]
    AccessDenied { key: String },

    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    BackendError { message: String },

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The keyring backend is not available.
    #[error("keyring not available: {message}")]
    KeyringUnavailable { message: String },
}

/// Abstraction over secret storage backends.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Retrieve a secret by key.
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError>;

    /// Store a secret at the given key.
    ///
    /// Overwrites any existing value.
    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError>;

    /// Delete a secret by key.
    ///
    /// Returns `Ok(())` even if the key didn't exist.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Check if a key exists without retrieving the value.
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Probe for a persistent secret backend.
///
/// Returns `None` when no OS keyring can be used, either because the
/// `keyring-store` feature is disabled or because the platform has no
/// keyring service. Callers treat `None` as "persistence unavailable"
/// rather than as an error.
pub fn detect_backend(service_name: &str) -> Option<Box<dyn SecretStore>> {
    #[cfg(feature = "keyring-store")]
    {
        match KeyringStore::try_new(service_name) {
            Ok(store) => {
                tracing::debug!("Using OS keyring for credential storage");
                return Some(Box::new(store));
            }
            Err(e) => {
                tracing::warn!(
                    "Keyring unavailable ({}), credentials will not persist across runs",
                    e
                );
            }
        }
    }

    #[cfg(not(feature = "keyring-store"))]
    tracing::debug!(
        "keyring-store feature not enabled, no persistent backend for {}",
        service_name
    );

    None
}
