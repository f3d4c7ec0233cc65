//! OS keyring-backed secret storage implementation.

use async_trait::async_trait;
use keyring::Entry;

use super::{Secret, SecretStore, StoreError};

/// OS keyring-backed secret store.
///
/// Uses the platform's native keyring service:
/// - macOS: Keychain
/// - Linux: Secret Service API (via libsecret)
/// - Windows: Credential Manager
///
/// Each key maps to one keyring entry whose service is `{service_name}` and
/// whose user is the key itself.
pub struct KeyringStore {
    service_name: String,
}

impl KeyringStore {
    /// Try to create a new keyring store.
    ///
    /// Returns an error if the keyring backend is not available on this platform.
    pub fn try_new(service_name: &str) -> Result<Self, StoreError> {
        match Entry::new(service_name, "availability_check") {
            Ok(_) => Ok(Self {
                service_name: service_name.to_string(),
            }),
            Err(e) => Err(StoreError::KeyringUnavailable {
                message: format!("keyring backend not available: {}", e),
            }),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, StoreError> {
        Entry::new(&self.service_name, key).map_err(|e| StoreError::BackendError {
            message: format!("failed to create keyring entry: {}", e),
        })
    }
}

impl std::fmt::Debug for KeyringStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringStore")
            .field("service_name", &self.service_name)
            .finish()
    }
}

#[async_trait]
impl SecretStore for KeyringStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        match self.entry(key)?.get_password() {
            Ok(password) => Ok(Some(Secret::new(password))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(keyring::Error::NoStorageAccess(_)) => Err(StoreError::AccessDenied {
                key: key.to_string(),
            }),
            Err(keyring::Error::PlatformFailure(e)) => Err(StoreError::BackendError {
                message: format!("platform keyring failure: {}", e),
            }),
            Err(e) => Err(StoreError::BackendError {
                message: format!("keyring error: {}", e),
            }),
        }
    }

    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        self.entry(key)?
            .set_password(secret.expose())
            .map_err(|e| StoreError::BackendError {
                message: format!("failed to set keyring password: {}", e),
            })
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StoreError::BackendError {
                message: format!("failed to delete keyring entry: {}", e),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyring_store_creation() {
        match KeyringStore::try_new("avocavo-nutrition-test") {
            Ok(store) => assert_eq!(store.service_name, "avocavo-nutrition-test"),
            Err(StoreError::KeyringUnavailable { .. }) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    #[tokio::test]
    async fn test_keyring_store_roundtrip_when_available() {
        let store = match KeyringStore::try_new("avocavo-nutrition-test-ops") {
            Ok(s) => s,
            Err(_) => {
                eprintln!("Skipping: keyring unavailable");
                return;
            }
        };

        let key = format!(
            "test-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        );

        // Headless CI keyrings may accept a write and then lose it.
        if store.set(&key, &Secret::new("test-value")).await.is_err() {
            return;
        }
        if let Ok(Some(retrieved)) = store.get(&key).await {
            assert_eq!(retrieved.expose(), "test-value");
        }
        let _ = store.delete(&key).await;
    }
}
