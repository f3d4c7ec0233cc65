//! Persistence for the session credential.
//!
//! [`CredentialStore`] serializes one [`Credential`] as JSON into a
//! [`SecretStore`] entry. When no backend exists the store reports
//! [`StoreAvailability::Unavailable`] and every operation becomes a no-op,
//! which leaves the session to fall back to API keys and the environment.

use tokio::sync::Mutex;

use crate::model::Credential;
use crate::store::{MemoryStore, Secret, SecretStore, StoreError, detect_backend};

/// Keyring service name.
pub const SERVICE_NAME: &str = "avocavo-nutrition";

/// Keyring account name for the session credential.
pub const ACCOUNT_NAME: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreAvailability {
    Available,
    Unavailable,
}

pub struct CredentialStore {
    backend: Option<Box<dyn SecretStore>>,
    key: String,
    lock: Mutex<()>,
}

impl CredentialStore {
    /// Wrap an explicit backend.
    pub fn new(backend: Box<dyn SecretStore>) -> Self {
        Self::with_backend(Some(backend))
    }

    /// Use the OS keyring when present, otherwise run without persistence.
    pub fn detect() -> Self {
        Self::with_backend(detect_backend(SERVICE_NAME))
    }

    /// Process-local store, used by tests and hosts that must not touch the keyring.
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStore::new()))
    }

    pub fn unavailable() -> Self {
        Self::with_backend(None)
    }

    fn with_backend(backend: Option<Box<dyn SecretStore>>) -> Self {
        Self {
            backend,
            key: format!("{}/{}", SERVICE_NAME, ACCOUNT_NAME),
            lock: Mutex::new(()),
        }
    }

    pub fn availability(&self) -> StoreAvailability {
        if self.backend.is_some() {
            StoreAvailability::Available
        } else {
            StoreAvailability::Unavailable
        }
    }

    /// Persist the credential, replacing any previous one.
    pub async fn save(&self, credential: &Credential) -> Result<(), StoreError> {
        let Some(backend) = &self.backend else {
            tracing::debug!("No credential backend, skipping save");
            return Ok(());
        };

        let payload = Secret::new(serde_json::to_string(credential)?);
        let _guard = self.lock.lock().await;
        backend.set(&self.key, &payload).await?;
        tracing::debug!("Stored {} credential", credential.source);
        Ok(())
    }

    /// Load the stored credential.
    ///
    /// Backend failures and unreadable payloads are logged and reported as
    /// "nothing stored".
    pub async fn load(&self) -> Option<Credential> {
        let backend = self.backend.as_ref()?;

        let _guard = self.lock.lock().await;
        let payload = match backend.get(&self.key).await {
            Ok(Some(payload)) => payload,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Credential store read failed: {}", e);
                return None;
            }
        };

        match serde_json::from_str::<Credential>(payload.expose()) {
            Ok(credential) => Some(credential),
            Err(e) => {
                tracing::warn!("Ignoring unreadable stored credential: {}", e);
                None
            }
        }
    }

    /// Remove the stored credential.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };

        let _guard = self.lock.lock().await;
        backend.delete(&self.key).await
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("availability", &self.availability())
            .field("key", &self.key)
            .finish()
    }
}
