//! Non-secret login metadata.
//!
//! The API key itself lives in the [`CredentialStore`](crate::CredentialStore);
//! this file only records who is logged in, stored as JSON at
//! `~/.config/avocavo/profile.json` on Linux and the platform equivalent
//! elsewhere.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::project_dirs;

#[derive(Debug, Error)]
pub enum ProfileStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration directory not available")]
    ConfigDirUnavailable,
}

/// The logged-in user, as reported by the login endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub email: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default = "default_tier")]
    pub api_tier: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logged_in_at: Option<DateTime<Utc>>,
}

fn default_tier() -> String {
    "developer".to_string()
}

impl UserProfile {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            user_id: None,
            api_tier: default_tier(),
            logged_in_at: None,
        }
    }
}

/// Disk-backed profile file with an in-memory copy.
pub struct ProfileStore {
    path: PathBuf,
    current: RwLock<Option<UserProfile>>,
}

impl ProfileStore {
    pub fn default_path() -> Result<PathBuf, ProfileStoreError> {
        let dirs = project_dirs().ok_or(ProfileStoreError::ConfigDirUnavailable)?;
        Ok(dirs.config_dir().join("profile.json"))
    }

    pub fn load() -> Result<Self, ProfileStoreError> {
        Self::load_from_path(Self::default_path()?)
    }

    /// Load the profile file at `path`.
    ///
    /// A missing file means nobody is logged in. An unreadable one is treated
    /// the same way so a corrupt file never blocks a fresh login.
    pub fn load_from_path(path: PathBuf) -> Result<Self, ProfileStoreError> {
        let current = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            match serde_json::from_str(&contents) {
                Ok(profile) => Some(profile),
                Err(e) => {
                    tracing::warn!("Ignoring unreadable profile at {:?}: {}", path, e);
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            path,
            current: RwLock::new(current),
        })
    }

    pub fn get(&self) -> Option<UserProfile> {
        self.current.read().clone()
    }

    /// Replace the stored profile and write it to disk.
    pub fn set(&self, profile: UserProfile) -> Result<(), ProfileStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(&profile)?;

        let mut current = self.current.write();
        fs::write(&self.path, contents)?;
        *current = Some(profile);
        Ok(())
    }

    /// Forget the profile and remove the file.
    pub fn clear(&self) -> Result<(), ProfileStoreError> {
        let mut current = self.current.write();
        *current = None;
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for ProfileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileStore")
            .field("path", &self.path)
            .field("logged_in", &self.current.read().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (ProfileStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = ProfileStore::load_from_path(temp_dir.path().join("profile.json")).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_empty_store() {
        let (store, _temp) = test_store();
        assert!(store.get().is_none());
    }

    #[test]
    fn test_set_and_persist() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("profile.json");

        {
            let store = ProfileStore::load_from_path(path.clone()).unwrap();
            let mut profile = UserProfile::new("cook@example.com");
            profile.api_tier = "starter".into();
            store.set(profile).unwrap();
        }

        let store = ProfileStore::load_from_path(path).unwrap();
        let profile = store.get().unwrap();
        assert_eq!(profile.email, "cook@example.com");
        assert_eq!(profile.api_tier, "starter");
    }

    #[test]
    fn test_clear_removes_file() {
        let (store, _temp) = test_store();
        store.set(UserProfile::new("a@b.c")).unwrap();
        assert!(store.path().exists());

        store.clear().unwrap();
        assert!(store.get().is_none());
        assert!(!store.path().exists());

        // Clearing twice is fine.
        store.clear().unwrap();
    }

    #[test]
    fn test_corrupt_file_reads_as_logged_out() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("profile.json");
        std::fs::write(&path, "not json").unwrap();

        let store = ProfileStore::load_from_path(path).unwrap();
        assert!(store.get().is_none());
    }

    #[test]
    fn test_missing_tier_defaults_to_developer() {
        let profile: UserProfile =
            serde_json::from_str(r#"{"email": "x@y.z"}"#).unwrap();
        assert_eq!(profile.api_tier, "developer");
    }
}
