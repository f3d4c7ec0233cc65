//! Client configuration handling.
//!
//! Configuration is read from `config.toml` in the platform config directory
//! (`~/.config/avocavo/config.toml` on Linux). Missing files and missing keys
//! fall back to defaults.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{NutritionError, Result};

/// Production API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://app.avocavo.app";

/// Environment variable consulted for an API key.
pub const DEFAULT_API_KEY_ENV: &str = "AVOCAVO_API_KEY";

/// Items per batch request.
pub const DEFAULT_CHUNK_SIZE: usize = 50;

/// Batch chunks in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// API base URL, without trailing slash.
    pub base_url: String,

    /// Seconds a result may be cached locally. Informational only.
    pub cache_ttl: u64,

    /// Seconds allowed for a single HTTP exchange.
    pub timeout: u64,

    /// Extra attempts for idempotent requests after a transport error or 5xx.
    pub retry_count: u32,

    /// Delay before the first retry, in milliseconds. Doubles per attempt.
    pub retry_base_delay_ms: u64,

    /// Upper bound on a single retry delay, in milliseconds.
    pub retry_max_delay_ms: u64,

    pub verify_ssl: bool,

    pub user_agent: String,

    pub chunk_size: usize,

    pub concurrency: usize,

    /// Estimated credits avoided by each cache hit.
    pub credits_per_item: u64,

    /// Allow interactive (browser/device) login when nothing else works.
    pub interactive: bool,

    pub api_key_env: String,

    /// Minutes before expiry at which a credential is treated as expired.
    pub expiry_buffer_minutes: i64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            cache_ttl: 3600,
            timeout: 30,
            retry_count: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 8_000,
            verify_ssl: true,
            user_agent: default_user_agent(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            credits_per_item: 1,
            interactive: false,
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            expiry_buffer_minutes: 5,
        }
    }
}

fn default_user_agent() -> String {
    format!("avocavo-nutrition-rust/{}", env!("CARGO_PKG_VERSION"))
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl)
    }

    /// Reject values the client cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(NutritionError::config("chunk_size must be greater than 0"));
        }
        if self.concurrency == 0 {
            return Err(NutritionError::config("concurrency must be greater than 0"));
        }
        if self.timeout == 0 {
            return Err(NutritionError::config("timeout must be greater than 0"));
        }
        url::Url::parse(&self.base_url).map_err(|e| {
            NutritionError::config(format!("invalid base_url {:?}: {}", self.base_url, e))
        })?;
        Ok(())
    }

    /// Overlay the options that are set.
    pub fn apply(&mut self, options: ClientOptions) {
        let ClientOptions {
            base_url,
            cache_ttl,
            timeout,
            retry_count,
            verify_ssl,
            user_agent,
            chunk_size,
            concurrency,
            interactive,
        } = options;

        if let Some(v) = base_url {
            self.base_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = cache_ttl {
            self.cache_ttl = v;
        }
        if let Some(v) = timeout {
            self.timeout = v;
        }
        if let Some(v) = retry_count {
            self.retry_count = v;
        }
        if let Some(v) = verify_ssl {
            self.verify_ssl = v;
        }
        if let Some(v) = user_agent {
            self.user_agent = v;
        }
        if let Some(v) = chunk_size {
            self.chunk_size = v;
        }
        if let Some(v) = concurrency {
            self.concurrency = v;
        }
        if let Some(v) = interactive {
            self.interactive = v;
        }
    }
}

/// Partial configuration passed to `configure`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientOptions {
    pub base_url: Option<String>,
    pub cache_ttl: Option<u64>,
    pub timeout: Option<u64>,
    pub retry_count: Option<u32>,
    pub verify_ssl: Option<bool>,
    pub user_agent: Option<String>,
    pub chunk_size: Option<usize>,
    pub concurrency: Option<usize>,
    pub interactive: Option<bool>,
}

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("app", "avocavo", "avocavo")
}

/// Default location of `config.toml`.
pub fn default_config_path() -> PathBuf {
    project_dirs()
        .map(|d| d.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from(".avocavo/config.toml"))
}

/// Load configuration from the default location, or defaults if absent.
pub fn load_config() -> Result<ClientConfig> {
    load_config_from_path(&default_config_path())
}

pub fn load_config_from_path(path: &Path) -> Result<ClientConfig> {
    let config: ClientConfig = if path.exists() {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            NutritionError::config(format!("failed to read config from {:?}: {}", path, e))
        })?;
        toml::from_str(&contents).map_err(|e| {
            NutritionError::config(format!("failed to parse config from {:?}: {}", path, e))
        })?
    } else {
        tracing::debug!("No config at {:?}, using defaults", path);
        ClientConfig::default()
    };

    config.validate()?;
    Ok(config)
}
