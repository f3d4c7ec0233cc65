//! Credential types.
//!
//! - [`Credential`] - token material proving the caller's identity
//! - [`CredentialSource`] - where a credential came from

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::store::Secret;

/// Header carrying API keys.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Where a [`Credential`] was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    /// Email/password login that returned an API key.
    Login,
    /// OAuth token grant.
    #[serde(rename = "oauth")]
    OAuth,
    /// API key passed explicitly by the caller.
    ApiKey,
    /// API key read from the environment.
    Env,
}

impl CredentialSource {
    /// String form used in logs and CLI output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::OAuth => "oauth",
            Self::ApiKey => "api_key",
            Self::Env => "env",
        }
    }
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token material used to sign API requests.
///
/// API-key style credentials (login, explicit key, environment) are sent as
/// an `X-API-Key` header; OAuth credentials are sent as a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: Secret,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<Secret>,

    /// When the access token stops being accepted. `None` means it does not
    /// expire on a known schedule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    pub source: CredentialSource,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, source: CredentialSource) -> Self {
        Self {
            access_token: Secret::new(access_token),
            refresh_token: None,
            expires_at: None,
            source,
        }
    }

    /// Shorthand for an explicitly supplied API key.
    pub fn api_key(key: impl Into<String>) -> Self {
        Self::new(key, CredentialSource::ApiKey)
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(Secret::new(refresh_token));
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Set the expiry relative to now, as reported by token endpoints.
    pub fn expires_in(self, seconds: i64) -> Self {
        self.with_expiry(Utc::now() + Duration::seconds(seconds))
    }

    /// Check if this credential has expired.
    ///
    /// Returns `false` if no expiration is set.
    pub fn is_expired(&self) -> bool {
        self.expires_within(Duration::zero())
    }

    /// Check if this credential will expire within the given duration.
    pub fn expires_within(&self, buffer: Duration) -> bool {
        self.expires_at
            .map(|exp| exp < Utc::now() + buffer)
            .unwrap_or(false)
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }

    /// Header name and value used to authenticate a request.
    pub fn auth_header(&self) -> (&'static str, String) {
        match self.source {
            CredentialSource::OAuth => (
                "Authorization",
                format!("Bearer {}", self.access_token.expose()),
            ),
            _ => (API_KEY_HEADER, self.access_token.expose().to_string()),
        }
    }
}
