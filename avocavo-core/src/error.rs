//! Top-level error types for the Avocavo client.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::profile_store::ProfileStoreError;
use crate::store::StoreError;

/// Result alias used across the crate.
pub type Result<T, E = NutritionError> = std::result::Result<T, E>;

/// Every failure the client can surface.
#[derive(Debug, Error)]
pub enum NutritionError {
    /// Input rejected before any request was made.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// No usable credential could be obtained, or the server rejected it
    /// after one refresh attempt.
    #[error("authentication error: {message}")]
    Authentication { message: String },

    /// The server asked the client to slow down.
    #[error("rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        /// Seconds the server asked the caller to wait, if it said.
        retry_after_seconds: Option<f64>,
        /// Plan limit reported alongside the rejection.
        limit: Option<u64>,
        /// Current usage reported alongside the rejection.
        usage: Option<u64>,
    },

    /// Any other non-success response.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The request never produced an HTTP response.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Secret storage failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Profile metadata could not be read or written.
    #[error("profile error: {0}")]
    Profile(#[from] ProfileStoreError),
}

impl NutritionError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Seconds to wait before retrying, for rate-limit errors.
    pub fn retry_after_seconds(&self) -> Option<f64> {
        match self {
            Self::RateLimit {
                retry_after_seconds,
                ..
            } => *retry_after_seconds,
            _ => None,
        }
    }

    /// The rate-limit wait hint as a `Duration`.
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        self.retry_after_seconds()
            .and_then(|secs| std::time::Duration::try_from_secs_f64(secs).ok())
    }

    /// HTTP status associated with the error, when there is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::RateLimit { .. } => Some(429),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::RateLimit { .. } => ErrorKind::RateLimit,
            Self::Api { .. } => ErrorKind::Api,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Config { .. } | Self::Store(_) | Self::Profile(_) => ErrorKind::Internal,
        }
    }
}

/// Coarse classification of an error, carried by per-item batch failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Authentication,
    RateLimit,
    Api,
    Transport,
    /// Server reported the item could not be analyzed.
    Unmatched,
    Internal,
}

/// Serializable description of a failure attached to a single result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }
}

impl From<&NutritionError> for ErrorInfo {
    fn from(err: &NutritionError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            status: err.status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_exposes_wait_hint() {
        let err = NutritionError::RateLimit {
            message: "Rate limit exceeded".into(),
            retry_after_seconds: Some(1.5),
            limit: None,
            usage: None,
        };
        assert_eq!(err.retry_after_seconds(), Some(1.5));
        assert_eq!(err.retry_after(), Some(std::time::Duration::from_millis(1500)));
        assert_eq!(err.status(), Some(429));
        assert!(err.to_string().contains("Rate limit exceeded"));
    }

    #[test]
    fn test_error_info_from_api_error() {
        let err = NutritionError::Api {
            status: 503,
            message: "Server error".into(),
        };
        let info = ErrorInfo::from(&err);
        assert_eq!(info.kind, ErrorKind::Api);
        assert_eq!(info.status, Some(503));
        assert!(info.message.contains("Server error"));
    }

    #[test]
    fn test_non_rate_limit_has_no_wait_hint() {
        assert_eq!(NutritionError::validation("x").retry_after_seconds(), None);
    }
}
