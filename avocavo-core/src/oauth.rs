//! OAuth 2.0 support.
//!
//! - [`OAuthRefresher`] - refresh-token grant, used to renew OAuth credentials
//! - [`DeviceCodeLogin`] - device authorization grant (RFC 8628), used for
//!   interactive login from a terminal
//!
//! Both talk to the Avocavo authorization server under `<base_url>/oauth/`.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> avocavo_core::Result<()> {
//! use avocavo_core::oauth::{DeviceCodeLogin, OAuthEndpoints};
//!
//! let endpoints = OAuthEndpoints::for_base_url("https://app.avocavo.app");
//! let login = DeviceCodeLogin::new(endpoints, |auth| {
//!     println!("Visit {} and enter {}", auth.verification_uri, auth.user_code);
//! });
//!
//! let authorization = login.request_device_code().await?;
//! let credential = login.poll_for_token(&authorization).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use oauth2::{
    AuthUrl, ClientId, RefreshToken, TokenResponse, TokenUrl, basic::BasicClient,
    reqwest::async_http_client,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

use crate::auth::{InteractiveLogin, TokenRefresher};
use crate::error::{NutritionError, Result};
use crate::model::{Credential, CredentialSource};
use crate::store::Secret;

/// Public client id registered for the SDK and CLI.
pub const DEFAULT_CLIENT_ID: &str = "avocavo-nutrition-cli";

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Authorization server endpoints and client registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthEndpoints {
    pub authorize_url: String,
    pub device_code_url: String,
    pub token_url: String,
    pub client_id: String,
    pub scopes: Vec<String>,
}

impl OAuthEndpoints {
    pub fn for_base_url(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            authorize_url: format!("{}/oauth/authorize", base),
            device_code_url: format!("{}/oauth/device/code", base),
            token_url: format!("{}/oauth/token", base),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            scopes: vec!["nutrition".to_string(), "account".to_string()],
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    fn client(&self) -> Result<BasicClient> {
        let auth_url = AuthUrl::new(self.authorize_url.clone())
            .map_err(|e| NutritionError::config(format!("invalid auth URL: {}", e)))?;
        let token_url = TokenUrl::new(self.token_url.clone())
            .map_err(|e| NutritionError::config(format!("invalid token URL: {}", e)))?;

        Ok(BasicClient::new(
            ClientId::new(self.client_id.clone()),
            None,
            auth_url,
            Some(token_url),
        ))
    }
}

/// Renews OAuth credentials with the refresh-token grant.
#[derive(Debug, Clone)]
pub struct OAuthRefresher {
    endpoints: OAuthEndpoints,
}

impl OAuthRefresher {
    pub fn new(endpoints: OAuthEndpoints) -> Self {
        Self { endpoints }
    }
}

#[async_trait]
impl TokenRefresher for OAuthRefresher {
    async fn refresh(&self, credential: &Credential) -> Result<Credential> {
        let refresh_token = credential
            .refresh_token
            .as_ref()
            .ok_or_else(|| NutritionError::authentication("no refresh token available"))?;

        let client = self.endpoints.client()?;
        let response = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.expose().to_string()))
            .request_async(async_http_client)
            .await
            .map_err(|e| NutritionError::authentication(format!("token refresh failed: {}", e)))?;

        let mut fresh = Credential::new(
            response.access_token().secret().to_string(),
            CredentialSource::OAuth,
        );

        if let Some(duration) = response.expires_in() {
            let expires_in = i64::try_from(duration.as_secs()).unwrap_or(i64::MAX / 1000);
            fresh = fresh.expires_in(expires_in);
        }

        // Keep the existing refresh token unless the server rotated it.
        fresh.refresh_token = match response.refresh_token() {
            Some(rotated) => Some(Secret::new(rotated.secret().to_string())),
            None => Some(refresh_token.clone()),
        };

        Ok(fresh)
    }
}

/// Codes and URIs the user needs to approve a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceAuthorization {
    /// Device verification code. Not shown to the user.
    pub device_code: String,

    /// Code the user types at the verification URI.
    pub user_code: String,

    pub verification_uri: String,

    /// URI with the user code embedded.
    #[serde(default)]
    pub verification_uri_complete: Option<String>,

    /// Minimum seconds between polls.
    #[serde(default = "default_interval")]
    pub interval: u64,

    /// Seconds until the device code expires.
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
}

fn default_interval() -> u64 {
    5
}

fn default_expires_in() -> u64 {
    900
}

type PromptFn = dyn Fn(&DeviceAuthorization) + Send + Sync;

/// Device authorization grant driven from a terminal.
pub struct DeviceCodeLogin {
    endpoints: OAuthEndpoints,
    http: reqwest::Client,
    prompt: Arc<PromptFn>,
}

impl DeviceCodeLogin {
    /// `prompt` is called once with the codes to show the user.
    pub fn new(
        endpoints: OAuthEndpoints,
        prompt: impl Fn(&DeviceAuthorization) + Send + Sync + 'static,
    ) -> Self {
        Self {
            endpoints,
            http: reqwest::Client::new(),
            prompt: Arc::new(prompt),
        }
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Ask the authorization server for device and user codes.
    pub async fn request_device_code(&self) -> Result<DeviceAuthorization> {
        let scope = self.endpoints.scopes.join(" ");
        let response = self
            .http
            .post(&self.endpoints.device_code_url)
            .form(&[
                ("client_id", self.endpoints.client_id.as_str()),
                ("scope", scope.as_str()),
            ])
            .send()
            .await
            .map_err(|e| NutritionError::transport(format!("device code request failed: {}", e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(NutritionError::authentication(format!(
                "device code request failed ({}): {}",
                status.as_u16(),
                oauth_error_code(&body).unwrap_or(body)
            )));
        }

        serde_json::from_str(&body).map_err(|e| {
            NutritionError::authentication(format!("failed to parse device code response: {}", e))
        })
    }

    /// Poll the token endpoint until the user approves, denies, or the code expires.
    pub async fn poll_for_token(&self, authorization: &DeviceAuthorization) -> Result<Credential> {
        let mut interval = Duration::from_secs(authorization.interval);
        let deadline = Duration::from_secs(authorization.expires_in);
        let started = Instant::now();

        loop {
            if started.elapsed() > deadline {
                return Err(NutritionError::authentication("device code expired"));
            }

            sleep(interval).await;

            let response = self
                .http
                .post(&self.endpoints.token_url)
                .form(&[
                    ("client_id", self.endpoints.client_id.as_str()),
                    ("device_code", authorization.device_code.as_str()),
                    ("grant_type", DEVICE_CODE_GRANT),
                ])
                .send()
                .await
                .map_err(|e| {
                    NutritionError::transport(format!("network error during polling: {}", e))
                })?;

            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if status.is_success() {
                return parse_token_response(&body);
            }

            match oauth_error_code(&body).as_deref() {
                Some("authorization_pending") => {
                    tracing::debug!("Authorization pending, continuing to poll");
                }
                Some("slow_down") => {
                    tracing::warn!("Polling too fast, slowing down");
                    interval += Duration::from_secs(5);
                }
                Some("access_denied") => {
                    return Err(NutritionError::authentication("user denied authorization"));
                }
                Some("expired_token") => {
                    return Err(NutritionError::authentication("device code expired"));
                }
                Some(code) => {
                    return Err(NutritionError::authentication(format!("OAuth error: {}", code)));
                }
                None => {
                    return Err(NutritionError::authentication(format!(
                        "unexpected token response ({}): {}",
                        status.as_u16(),
                        body
                    )));
                }
            }
        }
    }
}

#[async_trait]
impl InteractiveLogin for DeviceCodeLogin {
    async fn login(&self) -> Result<Credential> {
        let authorization = self.request_device_code().await?;
        (self.prompt)(&authorization);
        self.poll_for_token(&authorization).await
    }
}

impl std::fmt::Debug for DeviceCodeLogin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCodeLogin")
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

fn oauth_error_code(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value.get("error")?.as_str().map(str::to_string)
}

fn parse_token_response(body: &str) -> Result<Credential> {
    let data: Value = serde_json::from_str(body).map_err(|e| {
        NutritionError::authentication(format!("failed to parse token response: {}", e))
    })?;

    let access_token = data
        .get("access_token")
        .and_then(Value::as_str)
        .ok_or_else(|| NutritionError::authentication("missing access_token in response"))?;

    let mut credential = Credential::new(access_token, CredentialSource::OAuth);
    if let Some(seconds) = data.get("expires_in").and_then(Value::as_i64) {
        credential = credential.expires_in(seconds);
    }
    if let Some(refresh_token) = data.get("refresh_token").and_then(Value::as_str) {
        credential = credential.with_refresh_token(refresh_token);
    }
    Ok(credential)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_endpoints_for_base_url() {
        let endpoints = OAuthEndpoints::for_base_url("https://app.avocavo.app/");
        assert_eq!(endpoints.token_url, "https://app.avocavo.app/oauth/token");
        assert_eq!(
            endpoints.device_code_url,
            "https://app.avocavo.app/oauth/device/code"
        );
        assert_eq!(endpoints.client_id, DEFAULT_CLIENT_ID);
    }

    #[test]
    fn test_invalid_token_url_rejected() {
        let mut endpoints = OAuthEndpoints::for_base_url("https://app.avocavo.app");
        endpoints.token_url = "not a url".into();
        assert!(endpoints.client().is_err());
    }

    #[test]
    fn test_parse_token_response() {
        let credential = parse_token_response(
            r#"{"access_token": "at", "refresh_token": "rt", "expires_in": 3600, "token_type": "bearer"}"#,
        )
        .unwrap();
        assert_eq!(credential.access_token.expose(), "at");
        assert_eq!(credential.source, CredentialSource::OAuth);
        assert!(credential.can_refresh());
        assert!(!credential.is_expired());

        assert!(parse_token_response(r#"{"token_type": "bearer"}"#).is_err());
    }

    #[test]
    fn test_oauth_error_code() {
        assert_eq!(
            oauth_error_code(r#"{"error":"authorization_pending"}"#).as_deref(),
            Some("authorization_pending")
        );
        assert_eq!(oauth_error_code("<html>"), None);
    }

    #[tokio::test]
    async fn test_device_code_login_flow() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/oauth/device/code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "device_code": "dev-123",
                "user_code": "ABCD-EFGH",
                "verification_uri": "https://app.avocavo.app/device",
                "interval": 0,
                "expires_in": 60
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("device_code=dev-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "oauth-access",
                "refresh_token": "oauth-refresh",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let shown = Arc::new(parking_lot::Mutex::new(None));
        let shown_in_prompt = shown.clone();
        let login = DeviceCodeLogin::new(OAuthEndpoints::for_base_url(&server.uri()), move |auth| {
            *shown_in_prompt.lock() = Some(auth.user_code.clone());
        });

        let credential = login.login().await.unwrap();
        assert_eq!(credential.access_token.expose(), "oauth-access");
        assert_eq!(shown.lock().as_deref(), Some("ABCD-EFGH"));
    }

    #[tokio::test]
    async fn test_device_code_denied() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({"error": "access_denied"})),
            )
            .mount(&server)
            .await;

        let login = DeviceCodeLogin::new(OAuthEndpoints::for_base_url(&server.uri()), |_| {});
        let authorization = DeviceAuthorization {
            device_code: "dev".into(),
            user_code: "CODE".into(),
            verification_uri: "https://example.com".into(),
            verification_uri_complete: None,
            interval: 0,
            expires_in: 60,
        };

        let err = login.poll_for_token(&authorization).await.unwrap_err();
        assert!(err.to_string().contains("denied"));
    }

    #[tokio::test]
    async fn test_refresh_keeps_existing_refresh_token() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "renewed",
                "token_type": "bearer",
                "expires_in": 1800
            })))
            .expect(1)
            .mount(&server)
            .await;

        let refresher = OAuthRefresher::new(OAuthEndpoints::for_base_url(&server.uri()));
        let old = Credential::new("stale", CredentialSource::OAuth).with_refresh_token("keep-me");

        let fresh = refresher.refresh(&old).await.unwrap();
        assert_eq!(fresh.access_token.expose(), "renewed");
        assert_eq!(fresh.refresh_token.unwrap().expose(), "keep-me");
        assert!(fresh.expires_at.is_some());
    }
}
