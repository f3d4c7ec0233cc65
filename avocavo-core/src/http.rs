//! HTTP request execution.
//!
//! [`HttpClient`] owns the `reqwest` client, resolves paths against the
//! configured base URL, retries idempotent requests on transport failures and
//! 5xx responses with exponential backoff, and maps final responses onto
//! [`NutritionError`].
//!
//! 401 responses are not handled here: [`HttpClient::execute`] hands them back
//! so the caller can refresh its credential once and try again.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::{NutritionError, Result};
use crate::model::Credential;

/// Header carrying a per-request correlation id.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Exponential backoff settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_retries: config.retry_count,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

/// A request relative to the API base URL.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub timeout: Option<Duration>,
    /// Safe to send more than once. Defaults to true for GET only.
    pub idempotent: bool,
}

impl HttpRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let idempotent = method == Method::GET;
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
            timeout: None,
            idempotent,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).json(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PUT, path).json(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    /// Copy of this request signed with `credential`.
    pub fn signed(&self, credential: &Credential) -> Self {
        let (name, value) = credential.auth_header();
        let mut signed = self.clone();
        signed
            .headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        signed.headers.push((name.to_string(), value));
        signed
    }
}

/// Status, headers and decoded body of a completed exchange.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Parsed JSON, a JSON string for non-JSON bodies, or `Null` when empty.
    pub body: Value,
}

impl HttpResponse {
    pub fn json<T: DeserializeOwned>(self) -> Result<T> {
        let status = self.status.as_u16();
        serde_json::from_value(self.body).map_err(|e| NutritionError::Api {
            status,
            message: format!("invalid response body: {}", e),
        })
    }

    /// Server-provided error text, or `HTTP <status>`.
    pub fn error_message(&self) -> String {
        match &self.body {
            Value::Object(map) => map
                .get("error")
                .or_else(|| map.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string),
            Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            _ => None,
        }
        .unwrap_or_else(|| format!("HTTP {}", self.status.as_u16()))
    }

    /// Wait hint from the body (`retry_after_seconds` / `retry_after`) or
    /// the `Retry-After` header.
    pub fn retry_after_seconds(&self) -> Option<f64> {
        let from_body = self.body.as_object().and_then(|map| {
            map.get("retry_after_seconds")
                .or_else(|| map.get("retry_after"))
                .and_then(number_as_f64)
        });

        from_body.or_else(|| {
            self.headers
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
        })
    }

    fn body_u64(&self, key: &str) -> Option<u64> {
        self.body.get(key).and_then(number_as_u64)
    }
}

fn number_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn number_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|secs: &f64| secs.is_finite() && *secs >= 0.0)
}

/// Thin request executor over `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpClient {
    http: reqwest::Client,
    base_url: Url,
    retry: RetryPolicy,
}

impl HttpClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(|e| NutritionError::config(format!("failed to build HTTP client: {}", e)))?;

        let base_url = Url::parse(&format!("{}/", config.base_url.trim_end_matches('/')))
            .map_err(|e| NutritionError::config(format!("invalid base_url: {}", e)))?;

        Ok(Self {
            http,
            base_url,
            retry: RetryPolicy::from_config(config),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Underlying `reqwest` client, shared with the OAuth flows.
    pub fn inner(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| NutritionError::config(format!("failed to build URL for {}: {}", path, e)))
    }

    /// Execute and classify: 2xx responses are returned, everything else
    /// becomes an error.
    pub async fn request(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let response = self.execute(request).await?;
        Self::check(response)
    }

    /// Send `request`, retrying per the retry policy.
    ///
    /// Returns whatever response the server produced last, including error
    /// statuses. Fails only when no response could be obtained.
    pub async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let url = self.url(&request.path)?;
        let request_id = Uuid::new_v4().to_string();
        let mut attempt = 0u32;

        loop {
            let outcome = self.send_once(&url, request, &request_id).await;

            let retry_reason = match &outcome {
                Ok(response) if response.status.is_server_error() => {
                    format!("server returned {}", response.status.as_u16())
                }
                Ok(_) => return outcome,
                Err(e) => e.to_string(),
            };

            if !request.idempotent || attempt >= self.retry.max_retries {
                return outcome;
            }

            attempt += 1;
            let delay = self.retry.delay_for(attempt);
            tracing::warn!(
                "{} {} failed ({}), retry {}/{} after {:?}",
                request.method,
                request.path,
                retry_reason,
                attempt,
                self.retry.max_retries,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn send_once(
        &self,
        url: &Url,
        request: &HttpRequest,
        request_id: &str,
    ) -> Result<HttpResponse> {
        let mut builder = self
            .http
            .request(request.method.clone(), url.clone())
            .header(REQUEST_ID_HEADER, request_id);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        tracing::debug!("{} {} [{}]", request.method, url.path(), request_id);

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.bytes().await.map_err(transport_error)?;

        let body = if bytes.iter().all(u8::is_ascii_whitespace) {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    /// Map a final response onto the error taxonomy.
    pub fn check(response: HttpResponse) -> Result<HttpResponse> {
        let status = response.status;
        if status.is_success() {
            return Ok(response);
        }

        match status {
            StatusCode::UNAUTHORIZED => Err(NutritionError::authentication(
                "Invalid or expired credentials. Check your API key or log in again.",
            )),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after_seconds = response.retry_after_seconds();
                tracing::warn!("Rate limited, retry after {:?}s", retry_after_seconds);
                Err(NutritionError::RateLimit {
                    message: response
                        .body
                        .get("error")
                        .and_then(Value::as_str)
                        .unwrap_or("Rate limit exceeded")
                        .to_string(),
                    retry_after_seconds,
                    limit: response.body_u64("limit"),
                    usage: response.body_u64("usage"),
                })
            }
            StatusCode::PAYMENT_REQUIRED => Err(NutritionError::Api {
                status: status.as_u16(),
                message: "Trial expired or payment required. Upgrade your plan.".to_string(),
            }),
            _ => Err(NutritionError::Api {
                status: status.as_u16(),
                message: response.error_message(),
            }),
        }
    }
}

fn transport_error(e: reqwest::Error) -> NutritionError {
    if e.is_timeout() {
        NutritionError::transport(format!("request timed out: {}", e))
    } else if e.is_connect() {
        NutritionError::transport(format!("connection error: {}", e))
    } else {
        NutritionError::transport(format!("request failed: {}", e))
    }
}
