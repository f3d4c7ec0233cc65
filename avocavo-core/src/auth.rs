//! Credential lifecycle.
//!
//! [`AuthSession`] decides which credential signs each request. Resolution
//! order is:
//!
//! 1. an API key passed explicitly to the session
//! 2. the stored credential, refreshed first when it has expired
//! 3. the API key environment variable (`AVOCAVO_API_KEY` by default)
//! 4. interactive login, when the session allows it
//!
//! Refresh is single-flight. Every replacement of the active credential bumps
//! a generation counter; a caller whose credential was rejected reports the
//! generation it used, and if another task already replaced that credential
//! the caller reuses the new one instead of refreshing again.
//!
//! Failures are shared too. Callers queued behind a renewal that failed get
//! its error without renewing again, and a credential whose refresh was
//! rejected is never sent to the refresher a second time.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::credential_store::CredentialStore;
use crate::error::{NutritionError, Result};
use crate::http::{HttpClient, HttpRequest};
use crate::model::{Credential, CredentialSource};
use crate::profile_store::{ProfileStore, UserProfile};
use crate::store::Secret;

/// Characters of an API key shown in summaries.
const MASKED_KEY_CHARS: usize = 12;

const NO_CREDENTIAL_MESSAGE: &str = "No API key found. Log in with `avocavo login`, \
     pass an API key, or set the AVOCAVO_API_KEY environment variable.";

/// Renews an expired or rejected credential using its refresh token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, credential: &Credential) -> Result<Credential>;
}

/// Obtains a fresh credential by involving the user (device code, browser).
#[async_trait]
pub trait InteractiveLogin: Send + Sync {
    async fn login(&self) -> Result<Credential>;
}

/// A credential together with the generation it was issued under.
#[derive(Debug, Clone)]
pub struct SessionCredential {
    pub credential: Credential,
    pub generation: u64,
}

/// Result of a successful email/password login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginSummary {
    pub email: String,
    pub user_id: Option<String>,
    pub api_tier: String,
    /// First characters of the API key followed by `...`.
    pub api_key_masked: String,
}

/// The logged-in user as seen from local state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub profile: UserProfile,
    pub source: CredentialSource,
    pub api_key_masked: String,
}

#[derive(Debug, Default)]
struct ActiveState {
    credential: Option<Credential>,
    generation: u64,
    /// Completed resolve/renew attempts made under `refresh_lock`.
    attempts: u64,
    /// Message of the most recent attempt, when it failed.
    last_failure: Option<String>,
    failed_refresh: Option<FailedRefresh>,
}

/// A credential the refresher rejected.
#[derive(Debug, Clone)]
struct FailedRefresh {
    access_token: Secret,
    message: String,
}

pub struct AuthSession {
    explicit: Option<Credential>,
    store: CredentialStore,
    profiles: Option<ProfileStore>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    interactive: Option<Arc<dyn InteractiveLogin>>,
    allow_interactive: bool,
    api_key_env: String,
    expiry_buffer: Duration,
    state: RwLock<ActiveState>,
    refresh_lock: Mutex<()>,
}

impl AuthSession {
    pub fn builder() -> AuthSessionBuilder {
        AuthSessionBuilder::default()
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Return a credential fit to sign a request.
    pub async fn ensure_valid_credential(&self) -> Result<Credential> {
        Ok(self.acquire().await?.credential)
    }

    /// Like [`ensure_valid_credential`](Self::ensure_valid_credential), keeping
    /// the generation so a 401 can be reported back.
    pub async fn acquire(&self) -> Result<SessionCredential> {
        if let Some(credential) = &self.explicit {
            return Ok(SessionCredential {
                credential: credential.clone(),
                generation: 0,
            });
        }

        if let Some(active) = self.usable_active() {
            return Ok(active);
        }

        let observed = self.state.read().attempts;
        let _guard = self.refresh_lock.lock().await;
        // Another task may have resolved while we waited.
        if let Some(active) = self.usable_active() {
            tracing::debug!("Reusing credential resolved by a concurrent request");
            return Ok(active);
        }
        self.failed_since(observed)?;

        let result = self.resolve().await;
        self.record_attempt(&result);
        result
    }

    /// Handle a 401 for a request signed with `rejected`.
    ///
    /// Performs at most one refresh or interactive login. The caller retries
    /// its request once with the returned credential and must not call this
    /// again for the same request.
    pub async fn handle_unauthorized(
        &self,
        rejected: &SessionCredential,
    ) -> Result<SessionCredential> {
        if self.explicit.is_some() {
            return Err(NutritionError::authentication(
                "Invalid API key. Check the key passed to the client.",
            ));
        }

        let observed = self.state.read().attempts;
        let _guard = self.refresh_lock.lock().await;

        {
            let state = self.state.read();
            if state.generation != rejected.generation {
                if let Some(credential) = &state.credential {
                    if !credential.expires_within(self.expiry_buffer) {
                        tracing::debug!("Credential already renewed by a concurrent request");
                        return Ok(SessionCredential {
                            credential: credential.clone(),
                            generation: state.generation,
                        });
                    }
                }
            }
        }
        self.failed_since(observed)?;
        if let Some(message) = self.refresh_failure_for(&rejected.credential) {
            return Err(refresh_failed(&message));
        }

        tracing::warn!(
            "Server rejected {} credential, renewing once",
            rejected.credential.source
        );
        self.state.write().credential = None;

        let result = self.renew(&rejected.credential).await;
        self.record_attempt(&result);
        result
    }

    /// One refresh or interactive login for a rejected credential.
    async fn renew(&self, rejected: &Credential) -> Result<SessionCredential> {
        if rejected.can_refresh() && self.refresher.is_some() {
            return self
                .refresh_and_activate(rejected)
                .await
                .map_err(|e| refresh_failed(&failure_message(&e)));
        }

        if let Some(login) = self.interactive_login() {
            return self.run_interactive(login).await;
        }

        Err(NutritionError::authentication(
            "Invalid API key or expired session. Log in again or check your API key.",
        ))
    }

    /// Log in with email and password and store the returned API key.
    pub async fn login(
        &self,
        http: &HttpClient,
        email: &str,
        password: &str,
    ) -> Result<LoginSummary> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(NutritionError::validation("email and password are required"));
        }

        let response = http
            .execute(&HttpRequest::post(
                "/api/auth/login",
                json!({ "email": email, "password": password }),
            ))
            .await?;

        match response.status.as_u16() {
            200 => {}
            401 => return Err(NutritionError::authentication("Invalid email or password")),
            status => {
                return Err(NutritionError::authentication(format!(
                    "Login failed: {}",
                    status
                )));
            }
        }

        let body = response.body;
        if !body.get("success").and_then(Value::as_bool).unwrap_or(false) {
            let message = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("Login failed");
            return Err(NutritionError::authentication(message));
        }

        let user = body.get("user").cloned().unwrap_or(Value::Null);
        let api_key = user
            .get("api_key")
            .and_then(Value::as_str)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| NutritionError::authentication("No API key received"))?;

        let key = Secret::new(api_key);
        let api_key_masked = key.masked(MASKED_KEY_CHARS);
        self.install(Credential::new(key.into_inner(), CredentialSource::Login))
            .await;

        let profile = UserProfile {
            email: user
                .get("email")
                .and_then(Value::as_str)
                .unwrap_or(email)
                .to_string(),
            user_id: user.get("id").and_then(id_string),
            api_tier: user
                .get("api_tier")
                .and_then(Value::as_str)
                .unwrap_or("developer")
                .to_string(),
            logged_in_at: Some(Utc::now()),
        };
        if let Some(profiles) = &self.profiles {
            if let Err(e) = profiles.set(profile.clone()) {
                tracing::warn!("Failed to save profile: {}", e);
            }
        }

        tracing::info!("Logged in as {}", profile.email);
        Ok(LoginSummary {
            email: profile.email,
            user_id: profile.user_id,
            api_tier: profile.api_tier,
            api_key_masked,
        })
    }

    /// Run the interactive login collaborator regardless of the
    /// `allow_interactive` setting.
    pub async fn login_interactive(&self) -> Result<Credential> {
        let login = self.interactive.as_ref().ok_or_else(|| {
            NutritionError::authentication("interactive login is not configured")
        })?;

        let _guard = self.refresh_lock.lock().await;
        let credential = login.login().await?;
        self.persist(&credential).await;
        self.activate(credential.clone());
        tracing::info!("Interactive login completed");
        Ok(credential)
    }

    /// Make `credential` the active one and persist it.
    pub async fn install(&self, credential: Credential) {
        let _guard = self.refresh_lock.lock().await;
        self.persist(&credential).await;
        self.activate(credential);
    }

    /// Forget every credential this session knows about.
    pub async fn logout(&self) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;
        {
            let mut state = self.state.write();
            state.credential = None;
            state.generation += 1;
            state.last_failure = None;
            state.failed_refresh = None;
        }
        self.store.clear().await?;
        if let Some(profiles) = &self.profiles {
            profiles.clear()?;
        }
        tracing::info!("Logged out");
        Ok(())
    }

    /// The stored login, if any. Environment and explicit keys do not count.
    pub async fn current_user(&self) -> Option<CurrentUser> {
        let profile = self.profiles.as_ref()?.get()?;
        let credential = self.store.load().await?;
        Some(CurrentUser {
            profile,
            source: credential.source,
            api_key_masked: credential.access_token.masked(MASKED_KEY_CHARS),
        })
    }

    pub async fn is_logged_in(&self) -> bool {
        self.current_user().await.is_some()
    }

    fn usable_active(&self) -> Option<SessionCredential> {
        let state = self.state.read();
        state
            .credential
            .as_ref()
            .filter(|c| !c.expires_within(self.expiry_buffer))
            .map(|c| SessionCredential {
                credential: c.clone(),
                generation: state.generation,
            })
    }

    /// Slow path of `acquire`. Caller holds `refresh_lock`.
    async fn resolve(&self) -> Result<SessionCredential> {
        let cached = self.state.read().credential.clone();
        let candidate = match cached {
            Some(credential) => Some(credential),
            None => self.store.load().await,
        };

        if let Some(credential) = candidate {
            if !credential.expires_within(self.expiry_buffer) {
                tracing::debug!("Using stored {} credential", credential.source);
                return Ok(self.activate(credential));
            }

            if let Some(message) = self.refresh_failure_for(&credential) {
                tracing::debug!("Not refreshing again after earlier failure: {}", message);
            } else if credential.can_refresh() && self.refresher.is_some() {
                match self.refresh_and_activate(&credential).await {
                    Ok(active) => return Ok(active),
                    Err(e) => tracing::warn!("Stored credential could not be refreshed: {}", e),
                }
            } else {
                tracing::info!("Stored {} credential expired", credential.source);
            }
        }

        if let Some(key) = self.env_key() {
            tracing::debug!("Using API key from {}", self.api_key_env);
            return Ok(self.activate(Credential::new(key, CredentialSource::Env)));
        }

        if let Some(login) = self.interactive_login() {
            tracing::info!("No credential available, starting interactive login");
            return self.run_interactive(login).await;
        }

        Err(NutritionError::authentication(NO_CREDENTIAL_MESSAGE))
    }

    async fn run_interactive(
        &self,
        login: &Arc<dyn InteractiveLogin>,
    ) -> Result<SessionCredential> {
        let credential = login.login().await.map_err(|e| {
            NutritionError::authentication(format!(
                "interactive login failed: {}",
                failure_message(&e)
            ))
        })?;
        self.persist(&credential).await;
        Ok(self.activate(credential))
    }

    /// Error of an attempt that completed after `observed`, if it failed.
    fn failed_since(&self, observed: u64) -> Result<()> {
        let state = self.state.read();
        match &state.last_failure {
            Some(message) if state.attempts != observed => {
                tracing::debug!("Sharing failure of a concurrent renewal");
                Err(NutritionError::authentication(message.clone()))
            }
            _ => Ok(()),
        }
    }

    fn record_attempt(&self, result: &Result<SessionCredential>) {
        let mut state = self.state.write();
        state.attempts += 1;
        state.last_failure = result.as_ref().err().map(failure_message);
    }

    fn refresh_failure_for(&self, credential: &Credential) -> Option<String> {
        self.state
            .read()
            .failed_refresh
            .as_ref()
            .filter(|failed| failed.access_token == credential.access_token)
            .map(|failed| failed.message.clone())
    }

    async fn refresh_and_activate(&self, credential: &Credential) -> Result<SessionCredential> {
        let refresher = self.refresher.as_ref().ok_or_else(|| {
            NutritionError::authentication("no token refresher configured")
        })?;

        tracing::info!("Refreshing {} credential", credential.source);
        let fresh = match refresher.refresh(credential).await {
            Ok(fresh) => fresh,
            Err(e) => {
                tracing::error!("Failed to refresh credential: {}", e);
                self.state.write().failed_refresh = Some(FailedRefresh {
                    access_token: credential.access_token.clone(),
                    message: failure_message(&e),
                });
                return Err(e);
            }
        };

        self.persist(&fresh).await;
        tracing::info!("Successfully refreshed credential");
        Ok(self.activate(fresh))
    }

    fn activate(&self, credential: Credential) -> SessionCredential {
        let mut state = self.state.write();
        state.generation += 1;
        state.credential = Some(credential.clone());
        SessionCredential {
            credential,
            generation: state.generation,
        }
    }

    async fn persist(&self, credential: &Credential) {
        if let Err(e) = self.store.save(credential).await {
            tracing::warn!("Failed to store credential: {}", e);
        }
    }

    fn env_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn interactive_login(&self) -> Option<&Arc<dyn InteractiveLogin>> {
        if self.allow_interactive {
            self.interactive.as_ref()
        } else {
            None
        }
    }
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("explicit_key", &self.explicit.is_some())
            .field("store", &self.store)
            .field("allow_interactive", &self.allow_interactive)
            .field("api_key_env", &self.api_key_env)
            .field("generation", &self.state.read().generation)
            .finish()
    }
}

/// Message text of an error without the variant prefix for auth failures.
fn failure_message(error: &NutritionError) -> String {
    match error {
        NutritionError::Authentication { message } => message.clone(),
        other => other.to_string(),
    }
}

fn refresh_failed(message: &str) -> NutritionError {
    NutritionError::authentication(format!("credential refresh failed: {}", message))
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub struct AuthSessionBuilder {
    api_key: Option<String>,
    store: Option<CredentialStore>,
    profiles: Option<ProfileStore>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    interactive: Option<Arc<dyn InteractiveLogin>>,
    allow_interactive: bool,
    api_key_env: String,
    expiry_buffer: Duration,
}

impl Default for AuthSessionBuilder {
    fn default() -> Self {
        Self {
            api_key: None,
            store: None,
            profiles: None,
            refresher: None,
            interactive: None,
            allow_interactive: false,
            api_key_env: crate::config::DEFAULT_API_KEY_ENV.to_string(),
            expiry_buffer: Duration::minutes(5),
        }
    }
}

impl AuthSessionBuilder {
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn credential_store(mut self, store: CredentialStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn profile_store(mut self, profiles: ProfileStore) -> Self {
        self.profiles = Some(profiles);
        self
    }

    pub fn refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn interactive_login(mut self, login: Arc<dyn InteractiveLogin>) -> Self {
        self.interactive = Some(login);
        self
    }

    pub fn allow_interactive(mut self, allow: bool) -> Self {
        self.allow_interactive = allow;
        self
    }

    pub fn api_key_env(mut self, name: impl Into<String>) -> Self {
        self.api_key_env = name.into();
        self
    }

    pub fn expiry_buffer_minutes(mut self, minutes: i64) -> Self {
        self.expiry_buffer = Duration::minutes(minutes);
        self
    }

    pub fn build(self) -> AuthSession {
        AuthSession {
            explicit: self
                .api_key
                .filter(|k| !k.trim().is_empty())
                .map(Credential::api_key),
            store: self.store.unwrap_or_else(CredentialStore::detect),
            profiles: self.profiles,
            refresher: self.refresher,
            interactive: self.interactive,
            allow_interactive: self.allow_interactive,
            api_key_env: self.api_key_env,
            expiry_buffer: self.expiry_buffer,
            state: RwLock::new(ActiveState::default()),
            refresh_lock: Mutex::new(()),
        }
    }
}
