//! Public client surface.
//!
//! [`NutritionClient`] owns one [`AuthSession`], one [`HttpClient`] and a
//! [`BatchCoordinator`]. It is cheap to clone; clones share the session, so a
//! credential refreshed by one clone is seen by all of them.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> avocavo_core::Result<()> {
//! use avocavo_core::NutritionClient;
//!
//! let client = NutritionClient::builder().api_key("avk_live_...").build()?;
//!
//! let rice = client.analyze_ingredient("1 cup rice", None).await?;
//! println!("{:?} kcal", rice.calories());
//!
//! let batch = client
//!     .analyze_batch(&["2 eggs".to_string(), "1 tbsp butter".to_string()])
//!     .await?;
//! println!("success rate {:.0}%", batch.success_rate * 100.0);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Map, Value, json};
use std::sync::Arc;

use crate::auth::{
    AuthSession, CurrentUser, InteractiveLogin, LoginSummary, TokenRefresher,
};
use crate::batch::{BatchCoordinator, ChunkDispatcher};
use crate::config::ClientConfig;
use crate::credential_store::CredentialStore;
use crate::error::{NutritionError, Result};
use crate::http::{HttpClient, HttpRequest, HttpResponse};
use crate::model::Credential;
use crate::profile_store::ProfileStore;
use crate::results::{
    AccountUsage, ApiKeyUpdate, BatchResult, HealthStatus, ItemResult, RecipeResult,
};

/// Extra request fields for single-ingredient analysis.
pub type IngredientOptions = Map<String, Value>;

struct ClientInner {
    config: ClientConfig,
    http: HttpClient,
    session: AuthSession,
    batch: BatchCoordinator,
}

impl ClientInner {
    /// Send with the session credential, renewing it once on 401.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let active = self.session.acquire().await?;
        let response = self.http.execute(&request.signed(&active.credential)).await?;
        if response.status != StatusCode::UNAUTHORIZED {
            return HttpClient::check(response);
        }

        let renewed = self.session.handle_unauthorized(&active).await?;
        let response = self
            .http
            .execute(&request.signed(&renewed.credential))
            .await?;
        if response.status == StatusCode::UNAUTHORIZED {
            return Err(NutritionError::authentication(
                "Server rejected the renewed credential. Log in again.",
            ));
        }
        HttpClient::check(response)
    }
}

#[async_trait]
impl ChunkDispatcher for ClientInner {
    async fn dispatch(&self, items: Vec<String>) -> Result<Vec<ItemResult>> {
        let response = self
            .send(HttpRequest::post(
                "/api/v1/nutrition/batch",
                json!({ "ingredients": items }),
            ))
            .await?;

        let status = response.status.as_u16();
        let Some(results) = response.body.get("results").and_then(Value::as_array) else {
            let message = response
                .body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("batch response contained no results")
                .to_string();
            return Err(NutritionError::Api { status, message });
        };

        Ok(results
            .iter()
            .zip(&items)
            .map(|(value, ingredient)| ItemResult::from_value(value, ingredient))
            .collect())
    }
}

#[derive(Clone)]
pub struct NutritionClient {
    inner: Arc<ClientInner>,
}

impl NutritionClient {
    pub fn builder() -> NutritionClientBuilder {
        NutritionClientBuilder::default()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn session(&self) -> &AuthSession {
        &self.inner.session
    }

    /// Log in with email and password; the API key is stored for later runs.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginSummary> {
        self.inner
            .session
            .login(&self.inner.http, email, password)
            .await
    }

    pub async fn login_interactive(&self) -> Result<Credential> {
        self.inner.session.login_interactive().await
    }

    pub async fn logout(&self) -> Result<()> {
        self.inner.session.logout().await
    }

    pub async fn current_user(&self) -> Option<CurrentUser> {
        self.inner.session.current_user().await
    }

    pub async fn is_logged_in(&self) -> bool {
        self.inner.session.is_logged_in().await
    }

    /// Analyze one ingredient line such as `"2 cups flour"`.
    pub async fn analyze_ingredient(
        &self,
        ingredient: &str,
        options: Option<&IngredientOptions>,
    ) -> Result<ItemResult> {
        if ingredient.trim().is_empty() {
            return Err(NutritionError::validation("ingredient must not be empty"));
        }

        let mut body = options.cloned().unwrap_or_default();
        body.insert("ingredient".to_string(), Value::String(ingredient.to_string()));

        let response = self
            .inner
            .send(HttpRequest::post(
                "/api/v1/nutrition/ingredient",
                Value::Object(body),
            ))
            .await?;

        let result = ItemResult::from_value(&response.body, ingredient);
        if result.cache_hit {
            tracing::debug!("Cache hit for ingredient analysis");
        }
        Ok(result)
    }

    /// Analyze a recipe; per-serving values are divided by `servings`.
    pub async fn analyze_recipe(
        &self,
        ingredients: &[String],
        servings: u32,
    ) -> Result<RecipeResult> {
        if ingredients.is_empty() {
            return Err(NutritionError::validation("recipe must have at least one ingredient"));
        }
        if servings == 0 {
            return Err(NutritionError::validation("servings must be greater than 0"));
        }

        let response = self
            .inner
            .send(HttpRequest::post(
                "/api/v1/nutrition/recipe",
                json!({ "ingredients": ingredients, "servings": servings }),
            ))
            .await?;

        Ok(RecipeResult::from_value(&response.body, ingredients, servings))
    }

    /// Analyze many ingredients in chunked, concurrent batch requests.
    pub async fn analyze_batch(&self, ingredients: &[String]) -> Result<BatchResult> {
        let dispatcher: Arc<dyn ChunkDispatcher> = self.inner.clone();
        self.inner.batch.run(dispatcher, ingredients).await
    }

    pub async fn get_account_usage(&self) -> Result<AccountUsage> {
        let response = self
            .inner
            .send(HttpRequest::get("/api/v1/account/usage"))
            .await?;
        Ok(AccountUsage::from_value(&response.body))
    }

    pub async fn list_api_keys(&self) -> Result<Value> {
        self.body_of(HttpRequest::get("/api/keys")).await
    }

    /// Create an API key. The full key is only returned by this call.
    pub async fn create_api_key(
        &self,
        name: &str,
        description: Option<&str>,
        environment: Option<&str>,
    ) -> Result<Value> {
        if name.trim().is_empty() {
            return Err(NutritionError::validation("API key name must not be empty"));
        }
        self.body_of(HttpRequest::post(
            "/api/keys",
            json!({ "name": name, "description": description, "environment": environment }),
        ))
        .await
    }

    pub async fn update_api_key(&self, key_id: u64, update: &ApiKeyUpdate) -> Result<Value> {
        let body = serde_json::to_value(update)
            .map_err(|e| NutritionError::validation(format!("invalid key update: {}", e)))?;
        self.body_of(HttpRequest::put(format!("/api/keys/{}", key_id), body))
            .await
    }

    pub async fn delete_api_key(&self, key_id: u64) -> Result<Value> {
        self.body_of(HttpRequest::delete(format!("/api/keys/{}", key_id)))
            .await
    }

    pub async fn regenerate_api_key(&self, key_id: u64) -> Result<Value> {
        self.body_of(HttpRequest::new(
            reqwest::Method::POST,
            format!("/api/keys/{}/regenerate", key_id),
        ))
        .await
    }

    /// Usage aggregated over every API key of the account.
    pub async fn get_usage_summary(&self) -> Result<Value> {
        self.body_of(HttpRequest::get("/api/keys/usage")).await
    }

    /// Details of a USDA FoodData Central entry.
    pub async fn verify_fdc_id(&self, fdc_id: u64) -> Result<Value> {
        self.body_of(HttpRequest::get(format!(
            "/api/v1/nutrition/verify/{}",
            fdc_id
        )))
        .await
    }

    /// API health. Sent without credentials.
    pub async fn health_check(&self) -> Result<HealthStatus> {
        let response = self
            .inner
            .http
            .request(&HttpRequest::get("/api/v1/health"))
            .await?;
        Ok(HealthStatus(response.body))
    }

    async fn body_of(&self, request: HttpRequest) -> Result<Value> {
        Ok(self.inner.send(request).await?.body)
    }
}

impl std::fmt::Debug for NutritionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NutritionClient")
            .field("base_url", &self.inner.config.base_url)
            .field("session", &self.inner.session)
            .finish()
    }
}

#[derive(Default)]
pub struct NutritionClientBuilder {
    config: Option<ClientConfig>,
    api_key: Option<String>,
    store: Option<CredentialStore>,
    profiles: Option<ProfileStore>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    interactive: Option<Arc<dyn InteractiveLogin>>,
}

impl NutritionClientBuilder {
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

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

    pub fn build(self) -> Result<NutritionClient> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let http = HttpClient::new(&config)?;
        let batch = BatchCoordinator::from_config(&config)?;

        let mut session = AuthSession::builder()
            .credential_store(self.store.unwrap_or_else(CredentialStore::detect))
            .allow_interactive(config.interactive)
            .api_key_env(config.api_key_env.clone())
            .expiry_buffer_minutes(config.expiry_buffer_minutes);

        if let Some(api_key) = self.api_key {
            session = session.api_key(api_key);
        }

        match self.profiles {
            Some(profiles) => session = session.profile_store(profiles),
            None => match ProfileStore::load() {
                Ok(profiles) => session = session.profile_store(profiles),
                Err(e) => tracing::warn!("Profile store unavailable: {}", e),
            },
        }

        if let Some(refresher) = self.refresher.or_else(|| default_refresher(&config)) {
            session = session.refresher(refresher);
        }
        if let Some(login) = self.interactive {
            session = session.interactive_login(login);
        }

        Ok(NutritionClient {
            inner: Arc::new(ClientInner {
                config,
                http,
                session: session.build(),
                batch,
            }),
        })
    }
}

#[cfg(feature = "oauth")]
fn default_refresher(config: &ClientConfig) -> Option<Arc<dyn TokenRefresher>> {
    use crate::oauth::{OAuthEndpoints, OAuthRefresher};
    Some(Arc::new(OAuthRefresher::new(OAuthEndpoints::for_base_url(
        &config.base_url,
    ))))
}

#[cfg(not(feature = "oauth"))]
fn default_refresher(_config: &ClientConfig) -> Option<Arc<dyn TokenRefresher>> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_client() -> NutritionClient {
        let dir = tempfile::tempdir().unwrap();
        NutritionClient::builder()
            .config(ClientConfig {
                base_url: "http://127.0.0.1:9".into(),
                retry_count: 0,
                ..ClientConfig::default()
            })
            .api_key("avk_test")
            .credential_store(CredentialStore::in_memory())
            .profile_store(ProfileStore::load_from_path(dir.path().join("profile.json")).unwrap())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_blank_ingredient_rejected_before_request() {
        let err = offline_client()
            .analyze_ingredient("   ", None)
            .await
            .unwrap_err();
        assert!(matches!(err, NutritionError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_recipe_validation() {
        let client = offline_client();
        assert!(matches!(
            client.analyze_recipe(&[], 2).await,
            Err(NutritionError::Validation { .. })
        ));
        assert!(matches!(
            client.analyze_recipe(&["1 egg".to_string()], 0).await,
            Err(NutritionError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_batch_rejected() {
        assert!(matches!(
            offline_client().analyze_batch(&[]).await,
            Err(NutritionError::Validation { .. })
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = NutritionClient::builder()
            .config(ClientConfig {
                concurrency: 0,
                ..ClientConfig::default()
            })
            .credential_store(CredentialStore::in_memory())
            .build();
        assert!(matches!(result, Err(NutritionError::Config { .. })));
    }

    #[test]
    fn test_debug_hides_key() {
        let debug = format!("{:?}", offline_client());
        assert!(!debug.contains("avk_test"));
    }
}
