//! Process-wide convenience client.
//!
//! The free functions here forward to one shared [`NutritionClient`], built
//! lazily from `config.toml` the first time it is needed. [`configure`]
//! replaces it with a client built from the file plus the given overrides.

use parking_lot::RwLock;
use std::sync::OnceLock;

use crate::auth::{CurrentUser, LoginSummary};
use crate::client::NutritionClient;
use crate::config::{ClientOptions, load_config};
use crate::error::Result;
use crate::results::{AccountUsage, BatchResult, ItemResult, RecipeResult};

static DEFAULT_CLIENT: OnceLock<RwLock<Option<NutritionClient>>> = OnceLock::new();

fn slot() -> &'static RwLock<Option<NutritionClient>> {
    DEFAULT_CLIENT.get_or_init(|| RwLock::new(None))
}

/// Rebuild the default client with `options` applied over `config.toml`.
pub fn configure(options: ClientOptions) -> Result<()> {
    let mut config = load_config()?;
    config.apply(options);
    let client = NutritionClient::builder().config(config).build()?;
    set_default_client(client);
    Ok(())
}

/// Install a fully built client as the default.
pub fn set_default_client(client: NutritionClient) {
    *slot().write() = Some(client);
}

/// The default client, built from `config.toml` on first use.
pub fn default_client() -> Result<NutritionClient> {
    if let Some(client) = slot().read().as_ref() {
        return Ok(client.clone());
    }

    let mut guard = slot().write();
    if let Some(client) = guard.as_ref() {
        return Ok(client.clone());
    }
    let client = NutritionClient::builder().config(load_config()?).build()?;
    *guard = Some(client.clone());
    Ok(client)
}

pub async fn login(email: &str, password: &str) -> Result<LoginSummary> {
    default_client()?.login(email, password).await
}

pub async fn logout() -> Result<()> {
    default_client()?.logout().await
}

pub async fn current_user() -> Result<Option<CurrentUser>> {
    Ok(default_client()?.current_user().await)
}

pub async fn analyze_ingredient(ingredient: &str) -> Result<ItemResult> {
    default_client()?.analyze_ingredient(ingredient, None).await
}

pub async fn analyze_recipe(ingredients: &[String], servings: u32) -> Result<RecipeResult> {
    default_client()?.analyze_recipe(ingredients, servings).await
}

pub async fn analyze_batch(ingredients: &[String]) -> Result<BatchResult> {
    default_client()?.analyze_batch(ingredients).await
}

pub async fn get_account_usage() -> Result<AccountUsage> {
    default_client()?.get_account_usage().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::credential_store::CredentialStore;
    use crate::profile_store::ProfileStore;

    #[tokio::test]
    async fn test_installed_client_is_shared() {
        let dir = tempfile::tempdir().unwrap();
        let client = NutritionClient::builder()
            .config(ClientConfig {
                base_url: "http://127.0.0.1:9".into(),
                ..ClientConfig::default()
            })
            .api_key("avk_default")
            .credential_store(CredentialStore::in_memory())
            .profile_store(ProfileStore::load_from_path(dir.path().join("profile.json")).unwrap())
            .build()
            .unwrap();

        set_default_client(client);
        let shared = default_client().unwrap();
        assert_eq!(shared.config().base_url, "http://127.0.0.1:9");

        let err = analyze_ingredient("").await.unwrap_err();
        assert!(matches!(err, crate::NutritionError::Validation { .. }));
    }
}
