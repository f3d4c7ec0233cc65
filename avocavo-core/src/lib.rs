//! # Avocavo Core
//!
//! Client library for the Avocavo nutrition API.
//!
//! This crate provides:
//! - [`NutritionClient`] covering ingredient, recipe and batch analysis,
//!   account usage, API key management, USDA verification and health checks
//! - An [`AuthSession`] that resolves credentials from an explicit key, the OS
//!   keyring, the `AVOCAVO_API_KEY` environment variable or an interactive
//!   login, and renews them on expiry or 401
//! - A [`BatchCoordinator`] that chunks large ingredient lists and runs the
//!   chunks concurrently
//! - Typed result models over the JSON responses
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use avocavo_core::NutritionClient;
//!
//! async fn calories(client: &NutritionClient) -> avocavo_core::Result<Option<f64>> {
//!     let result = client.analyze_ingredient("1 cup cooked rice", None).await?;
//!     Ok(result.calories())
//! }
//! ```

pub mod auth;
pub mod batch;
pub mod client;
pub mod config;
pub mod credential_store;
pub mod default_client;
pub mod error;
pub mod http;
pub mod model;
pub mod profile_store;
pub mod results;
pub mod store;

#[cfg(feature = "oauth")]
pub mod oauth;

// Re-export commonly used types at crate root
pub use auth::{
    AuthSession,
    AuthSessionBuilder,
    CurrentUser,
    InteractiveLogin,
    LoginSummary,
    SessionCredential,
    TokenRefresher,
};

pub use batch::{
    BatchCoordinator,
    ChunkDispatcher,
};

pub use client::{
    IngredientOptions,
    NutritionClient,
    NutritionClientBuilder,
};

pub use config::{
    ClientConfig,
    ClientOptions,
    load_config,
    load_config_from_path,
};

pub use credential_store::{
    CredentialStore,
    StoreAvailability,
};

pub use error::{
    ErrorInfo,
    ErrorKind,
    NutritionError,
    Result,
};

pub use http::{
    HttpClient,
    HttpRequest,
    HttpResponse,
    RetryPolicy,
};

pub use model::{
    Credential,
    CredentialSource,
};

pub use profile_store::{
    ProfileStore,
    ProfileStoreError,
    UserProfile,
};

pub use results::{
    AccountUsage,
    ApiKeyUpdate,
    BatchResult,
    HealthStatus,
    ItemResult,
    NutritionProfile,
    PlanFeatures,
    RecipeIngredient,
    RecipeResult,
    Usage,
    UsdaMatch,
};

pub use store::{
    MemoryStore,
    Secret,
    SecretStore,
    StoreError,
};

#[cfg(feature = "keyring-store")]
pub use store::KeyringStore;

#[cfg(feature = "oauth")]
pub use oauth::{
    DeviceAuthorization,
    DeviceCodeLogin,
    OAuthEndpoints,
    OAuthRefresher,
};
