//! Integration tests for the request surface against a mock API.
//!
//! These tests verify that the client:
//! - Retries idempotent requests on 5xx and never retries analysis POSTs
//! - Maps 429 responses to rate-limit errors with the server's wait hint
//! - Logs in with email/password and signs later requests with the key
//! - Keeps batch results in input order and contains chunk failures

use avocavo_core::{
    ApiKeyUpdate, ClientConfig, CredentialSource, CredentialStore, ErrorKind, NutritionClient,
    NutritionError, ProfileStore,
};
use serde_json::{Value, json};
use tempfile::TempDir;
use wiremock::matchers::{body_json, header, header_exists, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

struct TestClient {
    client: NutritionClient,
    _dir: TempDir,
}

fn config(server: &MockServer) -> ClientConfig {
    ClientConfig {
        base_url: server.uri(),
        retry_count: 3,
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 5,
        api_key_env: "AVOCAVO_TEST_ENDPOINTS_UNSET".into(),
        ..ClientConfig::default()
    }
}

fn build(config: ClientConfig, api_key: Option<&str>) -> TestClient {
    let dir = TempDir::new().unwrap();
    let mut builder = NutritionClient::builder()
        .config(config)
        .credential_store(CredentialStore::in_memory())
        .profile_store(ProfileStore::load_from_path(dir.path().join("profile.json")).unwrap());
    if let Some(key) = api_key {
        builder = builder.api_key(key);
    }
    TestClient {
        client: builder.build().unwrap(),
        _dir: dir,
    }
}

fn keyed_client(server: &MockServer) -> TestClient {
    build(config(server), Some("avk_test"))
}

/// Answers a batch request per ingredient; items containing `fail` get a
/// server-side failure, and any chunk containing `boom` fails as a whole.
struct ScriptedBatch;

impl Respond for ScriptedBatch {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = request.body_json().unwrap_or(Value::Null);
        let items: Vec<String> = body["ingredients"]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        if items.iter().any(|i| i.contains("boom")) {
            return ResponseTemplate::new(400).set_body_json(json!({"error": "Malformed batch"}));
        }

        let results: Vec<Value> = items
            .iter()
            .map(|item| {
                if item.contains("fail") {
                    json!({"success": false, "ingredient": item, "error": "Could not parse ingredient"})
                } else {
                    json!({
                        "success": true,
                        "ingredient": item,
                        "nutrition": {"calories_total": 100.0},
                        "from_cache": item.contains("rice"),
                        "credits_consumed": if item.contains("rice") { 0 } else { 1 }
                    })
                }
            })
            .collect();
        ResponseTemplate::new(200).set_body_json(json!({"success": true, "results": results}))
    }
}

#[tokio::test]
async fn test_analyze_ingredient() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/nutrition/ingredient"))
        .and(header("x-api-key", "avk_test"))
        .and(header_exists("x-request-id"))
        .and(header_exists("user-agent"))
        .and(body_json(json!({"ingredient": "1 cup rice", "include_micros": true})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "ingredient": "1 cup rice",
            "nutrition": {"calories_total": 205.0, "protein_total": 4.3},
            "usda_match": {"fdc_id": 169756, "description": "Rice, white, cooked"},
            "from_cache": true,
            "verification_url": "https://fdc.nal.usda.gov/fdc-app.html#/food-details/169756"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let test = keyed_client(&server);
    let mut options = serde_json::Map::new();
    options.insert("include_micros".into(), Value::Bool(true));

    let result = test
        .client
        .analyze_ingredient("1 cup rice", Some(&options))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.calories(), Some(205.0));
    assert!(result.cache_hit);
    assert_eq!(
        result.usda_match.unwrap().description.as_deref(),
        Some("Rice, white, cooked")
    );
}

#[tokio::test]
async fn test_get_retried_after_server_errors() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/account/usage"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v1/account/usage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "account": {"email": "cook@example.com", "api_tier": "enterprise"},
            "usage": {"current_month": 10, "batch_limit": 500}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let usage = keyed_client(&server).client.get_account_usage().await.unwrap();
    assert_eq!(usage.api_tier, "enterprise");
    assert!(usage.features.custom_integrations);
    assert_eq!(usage.features.max_batch_size, 500);
}

#[tokio::test]
async fn test_exhausted_retries_surface_api_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/keys"))
        .respond_with(ResponseTemplate::new(502).set_body_json(json!({"error": "Bad gateway"})))
        .expect(4)
        .mount(&server)
        .await;

    let err = keyed_client(&server).client.list_api_keys().await.unwrap_err();
    assert!(matches!(err, NutritionError::Api { status: 502, ref message } if message == "Bad gateway"));
}

#[tokio::test]
async fn test_analysis_post_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/nutrition/recipe"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let err = keyed_client(&server)
        .client
        .analyze_recipe(&["2 cups flour".to_string()], 4)
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(500));
}

#[tokio::test]
async fn test_rate_limit_carries_retry_after() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/nutrition/ingredient"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": "Rate limit exceeded",
            "retry_after_seconds": 37,
            "limit": 1000,
            "usage": 1000
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = keyed_client(&server)
        .client
        .analyze_ingredient("1 egg", None)
        .await
        .unwrap_err();

    assert_eq!(err.retry_after_seconds(), Some(37.0));
    assert!(matches!(err, NutritionError::RateLimit { limit: Some(1000), .. }));
}

#[tokio::test]
async fn test_rate_limit_header_hint() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/keys/usage"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "12"))
        .expect(1)
        .mount(&server)
        .await;

    let err = keyed_client(&server)
        .client
        .get_usage_summary()
        .await
        .unwrap_err();
    assert_eq!(err.retry_after_seconds(), Some(12.0));
}

#[tokio::test]
async fn test_rate_limit_fractional_retry_after() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/nutrition/ingredient"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": "Too many requests",
            "retry_after_seconds": 1.5
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = keyed_client(&server)
        .client
        .analyze_ingredient("1 egg", None)
        .await
        .unwrap_err();

    assert_eq!(err.retry_after_seconds(), Some(1.5));
    assert_eq!(err.retry_after(), Some(std::time::Duration::from_millis(1500)));
}

#[tokio::test]
async fn test_analyze_recipe() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/nutrition/recipe"))
        .and(body_json(json!({"ingredients": ["2 cups flour", "1 cup milk"], "servings": 8})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "nutrition": {
                "total": {"calories": 1040.0},
                "per_serving": {"calories": 130.0},
                "ingredients": [
                    {"ingredient": "2 cups flour", "nutrition": {"calories": 900.0}, "usda_match": {"fdc_id": 168936}},
                    {"ingredient": "1 cup milk", "nutrition": {"calories": 140.0}}
                ]
            },
            "usda_matches": 2
        })))
        .expect(1)
        .mount(&server)
        .await;

    let recipe = keyed_client(&server)
        .client
        .analyze_recipe(&["2 cups flour".to_string(), "1 cup milk".to_string()], 8)
        .await
        .unwrap();

    assert!(recipe.success);
    assert_eq!(recipe.per_serving.unwrap().calories(), Some(130.0));
    assert_eq!(recipe.breakdown[0].usda_match.as_ref().unwrap().fdc_id, Some(168936));
    assert_eq!(recipe.usda_matches, 2);
}

#[tokio::test]
async fn test_batch_with_blank_item_and_chunking() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/nutrition/batch"))
        .respond_with(ScriptedBatch)
        .expect(2)
        .mount(&server)
        .await;

    let mut config = config(&server);
    config.chunk_size = 2;
    let test = build(config, Some("avk_test"));

    let input = vec!["1 cup rice".to_string(), String::new(), "2 tbsp oil".to_string()];
    let result = test.client.analyze_batch(&input).await.unwrap();

    assert_eq!(result.len(), 3);
    assert_eq!(result.chunk_count, 2);
    assert_eq!(result.per_item[0].ingredient, "1 cup rice");
    assert!(result.per_item[0].success);
    assert_eq!(
        result.per_item[1].error.as_ref().unwrap().kind,
        ErrorKind::Validation
    );
    assert_eq!(result.per_item[2].ingredient, "2 tbsp oil");
    assert!(result.per_item[2].success);
    assert!((result.success_rate - 2.0 / 3.0).abs() < 1e-9);
    assert_eq!(result.credits_saved, 1);
}

#[tokio::test]
async fn test_batch_chunk_failure_is_contained() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/nutrition/batch"))
        .respond_with(ScriptedBatch)
        .mount(&server)
        .await;

    let mut config = config(&server);
    config.chunk_size = 3;
    config.concurrency = 2;
    let test = build(config, Some("avk_test"));

    let input: Vec<String> = [
        "1 apple", "2 pears", "3 plums", "boom", "4 figs", "5 dates", "will fail", "6 kiwis",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    let result = test.client.analyze_batch(&input).await.unwrap();

    let names: Vec<&str> = result.per_item.iter().map(|r| r.ingredient.as_str()).collect();
    assert_eq!(names, input.iter().map(String::as_str).collect::<Vec<_>>());

    let outcomes: Vec<bool> = result.per_item.iter().map(|r| r.success).collect();
    assert_eq!(outcomes, vec![true, true, true, false, false, false, false, true]);

    let chunk_error = result.per_item[4].error.as_ref().unwrap();
    assert_eq!(chunk_error.status, Some(400));
    assert_eq!(
        result.per_item[6].error.as_ref().unwrap().kind,
        ErrorKind::Unmatched
    );
}

#[tokio::test]
async fn test_login_stores_key_and_profile() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .and(body_json(json!({"email": "cook@example.com", "password": "hunter2"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "user": {
                "id": 42,
                "email": "cook@example.com",
                "api_key": "avk_live_1234567890abcdef",
                "api_tier": "starter"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/keys"))
        .and(header("x-api-key", "avk_live_1234567890abcdef"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"keys": []})))
        .expect(1)
        .mount(&server)
        .await;

    let test = build(config(&server), None);
    let summary = test.client.login("cook@example.com", "hunter2").await.unwrap();

    assert_eq!(summary.api_key_masked, "avk_live_123...");
    assert_eq!(summary.api_tier, "starter");
    assert_eq!(summary.user_id.as_deref(), Some("42"));

    let user = test.client.current_user().await.unwrap();
    assert_eq!(user.profile.email, "cook@example.com");
    assert_eq!(user.source, CredentialSource::Login);

    let keys = test.client.list_api_keys().await.unwrap();
    assert_eq!(keys, json!({"keys": []}));

    test.client.logout().await.unwrap();
    assert!(!test.client.is_logged_in().await);
}

#[tokio::test]
async fn test_login_failures() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .and(body_json(json!({"email": "bad@example.com", "password": "nope"})))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .and(body_json(json!({"email": "nokey@example.com", "password": "pw"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"success": true, "user": {}})),
        )
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .and(body_json(json!({"email": "down@example.com", "password": "pw"})))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let test = build(config(&server), None);

    let err = test.client.login("bad@example.com", "nope").await.unwrap_err();
    assert!(err.to_string().contains("Invalid email or password"));

    let err = test.client.login("nokey@example.com", "pw").await.unwrap_err();
    assert!(err.to_string().contains("No API key received"));

    let err = test.client.login("down@example.com", "pw").await.unwrap_err();
    assert!(err.to_string().contains("Login failed: 503"));

    assert!(!test.client.is_logged_in().await);
}

#[tokio::test]
async fn test_health_check_sends_no_credentials() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "healthy"})))
        .expect(1)
        .mount(&server)
        .await;

    let health = keyed_client(&server).client.health_check().await.unwrap();
    assert!(health.is_healthy());

    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].headers.get("x-api-key").is_none());
}

#[tokio::test]
async fn test_api_key_management_routes() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/keys"))
        .and(body_json(json!({"name": "Mobile", "description": null, "environment": "production"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"key": {"id": 7}})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/api/keys/7"))
        .and(body_json(json!({"environment": "staging"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/keys/7/regenerate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"key": {"api_key": "avk_new"}})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/api/keys/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "deleted"})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v1/nutrition/verify/168936"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"food_data": {"fdc_id": 168936}})))
        .expect(1)
        .mount(&server)
        .await;

    let test = keyed_client(&server);
    let client = &test.client;

    let created = client
        .create_api_key("Mobile", None, Some("production"))
        .await
        .unwrap();
    assert_eq!(created["key"]["id"], 7);

    let update = ApiKeyUpdate {
        environment: Some("staging".into()),
        ..ApiKeyUpdate::default()
    };
    client.update_api_key(7, &update).await.unwrap();

    let regenerated = client.regenerate_api_key(7).await.unwrap();
    assert_eq!(regenerated["key"]["api_key"], "avk_new");

    client.delete_api_key(7).await.unwrap();

    let food = client.verify_fdc_id(168936).await.unwrap();
    assert_eq!(food["food_data"]["fdc_id"], 168936);
}

#[tokio::test]
async fn test_forbidden_maps_to_api_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/nutrition/batch"))
        .respond_with(
            ResponseTemplate::new(403)
                .set_body_json(json!({"error": "Batch processing requires Starter tier"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let result = keyed_client(&server)
        .client
        .analyze_batch(&["1 egg".to_string()])
        .await
        .unwrap();

    let error = result.per_item[0].error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::Api);
    assert_eq!(error.status, Some(403));
    assert!(error.message.contains("Starter tier"));
    assert_eq!(result.success_rate, 0.0);
}
