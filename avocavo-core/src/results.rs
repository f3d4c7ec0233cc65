//! Typed views over API responses.
//!
//! Every model is built with a tolerant `from_value` constructor: missing or
//! mistyped fields become `None` (or a documented default) instead of an
//! error. `to_value` emits the declared fields that are present, so a value
//! parsed from a response round-trips over those fields.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use uuid::Uuid;

use crate::error::{ErrorInfo, ErrorKind};

fn number(map: &Map<String, Value>, key: &str) -> Option<f64> {
    map.get(key).and_then(Value::as_f64)
}

fn exact_number(map: &Map<String, Value>, key: &str) -> Option<Number> {
    match map.get(key) {
        Some(Value::Number(n)) => Some(n.clone()),
        _ => None,
    }
}

fn unsigned(map: &Map<String, Value>, key: &str) -> Option<u64> {
    map.get(key).and_then(Value::as_u64)
}

fn text(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_string)
}

fn flag(map: &Map<String, Value>, key: &str) -> Option<bool> {
    map.get(key).and_then(Value::as_bool)
}

fn as_f64(value: &Option<Number>) -> Option<f64> {
    value.as_ref().and_then(Number::as_f64)
}

fn to_value<T: Serialize>(model: &T) -> Value {
    serde_json::to_value(model).unwrap_or(Value::Null)
}

/// Nutrient totals for an ingredient or recipe.
///
/// The wire keys carry a `_total` suffix (`calories_total`). Recipe summaries
/// use the bare names (`calories`); both forms are accepted on input and the
/// suffixed form is emitted. Values keep the integer or decimal form the
/// server sent; the accessor methods read them as `f64`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NutritionProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calories_total: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protein_total: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_fat_total: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carbohydrates_total: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fiber_total: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sugar_total: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sodium_total: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calcium_total: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iron_total: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saturated_fat_total: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cholesterol_total: Option<Number>,
}

impl NutritionProfile {
    pub fn from_value(value: &Value) -> Self {
        let Some(map) = value.as_object() else {
            return Self::default();
        };
        let read = |name: &str| {
            exact_number(map, &format!("{}_total", name)).or_else(|| exact_number(map, name))
        };

        Self {
            calories_total: read("calories"),
            protein_total: read("protein"),
            total_fat_total: read("total_fat"),
            carbohydrates_total: read("carbohydrates"),
            fiber_total: read("fiber"),
            sugar_total: read("sugar"),
            sodium_total: read("sodium"),
            calcium_total: read("calcium"),
            iron_total: read("iron"),
            saturated_fat_total: read("saturated_fat"),
            cholesterol_total: read("cholesterol"),
        }
    }

    pub fn to_value(&self) -> Value {
        to_value(self)
    }

    pub fn calories(&self) -> Option<f64> {
        as_f64(&self.calories_total)
    }

    pub fn protein(&self) -> Option<f64> {
        as_f64(&self.protein_total)
    }

    pub fn total_fat(&self) -> Option<f64> {
        as_f64(&self.total_fat_total)
    }

    pub fn carbohydrates(&self) -> Option<f64> {
        as_f64(&self.carbohydrates_total)
    }

    pub fn fiber(&self) -> Option<f64> {
        as_f64(&self.fiber_total)
    }

    pub fn sugar(&self) -> Option<f64> {
        as_f64(&self.sugar_total)
    }

    pub fn sodium(&self) -> Option<f64> {
        as_f64(&self.sodium_total)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// The USDA FoodData Central entry an ingredient was matched to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsdaMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fdc_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
}

impl UsdaMatch {
    pub fn from_value(value: &Value) -> Self {
        let Some(map) = value.as_object() else {
            return Self::default();
        };
        Self {
            fdc_id: unsigned(map, "fdc_id"),
            description: text(map, "description"),
            data_type: text(map, "data_type"),
        }
    }

    pub fn to_value(&self) -> Value {
        to_value(self)
    }
}

/// Outcome for one ingredient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemResult {
    pub ingredient: String,
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nutrition: Option<NutritionProfile>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usda_match: Option<UsdaMatch>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,

    /// Served from the server-side cache.
    #[serde(default)]
    pub cache_hit: bool,

    #[serde(default)]
    pub credits_consumed: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_method: Option<String>,
}

impl ItemResult {
    /// Parse one ingredient response. `fallback_ingredient` names the item
    /// when the server omits it.
    pub fn from_value(value: &Value, fallback_ingredient: &str) -> Self {
        let empty = Map::new();
        let map = value.as_object().unwrap_or(&empty);

        let success = flag(map, "success").unwrap_or(false);
        let ingredient = text(map, "ingredient")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| fallback_ingredient.to_string());
        let processing_time_ms = number(map, "processing_time_ms");
        let cache_hit = flag(map, "from_cache")
            .or_else(|| flag(map, "cache_hit"))
            .unwrap_or(false);
        let credits_consumed = unsigned(map, "credits_consumed").unwrap_or(0);

        if !success {
            let message = text(map, "error").unwrap_or_else(|| "Unknown error".to_string());
            let mut failed = Self::failed(ingredient, ErrorInfo::new(ErrorKind::Unmatched, message));
            failed.processing_time_ms = processing_time_ms;
            failed.cache_hit = cache_hit;
            failed.credits_consumed = credits_consumed;
            return failed;
        }

        Self {
            ingredient,
            success: true,
            nutrition: map
                .get("nutrition")
                .filter(|v| v.is_object())
                .map(NutritionProfile::from_value),
            usda_match: map
                .get("usda_match")
                .filter(|v| v.is_object())
                .map(UsdaMatch::from_value),
            error: None,
            cache_hit,
            credits_consumed,
            processing_time_ms,
            verification_url: text(map, "verification_url"),
            confidence_score: number(map, "confidence_score"),
            verification_method: text(map, "verification_method"),
        }
    }

    pub fn failed(ingredient: impl Into<String>, error: ErrorInfo) -> Self {
        Self {
            ingredient: ingredient.into(),
            success: false,
            nutrition: None,
            usda_match: None,
            error: Some(error),
            cache_hit: false,
            credits_consumed: 0,
            processing_time_ms: None,
            verification_url: None,
            confidence_score: None,
            verification_method: None,
        }
    }

    pub fn calories(&self) -> Option<f64> {
        self.nutrition.as_ref().and_then(NutritionProfile::calories)
    }

    pub fn to_value(&self) -> Value {
        to_value(self)
    }
}

/// Ordered per-item results of a batch with summary statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub request_id: Uuid,
    pub per_item: Vec<ItemResult>,
    /// Successes over total items, in `[0, 1]`.
    pub success_rate: f64,
    /// Cache hits over total items, in `[0, 1]`.
    pub cache_hit_rate: f64,
    pub credits_saved: u64,
    pub chunk_count: usize,
}

impl BatchResult {
    /// Compute statistics over `per_item`.
    pub fn from_items(per_item: Vec<ItemResult>, credits_per_item: u64, chunk_count: usize) -> Self {
        let total = per_item.len();
        let successes = per_item.iter().filter(|r| r.success).count();
        let cache_hits = per_item.iter().filter(|r| r.cache_hit).count();

        let rate = |n: usize| if total == 0 { 0.0 } else { n as f64 / total as f64 };

        Self {
            request_id: Uuid::new_v4(),
            success_rate: rate(successes),
            cache_hit_rate: rate(cache_hits),
            credits_saved: credits_per_item.saturating_mul(cache_hits as u64),
            chunk_count,
            per_item,
        }
    }

    pub fn len(&self) -> usize {
        self.per_item.len()
    }

    pub fn is_empty(&self) -> bool {
        self.per_item.is_empty()
    }

    pub fn successes(&self) -> impl Iterator<Item = &ItemResult> {
        self.per_item.iter().filter(|r| r.success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ItemResult> {
        self.per_item.iter().filter(|r| !r.success)
    }

    pub fn to_value(&self) -> Value {
        to_value(self)
    }
}

/// One line of a recipe breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeIngredient {
    pub ingredient: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nutrition: Option<NutritionProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usda_match: Option<UsdaMatch>,
}

impl RecipeIngredient {
    pub fn from_value(value: &Value) -> Self {
        let empty = Map::new();
        let map = value.as_object().unwrap_or(&empty);
        Self {
            ingredient: text(map, "ingredient").unwrap_or_default(),
            success: flag(map, "success").unwrap_or(true),
            nutrition: map
                .get("nutrition")
                .filter(|v| v.is_object())
                .map(NutritionProfile::from_value),
            usda_match: map
                .get("usda_match")
                .filter(|v| v.is_object())
                .map(UsdaMatch::from_value),
        }
    }
}

/// Recipe totals, per-serving values and per-ingredient breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeResult {
    pub success: bool,
    pub ingredients: Vec<String>,
    pub servings: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<NutritionProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_serving: Option<NutritionProfile>,
    #[serde(default)]
    pub breakdown: Vec<RecipeIngredient>,
    /// Number of ingredients matched to a USDA entry.
    #[serde(default)]
    pub usda_matches: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecipeResult {
    pub fn from_value(value: &Value, ingredients: &[String], servings: u32) -> Self {
        let empty = Map::new();
        let map = value.as_object().unwrap_or(&empty);
        let success = flag(map, "success").unwrap_or(false);

        let mut result = Self {
            success,
            ingredients: ingredients.to_vec(),
            servings,
            total: None,
            per_serving: None,
            breakdown: Vec::new(),
            usda_matches: 0,
            processing_time_ms: number(map, "processing_time_ms"),
            error: None,
        };

        if !success {
            result.error = Some(text(map, "error").unwrap_or_else(|| "Unknown error".to_string()));
            return result;
        }

        if let Some(nutrition) = map.get("nutrition").and_then(Value::as_object) {
            result.total = nutrition.get("total").map(NutritionProfile::from_value);
            result.per_serving = nutrition.get("per_serving").map(NutritionProfile::from_value);
            result.breakdown = nutrition
                .get("ingredients")
                .and_then(Value::as_array)
                .map(|items| items.iter().map(RecipeIngredient::from_value).collect())
                .unwrap_or_default();
        }
        result.usda_matches = unsigned(map, "usda_matches").unwrap_or(0);
        result
    }

    pub fn to_value(&self) -> Value {
        to_value(self)
    }
}

/// Monthly usage counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub current_month: u64,
    /// `None` for unlimited plans.
    pub monthly_limit: Option<u64>,
    pub remaining: u64,
    pub percentage_used: f64,
    pub reset_date: Option<String>,
    pub days_until_reset: u64,
    pub batch_limit: u64,
}

/// Capabilities implied by the account's tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanFeatures {
    pub batch_processing: bool,
    pub max_batch_size: u64,
    pub priority_support: bool,
    pub analytics_dashboard: bool,
    pub webhook_notifications: bool,
    pub custom_integrations: bool,
}

impl PlanFeatures {
    pub fn for_tier(tier: &str, max_batch_size: u64) -> Self {
        let tier = tier.to_ascii_lowercase();
        let any_of = |tiers: &[&str]| tiers.contains(&tier.as_str());

        Self {
            batch_processing: any_of(&["trial", "starter", "professional", "enterprise"]),
            max_batch_size,
            priority_support: any_of(&["professional", "enterprise"]),
            analytics_dashboard: any_of(&["starter", "professional", "enterprise"]),
            webhook_notifications: any_of(&["professional", "enterprise"]),
            custom_integrations: tier == "enterprise",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountUsage {
    pub email: String,
    pub api_tier: String,
    pub subscription_status: String,
    pub usage: Usage,
    pub features: PlanFeatures,
}

impl AccountUsage {
    pub fn from_value(value: &Value) -> Self {
        let empty = Map::new();
        let account = value
            .get("account")
            .and_then(Value::as_object)
            .unwrap_or(&empty);
        let usage = value.get("usage").and_then(Value::as_object).unwrap_or(&empty);

        let api_tier = text(account, "api_tier").unwrap_or_default();
        let batch_limit = unsigned(usage, "batch_limit").unwrap_or(1);

        Self {
            email: text(account, "email").unwrap_or_default(),
            subscription_status: text(account, "subscription_status").unwrap_or_default(),
            usage: Usage {
                current_month: unsigned(usage, "current_month").unwrap_or(0),
                monthly_limit: unsigned(usage, "monthly_limit"),
                remaining: unsigned(usage, "remaining").unwrap_or(0),
                percentage_used: number(usage, "percentage_used").unwrap_or(0.0),
                reset_date: text(usage, "reset_date"),
                days_until_reset: unsigned(usage, "days_until_reset").unwrap_or(0),
                batch_limit,
            },
            features: PlanFeatures::for_tier(&api_tier, batch_limit),
            api_tier,
        }
    }

    pub fn to_value(&self) -> Value {
        to_value(self)
    }
}

/// Health report from the unauthenticated health endpoint. Opaque.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HealthStatus(pub Value);

impl HealthStatus {
    pub fn status(&self) -> Option<&str> {
        self.0.get("status").and_then(Value::as_str)
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status(), Some("healthy") | Some("ok"))
    }
}

/// Fields to change on an API key. Unset fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}
