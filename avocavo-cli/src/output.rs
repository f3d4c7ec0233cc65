//! Human-readable rendering of results.

use avocavo_core::{
    AccountUsage, BatchResult, CurrentUser, ItemResult, LoginSummary, NutritionProfile,
    RecipeResult,
};
use chrono::Local;

fn amount(value: Option<f64>, unit: &str) -> String {
    match value {
        Some(v) => format!("{:.1}{}", v, unit),
        None => "-".to_string(),
    }
}

pub fn nutrition_lines(profile: &NutritionProfile) -> Vec<String> {
    vec![
        format!("  Calories:      {}", amount(profile.calories(), " kcal")),
        format!("  Protein:       {}", amount(profile.protein(), " g")),
        format!("  Fat:           {}", amount(profile.total_fat(), " g")),
        format!("  Carbohydrates: {}", amount(profile.carbohydrates(), " g")),
        format!("  Fiber:         {}", amount(profile.fiber(), " g")),
        format!("  Sodium:        {}", amount(profile.sodium(), " mg")),
    ]
}

pub fn item(result: &ItemResult) -> String {
    let mut lines = Vec::new();

    if !result.success {
        let reason = result
            .error
            .as_ref()
            .map(|e| e.message.as_str())
            .unwrap_or("unknown error");
        return format!("✗ {}: {}", result.ingredient, reason);
    }

    let cached = if result.cache_hit { " (cached)" } else { "" };
    lines.push(format!("✓ {}{}", result.ingredient, cached));
    if let Some(nutrition) = &result.nutrition {
        lines.extend(nutrition_lines(nutrition));
    }
    if let Some(usda) = &result.usda_match {
        lines.push(format!(
            "  USDA:          {} [{}]",
            usda.description.as_deref().unwrap_or("-"),
            usda.fdc_id.map(|id| id.to_string()).unwrap_or_else(|| "-".into())
        ));
    }
    if let Some(url) = &result.verification_url {
        lines.push(format!("  Verify:        {}", url));
    }
    lines.join("\n")
}

pub fn batch(result: &BatchResult) -> String {
    let mut lines: Vec<String> = result
        .per_item
        .iter()
        .map(|r| match (r.success, r.calories()) {
            (true, Some(kcal)) => format!("✓ {} - {:.0} kcal", r.ingredient, kcal),
            (true, None) => format!("✓ {}", r.ingredient),
            (false, _) => item(r),
        })
        .collect();

    lines.push(String::new());
    lines.push(format!(
        "{} items in {} chunks: {:.0}% succeeded, {:.0}% cached, {} credits saved",
        result.len(),
        result.chunk_count,
        result.success_rate * 100.0,
        result.cache_hit_rate * 100.0,
        result.credits_saved
    ));
    lines.join("\n")
}

pub fn recipe(result: &RecipeResult) -> String {
    if !result.success {
        return format!(
            "✗ Recipe analysis failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }

    let mut lines = vec![format!(
        "Recipe: {} ingredients, {} servings, {} USDA matches",
        result.ingredients.len(),
        result.servings,
        result.usda_matches
    )];
    if let Some(total) = &result.total {
        lines.push("Total:".to_string());
        lines.extend(nutrition_lines(total));
    }
    if let Some(per_serving) = &result.per_serving {
        lines.push("Per serving:".to_string());
        lines.extend(nutrition_lines(per_serving));
    }
    lines.join("\n")
}

pub fn usage(account: &AccountUsage) -> String {
    let limit = account
        .usage
        .monthly_limit
        .map(|l| l.to_string())
        .unwrap_or_else(|| "unlimited".into());

    let mut lines = vec![
        format!("Account: {}", account.email),
        format!("Plan:    {} ({})", account.api_tier, account.subscription_status),
        format!(
            "Usage:   {}/{} this month ({:.1}%), {} remaining",
            account.usage.current_month, limit, account.usage.percentage_used, account.usage.remaining
        ),
    ];
    if let Some(reset) = &account.usage.reset_date {
        lines.push(format!(
            "Resets:  {} ({} days)",
            reset, account.usage.days_until_reset
        ));
    }
    let batch = if account.features.batch_processing {
        format!("up to {} items", account.features.max_batch_size)
    } else {
        "not available".to_string()
    };
    lines.push(format!("Batch:   {}", batch));
    lines.join("\n")
}

pub fn login(summary: &LoginSummary) -> String {
    format!(
        "✓ Logged in as {} ({} tier)\n  API key: {}",
        summary.email, summary.api_tier, summary.api_key_masked
    )
}

pub fn whoami(user: &CurrentUser) -> String {
    let mut lines = vec![
        format!("Email:   {}", user.profile.email),
        format!("Tier:    {}", user.profile.api_tier),
        format!("Source:  {}", user.source),
        format!("API key: {}", user.api_key_masked),
    ];
    if let Some(at) = user.profile.logged_in_at {
        lines.push(format!(
            "Since:   {}",
            at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
        ));
    }
    lines.join("\n")
}
