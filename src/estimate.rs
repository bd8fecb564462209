//! Best-effort macro estimation from a free-text meal description.
//!
//! Calls the `ai-calorie-estimation` edge function with a fixed prompt and
//! maps its reply to draft meal fields. The gateway is opaque and flaky by
//! nature, so this module never fails: outages, non-JSON replies and
//! missing or nonsense fields all degrade to a placeholder draft with
//! zeroed numbers for the user to correct by hand.

use serde_json::Value;

use crate::models::MealFields;

/// Client for the estimation gateway.
pub struct Estimator {
    base_url: String,
    anon_key: String,
    http: reqwest::Client,
}

/// The structured prompt sent alongside the description.
fn prompt_for(description: &str) -> String {
    format!(
        "Provide a JSON object with the estimated calories, protein (in grams), \
         carbs (in grams), and fats (in grams) for the following meal description. \
         If you cannot estimate a value, return 0 for that field. Also give the \
         meal a fitting name. Respond only with the JSON object and nothing else. \
         The json object should have the following format: \
         {{ \"meal_name\": string, \"calories\": number, \"protein\": number, \
         \"carbs\": number, \"fats\": number }}. Meal description: {}",
        description
    )
}

/// Maps a gateway reply to meal fields, zero-defaulting anything unusable.
fn fields_from_reply(body: &Value) -> MealFields {
    let reply = body.get("reply").unwrap_or(&Value::Null);

    let name = reply
        .get("meal_name")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("Meal")
        .to_string();

    let number = |key: &str| -> f64 {
        reply
            .get(key)
            .and_then(|v| v.as_f64())
            .filter(|n| n.is_finite() && *n >= 0.0)
            .unwrap_or(0.0)
    };

    MealFields::new(
        name,
        number("calories"),
        number("protein"),
        number("carbs"),
        number("fats"),
    )
}

impl Estimator {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Estimates macros for a described meal.
    ///
    /// Always returns usable draft fields; failures are logged and answered
    /// with [`MealFields::placeholder`].
    pub async fn estimate(&self, description: &str) -> MealFields {
        let url = format!("{}/functions/v1/ai-calorie-estimation", self.base_url);
        let prompt = prompt_for(description);

        let response = self
            .http
            .post(&url)
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
            .json(&serde_json::json!({ "prompt": prompt }))
            .send()
            .await;

        let body: Value = match response {
            Ok(response) if response.status().is_success() => {
                match response.json().await {
                    Ok(body) => body,
                    Err(e) => {
                        tracing::warn!("estimation reply was not JSON: {}", e);
                        return MealFields::placeholder();
                    }
                }
            }
            Ok(response) => {
                tracing::warn!(status = %response.status(), "estimation gateway error");
                return MealFields::placeholder();
            }
            Err(e) => {
                tracing::warn!("estimation gateway unreachable: {}", e);
                return MealFields::placeholder();
            }
        };

        fields_from_reply(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prompt_embeds_description() {
        let prompt = prompt_for("two eggs and toast");
        assert!(prompt.contains("Meal description: two eggs and toast"));
        assert!(prompt.contains("\"meal_name\""));
    }

    #[test]
    fn test_full_reply_is_mapped() {
        let body = json!({
            "reply": {
                "meal_name": "Big Mac meal",
                "calories": 1100.0,
                "protein": 40,
                "carbs": 120,
                "fats": 45
            }
        });
        let fields = fields_from_reply(&body);
        assert_eq!(fields.name, "Big Mac meal");
        assert_eq!(fields.calories, 1100.0);
        assert_eq!(fields.protein, 40.0);
        assert_eq!(fields.carbs, 120.0);
        assert_eq!(fields.fats, 45.0);
        assert!(fields.validate().is_ok());
    }

    #[test]
    fn test_missing_fields_default_to_zero() {
        let body = json!({ "reply": { "meal_name": "Soup" } });
        let fields = fields_from_reply(&body);
        assert_eq!(fields.name, "Soup");
        assert_eq!(fields.calories, 0.0);
        assert_eq!(fields.fats, 0.0);
    }

    #[test]
    fn test_malformed_reply_yields_placeholder() {
        let fields = fields_from_reply(&json!({ "reply": {} }));
        assert_eq!(fields, MealFields::placeholder());

        let fields = fields_from_reply(&json!({ "unexpected": true }));
        assert_eq!(fields, MealFields::placeholder());

        let fields = fields_from_reply(&json!("just a string"));
        assert_eq!(fields, MealFields::placeholder());
    }

    #[test]
    fn test_nonsense_numbers_are_zeroed() {
        let body = json!({
            "reply": {
                "meal_name": "Weird",
                "calories": -500,
                "protein": "lots",
                "carbs": 30,
                "fats": null
            }
        });
        let fields = fields_from_reply(&body);
        assert_eq!(fields.calories, 0.0);
        assert_eq!(fields.protein, 0.0);
        assert_eq!(fields.carbs, 30.0);
        assert_eq!(fields.fats, 0.0);
        assert!(fields.validate().is_ok());
    }
}
