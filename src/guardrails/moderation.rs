//! Content moderation backed by the OpenAI moderation API.
//!
//! This guardrail fails open: any API or parse failure yields a passing
//! result with the error recorded in metadata, so a degraded moderation
//! dependency never becomes a client-visible outage. Operators wanting
//! fail-closed behavior register a different implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::guardrails::{CheckResult, Guardrail, GuardrailError};

const MODERATION_URL: &str = "https://api.openai.com/v1/moderations";
const API_TIMEOUT: Duration = Duration::from_secs(10);

/// Moderation guardrail calling out to the OpenAI moderation endpoint.
pub struct ModerationGuardrail {
    name: String,
    priority: i32,
    api_key: String,
    block_on_flag: bool,
    categories: Vec<String>,
    client: reqwest::Client,
}

pub fn moderation_factory(
    name: &str,
    priority: i32,
    config: &HashMap<String, serde_json::Value>,
) -> Result<Arc<dyn Guardrail>, GuardrailError> {
    let api_key = config
        .get("api_key")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .unwrap_or_default();

    let block_on_flag = config
        .get("block_on_flag")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    let categories = config
        .get("categories")
        .and_then(|v| v.as_array())
        .map(|values| {
            values
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let client = reqwest::Client::builder()
        .timeout(API_TIMEOUT)
        .build()
        .map_err(|e| GuardrailError::Config(format!("failed to build HTTP client: {}", e)))?;

    Ok(Arc::new(ModerationGuardrail {
        name: name.to_string(),
        priority,
        api_key,
        block_on_flag,
        categories,
        client,
    }))
}

#[derive(Debug, Deserialize)]
struct ModerationResponse {
    results: Vec<ModerationVerdict>,
}

#[derive(Debug, Deserialize)]
struct ModerationVerdict {
    flagged: bool,
    #[serde(default)]
    categories: HashMap<String, bool>,
    #[serde(default)]
    category_scores: HashMap<String, f64>,
}

#[async_trait]
impl Guardrail for ModerationGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn check(&self, content: &str) -> Result<CheckResult, GuardrailError> {
        let user_message = match extract_user_message(content) {
            Some(message) if !message.is_empty() => message,
            _ => {
                return Ok(CheckResult::pass("no user message found to moderate")
                    .with_metadata(serde_json::json!({ "extraction": "empty" })));
            }
        };

        let verdict = match self.call_moderation_api(&user_message).await {
            Ok(verdict) => verdict,
            Err(err) => {
                tracing::warn!(guardrail = %self.name, error = %err, "moderation API call failed, passing through");
                return Ok(CheckResult::pass(format!("moderation API error: {}", err))
                    .with_metadata(serde_json::json!({
                        "error": err,
                        "api_call": "failed",
                    })));
            }
        };

        // With configured categories, only those categories can flag.
        let flagged = if self.categories.is_empty() {
            verdict.flagged
        } else {
            self.categories
                .iter()
                .any(|c| verdict.categories.get(c).copied().unwrap_or(false))
        };

        let passed = !flagged || !self.block_on_flag;
        let top_score = verdict
            .category_scores
            .values()
            .copied()
            .fold(None, |acc: Option<f64>, s| {
                Some(acc.map_or(s, |a| a.max(s)))
            });

        let reason = if flagged {
            let violated: Vec<&str> = verdict
                .categories
                .iter()
                .filter(|(category, &hit)| {
                    hit && (self.categories.is_empty()
                        || self.categories.iter().any(|c| c == *category))
                })
                .map(|(category, _)| category.as_str())
                .collect();
            format!("content flagged for: {}", violated.join(", "))
        } else {
            "content passed moderation".to_string()
        };

        let mut result = CheckResult {
            passed,
            score: top_score,
            reason,
            metadata: serde_json::json!({
                "flagged": verdict.flagged,
                "categories": verdict.categories,
                "category_scores": verdict.category_scores,
                "api_call": "success",
            }),
            modified_content: None,
        };
        if !self.categories.is_empty() {
            result.metadata["configured_categories"] = serde_json::json!(self.categories);
        }
        Ok(result)
    }
}

impl ModerationGuardrail {
    async fn call_moderation_api(&self, text: &str) -> Result<ModerationVerdict, String> {
        if self.api_key.is_empty() {
            return Err("moderation API key not configured".to_string());
        }

        let response = self
            .client
            .post(MODERATION_URL)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "input": text }))
            .send()
            .await
            .map_err(|e| format!("API request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(format!("API returned status {}", response.status()));
        }

        let body: ModerationResponse = response
            .json()
            .await
            .map_err(|e| format!("failed to decode response: {}", e))?;
        body.results
            .into_iter()
            .next()
            .ok_or_else(|| "no results in moderation response".to_string())
    }
}

/// Pull the text to moderate out of the request body.
///
/// Understands the chat-completion shape (last user message), the responses
/// shape (`input`), the legacy completion shape (`prompt`), and falls back
/// to any top-level `content` field.
fn extract_user_message(content: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(content).ok()?;

    if let Some(messages) = value.get("messages").and_then(|m| m.as_array()) {
        for message in messages.iter().rev() {
            if message.get("role").and_then(|r| r.as_str()) == Some("user") {
                if let Some(text) = message.get("content").and_then(|c| c.as_str()) {
                    return Some(text.to_string());
                }
            }
        }
    }

    for key in ["input", "prompt", "content"] {
        if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
            return Some(text.to_string());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_last_user_message_from_chat_shape() {
        let body = r#"{"model":"m","messages":[
            {"role":"user","content":"first"},
            {"role":"assistant","content":"reply"},
            {"role":"user","content":"second"}
        ]}"#;
        assert_eq!(extract_user_message(body).as_deref(), Some("second"));
    }

    #[test]
    fn extracts_from_responses_and_completion_shapes() {
        assert_eq!(
            extract_user_message(r#"{"input":"hi there"}"#).as_deref(),
            Some("hi there")
        );
        assert_eq!(
            extract_user_message(r#"{"prompt":"complete me"}"#).as_deref(),
            Some("complete me")
        );
    }

    #[test]
    fn unparseable_body_yields_none() {
        assert!(extract_user_message("not json").is_none());
        assert!(extract_user_message(r#"{"unrelated":1}"#).is_none());
    }

    #[tokio::test]
    async fn fails_open_without_api_key() {
        let config = HashMap::from([(
            "api_key".to_string(),
            serde_json::Value::String(String::new()),
        )]);
        let guardrail = moderation_factory("mod", 0, &config).unwrap();

        let result = guardrail
            .check(r#"{"messages":[{"role":"user","content":"hello"}]}"#)
            .await
            .unwrap();
        assert!(result.passed);
        assert_eq!(result.metadata["api_call"], "failed");
    }
}
