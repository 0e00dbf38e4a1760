//! Built-in guardrail implementations.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::guardrails::{CheckResult, Guardrail, GuardrailError};

/// Blocks content containing any configured keyword, case-insensitively.
///
/// Config: `keywords: [string]`.
pub struct KeywordGuardrail {
    name: String,
    priority: i32,
    keywords: Vec<String>,
}

pub fn keyword_factory(
    name: &str,
    priority: i32,
    config: &HashMap<String, serde_json::Value>,
) -> Result<Arc<dyn Guardrail>, GuardrailError> {
    let keywords: Vec<String> = match config.get("keywords") {
        Some(serde_json::Value::Array(values)) => values
            .iter()
            .map(|v| {
                v.as_str()
                    .map(|s| s.to_lowercase())
                    .ok_or_else(|| GuardrailError::Config("keywords must be strings".into()))
            })
            .collect::<Result<_, _>>()?,
        Some(_) => return Err(GuardrailError::Config("keywords must be a list".into())),
        None => return Err(GuardrailError::Config("keywords is required".into())),
    };
    if keywords.is_empty() {
        return Err(GuardrailError::Config("keywords must not be empty".into()));
    }
    Ok(Arc::new(KeywordGuardrail {
        name: name.to_string(),
        priority,
        keywords,
    }))
}

#[async_trait]
impl Guardrail for KeywordGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn check(&self, content: &str) -> Result<CheckResult, GuardrailError> {
        let lowered = content.to_lowercase();
        for keyword in &self.keywords {
            if lowered.contains(keyword.as_str()) {
                return Ok(CheckResult::fail(format!(
                    "content contains blocked keyword '{}'",
                    keyword
                ))
                .with_metadata(serde_json::json!({ "matched_keyword": keyword })));
            }
        }
        Ok(CheckResult::pass("no blocked keywords")
            .with_metadata(serde_json::json!({ "content_length": content.len() })))
    }
}

/// Enforces a maximum content length in characters.
///
/// Config: `max_chars: int`, `truncate: bool` (default false). With
/// `truncate` set, over-long content passes with a truncating
/// `modified_content` instead of failing.
pub struct LengthGuardrail {
    name: String,
    priority: i32,
    max_chars: usize,
    truncate: bool,
}

pub fn length_factory(
    name: &str,
    priority: i32,
    config: &HashMap<String, serde_json::Value>,
) -> Result<Arc<dyn Guardrail>, GuardrailError> {
    let max_chars = config
        .get("max_chars")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| GuardrailError::Config("max_chars is required".into()))?
        as usize;
    if max_chars == 0 {
        return Err(GuardrailError::Config("max_chars must be > 0".into()));
    }
    let truncate = config
        .get("truncate")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    Ok(Arc::new(LengthGuardrail {
        name: name.to_string(),
        priority,
        max_chars,
        truncate,
    }))
}

#[async_trait]
impl Guardrail for LengthGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn check(&self, content: &str) -> Result<CheckResult, GuardrailError> {
        let length = content.chars().count();
        if length <= self.max_chars {
            return Ok(CheckResult::pass("content within length limit")
                .with_metadata(serde_json::json!({ "length": length })));
        }
        if self.truncate {
            let truncated: String = content.chars().take(self.max_chars).collect();
            return Ok(CheckResult::pass("content truncated to length limit")
                .with_metadata(serde_json::json!({
                    "length": length,
                    "max_chars": self.max_chars,
                }))
                .with_modified_content(truncated));
        }
        Ok(CheckResult::fail(format!(
            "content length {} exceeds limit of {} characters",
            length, self.max_chars
        ))
        .with_metadata(serde_json::json!({
            "length": length,
            "max_chars": self.max_chars,
        })))
    }
}
