//! Record types and log hygiene helpers.

use std::collections::BTreeMap;

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Sentinel stored in place of sensitive header values.
pub const REDACTED: &str = "[REDACTED]";

/// Marker appended to bodies truncated at the capture cap.
pub const TRUNCATION_MARKER: &str = "\n... [TRUNCATED]";

/// Header names whose values are never stored (matched case-insensitively).
const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "x-api-key",
    "cookie",
    "x-auth-token",
    "bearer",
];

/// Which phase a guardrail ran in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardrailLayer {
    Input,
    Output,
}

impl GuardrailLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardrailLayer::Input => "input",
            GuardrailLayer::Output => "output",
        }
    }
}

impl std::fmt::Display for GuardrailLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One API request/response transaction.
///
/// Created at request entry, completed once at response time, then written
/// through the log sink and never mutated again.
#[derive(Debug, Clone, Serialize)]
pub struct RequestLog {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub session_id: Option<String>,
    pub request_id: Uuid,
    pub endpoint: String,
    pub method: String,
    pub status_code: Option<i32>,
    pub latency_ms: Option<i64>,
    pub provider: Option<String>,
    pub user_agent: Option<String>,
    pub remote_addr: Option<String>,
    pub request_headers: serde_json::Value,
    pub request_body: Option<String>,
    pub response_headers: serde_json::Value,
    pub response_body: Option<String>,
    pub error: Option<String>,
    pub metadata: serde_json::Value,
    pub guardrails_passed: Option<bool>,
    pub failed_guardrail_name: Option<String>,
    pub guardrail_failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RequestLog {
    /// New log entry with a fresh request id and arrival timestamp.
    pub fn new(endpoint: &str, method: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            timestamp: now,
            session_id: None,
            request_id: Uuid::new_v4(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
            status_code: None,
            latency_ms: None,
            provider: None,
            user_agent: None,
            remote_addr: None,
            request_headers: serde_json::Value::Null,
            request_body: None,
            response_headers: serde_json::Value::Null,
            response_body: None,
            error: None,
            metadata: serde_json::Value::Null,
            guardrails_passed: None,
            failed_guardrail_name: None,
            guardrail_failure_reason: None,
            created_at: now,
        }
    }
}

/// One guardrail invocation.
///
/// `original_response` and `override_response` are populated only when an
/// output guardrail failed and caused a substitution, in which case
/// `response_overridden` is true.
#[derive(Debug, Clone, Serialize)]
pub struct GuardrailMetric {
    pub id: Uuid,
    pub request_id: Uuid,
    pub guardrail_name: String,
    pub layer: GuardrailLayer,
    pub priority: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,
    pub passed: bool,
    pub score: Option<f64>,
    pub error: Option<String>,
    pub metadata: serde_json::Value,
    pub original_response: Option<String>,
    pub override_response: Option<String>,
    pub response_overridden: bool,
    pub created_at: DateTime<Utc>,
}

/// Reproduce headers for storage, redacting sensitive values.
///
/// Single-valued headers map to a string, multi-valued headers to a list.
/// Values that are not valid UTF-8 are stored lossily.
pub fn sanitize_headers(headers: &HeaderMap) -> serde_json::Value {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers.iter() {
        let entry = out.entry(name.as_str().to_string()).or_default();
        if is_sensitive(name.as_str()) {
            entry.push(REDACTED.to_string());
        } else {
            entry.push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }
    }

    let map = out
        .into_iter()
        .map(|(name, mut values)| {
            let value = if values.len() == 1 {
                serde_json::Value::String(values.remove(0))
            } else {
                serde_json::Value::Array(
                    values.into_iter().map(serde_json::Value::String).collect(),
                )
            };
            (name, value)
        })
        .collect();
    serde_json::Value::Object(map)
}

fn is_sensitive(name: &str) -> bool {
    SENSITIVE_HEADERS
        .iter()
        .any(|s| name.eq_ignore_ascii_case(s))
}

/// Truncate a stored body at `cap` bytes, appending the truncation marker.
///
/// Bodies at or under the cap pass through unchanged. The cut falls back to
/// the nearest character boundary so the stored copy stays valid UTF-8.
pub fn truncate_body(body: &str, cap: usize) -> String {
    if body.len() <= cap {
        return body.to_string();
    }
    let mut cut = cap;
    while cut > 0 && !body.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = String::with_capacity(cut + TRUNCATION_MARKER.len());
    out.push_str(&body[..cut]);
    out.push_str(TRUNCATION_MARKER);
    out
}
