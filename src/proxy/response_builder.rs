//! Endpoint-shaped refusal payloads for blocked requests.
//!
//! A blocked request is represented to the client as a successful refusal:
//! the body matches the schema the endpoint would normally return, with the
//! assistant content replaced by a fixed refusal string.

use chrono::Utc;
use uuid::Uuid;

/// The assistant content carried by every blocked response.
pub const REFUSAL_MESSAGE: &str = "I cannot service this request";

/// Approximate token count of the refusal string, reported in usage.
const REFUSAL_COMPLETION_TOKENS: u32 = 6;

/// Build a refusal body shaped like the endpoint's native response schema.
///
/// Unknown endpoints fall back to the chat-completion shape.
pub fn build_blocked_response(endpoint: &str) -> Vec<u8> {
    let value = match endpoint {
        "/v1/completions" => legacy_completion_body(),
        _ => chat_completion_body(),
    };
    serde_json::to_vec(&value).unwrap_or_default()
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn chat_completion_body() -> serde_json::Value {
    serde_json::json!({
        "id": format!("chatcmpl-blocked-{}", short_id()),
        "object": "chat.completion",
        "created": Utc::now().timestamp(),
        "model": "gpt-3.5-turbo",
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": REFUSAL_MESSAGE,
                "refusal": null,
            },
            "logprobs": null,
            "finish_reason": "stop",
        }],
        "usage": {
            "prompt_tokens": 0,
            "completion_tokens": REFUSAL_COMPLETION_TOKENS,
            "total_tokens": REFUSAL_COMPLETION_TOKENS,
        },
        "system_fingerprint": "fp_guardrail_blocked",
    })
}

fn legacy_completion_body() -> serde_json::Value {
    serde_json::json!({
        "id": format!("cmpl-blocked-{}", short_id()),
        "object": "text_completion",
        "created": Utc::now().timestamp(),
        "model": "gpt-3.5-turbo",
        "choices": [{
            "text": REFUSAL_MESSAGE,
            "index": 0,
            "logprobs": null,
            "finish_reason": "stop",
        }],
        "usage": {
            "prompt_tokens": 0,
            "completion_tokens": REFUSAL_COMPLETION_TOKENS,
            "total_tokens": REFUSAL_COMPLETION_TOKENS,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(endpoint: &str) -> serde_json::Value {
        serde_json::from_slice(&build_blocked_response(endpoint)).unwrap()
    }

    #[test]
    fn chat_completion_shape() {
        let body = parse("/v1/chat/completions");
        assert_eq!(body["object"], "chat.completion");
        assert!(body["id"].as_str().unwrap().starts_with("chatcmpl-blocked-"));
        assert_eq!(body["choices"][0]["message"]["role"], "assistant");
        assert_eq!(body["choices"][0]["message"]["content"], REFUSAL_MESSAGE);
        assert_eq!(body["choices"][0]["finish_reason"], "stop");
        assert_eq!(body["usage"]["prompt_tokens"], 0);
        assert!(body["created"].as_i64().unwrap() > 0);
    }

    #[test]
    fn legacy_completion_shape() {
        let body = parse("/v1/completions");
        assert_eq!(body["object"], "text_completion");
        assert!(body["id"].as_str().unwrap().starts_with("cmpl-blocked-"));
        assert_eq!(body["choices"][0]["text"], REFUSAL_MESSAGE);
    }

    #[test]
    fn responses_and_unknown_endpoints_use_chat_shape() {
        assert_eq!(parse("/v1/responses")["object"], "chat.completion");
        assert_eq!(parse("/v1/other")["object"], "chat.completion");
    }
}
