//! The per-request proxy state machine.
//!
//! States: route → read body → input guardrails → forward → output
//! guardrails → respond. A guardrail block substitutes an endpoint-shaped
//! refusal written with HTTP 200; internal guardrail faults surface as 500
//! with a structured envelope.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use axum::http::{HeaderMap, HeaderName, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use uuid::Uuid;

use crate::config::Config;
use crate::guardrails::Executor;
use crate::http::compression::{decompress_gzip, is_gzip_encoded};
use crate::providers::{ProviderRequest, ProviderSet};
use crate::proxy::response_builder::build_blocked_response;
use crate::storage::models::{GuardrailLayer, GuardrailMetric, RequestLog};
use crate::storage::Sink;

/// Per-request identifier minted by the capture layer, carried on request
/// extensions.
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub Uuid);

/// Ambient record of a guardrail block, attached to the response extensions
/// for the capture layer to fold into the request log.
#[derive(Debug, Clone)]
pub struct BlockContext {
    pub layer: GuardrailLayer,
    pub guardrail_name: String,
    pub reason: String,
    /// Upstream bytes replaced by the override; output blocks only.
    pub original_response: Option<Bytes>,
    pub override_response: Bytes,
}

/// Shared state injected into handlers and middleware.
#[derive(Clone)]
pub struct AppState {
    pub providers: Arc<ProviderSet>,
    pub executor: Option<Arc<Executor>>,
    pub log_sink: Option<Arc<Sink<RequestLog>>>,
    pub metrics_sink: Option<Arc<Sink<GuardrailMetric>>>,
    pub config: Arc<Config>,
}

/// Response headers using set-semantics when copied from upstream; all
/// other headers append, preserving multiplicity.
const CORS_RESPONSE_HEADERS: &[HeaderName] = &[
    axum::http::header::ACCESS_CONTROL_ALLOW_ORIGIN,
    axum::http::header::ACCESS_CONTROL_ALLOW_METHODS,
    axum::http::header::ACCESS_CONTROL_ALLOW_HEADERS,
    axum::http::header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
    axum::http::header::ACCESS_CONTROL_EXPOSE_HEADERS,
    axum::http::header::ACCESS_CONTROL_MAX_AGE,
];

/// Main proxy handler; every path outside the service endpoints lands here.
pub async fn proxy_handler(State(state): State<AppState>, req: Request<Body>) -> Response {
    let path = req.uri().path().to_string();
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| path.clone());

    let Some(route) = state.providers.route(&path).cloned() else {
        return (
            StatusCode::NOT_FOUND,
            format!("Endpoint {} not found", path),
        )
            .into_response();
    };

    if !route.allows_method(req.method()) {
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            format!("Method {} not allowed for endpoint {}", req.method(), path),
        )
            .into_response();
    }

    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0)
        .unwrap_or_else(Uuid::new_v4);

    let (parts, body) = req.into_parts();
    let body_bytes = if body_bearing(&parts.method) {
        match axum::body::to_bytes(body, usize::MAX).await {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(request_id = %request_id, error = %err, "failed to read request body");
                return (StatusCode::BAD_REQUEST, "Error reading request body").into_response();
            }
        }
    } else {
        Bytes::new()
    };

    let mut upstream_body = body_bytes.clone();

    // Input guardrails.
    if let Some(executor) = executor_with_input(&state) {
        if !body_bytes.is_empty() {
            let content = String::from_utf8_lossy(&body_bytes);
            match executor.execute_input(request_id, &content).await {
                Err(err) => {
                    tracing::error!(request_id = %request_id, error = %err, "input guardrail execution error");
                    return guardrail_error_response(
                        "input_guardrails_error",
                        "Failed to execute input guardrails",
                    );
                }
                Ok(result) if !result.passed => {
                    let name = result.failed_guardrail.unwrap_or_default();
                    let reason = result.failure_reason.unwrap_or_default();
                    tracing::info!(
                        request_id = %request_id,
                        guardrail = %name,
                        reason = %reason,
                        "input guardrail blocked request"
                    );
                    let refusal = Bytes::from(build_blocked_response(&path));
                    let mut response = blocked_response(refusal.clone());
                    response.extensions_mut().insert(BlockContext {
                        layer: GuardrailLayer::Input,
                        guardrail_name: name,
                        reason,
                        original_response: None,
                        override_response: refusal,
                    });
                    return response;
                }
                Ok(result) => {
                    if let Some(modified) = result.final_content {
                        tracing::debug!(request_id = %request_id, "input guardrail modified request content");
                        upstream_body = Bytes::from(modified);
                    }
                }
            }
        }
    }

    // Forward to the upstream provider.
    let provider_request = ProviderRequest {
        method: parts.method.clone(),
        path_and_query,
        headers: parts.headers.clone(),
        body: upstream_body,
    };
    let upstream = match route.provider.proxy(&path, provider_request).await {
        Ok(response) => response,
        Err(err) => {
            tracing::error!(request_id = %request_id, error = %err, "upstream request failed");
            return (StatusCode::BAD_GATEWAY, "Proxy request failed").into_response();
        }
    };

    // Keep the original bytes for the client; decompress a copy for the
    // guardrails when the upstream compressed it. A decompression failure
    // falls through with the original bytes as best-effort input.
    let original_body = upstream.body.clone();
    let guardrail_body = if is_gzip_encoded(&upstream.headers) {
        match decompress_gzip(&original_body) {
            Ok(decompressed) => Bytes::from(decompressed),
            Err(err) => {
                tracing::warn!(request_id = %request_id, error = %err, "failed to decompress upstream body for guardrails");
                original_body.clone()
            }
        }
    } else {
        original_body.clone()
    };

    // Output guardrails.
    if let Some(executor) = executor_with_output(&state) {
        if !guardrail_body.is_empty() {
            let content = String::from_utf8_lossy(&guardrail_body);
            match executor.execute_output(request_id, &content).await {
                Err(err) => {
                    tracing::error!(request_id = %request_id, error = %err, "output guardrail execution error");
                    return guardrail_error_response(
                        "output_guardrails_error",
                        "Failed to execute output guardrails",
                    );
                }
                Ok(result) if !result.passed => {
                    let name = result.failed_guardrail.unwrap_or_default();
                    let reason = result.failure_reason.unwrap_or_default();
                    tracing::info!(
                        request_id = %request_id,
                        guardrail = %name,
                        reason = %reason,
                        "output guardrail blocked response"
                    );
                    let refusal = Bytes::from(build_blocked_response(&path));

                    // Second pass attaches both bodies to the failing
                    // metrics; the original is the decompressed copy, the
                    // form the guardrails actually judged.
                    if let Err(err) = executor
                        .execute_output_with_responses(request_id, &content, &guardrail_body, &refusal)
                        .await
                    {
                        tracing::warn!(request_id = %request_id, error = %err, "failed to record response override metrics");
                    }

                    let mut response = Response::new(Body::from(refusal.clone()));
                    *response.status_mut() = StatusCode::OK;
                    copy_upstream_headers(&upstream.headers, response.headers_mut());
                    // The refusal is uncompressed JSON; the upstream's
                    // framing headers no longer apply.
                    response.headers_mut().remove(CONTENT_ENCODING);
                    response.headers_mut().remove(CONTENT_LENGTH);
                    response.headers_mut().remove(TRANSFER_ENCODING);
                    response.headers_mut().insert(
                        CONTENT_TYPE,
                        axum::http::HeaderValue::from_static("application/json"),
                    );
                    response.extensions_mut().insert(BlockContext {
                        layer: GuardrailLayer::Output,
                        guardrail_name: name,
                        reason,
                        original_response: Some(original_body),
                        override_response: refusal,
                    });
                    return response;
                }
                Ok(_) => {}
            }
        }
    }

    // Respond with the upstream status and the exact upstream bytes.
    let mut response = Response::new(Body::from(original_body));
    *response.status_mut() = upstream.status;
    copy_upstream_headers(&upstream.headers, response.headers_mut());
    response.headers_mut().remove(TRANSFER_ENCODING);
    response
}

fn executor_with_input(state: &AppState) -> Option<&Arc<Executor>> {
    state
        .executor
        .as_ref()
        .filter(|e| e.has_input_guardrails())
}

fn executor_with_output(state: &AppState) -> Option<&Arc<Executor>> {
    state
        .executor
        .as_ref()
        .filter(|e| e.has_output_guardrails())
}

fn body_bearing(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// A blocked request is a successful refusal, never an error code.
fn blocked_response(refusal: Bytes) -> Response {
    let mut response = Response::new(Body::from(refusal));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        CONTENT_TYPE,
        axum::http::HeaderValue::from_static("application/json"),
    );
    response
}

fn guardrail_error_response(error_type: &str, message: &str) -> Response {
    let body = serde_json::json!({
        "error": error_type,
        "message": message,
        "timestamp": Utc::now().to_rfc3339(),
    });
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response.headers_mut().insert(
        CONTENT_TYPE,
        axum::http::HeaderValue::from_static("application/json"),
    );
    response
}

/// Copy upstream headers to the client response. CORS headers overwrite
/// prior values so the client never sees duplicates; everything else
/// appends, preserving multiplicity.
fn copy_upstream_headers(src: &HeaderMap, dst: &mut HeaderMap) {
    for (name, value) in src {
        if CORS_RESPONSE_HEADERS.contains(name) {
            dst.insert(name.clone(), value.clone());
        } else {
            dst.append(name.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointConfig;
    use crate::guardrails::{
        CheckResult, ExecutorConfig, Guardrail, GuardrailError,
    };
    use crate::providers::{Provider, ProviderError, ProviderResponse};
    use crate::proxy::response_builder::REFUSAL_MESSAGE;
    use async_trait::async_trait;
    use axum::http::HeaderValue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Provider returning a scripted response and counting calls.
    struct MockProvider {
        endpoints: Vec<EndpointConfig>,
        response: Mutex<Option<ProviderResponse>>,
        calls: AtomicUsize,
    }

    impl MockProvider {
        fn new(path: &str, response: Option<ProviderResponse>) -> Arc<Self> {
            Arc::new(Self {
                endpoints: vec![EndpointConfig {
                    path: path.into(),
                    methods: vec!["POST".into(), "GET".into()],
                    headers: Default::default(),
                    timeout: None,
                }],
                response: Mutex::new(response),
                calls: AtomicUsize::new(0),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        fn endpoints(&self) -> &[EndpointConfig] {
            &self.endpoints
        }

        async fn proxy(
            &self,
            _endpoint: &str,
            _request: ProviderRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| ProviderError::Transport("connection refused".into()))
        }
    }

    struct BlockingGuardrail;

    #[async_trait]
    impl Guardrail for BlockingGuardrail {
        fn name(&self) -> &str {
            "blocker"
        }

        fn priority(&self) -> i32 {
            0
        }

        async fn check(&self, _content: &str) -> Result<CheckResult, GuardrailError> {
            Ok(CheckResult::fail("bad"))
        }
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn upstream_response(body: &[u8]) -> ProviderResponse {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        ProviderResponse {
            status: StatusCode::OK,
            headers,
            body: Bytes::copy_from_slice(body),
        }
    }

    fn state_with(provider: Arc<MockProvider>, executor: Option<Executor>) -> AppState {
        let providers: Vec<Arc<dyn Provider>> = vec![provider];
        AppState {
            providers: Arc::new(ProviderSet::with_providers(providers)),
            executor: executor.map(Arc::new),
            log_sink: None,
            metrics_sink: None,
            config: Arc::new(Config::default()),
        }
    }

    fn input_blocking_executor() -> Executor {
        Executor::new(ExecutorConfig {
            input_guardrails: vec![Arc::new(BlockingGuardrail)],
            output_guardrails: Vec::new(),
            metrics: None,
            timeout: std::time::Duration::from_secs(5),
        })
    }

    fn output_blocking_executor() -> Executor {
        Executor::new(ExecutorConfig {
            input_guardrails: Vec::new(),
            output_guardrails: vec![Arc::new(BlockingGuardrail)],
            metrics: None,
            timeout: std::time::Duration::from_secs(5),
        })
    }

    fn post(path: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(path)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_bytes(response: Response) -> Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn unknown_endpoint_is_404() {
        let provider = MockProvider::new("/v1/chat/completions", None);
        let state = state_with(provider, None);
        let response = proxy_handler(State(state), post("/v1/nope", "{}")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn disallowed_method_is_405() {
        let provider = MockProvider::new("/v1/chat/completions", None);
        let state = state_with(provider, None);
        let request = Request::builder()
            .method(Method::DELETE)
            .uri("/v1/chat/completions")
            .body(Body::empty())
            .unwrap();
        let response = proxy_handler(State(state), request).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn happy_path_returns_exact_upstream_bytes() {
        let upstream_bytes = br#"{"id":"x","choices":[{"message":{"content":"hello"}}]}"#;
        let provider = MockProvider::new(
            "/v1/chat/completions",
            Some(upstream_response(upstream_bytes)),
        );
        let state = state_with(provider.clone(), None);

        let response = proxy_handler(
            State(state),
            post("/v1/chat/completions", r#"{"model":"m"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(&body_bytes(response).await[..], upstream_bytes);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn upstream_error_is_502() {
        let provider = MockProvider::new("/v1/chat/completions", None);
        let state = state_with(provider, None);
        let response = proxy_handler(
            State(state),
            post("/v1/chat/completions", "{}"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn input_block_refuses_without_contacting_upstream() {
        let provider = MockProvider::new(
            "/v1/chat/completions",
            Some(upstream_response(b"{}")),
        );
        let state = state_with(provider.clone(), Some(input_blocking_executor()));

        let response = proxy_handler(
            State(state),
            post("/v1/chat/completions", r#"{"messages":[]}"#),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let context = response.extensions().get::<BlockContext>().cloned().unwrap();
        assert_eq!(context.layer, GuardrailLayer::Input);
        assert_eq!(context.guardrail_name, "blocker");
        assert_eq!(context.reason, "bad");

        let body: serde_json::Value =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["choices"][0]["message"]["content"], REFUSAL_MESSAGE);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn output_block_substitutes_refusal_and_strips_encoding() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        let compressed = gzip(br#"{"choices":[{"text":"secret"}]}"#);
        let provider = MockProvider::new(
            "/v1/chat/completions",
            Some(ProviderResponse {
                status: StatusCode::OK,
                headers,
                body: Bytes::from(compressed),
            }),
        );
        let state = state_with(provider, Some(output_blocking_executor()));

        let response = proxy_handler(
            State(state),
            post("/v1/chat/completions", "{}"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(CONTENT_ENCODING).is_none());
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let context = response.extensions().get::<BlockContext>().cloned().unwrap();
        assert_eq!(context.layer, GuardrailLayer::Output);
        assert!(context.original_response.is_some());

        let body: serde_json::Value =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["choices"][0]["message"]["content"], REFUSAL_MESSAGE);
    }

    #[tokio::test]
    async fn cors_headers_from_upstream_are_deduplicated() {
        let mut headers = HeaderMap::new();
        headers.append(
            axum::http::header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("https://a.example"),
        );
        headers.append(
            axum::http::header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("https://b.example"),
        );
        headers.append("x-custom", HeaderValue::from_static("one"));
        headers.append("x-custom", HeaderValue::from_static("two"));
        let provider = MockProvider::new(
            "/v1/chat/completions",
            Some(ProviderResponse {
                status: StatusCode::OK,
                headers,
                body: Bytes::from_static(b"{}"),
            }),
        );
        let state = state_with(provider, None);

        let response = proxy_handler(
            State(state),
            post("/v1/chat/completions", "{}"),
        )
        .await;

        let origins: Vec<_> = response
            .headers()
            .get_all(axum::http::header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .iter()
            .collect();
        assert_eq!(origins.len(), 1);
        assert_eq!(origins[0], "https://b.example");

        let customs: Vec<_> = response.headers().get_all("x-custom").iter().collect();
        assert_eq!(customs.len(), 2);
    }
}
