//! HTTP provider adapter over a shared reqwest client.
//!
//! The client is built without automatic decompression so the proxy returns
//! exact upstream bytes. Accept-Encoding requests for codings the capture
//! layer cannot decompress (br, zstd, deflate) are negotiated down to gzip;
//! a header that needs no rewrite passes through as the client sent it.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::header::{ACCEPT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, HOST};
use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::config::{EndpointConfig, ProviderConfig};
use crate::providers::{Provider, ProviderError, ProviderRequest, ProviderResponse};

/// Default upstream round-trip timeout when an endpoint sets none.
const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(60);

/// Forwards requests to any OpenAI-compatible HTTP API.
pub struct HttpProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_UPSTREAM_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::InvalidRequest(format!("failed to build client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn endpoint_config(&self, path: &str) -> Option<&EndpointConfig> {
        self.config.endpoints.iter().find(|e| e.path == path)
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn endpoints(&self) -> &[EndpointConfig] {
        &self.config.endpoints
    }

    async fn proxy(
        &self,
        endpoint: &str,
        request: ProviderRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        let url = format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            request.path_and_query
        );

        let mut headers = request.headers.clone();
        // Host and Content-Length belong to the upstream connection.
        headers.remove(HOST);
        headers.remove(CONTENT_LENGTH);

        if let Some(reduced) = negotiate_accept_encoding(&request.headers) {
            headers.insert(ACCEPT_ENCODING, reduced);
        }

        if !headers.contains_key(CONTENT_TYPE) && body_bearing(&request.method) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        // Endpoint-specific header injections overwrite client values.
        let endpoint_config = self.endpoint_config(endpoint);
        if let Some(config) = endpoint_config {
            for (name, value) in &config.headers {
                let name = HeaderName::try_from(name.as_str()).map_err(|e| {
                    ProviderError::InvalidRequest(format!("bad endpoint header name: {}", e))
                })?;
                let value = HeaderValue::try_from(value.as_str()).map_err(|e| {
                    ProviderError::InvalidRequest(format!("bad endpoint header value: {}", e))
                })?;
                headers.insert(name, value);
            }
        }

        let timeout = endpoint_config
            .and_then(|e| e.timeout)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT);

        let response = self
            .client
            .request(request.method, &url)
            .headers(headers)
            .body(request.body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| ProviderError::Transport(format!("reading upstream body: {}", e)))?;

        Ok(ProviderResponse {
            status,
            headers,
            body,
        })
    }
}

fn body_bearing(method: &axum::http::Method) -> bool {
    matches!(
        *method,
        axum::http::Method::POST | axum::http::Method::PUT | axum::http::Method::PATCH
    )
}

/// Codings the capture layer cannot decompress for storage.
const UNSUPPORTED_CODINGS: &[&str] = &["br", "zstd", "deflate"];

/// Strip codings the capture layer cannot decompress from Accept-Encoding.
///
/// Returns `None` when the header needs no rewrite — including when the
/// client sent no Accept-Encoding at all, which passes through untouched.
/// When br/zstd/deflate are requested they are removed, keeping whatever
/// else the client asked for; if nothing remains the header becomes
/// "gzip" so a compressing upstream stays capturable.
fn negotiate_accept_encoding(headers: &HeaderMap) -> Option<HeaderValue> {
    let requested = headers.get(ACCEPT_ENCODING)?.to_str().ok()?;

    let unsupported = |token: &str| {
        let coding = token.split(';').next().unwrap_or("").trim();
        UNSUPPORTED_CODINGS
            .iter()
            .any(|u| coding.eq_ignore_ascii_case(u))
    };
    if !requested.split(',').any(|token| unsupported(token.trim())) {
        return None;
    }

    let kept: Vec<&str> = requested
        .split(',')
        .map(|token| token.trim())
        .filter(|token| !token.is_empty() && !unsupported(token))
        .collect();

    if kept.is_empty() {
        Some(HeaderValue::from_static("gzip"))
    } else {
        Some(HeaderValue::from_str(&kept.join(", ")).unwrap_or(HeaderValue::from_static("gzip")))
    }
}
