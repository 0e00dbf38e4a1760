//! Upstream provider adapters.
//!
//! # Responsibilities
//! - Define the provider contract: name, endpoint table, proxy operation
//! - Build the path → provider route table from configuration
//! - Forward requests over a shared HTTP client preserving upstream bytes

pub mod http;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{HeaderMap, Method, StatusCode};

use crate::config::{EndpointConfig, ProviderConfig};

pub use http::HttpProvider;

/// Error type for upstream forwarding.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("upstream request failed: {0}")]
    Transport(String),

    #[error("invalid upstream request: {0}")]
    InvalidRequest(String),
}

/// A fully buffered request handed to a provider.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub method: Method,
    /// Path plus any query string, appended to the provider base URL.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A fully buffered upstream response.
///
/// The body carries the exact upstream bytes, still compressed if the
/// upstream compressed them.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// An upstream API provider.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider identifier (e.g., "openai").
    fn name(&self) -> &str;

    /// Endpoints this provider serves.
    fn endpoints(&self) -> &[EndpointConfig];

    /// Forward the request to the upstream endpoint and return its
    /// response untouched.
    async fn proxy(
        &self,
        endpoint: &str,
        request: ProviderRequest,
    ) -> Result<ProviderResponse, ProviderError>;
}

/// One resolved route table entry.
#[derive(Clone)]
pub struct RouteEntry {
    pub provider: Arc<dyn Provider>,
    pub endpoint: EndpointConfig,
}

impl RouteEntry {
    /// True if the endpoint advertises the method.
    pub fn allows_method(&self, method: &Method) -> bool {
        self.endpoint
            .methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(method.as_str()))
    }
}

/// The set of configured providers and their endpoint route table.
pub struct ProviderSet {
    providers: Vec<Arc<dyn Provider>>,
    routes: HashMap<String, RouteEntry>,
}

impl ProviderSet {
    /// Build providers and the route table from configuration.
    pub fn from_config(configs: &[ProviderConfig]) -> Result<Self, ProviderError> {
        let mut providers: Vec<Arc<dyn Provider>> = Vec::with_capacity(configs.len());
        let mut routes = HashMap::new();

        for config in configs {
            let provider: Arc<dyn Provider> = Arc::new(HttpProvider::new(config.clone())?);
            for endpoint in provider.endpoints() {
                tracing::info!(
                    endpoint = %endpoint.path,
                    provider = %provider.name(),
                    "registered endpoint"
                );
                routes.insert(
                    endpoint.path.clone(),
                    RouteEntry {
                        provider: provider.clone(),
                        endpoint: endpoint.clone(),
                    },
                );
            }
            providers.push(provider);
        }

        Ok(Self { providers, routes })
    }

    /// Route table entry under construction for tests and custom wiring.
    pub fn with_providers(providers: Vec<Arc<dyn Provider>>) -> Self {
        let mut routes = HashMap::new();
        for provider in &providers {
            for endpoint in provider.endpoints() {
                routes.insert(
                    endpoint.path.clone(),
                    RouteEntry {
                        provider: provider.clone(),
                        endpoint: endpoint.clone(),
                    },
                );
            }
        }
        Self { providers, routes }
    }

    /// Look up the route entry for a request path.
    pub fn route(&self, path: &str) -> Option<&RouteEntry> {
        self.routes.get(path)
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    pub fn endpoint_count(&self) -> usize {
        self.routes.len()
    }

    /// Infer the provider name for a path, for the request log.
    pub fn provider_name_for(&self, path: &str) -> Option<String> {
        self.route(path).map(|entry| entry.provider.name().to_string())
    }
}
