//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from YAML config files.

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::config::duration;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings (bind address, timeouts).
    pub server: ServerConfig,

    /// Durable storage settings.
    pub storage: StorageConfig,

    /// Request/response logging settings.
    pub logging: LoggingConfig,

    /// Guardrail pipeline settings.
    pub guardrails: GuardrailsConfig,

    /// Upstream provider definitions.
    pub providers: Vec<ProviderConfig>,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Read timeout in seconds.
    pub read_timeout: u64,

    /// Write timeout in seconds.
    pub write_timeout: u64,

    /// Idle connection timeout in seconds.
    pub idle_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            read_timeout: 30,
            write_timeout: 30,
            idle_timeout: 120,
        }
    }
}

/// Durable storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage backend type: "postgres" or "memory".
    #[serde(rename = "type")]
    pub backend: String,

    /// PostgreSQL settings, used when `type` is "postgres".
    pub postgres: PostgresConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "postgres".to_string(),
            postgres: PostgresConfig::default(),
        }
    }
}

/// PostgreSQL connection configuration.
///
/// A non-empty `url` wins over the individual host/port fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    /// Full connection URL; `${DATABASE_URL}` is substituted at load time.
    pub url: String,

    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,

    /// SSL mode appended to the connection URL ("disable", "require", ...).
    pub ssl_mode: String,

    /// Maximum pool connections.
    pub max_connections: u32,

    /// Minimum idle pool connections.
    pub min_connections: u32,

    /// Maximum connection lifetime in minutes.
    pub conn_max_lifetime: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            host: "localhost".to_string(),
            port: 5432,
            database: "gateway".to_string(),
            username: "gateway".to_string(),
            password: "gateway".to_string(),
            ssl_mode: "disable".to_string(),
            max_connections: 25,
            min_connections: 5,
            conn_max_lifetime: 60,
        }
    }
}

impl PostgresConfig {
    /// Resolve the connection URL from `url`, `DATABASE_URL`, or components.
    pub fn connection_url(&self) -> String {
        if !self.url.is_empty() {
            return self.url.clone();
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.is_empty() {
                return url;
            }
        }
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.username, self.password, self.host, self.port, self.database, self.ssl_mode
        )
    }
}

/// Request/response logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Enable request logging.
    pub enabled: bool,

    /// Bounded queue capacity for the log sink.
    pub buffer_size: usize,

    /// Records per batch insert.
    pub batch_size: usize,

    /// Maximum time between flushes.
    #[serde(deserialize_with = "duration::deserialize")]
    pub flush_interval: Duration,

    /// Number of sink worker tasks.
    pub workers: usize,

    /// Maximum captured body size in bytes; larger bodies are truncated
    /// in the stored copy only.
    pub max_body_size: usize,

    /// Skip capture for /health and /status.
    pub skip_health_check: bool,

    /// Start without storage instead of failing when it is unreachable.
    pub skip_on_error: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            buffer_size: 1000,
            batch_size: 10,
            flush_interval: Duration::from_secs(1),
            workers: 3,
            max_body_size: 64 * 1024,
            skip_health_check: true,
            skip_on_error: true,
        }
    }
}

/// Guardrail pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GuardrailsConfig {
    /// Enable guardrail evaluation.
    pub enabled: bool,

    /// Deadline for one full evaluation (all priority groups).
    #[serde(deserialize_with = "duration::deserialize")]
    pub timeout: Duration,

    /// Bounded queue capacity for the metrics sink.
    pub metrics_buffer_size: usize,

    /// Metric records per batch insert.
    pub metrics_batch_size: usize,

    /// Number of metrics sink worker tasks.
    pub metrics_workers: usize,

    /// Guardrails applied to request bodies before forwarding.
    pub input_guardrails: Vec<GuardrailConfig>,

    /// Guardrails applied to upstream response bodies.
    pub output_guardrails: Vec<GuardrailConfig>,
}

impl Default for GuardrailsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout: Duration::from_secs(5),
            metrics_buffer_size: 1000,
            metrics_batch_size: 10,
            metrics_workers: 2,
            input_guardrails: Vec::new(),
            output_guardrails: Vec::new(),
        }
    }
}

/// Configuration for a single guardrail instance.
#[derive(Debug, Clone, Deserialize)]
pub struct GuardrailConfig {
    /// Instance name, recorded on every metric row.
    pub name: String,

    /// Registered guardrail type to materialize.
    #[serde(rename = "type")]
    pub kind: String,

    /// Disabled entries are skipped at load time.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Execution priority; lower values run first, equal values run
    /// concurrently.
    #[serde(default)]
    pub priority: i32,

    /// Opaque type-specific settings handed to the factory.
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,
}

fn default_true() -> bool {
    true
}

/// Upstream provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Provider identifier (e.g., "openai").
    pub name: String,

    /// API base URL.
    pub base_url: String,

    /// Endpoints this provider serves.
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

/// A single proxied endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    /// Request path (e.g., "/v1/chat/completions").
    pub path: String,

    /// Allowed HTTP methods.
    pub methods: Vec<String>,

    /// Headers injected into the upstream request.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Per-endpoint upstream timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
}
