//! PostgreSQL storage backend.
//!
//! Schema statements are applied at connection time; every batch insert is
//! a single multi-row INSERT inside one transaction.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, QueryBuilder};

use crate::config::PostgresConfig;
use crate::storage::models::{GuardrailMetric, RequestLog};
use crate::storage::{Storage, StorageError};

const MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS request_logs (
        id UUID PRIMARY KEY,
        timestamp TIMESTAMPTZ NOT NULL,
        session_id TEXT,
        request_id UUID NOT NULL,
        endpoint TEXT NOT NULL,
        method TEXT NOT NULL,
        status_code INTEGER,
        latency_ms BIGINT,
        provider TEXT,
        user_agent TEXT,
        remote_addr TEXT,
        request_headers JSONB,
        request_body TEXT,
        response_headers JSONB,
        response_body TEXT,
        error TEXT,
        metadata JSONB,
        guardrails_passed BOOLEAN,
        failed_guardrail_name TEXT,
        guardrail_failure_reason TEXT,
        created_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_request_logs_timestamp ON request_logs(timestamp DESC)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_request_logs_request_id ON request_logs(request_id)",
    "CREATE INDEX IF NOT EXISTS idx_request_logs_endpoint_status ON request_logs(endpoint, status_code)",
    "CREATE INDEX IF NOT EXISTS idx_request_logs_provider ON request_logs(provider)",
    "CREATE INDEX IF NOT EXISTS idx_request_logs_failed ON request_logs(guardrails_passed)
        WHERE guardrails_passed = FALSE",
    "CREATE TABLE IF NOT EXISTS guardrail_metrics (
        id UUID PRIMARY KEY,
        request_id UUID NOT NULL,
        guardrail_name TEXT NOT NULL,
        layer TEXT NOT NULL,
        priority INTEGER NOT NULL,
        start_time TIMESTAMPTZ NOT NULL,
        end_time TIMESTAMPTZ NOT NULL,
        duration_ms BIGINT NOT NULL,
        passed BOOLEAN NOT NULL,
        score DOUBLE PRECISION,
        error TEXT,
        metadata JSONB,
        original_response TEXT,
        override_response TEXT,
        response_overridden BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_guardrail_metrics_request_id ON guardrail_metrics(request_id)",
    "CREATE INDEX IF NOT EXISTS idx_guardrail_metrics_name ON guardrail_metrics(guardrail_name)",
    "CREATE INDEX IF NOT EXISTS idx_guardrail_metrics_layer_passed ON guardrail_metrics(layer, passed)",
    "CREATE INDEX IF NOT EXISTS idx_guardrail_metrics_duration ON guardrail_metrics(duration_ms)",
    "CREATE INDEX IF NOT EXISTS idx_guardrail_metrics_overridden ON guardrail_metrics(response_overridden)
        WHERE response_overridden = TRUE",
];

/// Storage backend over a PostgreSQL connection pool.
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Connect, size the pool per config, and apply schema statements.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .min_connections(config.min_connections)
            .max_lifetime(Duration::from_secs(config.conn_max_lifetime * 60))
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.connection_url())
            .await?;

        for statement in MIGRATIONS {
            sqlx::query(statement).execute(&pool).await?;
        }

        tracing::info!(
            max_connections = config.max_connections,
            "connected to PostgreSQL"
        );
        Ok(Self { pool })
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn insert_request_logs(&self, logs: Vec<RequestLog>) -> Result<(), StorageError> {
        if logs.is_empty() {
            return Ok(());
        }

        let mut builder = QueryBuilder::new(
            "INSERT INTO request_logs (
                id, timestamp, session_id, request_id, endpoint, method,
                status_code, latency_ms, provider, user_agent, remote_addr,
                request_headers, request_body, response_headers, response_body,
                error, metadata, guardrails_passed, failed_guardrail_name,
                guardrail_failure_reason, created_at
            ) ",
        );
        builder.push_values(logs.iter(), |mut row, log| {
            row.push_bind(log.id)
                .push_bind(log.timestamp)
                .push_bind(&log.session_id)
                .push_bind(log.request_id)
                .push_bind(&log.endpoint)
                .push_bind(&log.method)
                .push_bind(log.status_code)
                .push_bind(log.latency_ms)
                .push_bind(&log.provider)
                .push_bind(&log.user_agent)
                .push_bind(&log.remote_addr)
                .push_bind(&log.request_headers)
                .push_bind(&log.request_body)
                .push_bind(&log.response_headers)
                .push_bind(&log.response_body)
                .push_bind(&log.error)
                .push_bind(&log.metadata)
                .push_bind(log.guardrails_passed)
                .push_bind(&log.failed_guardrail_name)
                .push_bind(&log.guardrail_failure_reason)
                .push_bind(log.created_at);
        });

        let mut tx = self.pool.begin().await?;
        builder.build().execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn insert_guardrail_metrics(
        &self,
        metrics: Vec<GuardrailMetric>,
    ) -> Result<(), StorageError> {
        if metrics.is_empty() {
            return Ok(());
        }

        let mut builder = QueryBuilder::new(
            "INSERT INTO guardrail_metrics (
                id, request_id, guardrail_name, layer, priority,
                start_time, end_time, duration_ms, passed, score,
                error, metadata, original_response, override_response,
                response_overridden, created_at
            ) ",
        );
        builder.push_values(metrics.iter(), |mut row, metric| {
            row.push_bind(metric.id)
                .push_bind(metric.request_id)
                .push_bind(&metric.guardrail_name)
                .push_bind(metric.layer.as_str())
                .push_bind(metric.priority)
                .push_bind(metric.start_time)
                .push_bind(metric.end_time)
                .push_bind(metric.duration_ms)
                .push_bind(metric.passed)
                .push_bind(metric.score)
                .push_bind(&metric.error)
                .push_bind(&metric.metadata)
                .push_bind(&metric.original_response)
                .push_bind(&metric.override_response)
                .push_bind(metric.response_overridden)
                .push_bind(metric.created_at);
        });

        let mut tx = self.pool.begin().await?;
        builder.build().execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
