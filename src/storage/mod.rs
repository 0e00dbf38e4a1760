//! Durable storage for request logs and guardrail metrics.
//!
//! # Responsibilities
//! - Define the record types written by the gateway
//! - Batch-insert records through the async sinks
//! - Provide a PostgreSQL backend and an in-memory backend

pub mod memory;
pub mod models;
pub mod postgres;
pub mod sink;

use std::sync::Arc;

use async_trait::async_trait;

pub use memory::MemoryStorage;
pub use models::{GuardrailLayer, GuardrailMetric, RequestLog};
pub use postgres::PostgresStorage;
pub use sink::{BatchWriter, Sink, SinkConfig, SinkStats};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// A storage backend capable of batch-inserting both record types.
///
/// Each insert call is one transaction; a failed batch is discarded by the
/// caller, never retried here.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn insert_request_logs(&self, logs: Vec<RequestLog>) -> Result<(), StorageError>;

    async fn insert_guardrail_metrics(
        &self,
        metrics: Vec<GuardrailMetric>,
    ) -> Result<(), StorageError>;

    /// Release the underlying connections. Called once, after the sinks
    /// have drained.
    async fn close(&self);
}

/// Adapts a shared [`Storage`] into the log sink's batch writer.
pub struct LogBatchWriter(pub Arc<dyn Storage>);

#[async_trait]
impl BatchWriter<RequestLog> for LogBatchWriter {
    async fn write_batch(&self, batch: Vec<RequestLog>) -> Result<(), StorageError> {
        self.0.insert_request_logs(batch).await
    }
}

/// Adapts a shared [`Storage`] into the metrics sink's batch writer.
pub struct MetricBatchWriter(pub Arc<dyn Storage>);

#[async_trait]
impl BatchWriter<GuardrailMetric> for MetricBatchWriter {
    async fn write_batch(&self, batch: Vec<GuardrailMetric>) -> Result<(), StorageError> {
        self.0.insert_guardrail_metrics(batch).await
    }
}
